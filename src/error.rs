use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::parser::Pos;

/// Kind of template error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnexpectedIndent,
    UnexpectedDedent,
    MissingIndent,
    MissingDedent,
    LeadingIndent,
    UnclosedContinuation,
    UnclosedQuote,
    MalformedMixin,
    AnonymousBlock,
    DuplicateId,
    UnexpectedBracket,
    IncludeCycle,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnexpectedIndent => "Unexpected indent",
            ErrorKind::UnexpectedDedent => "Unexpected dedent",
            ErrorKind::MissingIndent => "Missing indent",
            ErrorKind::MissingDedent => "Missing dedent",
            ErrorKind::LeadingIndent => "Leading indentation",
            ErrorKind::UnclosedContinuation => "Unclosed parenthesis",
            ErrorKind::UnclosedQuote => "Unclosed quoted string",
            ErrorKind::MalformedMixin => "Malformed mixin header",
            ErrorKind::AnonymousBlock => "Anonymous block outside mixin",
            ErrorKind::DuplicateId => "Duplicate element id",
            ErrorKind::UnexpectedBracket => "Unexpected bracket",
            ErrorKind::IncludeCycle => "Include cycle",
        }
    }
}

/// Positioned error raised while lexing, parsing, linking or analyzing an
/// element head.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Pos,
    pub help: Option<String>,
}

impl ParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
            help: None,
        }
    }

    /// Add help text shown below the source context.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

/// Error during a whole-template compilation.
#[derive(Debug)]
pub enum CompileError {
    /// A positioned template error, carrying the offending file and its
    /// source text for diagnostic rendering.
    Parse {
        error: ParseError,
        file: PathBuf,
        source: Arc<str>,
    },
    /// A template or included file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// A replace-map slot no longer matches the tree it describes. This is
    /// an implementation bug, not a user error.
    Invariant(String),
}

impl CompileError {
    pub fn parse(error: ParseError, file: impl Into<PathBuf>, source: Arc<str>) -> Self {
        CompileError::Parse {
            error,
            file: file.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }

    /// Render the error with source context (no color)
    pub fn render(&self) -> String {
        self.render_inner(false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self) -> String {
        self.render_inner(true)
    }

    fn render_inner(&self, color: bool) -> String {
        let red = if color { "\x1b[1;31m" } else { "" };
        let reset = if color { "\x1b[0m" } else { "" };
        match self {
            CompileError::Parse {
                error,
                file,
                source,
            } => render_parse(error, file, source, color),
            CompileError::Io { path, source } => {
                format!(
                    "{}error:{} failed to read {}: {}\n",
                    red,
                    reset,
                    path.display(),
                    source
                )
            }
            CompileError::Invariant(message) => {
                format!("{}error:{} internal: {}\n", red, reset, message)
            }
        }
    }
}

fn render_parse(error: &ParseError, file: &Path, source: &str, color: bool) -> String {
    // Visual hierarchy: red for the error itself, dim for structural chrome
    let red = if color { "\x1b[1;31m" } else { "" };
    let dim = if color { "\x1b[2m" } else { "" };
    let underline = if color { "\x1b[4m" } else { "" };
    let cyan = if color { "\x1b[1;38;5;73m" } else { "" };
    let reset = if color { "\x1b[0m" } else { "" };

    let mut out = String::new();

    // Leading blank line for visual separation
    out.push('\n');

    let location = format!("{}:{}:{}", file.display(), error.pos.line, error.pos.col);
    if color {
        // OSC 8 hyperlink: \x1b]8;;URL\x07TEXT\x1b]8;;\x07
        let abs_path = file
            .canonicalize()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| file.display().to_string());
        out.push_str(&format!(
            " {}file:{} \x1b]8;;file://{}\x07{}{}{}\x1b]8;;\x07\n",
            dim, reset, abs_path, underline, location, reset
        ));
    } else {
        out.push_str(&format!(" file: {}\n", location));
    }

    out.push_str(&format!("{}error:{} {}\n", red, reset, error.message));

    // Source context with a caret under the offending column
    let line_idx = error.pos.line.saturating_sub(1) as usize;
    if let Some(source_line) = source.lines().nth(line_idx) {
        let width = error.pos.line.to_string().len().max(2);
        out.push_str(&format!("{}{:>w$} |{}\n", dim, "", reset, w = width));
        out.push_str(&format!(
            "{}{:>w$} |{} {}\n",
            dim,
            error.pos.line,
            reset,
            source_line,
            w = width
        ));
        let spaces = " ".repeat(error.pos.col.saturating_sub(1) as usize);
        out.push_str(&format!(
            "{}{:>w$} |{} {}{}^{}\n",
            dim,
            "",
            reset,
            spaces,
            red,
            reset,
            w = width
        ));
    }

    if let Some(help) = &error.help {
        out.push('\n');
        for (i, help_line) in help.lines().enumerate() {
            if i == 0 {
                out.push_str(&format!(" {}help:{} {}\n", cyan, reset, help_line));
            } else {
                out.push_str(&format!("       {}\n", help_line));
            }
        }
    }

    out.push('\n');
    out
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse { error, file, .. } => {
                write!(f, "{}: {}", file.display(), error)
            }
            CompileError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            CompileError::Invariant(message) => write!(f, "internal: {}", message),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_points_at_offending_column() {
        let source: Arc<str> = Arc::from("div\n  span#a#b\n");
        let error = ParseError::new(ErrorKind::DuplicateId, "element id must be unique", Pos::new(2, 3));
        let rendered = CompileError::parse(error, "page.at", source).render();

        assert!(rendered.contains("file: page.at:2:3"));
        assert!(rendered.contains("error: element id must be unique"));
        assert!(rendered.contains("span#a#b"));
        // caret sits under column 3
        assert!(rendered.contains("|   ^"));
    }

    #[test]
    fn render_includes_help_text() {
        let source: Arc<str> = Arc::from("mixin b\n");
        let error = ParseError::new(ErrorKind::MalformedMixin, "expected '(' after mixin name", Pos::new(1, 1))
            .with_help("declare arguments as name(a, b)");
        let rendered = CompileError::parse(error, "page.at", source).render();
        assert!(rendered.contains("help: declare arguments as name(a, b)"));
    }
}
