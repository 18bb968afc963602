//! Indentation lexer.
//!
//! Splits template source into lines, merges paren continuations into
//! their opening head line, and runs a space-count stack over the result
//! to produce `LINE`/`INDENT`/`DEDENT`/`BLANK`/`EOF` tokens.

use std::borrow::Cow;

use crate::error::{ErrorKind, ParseError};

/// Position in a template source, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Line,
    Indent,
    Dedent,
    Blank,
    Eof,
}

/// A single token. `text` is non-empty only for `Line` tokens and borrows
/// from the source buffer, except for heads merged by paren continuation
/// which own their joined text.
#[derive(Debug, Clone)]
pub struct Tok<'a> {
    pub kind: TokKind,
    pub text: Cow<'a, str>,
    pub pos: Pos,
    pub level: usize,
}

impl Tok<'_> {
    fn structural(kind: TokKind, pos: Pos, level: usize) -> Self {
        Self {
            kind,
            text: Cow::Borrowed(""),
            pos,
            level,
        }
    }
}

struct LineRec<'a> {
    /// Leading space count. A tab terminates the count and stays in the
    /// content.
    indent: usize,
    content: Cow<'a, str>,
    line_no: u32,
}

fn split_lines(source: &str) -> Vec<LineRec<'_>> {
    let mut out = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let bytes = raw.as_bytes();
        let mut sp = 0;
        while sp < bytes.len() && bytes[sp] == b' ' {
            sp += 1;
        }
        out.push(LineRec {
            indent: sp,
            content: Cow::Borrowed(&raw[sp..]),
            line_no: (i + 1) as u32,
        });
    }
    out
}

/// True when the line would parse as an HTML element head rather than a
/// directive. Only heads take part in paren continuation.
fn is_head_line(s: &str) -> bool {
    let t = s.trim_end();
    if t.is_empty() || t == "." || t == "block" || t == "external" || t == "external struct" {
        return false;
    }
    if t.starts_with("extends ")
        || t.starts_with("block ")
        || t.starts_with("append ")
        || t.starts_with("prepend ")
        || t.starts_with("mixin ")
        || t.starts_with("include ")
        || t.starts_with("- ")
        || t.starts_with("= ")
    {
        return false;
    }
    !t.starts_with('+') && !t.starts_with('|')
}

/// Running count of unclosed parens, ignoring any inside quoted strings.
fn paren_balance(s: &str, mut balance: i32) -> i32 {
    let b = s.as_bytes();
    let mut quote = 0u8;
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if quote != 0 {
            if c == b'\\' {
                i += 1;
            } else if c == quote {
                quote = 0;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = c,
                b'(' => balance += 1,
                b')' => balance -= 1,
                _ => {}
            }
        }
        i += 1;
    }
    balance
}

/// Merge continuation lines into heads whose paren balance is open.
/// Absorbed lines never reach the indent stack, so the surrounding block
/// structure is exactly as if they were written on the head line. Lines
/// inside a `.`-opened text block are verbatim and never merge.
fn merge_continuations(lines: Vec<LineRec<'_>>) -> Result<Vec<LineRec<'_>>, ParseError> {
    let mut out: Vec<LineRec> = Vec::with_capacity(lines.len());
    let mut it = lines.into_iter();
    // indent of the line that opened a text block, while inside one
    let mut text_block: Option<usize> = None;
    while let Some(mut line) = it.next() {
        if let Some(open_indent) = text_block {
            if line.content.is_empty() || line.indent > open_indent {
                out.push(line);
                continue;
            }
            text_block = None;
        }

        if !line.content.is_empty() && is_head_line(&line.content) {
            let mut balance = paren_balance(&line.content, 0);
            if balance > 0 {
                let open_pos = Pos::new(line.line_no, (line.indent + 1) as u32);
                let mut merged = line.content.trim_end().to_string();
                loop {
                    let Some(next) = it.next() else {
                        return Err(ParseError::new(
                            ErrorKind::UnclosedContinuation,
                            "unbalanced '(' in element head runs to end of file",
                            open_pos,
                        )
                        .with_help("close the attribute list with ')'"));
                    };
                    let content = next.content.trim();
                    if content.is_empty() {
                        continue;
                    }
                    merged.push(' ');
                    merged.push_str(content);
                    balance = paren_balance(content, balance);
                    if balance <= 0 {
                        break;
                    }
                }
                line.content = Cow::Owned(merged);
            }
        }

        // a trailing '.' on a head (or a bare '.') opens a literal text
        // block whose deeper lines must not be touched
        let trimmed = line.content.trim_end();
        if trimmed == "." || (trimmed.ends_with('.') && is_head_line(trimmed)) {
            text_block = Some(line.indent);
        }
        out.push(line);
    }
    Ok(out)
}

/// Lex a template source into an indent-aware token stream. The stream
/// always ends with the DEDENTs back to level zero followed by one EOF.
pub fn lex(source: &str) -> Result<Vec<Tok<'_>>, ParseError> {
    let lines = merge_continuations(split_lines(source))?;

    let mut out = Vec::with_capacity(lines.len() + 8);
    let mut stack: Vec<usize> = vec![0];
    let mut eof_line = 1u32;

    for line in lines {
        eof_line = line.line_no + 1;

        if line.content.is_empty() {
            out.push(Tok::structural(
                TokKind::Blank,
                Pos::new(line.line_no, 1),
                stack.len() - 1,
            ));
            continue;
        }

        while line.indent < *stack.last().unwrap() {
            stack.pop();
            out.push(Tok::structural(
                TokKind::Dedent,
                Pos::new(line.line_no, 1),
                stack.len() - 1,
            ));
        }
        if line.indent > *stack.last().unwrap() {
            stack.push(line.indent);
            out.push(Tok::structural(
                TokKind::Indent,
                Pos::new(line.line_no, 1),
                stack.len() - 1,
            ));
        }

        let pos = Pos::new(line.line_no, (line.indent + 1) as u32);
        let level = stack.len() - 1;
        out.push(Tok {
            kind: TokKind::Line,
            text: line.content,
            pos,
            level,
        });
    }

    while stack.len() > 1 {
        stack.pop();
        out.push(Tok::structural(
            TokKind::Dedent,
            Pos::new(eof_line, 1),
            stack.len() - 1,
        ));
    }
    out.push(Tok::structural(TokKind::Eof, Pos::new(eof_line, 1), 0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokKind> {
        lex(source).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn flat_lines() {
        assert_eq!(
            kinds("a\nb\n"),
            vec![TokKind::Line, TokKind::Line, TokKind::Eof]
        );
    }

    #[test]
    fn nested_indentation() {
        use TokKind::*;
        assert_eq!(
            kinds("ul\n  li\n    a\n  li\n"),
            vec![Line, Indent, Line, Indent, Line, Dedent, Line, Dedent, Eof]
        );
    }

    #[test]
    fn blank_lines_leave_the_stack_alone() {
        use TokKind::*;
        assert_eq!(
            kinds("div\n\n  p\n"),
            vec![Line, Blank, Indent, Line, Dedent, Eof]
        );
    }

    #[test]
    fn dedents_close_every_open_level_before_eof() {
        let toks = lex("a\n  b\n    c\n").unwrap();
        let dedents = toks.iter().filter(|t| t.kind == TokKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(toks.last().unwrap().kind, TokKind::Eof);
    }

    #[test]
    fn line_positions_are_one_based() {
        let toks = lex("div\n  p hi\n").unwrap();
        let lines: Vec<_> = toks.iter().filter(|t| t.kind == TokKind::Line).collect();
        assert_eq!(lines[0].pos, Pos::new(1, 1));
        assert_eq!(lines[1].pos, Pos::new(2, 3));
    }

    #[test]
    fn tab_terminates_the_space_count() {
        let toks = lex("div\n \tp\n").unwrap();
        let line = &toks[2];
        assert_eq!(line.kind, TokKind::Line);
        // one space counted, the tab stays in the content
        assert_eq!(line.pos.col, 2);
        assert_eq!(line.text, "\tp");
    }

    #[test]
    fn trailing_line_without_newline_is_consumed() {
        assert_eq!(kinds("p hi"), vec![TokKind::Line, TokKind::Eof]);
    }

    #[test]
    fn lexing_is_deterministic() {
        let source = "div\n  p one\n\n  p two\n";
        let a = lex(source).unwrap();
        let b = lex(source).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.kind, y.kind);
            assert_eq!(x.text, y.text);
            assert_eq!(x.pos, y.pos);
            assert_eq!(x.level, y.level);
        }
    }

    #[test]
    fn continuation_merges_attribute_lines() {
        let toks = lex("div(class=\"a\"\n    id=\"b\")\n  p hi\n").unwrap();
        let lines: Vec<_> = toks.iter().filter(|t| t.kind == TokKind::Line).collect();
        assert_eq!(lines[0].text, "div(class=\"a\" id=\"b\")");
        // `p hi` still nests under the div
        use TokKind::*;
        let k: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(k, vec![Line, Indent, Line, Dedent, Eof]);
    }

    #[test]
    fn continuation_keeps_following_siblings() {
        let toks = lex("ul\n  li(a=\"1\"\nb=\"2\")\n  li two\n").unwrap();
        let lines: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokKind::Line)
            .map(|t| t.text.to_string())
            .collect();
        assert_eq!(lines, vec!["ul", "li(a=\"1\" b=\"2\")", "li two"]);
    }

    #[test]
    fn continuation_ignores_parens_in_quotes() {
        let toks = lex("a(href=\"x)\" title=\"y\")\n").unwrap();
        assert_eq!(toks[0].text, "a(href=\"x)\" title=\"y\")");
        assert_eq!(toks.len(), 2);
    }

    #[test]
    fn continuation_skips_blank_lines() {
        let toks = lex("div(a=\"1\"\n\n  b=\"2\")\n").unwrap();
        assert_eq!(toks[0].text, "div(a=\"1\" b=\"2\")");
    }

    #[test]
    fn unclosed_continuation_is_an_error() {
        let err = lex("div(class=\"a\"\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnclosedContinuation);
        assert_eq!(err.pos, Pos::new(1, 1));
    }

    #[test]
    fn text_block_lines_never_merge() {
        // unbalanced parens inside a literal text block are content, not
        // attribute continuations
        let toks = lex("script.\n  call(\n    1);\np after\n").unwrap();
        let lines: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokKind::Line)
            .map(|t| t.text.to_string())
            .collect();
        assert_eq!(lines, vec!["script.", "call(", "1);", "p after"]);
    }

    #[test]
    fn code_lines_do_not_continue() {
        // an unbalanced paren in a code fragment is the host language's
        // business, not the lexer's
        let toks = lex("- call(\n").unwrap();
        assert_eq!(toks[0].text, "- call(");
    }
}
