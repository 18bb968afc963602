//! Make-style dependency manifest output.

use std::fmt::Write as _;
use std::path::Path;

use crate::linker::FileRecord;

/// Render `<output>: \` followed by one indented prerequisite per line in
/// first-open order, with no trailing backslash on the last line.
pub fn render(output: &Path, manifest: &[FileRecord]) -> String {
    let mut out = String::new();
    if manifest.is_empty() {
        let _ = writeln!(out, "{}:", output.display());
        return out;
    }
    let _ = writeln!(out, "{}: \\", output.display());
    for (i, record) in manifest.iter().enumerate() {
        if i + 1 < manifest.len() {
            let _ = writeln!(out, "  {} \\", record.path.display());
        } else {
            let _ = writeln!(out, "  {}", record.path.display());
        }
    }
    out
}
