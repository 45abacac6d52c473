//! Rewrites notebook-authored job scripts for unattended execution.
//!
//! Job scripts are typically authored in a notebook environment where lines
//! such as `!pip install tensorflow` are shell escapes interpreted by the
//! notebook kernel. On a plain host those lines are syntax errors, so the
//! transformer drops them before upload. The scripts also rely on `import
//! os` for reading forwarded environment variables, so the transformer
//! guarantees exactly one such import is present.

/// The standard-library import every job script must carry.
const REQUIRED_IMPORT: &str = "import os";

/// A job script rewritten for a generic remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransformedScript {
    /// File name of the original script, used for the remote path.
    pub original_name: String,
    /// Rewritten script text.
    pub text: String,
    /// Notebook-only lines removed during the rewrite, kept for diagnostics.
    pub dropped_lines: Vec<String>,
}

/// Rewrites `source` so it runs unattended on a remote host.
///
/// Every line whose trimmed form begins with `!` (a notebook shell escape)
/// is dropped; all other lines are preserved in their original order. When
/// the script lacks `import os`, the import is inserted immediately before
/// the first existing `import`/`from` line, or at the top when the script
/// has no imports at all. Re-transforming already transformed text is a
/// no-op apart from allocating a fresh value.
#[must_use]
pub fn transform(original_name: impl Into<String>, source: &str) -> TransformedScript {
    let mut dropped_lines = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut has_required_import = false;

    for line in source.lines() {
        if line.trim_start().starts_with('!') {
            dropped_lines.push(line.trim().to_owned());
            continue;
        }
        if is_required_import(line) {
            has_required_import = true;
        }
        lines.push(line);
    }

    let mut owned: Vec<String> = lines.iter().map(|line| (*line).to_owned()).collect();
    if !has_required_import {
        let insert_index = owned
            .iter()
            .position(|line| is_import_statement(line))
            .unwrap_or(0);
        owned.insert(insert_index, REQUIRED_IMPORT.to_owned());
    }

    TransformedScript {
        original_name: original_name.into(),
        text: owned.join("\n"),
        dropped_lines,
    }
}

/// Matches `import os` as a standalone statement, including the
/// `import os.path`-style prefix forms that also bind the `os` name.
fn is_required_import(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed == REQUIRED_IMPORT
        || trimmed.starts_with("import os.")
        || trimmed.starts_with("import os ")
        || trimmed.starts_with("import os,")
}

fn is_import_statement(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ") || trimmed.starts_with("from ")
}
