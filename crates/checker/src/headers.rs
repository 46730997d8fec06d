use std::sync::OnceLock;

use copycheck_core::models::CheckError;
use regex::Regex;

const BLOCK_EXPECTED: &str = "\nExpected to see:\n/*\n * Copyright contributors to the Galasa project\n *\n * SPDX-License-Identifier: EPL-2.0\n */";
const HASH_EXPECTED: &str = "\nExpected to see:\n#\n# Copyright contributors to the Galasa project\n#\n# SPDX-License-Identifier: EPL-2.0\n#";

/// The comment styles a copyright header can be written in. A closed set:
/// adding a style means adding a variant and its routing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// `/* ... */` comment blocks (java, go, ts, tsx, js).
    Block,
    /// Leading `#` comment lines (yaml, sh).
    Hash,
}

fn block_comment_pattern() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

// The required phrase: the copyright holder line, any number of bare
// continuation lines, then the SPDX identifier line.
fn block_copyright_pattern() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"Copyright contributors to the Galasa project(\s*[*]\s*)*\s*[*]\s*SPDX-License-Identifier:\s*EPL-2[.]0",
        )
        .unwrap()
    })
}

fn hash_copyright_pattern() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"Copyright contributors to the Galasa project(\s*[#]\s*)*\s*[#]\s*SPDX-License-Identifier:\s*EPL-2[.]0",
        )
        .unwrap()
    })
}

impl HeaderStyle {
    /// Inspects raw file content and returns a verdict; `None` means the
    /// header is present, well-formed, and unique.
    pub fn check(&self, content: &str, filename: &str) -> Option<CheckError> {
        match self {
            Self::Block => check_block(content, filename),
            Self::Hash => check_hash(content, filename),
        }
    }
}

fn check_block(content: &str, filename: &str) -> Option<CheckError> {
    let Some(comment) = block_comment_pattern().find(content) else {
        return Some(CheckError {
            path: filename.to_string(),
            message: format!("Did not find comment block.{BLOCK_EXPECTED}"),
            location: 0,
        });
    };
    if let Some(error) =
        check_comment_block(comment.as_str(), filename, block_copyright_pattern(), BLOCK_EXPECTED)
    {
        return Some(error);
    }
    // Only flagged once the block's content itself has passed.
    if comment.start() != 0 {
        return Some(CheckError {
            path: filename.to_string(),
            message: format!(
                "Comment block containing copyright should be at the top of the file.{BLOCK_EXPECTED}"
            ),
            location: comment.start(),
        });
    }
    None
}

fn check_hash(content: &str, filename: &str) -> Option<CheckError> {
    // Shell scripts start with a shebang; drop that line before scanning.
    let content = if filename.ends_with(".sh") {
        match content.find('\n') {
            Some(index) => content[index..].trim(),
            None => "",
        }
    } else {
        content
    };

    let mut block = String::new();
    for line in content.lines() {
        if !line.starts_with('#') {
            break;
        }
        block.push_str(line);
        block.push('\n');
    }

    // Any leading non-comment content means no block at all; there is no
    // "found but misplaced" verdict for hash-style files.
    if block.is_empty() {
        return Some(CheckError {
            path: filename.to_string(),
            message: format!("A comment block is missing at the start of the file.{HASH_EXPECTED}"),
            location: 0,
        });
    }
    check_comment_block(&block, filename, hash_copyright_pattern(), HASH_EXPECTED)
}

fn check_comment_block(
    block: &str,
    filename: &str,
    pattern: &Regex,
    expected: &str,
) -> Option<CheckError> {
    let count = pattern.find_iter(block).count();
    if count == 0 {
        return Some(CheckError {
            path: filename.to_string(),
            message: format!("Did not find copyright text in first comment block.{expected}"),
            location: 0,
        });
    }
    if count > 1 {
        return Some(CheckError {
            path: filename.to_string(),
            message: format!("Found too many copyright texts in first comment block{expected}"),
            location: 0,
        });
    }
    None
}
