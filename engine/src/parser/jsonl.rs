//! Newline-delimited JSON decoding for plugin output files.

use std::path::Path;

use rayon::prelude::*;
use serde_json::Value;
use tracing::{error, warn};

/// Line count above which lines are decoded on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4096;

/// Characters of a malformed line echoed into the log.
const PREVIEW_CHARS: usize = 100;

/// Decodes one JSON value per non-blank line.
///
/// Malformed lines are logged and skipped; line order is preserved.
///
/// # Examples
///
/// ```
/// use memtriage_engine::parser::parse_jsonl;
///
/// let rows = parse_jsonl("{\"PID\": 4}\nnot json\n\n{\"PID\": 88}\n");
/// assert_eq!(rows.len(), 2);
/// assert_eq!(rows[1]["PID"], 88);
/// ```
pub fn parse_jsonl(text: &str) -> Vec<Value> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let decoded: Vec<Result<Value, (&str, serde_json::Error)>> =
        if lines.len() >= PARALLEL_THRESHOLD {
            lines.par_iter().map(|line| decode_line(line)).collect()
        } else {
            lines.iter().map(|line| decode_line(line)).collect()
        };

    decoded
        .into_iter()
        .filter_map(|row| match row {
            Ok(value) => Some(value),
            Err((line, e)) => {
                let preview = memtriage_core::truncate_chars(line, PREVIEW_CHARS);
                warn!(error = %e, line = %preview, "Skipping malformed JSON line");
                None
            }
        })
        .collect()
}

fn decode_line(line: &str) -> Result<Value, (&str, serde_json::Error)> {
    serde_json::from_str(line).map_err(|e| (line, e))
}

/// Decodes a plugin output file.
///
/// Returns `None` when the file is missing, unreadable or zero-length.
/// A file holding only blank or malformed lines decodes to an empty
/// sequence.
pub fn parse_jsonl_file(path: &Path) -> Option<Vec<Value>> {
    if !path.exists() {
        return None;
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read plugin output");
            return None;
        }
    };
    if bytes.is_empty() {
        return None;
    }
    Some(parse_jsonl(&String::from_utf8_lossy(&bytes)))
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use super::*;

    #[test]
    fn test_skips_malformed_and_blank_lines() {
        let text = "{\"a\":1}\n{broken\n   \n[1,2]\n\"str\"\n";
        let rows = parse_jsonl(text);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_large_input_keeps_order() {
        let mut text = String::new();
        for i in 0..(PARALLEL_THRESHOLD + 10) {
            if i % 7 == 0 {
                text.push_str("garbage\n");
            }
            writeln!(text, "{{\"n\":{i}}}").unwrap();
        }
        let rows = parse_jsonl(&text);
        assert_eq!(rows.len(), PARALLEL_THRESHOLD + 10);
        assert!(rows.iter().enumerate().all(|(i, row)| row["n"] == i));
    }

    #[test]
    fn test_file_states() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_jsonl_file(&dir.path().join("missing.json")).is_none());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "").unwrap();
        assert!(parse_jsonl_file(&empty).is_none());

        let blank = dir.path().join("blank.json");
        std::fs::write(&blank, "\n\n").unwrap();
        assert_eq!(parse_jsonl_file(&blank), Some(Vec::new()));

        let rows = dir.path().join("rows.json");
        std::fs::write(&rows, "{\"PID\":4}\n{\"PID\":8}\n").unwrap();
        assert_eq!(parse_jsonl_file(&rows).map(|r| r.len()), Some(2));
    }
}
