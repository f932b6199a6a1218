//! Metadata extractor JSON decoding.

use memtriage_core::MetadataRecord;
use serde_json::{Map, Value};
use tracing::error;

/// Group that collects top-level scalar tags such as `SourceFile`.
pub const UNGROUPED: &str = "Ungrouped";

const FILE_TYPE_TAGS: [&str; 2] = ["FileType", "MIMEType"];

/// Decodes grouped extractor output (`-json -g`).
///
/// Only the first element of the top-level array is used. Malformed JSON,
/// an empty array or a non-object element yields an empty record.
///
/// # Examples
///
/// ```
/// use memtriage_engine::parser::parse_metadata;
///
/// let stdout = r#"[{"SourceFile": "a.png", "File": {"FileType": "PNG", "FileSize": 1024}}]"#;
/// let record = parse_metadata(stdout);
/// assert_eq!(record.file_type.as_deref(), Some("PNG"));
/// assert_eq!(record.tag_count(), 3);
/// ```
pub fn parse_metadata(stdout: &str) -> MetadataRecord {
    let parsed: Value = match serde_json::from_str(stdout) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "Failed to parse metadata JSON");
            return MetadataRecord::default();
        }
    };

    let Some(Value::Object(first)) = parsed.as_array().and_then(|items| items.first()) else {
        return MetadataRecord::default();
    };

    let mut record = MetadataRecord::default();
    for (key, value) in first {
        match value {
            Value::Object(tags) => {
                for (tag, tag_value) in tags {
                    record.insert(key.as_str(), tag.as_str(), tag_value.clone());
                }
            }
            scalar => record.insert(UNGROUPED, key.as_str(), scalar.clone()),
        }
    }
    record.file_type = file_type(first);
    record
}

fn file_type(first: &Map<String, Value>) -> Option<String> {
    if let Some(found) = lookup_file_type(first) {
        return Some(found);
    }
    if let Some(Value::Object(file_group)) = first.get("File") {
        if let Some(found) = lookup_file_type(file_group) {
            return Some(found);
        }
    }
    first.values().find_map(|value| match value {
        Value::Object(group) => lookup_file_type(group),
        _ => None,
    })
}

fn lookup_file_type(tags: &Map<String, Value>) -> Option<String> {
    FILE_TYPE_TAGS.iter().find_map(|tag| match tags.get(*tag)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    })
}
