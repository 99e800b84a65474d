//! Locate JSON objects embedded in free text.
//!
//! Each `{` is tried as the start of a value with `serde_json`'s incremental
//! deserializer; the first candidate that decodes to a complete object wins.

use serde_json::{Deserializer, Map, Value};

/// Upper bound on bytes examined from any single `{` candidate.
pub const MAX_SCAN_BYTES: usize = 16 * 1024;
/// Upper bound on `{` candidates tried per text.
pub const MAX_CANDIDATES: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct JsonSpan {
    /// Byte offset of the opening brace.
    pub start: usize,
    /// Byte offset one past the closing brace.
    pub end: usize,
    pub object: Map<String, Value>,
}

pub fn first_object(text: &str) -> Option<JsonSpan> {
    find_object(text, MAX_SCAN_BYTES)
}

pub fn find_object(text: &str, max_scan: usize) -> Option<JsonSpan> {
    for (start, _) in text.match_indices('{').take(MAX_CANDIDATES) {
        let mut limit = text.len().min(start.saturating_add(max_scan));
        while !text.is_char_boundary(limit) {
            limit -= 1;
        }

        let window = &text[start..limit];
        let mut values = Deserializer::from_str(window).into_iter::<Value>();
        if let Some(Ok(Value::Object(object))) = values.next() {
            return Some(JsonSpan {
                start,
                end: start + values.byte_offset(),
                object,
            });
        }
    }
    None
}
