use serde::{Deserialize, Serialize};

/// Provider-independent result of one completion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CanonicalReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }
}

/// Source attribution attached to a reply (Responses API annotations).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Citation {
    UrlCitation {
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        start_index: Option<u64>,
        #[serde(default)]
        end_index: Option<u64>,
    },
    FileCitation {
        file_id: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        index: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    WebSearch,
    FileSearch,
}

/// A provider-side search step observed in a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub kind: SearchKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One decoded unit of a streaming reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Incremental text fragment.
    Text(String),
    /// The provider signalled the end of the stream.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_tags_follow_annotation_types() {
        let c: Citation = serde_json::from_value(serde_json::json!({
            "type": "url_citation",
            "url": "https://example.com",
            "title": "Example",
            "start_index": 3,
            "end_index": 9
        }))
        .unwrap();
        assert!(matches!(c, Citation::UrlCitation { ref url, .. } if url == "https://example.com"));

        let unknown: Citation =
            serde_json::from_value(serde_json::json!({"type": "container_file_citation"})).unwrap();
        assert_eq!(unknown, Citation::Unknown);
    }

    #[test]
    fn empty_collections_are_omitted() {
        let json = serde_json::to_value(CanonicalReply::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hi"}));
    }
}
