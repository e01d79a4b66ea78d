use serde::{Deserialize, Serialize};

/// One item as returned by the provider. Every field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Caller-facing search result shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

impl From<ResultItem> for SearchResult {
    fn from(item: ResultItem) -> Self {
        Self {
            title: item.title.unwrap_or_default(),
            snippet: item.snippet.unwrap_or_default(),
            link: item.link.unwrap_or_default(),
        }
    }
}

// Provider API types
#[derive(Debug, Deserialize)]
pub struct CseResponse {
    #[serde(default)]
    pub items: Option<Vec<ResultItem>>,
}

// HTTP front types
// `query` and `num` stay untyped so bad input gets the pipeline's own
// validation and count rules instead of a deserialization rejection.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsRequest {
    #[serde(default)]
    pub query: serde_json::Value,
    #[serde(default)]
    pub num: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub items: Vec<ResultItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopResultsRequest {
    #[serde(default)]
    pub queries: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopResultsResponse {
    pub links: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheOpResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
