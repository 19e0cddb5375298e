use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Citation attached by the reasoning service to a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub address: String,
    /// Absent means no map citation was found, which is distinct from an
    /// empty citation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_link: Option<String>,
}

pub const MAPS_URI_MARKER: &str = "google.com/maps";

/// Pulls the first candidate's grounding chunks out of a raw generation
/// payload. Every level of nesting may be absent; the result is then simply
/// empty, never an error.
pub fn grounding_chunks(payload: &Value) -> Vec<Value> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| {
            candidate
                .get("groundingMetadata")
                .or_else(|| candidate.get("grounding_metadata"))
        })
        .and_then(|metadata| {
            metadata
                .get("groundingChunks")
                .or_else(|| metadata.get("grounding_chunks"))
        })
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Web citations with both a uri and a title; chunks missing either are
/// dropped even when other fields are populated.
pub fn web_sources(chunks: &[Value]) -> Vec<SourceRef> {
    let mut out = Vec::new();
    for chunk in chunks {
        let Some(web) = chunk.get("web").and_then(Value::as_object) else {
            continue;
        };
        let uri = web.get("uri").and_then(Value::as_str).unwrap_or_default();
        let title = web.get("title").and_then(Value::as_str).unwrap_or_default();
        if uri.is_empty() || title.is_empty() {
            continue;
        }
        out.push(SourceRef {
            uri: uri.to_string(),
            title: title.to_string(),
        });
    }
    out
}

/// Deduplicates by uri, first occurrence wins, input order preserved.
pub fn dedupe_by_uri(sources: Vec<SourceRef>) -> Vec<SourceRef> {
    let mut unique: IndexMap<String, SourceRef> = IndexMap::new();
    for source in sources {
        unique.entry(source.uri.clone()).or_insert(source);
    }
    unique.into_values().collect()
}

/// First citation uri that points into the map service.
pub fn first_map_link(chunks: &[Value]) -> Option<String> {
    for chunk in chunks {
        let uri = chunk
            .get("web")
            .and_then(Value::as_object)
            .and_then(|web| web.get("uri"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if uri.contains(MAPS_URI_MARKER) {
            return Some(uri.to_string());
        }
    }
    None
}

/// Address shown when the service yields nothing usable.
pub fn fallback_address(lat: f64, lng: f64) -> String {
    format!("{lat:.6}, {lng:.6}")
}

/// Joined text parts of the first candidate, or `None` when the payload
/// carries no usable text.
pub fn response_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(Value::as_object)
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}
