use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A ranked document returned by the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    /// Namespace the document was retrieved from
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RetrievedDocument {
    /// Display text: the `text` metadata entry, else every entry as `key: value` lines.
    pub fn text(&self) -> String {
        if let Some(Value::String(text)) = self.metadata.get("text") {
            return text.clone();
        }

        self.metadata
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}: {s}"),
                other => format!("{key}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
