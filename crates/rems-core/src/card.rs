//! CDS Hooks cards and response envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SOURCE_LABEL: &str = "REMS Intermediary";
pub const SOURCE_URL: &str = "https://github.com/mcode/rems-intermediary";

/// Indicator used on cards the intermediary writes itself.
pub const WARNING_INDICATOR: &str = "warning";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSource {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for CardSource {
    fn default() -> Self {
        Self {
            label: SOURCE_LABEL.to_string(),
            url: Some(SOURCE_URL.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub indicator: String,
    pub source: CardSource,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Card {
    /// Card describing why a hook request could not be processed.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            summary: "Bad Request".to_string(),
            detail: Some(reason.into()),
            indicator: WARNING_INDICATOR.to_string(),
            source: CardSource::default(),
            extra: Map::new(),
        }
    }
}

/// Response body returned to the calling workflow.
///
/// Cards received from administrators are kept as raw JSON and relayed
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdsResponse {
    #[serde(default)]
    pub cards: Vec<Value>,
}

impl CdsResponse {
    /// "No suggestions".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let card = serde_json::to_value(Card::bad_request(reason)).unwrap_or(Value::Null);
        Self { cards: vec![card] }
    }

    pub fn from_cards(cards: Vec<Value>) -> Self {
        Self { cards }
    }

    /// Cards of a downstream response body; anything malformed yields none.
    pub fn cards_in(body: &Value) -> Vec<Value> {
        body.get("cards")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}
