//! Widgets: small structured payloads the model embeds in its reply using
//! `<!KIND key=[value] ...!>` tags.
pub mod extractor;
pub mod render;

pub use extractor::WidgetExtractor;
pub use render::{DefaultWidgetRenderer, WidgetRenderer};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WIDGET_PREFIX: &str = "<<!!WIDGET:";
pub const WIDGET_SUFFIX: &str = "!!>>";
pub const WIDGET_FAILED: &str = "(widget processing failed)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub content: Value,
    #[serde(rename = "type")]
    pub widget_type: String,
}

impl Widget {
    pub fn new(widget_type: &str, content: Value) -> Self {
        Self {
            content,
            widget_type: widget_type.to_string(),
        }
    }

    /// The token that replaces the tag in forwarded text.
    pub fn to_token(&self) -> anyhow::Result<String> {
        Ok(format!("{}{}{}", WIDGET_PREFIX, serde_json::to_string(self)?, WIDGET_SUFFIX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

/// Per-session state tools leave behind for widgets to refer back to.
/// Stored with the thread so a follow-up can still refer to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetContext {
    /// Results of the last place search, addressed by index in `POI-MAP`.
    #[serde(default)]
    pub pois: Vec<Poi>,
    #[serde(default)]
    pub last_route: Option<Value>,
}
