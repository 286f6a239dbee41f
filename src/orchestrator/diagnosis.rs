//! Diagnosis extraction from the diagnosis stage's narrative.
//!
//! The diagnosis instruction asks the model to end with four markers:
//!
//! ```text
//! ROOT_CAUSE: ...
//! SERVICE: ...
//! CONFIGURATION_ITEM: ...
//! REQUIRED_ACTION: ...
//! ```
//!
//! Models decorate these freely (bold, bullets, headings), so matching is
//! lenient. A value runs until the next marker and may span lines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Deterministic diagnosis used when the run retrieved no documents.
pub const INSUFFICIENT_INFORMATION: &str = "Insufficient information to diagnose this issue: \
no relevant documentation or past tickets were found for it. \
ROOT_CAUSE: unknown (insufficient information)";

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[\s>*#-]*\**\s*(ROOT_CAUSE|SERVICE|CONFIGURATION_ITEM|REQUIRED_ACTION)\s*\**\s*:\s*\**",
    )
    .expect("valid diagnosis marker regex")
});

/// Structured fields parsed from a diagnosis narrative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
    /// True when produced without consulting the model
    #[serde(default)]
    pub insufficient_information: bool,
}

impl Diagnosis {
    /// Parse markers out of a narrative. Missing markers stay `None`.
    pub fn parse(text: &str) -> Self {
        let markers: Vec<_> = MARKER_RE.captures_iter(text).collect();
        let mut diagnosis = Diagnosis::default();

        for (i, caps) in markers.iter().enumerate() {
            let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = markers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());

            let value = clean_value(&text[whole.end()..end]);
            if value.is_empty() {
                continue;
            }

            let slot = match label.as_str() {
                "ROOT_CAUSE" => &mut diagnosis.root_cause,
                "SERVICE" => &mut diagnosis.service,
                "CONFIGURATION_ITEM" => &mut diagnosis.configuration_item,
                _ => &mut diagnosis.required_action,
            };
            // First occurrence wins; later echoes tend to be restatements
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        diagnosis
    }

    /// The deterministic record for runs without retrieved documents.
    pub fn insufficient() -> Self {
        Self {
            root_cause: Some("unknown (insufficient information)".to_string()),
            insufficient_information: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root_cause.is_none()
            && self.service.is_none()
            && self.configuration_item.is_none()
            && self.required_action.is_none()
    }
}

fn clean_value(raw: &str) -> String {
    raw.lines()
        .map(|line| line.trim().trim_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
