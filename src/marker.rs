//! Result-marker extraction from an engine's direct answer.
//!
//! A node's result is the body of the first `<MARKER>...</MARKER>` block in
//! its final text, trimmed. Bodies may span lines.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::MarkerError;
use crate::kind::NodeKind;

fn marker_pattern(marker: &str) -> String {
    let tag = regex::escape(marker);
    format!(r"(?s)<{tag}>(.*?)</{tag}>")
}

// One compiled pattern per marker in the kind table.
static MARKER_REGEXES: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    NodeKind::ALL
        .iter()
        .map(|k| k.marker())
        .map(|m| (m, Regex::new(&marker_pattern(m)).unwrap()))
        .collect()
});

/// Extract the first `<marker>` body from `text`.
pub fn extract(text: &str, marker: &str) -> Result<String, MarkerError> {
    let missing = || MarkerError::Missing {
        marker: marker.to_string(),
    };

    let captured = match MARKER_REGEXES.get(marker) {
        Some(re) => re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()),
        None => Regex::new(&marker_pattern(marker))
            .ok()
            .and_then(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())),
    };

    captured.map(|body| body.trim().to_string()).ok_or_else(missing)
}

/// Corrective message sent back when an answer lacks its marker.
pub fn reminder(marker: &str) -> String {
    format!(
        "Your reply did not contain a <{marker}>...</{marker}> block. \
         Reply again with your final answer wrapped in <{marker}> and </{marker}>."
    )
}
