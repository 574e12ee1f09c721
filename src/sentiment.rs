use anyhow::{Context, Result};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Sentiment classifier contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// The structured JSON a classifier is expected to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub confidence: f32,
}

/// External sentiment model consulted when keyword rules cannot decide.
pub trait SentimentClassifier {
    fn classify(&mut self, text: &str) -> Result<Sentiment>;
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[cfg_attr(not(feature = "llm"), allow(dead_code))]
static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));
#[cfg_attr(not(feature = "llm"), allow(dead_code))]
static JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{[^{}]*\}").expect("valid json regex"));

/// Extract the sentiment JSON object from a free-form model reply.
#[cfg_attr(not(feature = "llm"), allow(dead_code))]
pub fn parse_reply(raw: &str) -> Result<Sentiment> {
    for cap in THINK_RE.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }

    let cleaned = THINK_RE.replace_all(raw, "");

    let json_str = JSON_RE.find(&cleaned).map(|m| m.as_str()).context(format!(
        "no JSON object found in classifier output. Raw output:\n{raw}"
    ))?;

    debug!("Extracted JSON: {json_str}");

    let mut sentiment: Sentiment =
        serde_json::from_str(json_str).context(format!("failed to parse JSON: {json_str}"))?;
    sentiment.confidence = sentiment.confidence.clamp(0.0, 1.0);

    Ok(sentiment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_clean() {
        let raw = r#"{"label": "positive", "confidence": 0.91}"#;
        let s = parse_reply(raw).unwrap();
        assert_eq!(s.label, SentimentLabel::Positive);
        assert!((s.confidence - 0.91).abs() < 1e-6);
    }

    #[test]
    fn parse_reply_with_think() {
        let raw = r#"<think>The driver sounds unhappy {maybe}.</think>
{"label": "negative", "confidence": 0.7}"#;
        let s = parse_reply(raw).unwrap();
        assert_eq!(s.label, SentimentLabel::Negative);
    }

    #[test]
    fn parse_reply_with_surrounding_text() {
        let raw = r#"Verdict: {"label":"neutral","confidence":3.0}. Done."#;
        let s = parse_reply(raw).unwrap();
        assert_eq!(s.label, SentimentLabel::Neutral);
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn parse_reply_without_json_fails() {
        assert!(parse_reply("I cannot tell").is_err());
    }
}
