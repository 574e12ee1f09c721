use std::collections::HashSet;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentiment::{SentimentClassifier, SentimentLabel};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.55;

// English, Russian, Spanish, French, German, Italian.
const YES_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "right", "exactly",
    "affirmative", "of course", "that's right", "да", "ага", "угу", "верно", "правильно",
    "конечно", "точно", "хорошо", "да-да", "sí", "si", "claro", "correcto", "vale", "exacto",
    "de acuerdo", "oui", "ouais", "d'accord", "exact", "bien sûr", "c'est ça", "ja", "genau",
    "richtig", "certo", "esatto",
];

const NO_WORDS: &[&str] = &[
    "no", "nope", "nah", "not", "negative", "wrong", "incorrect", "not really", "нет", "не",
    "неверно", "неправильно", "нету", "не так", "incorrecto", "para nada", "falso", "non",
    "pas du tout", "faux", "nein", "falsch", "sbagliato",
];

static YES_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| YES_WORDS.iter().copied().collect());
static NO_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| NO_WORDS.iter().copied().collect());
static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+(?:['’-]\w+)*").expect("valid word regex"));

/// Which rule resolved a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    FirstToken,
    AnyToken,
    Sentiment,
    Unresolved,
}

/// Result of classifying one reply as yes/no.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confirmation {
    pub value: Option<bool>,
    pub rule: MatchRule,
    pub confidence: f32,
}

impl Confirmation {
    fn keyword(value: bool, rule: MatchRule) -> Self {
        Self {
            value: Some(value),
            rule,
            confidence: 1.0,
        }
    }

    fn unresolved() -> Self {
        Self {
            value: None,
            rule: MatchRule::Unresolved,
            confidence: 0.0,
        }
    }
}

fn lookup(word: &str) -> Option<bool> {
    if YES_SET.contains(word) {
        Some(true)
    } else if NO_SET.contains(word) {
        Some(false)
    } else {
        None
    }
}

/// Layered yes/no classifier for spoken replies.
pub struct ConfirmationParser {
    sentiment: Option<Box<dyn SentimentClassifier>>,
    min_confidence: f32,
}

impl ConfirmationParser {
    pub fn new() -> Self {
        Self {
            sentiment: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    #[cfg_attr(not(feature = "llm"), allow(dead_code))]
    pub fn with_sentiment(mut self, classifier: Box<dyn SentimentClassifier>) -> Self {
        self.sentiment = Some(classifier);
        self
    }

    pub fn with_min_confidence(mut self, floor: f32) -> Self {
        self.min_confidence = floor;
        self
    }

    pub fn parse(&mut self, text: &str) -> Confirmation {
        let normalized = text
            .trim()
            .to_lowercase()
            .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .to_string();
        if normalized.is_empty() {
            return Confirmation::unresolved();
        }

        if let Some(v) = lookup(&normalized) {
            return Confirmation::keyword(v, MatchRule::Exact);
        }

        let tokens: Vec<&str> = WORD_RE
            .find_iter(&normalized)
            .map(|m| m.as_str())
            .collect();

        if let Some(v) = tokens.first().and_then(|t| lookup(t)) {
            return Confirmation::keyword(v, MatchRule::FirstToken);
        }

        if tokens.iter().any(|t| YES_SET.contains(t)) {
            return Confirmation::keyword(true, MatchRule::AnyToken);
        }
        if tokens.iter().any(|t| NO_SET.contains(t)) {
            return Confirmation::keyword(false, MatchRule::AnyToken);
        }

        self.classify(&normalized)
    }

    fn classify(&mut self, text: &str) -> Confirmation {
        let Some(classifier) = self.sentiment.as_mut() else {
            return Confirmation::unresolved();
        };

        let sentiment = match classifier.classify(text) {
            Ok(s) => s,
            Err(e) => {
                warn!("Sentiment classification failed for '{text}': {e:#}");
                return Confirmation::unresolved();
            }
        };
        debug!("Sentiment for '{text}': {sentiment:?}");

        if sentiment.confidence < self.min_confidence {
            return Confirmation::unresolved();
        }
        let value = match sentiment.label {
            SentimentLabel::Positive => true,
            SentimentLabel::Negative => false,
            SentimentLabel::Neutral => return Confirmation::unresolved(),
        };
        Confirmation {
            value: Some(value),
            rule: MatchRule::Sentiment,
            confidence: sentiment.confidence,
        }
    }
}

impl Default for ConfirmationParser {
    fn default() -> Self {
        Self::new()
    }
}
