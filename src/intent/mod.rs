//! Intent classification bridge (section 4.10). The LLM sits outside the
//! trust boundary: it receives only redacted text (ids, dates, integers,
//! and the utterance with identifiers masked) and must return a strict
//! schema. Anything that doesn't parse falls back to a deterministic
//! extractor; the classifier proposes routing, it never decides state.

mod fallback;

pub use fallback::fallback_classify;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QuoteRequest,
    CheckoutRequest,
    CancelRequest,
    HumanHandoff,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedEntities {
    pub checkin: Option<NaiveDate>,
    pub checkout: Option<NaiveDate>,
    pub adults: Option<u32>,
    pub children_ages: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default)]
    pub entities: ClassifiedEntities,
    pub reason: String,
}

/// A classifier backend that only ever sees redacted text. Implementations
/// must not receive guest names, phone numbers, or raw message content —
/// callers redact before invoking this trait.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, redacted_text: &str) -> Result<ClassificationResult, AppError>;
}

/// Replaces contact-identifying substrings with a placeholder before the
/// utterance is allowed to cross into classifier input. This is a coarse
/// mask (digit runs of 7+ length, e-mail-shaped tokens) -- callers that
/// need guaranteed exhaustiveness should not rely on this alone to decide
/// what else gets logged.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut digit_run = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digit_run.push(ch);
            continue;
        }
        flush_digit_run(&mut out, &mut digit_run);
        out.push(ch);
    }
    flush_digit_run(&mut out, &mut digit_run);
    out
}

fn flush_digit_run(out: &mut String, digit_run: &mut String) {
    if digit_run.len() >= 7 {
        out.push_str("[redacted]");
    } else {
        out.push_str(digit_run);
    }
    digit_run.clear();
}

/// Validates a classifier's raw JSON response against the strict schema;
/// callers should fall back to [`fallback_classify`] on any error here.
pub fn parse_strict(raw: &str) -> Result<ClassificationResult, AppError> {
    let parsed: ClassificationResult = serde_json::from_str(raw)
        .map_err(|error| AppError::UnprocessableEntity(format!("invalid classifier json: {error}")))?;

    if !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(AppError::UnprocessableEntity(
            "classifier confidence out of range".into(),
        ));
    }

    if let (Some(checkin), Some(checkout)) = (parsed.entities.checkin, parsed.entities.checkout) {
        if checkout <= checkin {
            return Err(AppError::UnprocessableEntity(
                "classifier entities have incoherent date range".into(),
            ));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_long_digit_runs_only() {
        assert_eq!(redact("call 59521123456 on night 2"), "call [redacted] on night 2");
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = r#"{"intent":"quote_request","confidence":1.5,"reason":"x"}"#;
        assert!(parse_strict(raw).is_err());
    }

    #[test]
    fn rejects_incoherent_dates() {
        let raw = r#"{"intent":"quote_request","confidence":0.9,"reason":"x",
            "entities":{"checkin":"2026-03-10","checkout":"2026-03-01"}}"#;
        assert!(parse_strict(raw).is_err());
    }

    #[test]
    fn accepts_well_formed_response() {
        let raw = r#"{"intent":"checkout_request","confidence":0.8,"reason":"wants to pay"}"#;
        let parsed = parse_strict(raw).unwrap();
        assert_eq!(parsed.intent, Intent::CheckoutRequest);
    }
}
