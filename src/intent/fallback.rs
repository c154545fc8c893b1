//! Deterministic fallback used when the classifier returns invalid JSON,
//! an unknown intent, or incoherent slots. Extracts dates (ISO or
//! `DD/MM` shorthand), adult counts, and children ages via a fixed set of
//! patterns -- no ML, no external call, always terminates.

use chrono::{Datelike, NaiveDate};

use super::{ClassificationResult, ClassifiedEntities, Intent};

pub fn fallback_classify(redacted_text: &str, today: NaiveDate) -> ClassificationResult {
    let lower = redacted_text.to_lowercase();
    let dates = extract_dates(&lower, today);
    let adults = extract_adults(&lower);
    let children_ages = extract_children_ages(&lower);

    let entities = ClassifiedEntities {
        checkin: dates.first().copied(),
        checkout: dates.get(1).copied(),
        adults,
        children_ages: if children_ages.is_empty() {
            None
        } else {
            Some(children_ages)
        },
    };

    let intent = if lower.contains("cancel") {
        Intent::CancelRequest
    } else if lower.contains("pay") || lower.contains("checkout") || lower.contains("book") {
        Intent::CheckoutRequest
    } else if entities.checkin.is_some() || lower.contains("available") || lower.contains("price") {
        Intent::QuoteRequest
    } else if lower.contains("human") || lower.contains("agent") || lower.contains("speak to") {
        Intent::HumanHandoff
    } else {
        Intent::Unknown
    };

    ClassificationResult {
        intent,
        confidence: 0.4,
        entities,
        reason: "fallback_parser".to_string(),
    }
}

fn extract_dates(text: &str, today: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    for token in text.split(|c: char| !c.is_ascii_digit() && c != '-' && c != '/') {
        if let Some(date) = parse_iso_date(token) {
            out.push(date);
        } else if let Some(date) = parse_day_month(token, today) {
            out.push(date);
        }
    }
    out.sort();
    out.dedup();
    out
}

fn parse_iso_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
}

fn parse_day_month(token: &str, today: NaiveDate) -> Option<NaiveDate> {
    let mut parts = token.split('/');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let mut year = today.year();
    let candidate = NaiveDate::from_ymd_opt(year, month, day)?;
    if candidate < today {
        year += 1;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn extract_adults(text: &str) -> Option<u32> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (index, word) in words.iter().enumerate() {
        if word.starts_with("adult") {
            if let Some(prev) = index.checked_sub(1).and_then(|i| words.get(i)) {
                if let Ok(count) = prev.trim_matches(|c: char| !c.is_ascii_digit()).parse() {
                    return Some(count);
                }
            }
        }
    }
    None
}

fn extract_children_ages(text: &str) -> Vec<u32> {
    let mut ages = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();
    for (index, word) in words.iter().enumerate() {
        if (word.starts_with("kid") || word.starts_with("child")) && index > 0 {
            let mut cursor = index;
            while cursor > 0 {
                cursor -= 1;
                let cleaned = words[cursor].trim_matches(|c: char| !c.is_ascii_digit());
                if cleaned.is_empty() {
                    break;
                }
                if let Ok(age) = cleaned.parse::<u32>() {
                    ages.push(age);
                } else {
                    break;
                }
            }
        }
    }
    ages.sort_unstable();
    ages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    #[test]
    fn detects_cancel_intent() {
        let result = fallback_classify("please cancel my booking", today());
        assert_eq!(result.intent, Intent::CancelRequest);
    }

    #[test]
    fn extracts_iso_date_range() {
        let result = fallback_classify("is 2026-03-10 to 2026-03-12 available", today());
        assert_eq!(result.entities.checkin, NaiveDate::from_ymd_opt(2026, 3, 10));
        assert_eq!(result.entities.checkout, NaiveDate::from_ymd_opt(2026, 3, 12));
        assert_eq!(result.intent, Intent::QuoteRequest);
    }

    #[test]
    fn extracts_adult_count() {
        let result = fallback_classify("2 adults for the weekend", today());
        assert_eq!(result.entities.adults, Some(2));
    }

    #[test]
    fn extracts_children_ages() {
        let result = fallback_classify("2 adults and 5 7 kids", today());
        assert_eq!(result.entities.children_ages, Some(vec![5, 7]));
    }

    #[test]
    fn unrecognized_text_is_unknown() {
        let result = fallback_classify("hello there", today());
        assert_eq!(result.intent, Intent::Unknown);
    }
}
