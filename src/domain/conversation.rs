//! Per-contact conversation state (section 4.10's routing target). The
//! classification bridge proposes an intent and slot values; this module
//! owns the small normalized context a conversation accumulates across
//! turns and decides, deterministically, what the worker should do next.
//! It never stores free text -- only the typed fields a quote/hold needs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::intent::{ClassifiedEntities, Intent};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub room_type_id: Option<String>,
    pub checkin: Option<NaiveDate>,
    pub checkout: Option<NaiveDate>,
    pub adult_count: Option<i16>,
    pub children_ages: Option<Vec<i16>>,
    pub last_quote_cents: Option<i64>,
    pub last_quote_currency: Option<String>,
}

pub struct Conversation {
    pub id: String,
    pub context: ConversationContext,
}

/// Looks up or creates the `(property_id, channel, contact_hash)` row,
/// per the data model's upsert key. A fresh row starts with empty context.
pub async fn get_or_create_conversation(
    pool: &PgPool,
    property_id: &str,
    channel: &str,
    contact_hash: &str,
) -> Result<Conversation, AppError> {
    let row = sqlx::query(
        "INSERT INTO conversations (property_id, channel, contact_hash, context)
         VALUES ($1, $2, $3, '{}'::jsonb)
         ON CONFLICT (property_id, channel, contact_hash)
         DO UPDATE SET updated_at = now()
         RETURNING id::text, context",
    )
    .bind(property_id)
    .bind(channel)
    .bind(contact_hash)
    .fetch_one(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let id: String = row.get("id");
    let raw: Value = row.get("context");
    let context = serde_json::from_value(raw).unwrap_or_default();
    Ok(Conversation { id, context })
}

pub async fn save_context(pool: &PgPool, conversation_id: &str, context: &ConversationContext) -> Result<(), AppError> {
    let raw = serde_json::to_value(context).unwrap_or(Value::Null);
    sqlx::query("UPDATE conversations SET context = $2, updated_at = now() WHERE id = $1")
        .bind(conversation_id)
        .bind(raw)
        .execute(pool)
        .await
        .map_err(AppError::from_sqlx)?;
    Ok(())
}

/// Folds newly classified entities into the running context. Classified
/// values win over stale ones; fields the classifier left blank keep
/// whatever the conversation already had.
pub fn merge_entities(mut context: ConversationContext, entities: &ClassifiedEntities) -> ConversationContext {
    if let Some(checkin) = entities.checkin {
        context.checkin = Some(checkin);
    }
    if let Some(checkout) = entities.checkout {
        context.checkout = Some(checkout);
    }
    if let Some(adults) = entities.adults {
        context.adult_count = Some(adults.clamp(1, 4) as i16);
    }
    if let Some(ages) = &entities.children_ages {
        context.children_ages = Some(ages.iter().map(|age| (*age).min(17) as i16).collect());
    }
    context
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationAction {
    /// Not enough slots to price a stay; ask for what's missing.
    AskForMissingInfo(Vec<&'static str>),
    /// Context is complete; the worker should call `compute_quote`.
    PresentQuote,
    /// The guest wants to pay; only valid once a quote has been presented.
    CreateHoldAndCheckout,
    CancelActiveHold,
    HumanHandoff,
    Unclear,
}

/// Maps a classified intent plus the accumulated context to a single next
/// action. Pure and total -- every `Intent` variant has a branch, so the
/// worker's dispatch never falls through to a default case silently.
pub fn decide_action(intent: Intent, context: &ConversationContext) -> ConversationAction {
    match intent {
        Intent::CancelRequest => ConversationAction::CancelActiveHold,
        Intent::HumanHandoff => ConversationAction::HumanHandoff,
        Intent::CheckoutRequest => {
            if context.last_quote_cents.is_some() {
                ConversationAction::CreateHoldAndCheckout
            } else {
                ConversationAction::PresentQuote
            }
        }
        Intent::QuoteRequest => {
            let missing = missing_slots(context);
            if missing.is_empty() {
                ConversationAction::PresentQuote
            } else {
                ConversationAction::AskForMissingInfo(missing)
            }
        }
        Intent::Unknown => ConversationAction::Unclear,
    }
}

fn missing_slots(context: &ConversationContext) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if context.checkin.is_none() || context.checkout.is_none() {
        missing.push("dates");
    }
    if context.adult_count.is_none() {
        missing.push("adult_count");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated(checkin: &str, checkout: &str) -> ConversationContext {
        ConversationContext {
            checkin: NaiveDate::parse_from_str(checkin, "%Y-%m-%d").ok(),
            checkout: NaiveDate::parse_from_str(checkout, "%Y-%m-%d").ok(),
            adult_count: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn quote_request_with_full_context_presents_quote() {
        let context = dated("2026-03-01", "2026-03-03");
        assert_eq!(decide_action(Intent::QuoteRequest, &context), ConversationAction::PresentQuote);
    }

    #[test]
    fn quote_request_missing_dates_asks_for_them() {
        let context = ConversationContext { adult_count: Some(2), ..Default::default() };
        assert_eq!(
            decide_action(Intent::QuoteRequest, &context),
            ConversationAction::AskForMissingInfo(vec!["dates"])
        );
    }

    #[test]
    fn checkout_request_without_a_quote_falls_back_to_pricing() {
        let context = dated("2026-03-01", "2026-03-03");
        assert_eq!(decide_action(Intent::CheckoutRequest, &context), ConversationAction::PresentQuote);
    }

    #[test]
    fn checkout_request_with_a_quote_proceeds_to_payment() {
        let mut context = dated("2026-03-01", "2026-03-03");
        context.last_quote_cents = Some(50_000);
        assert_eq!(
            decide_action(Intent::CheckoutRequest, &context),
            ConversationAction::CreateHoldAndCheckout
        );
    }

    #[test]
    fn merge_keeps_stale_fields_the_classifier_left_blank() {
        let mut context = dated("2026-03-01", "2026-03-03");
        context.room_type_id = Some("rt1".into());
        let entities = ClassifiedEntities { adults: Some(3), ..Default::default() };
        let merged = merge_entities(context, &entities);
        assert_eq!(merged.room_type_id.as_deref(), Some("rt1"));
        assert_eq!(merged.adult_count, Some(3));
        assert_eq!(merged.checkin, NaiveDate::parse_from_str("2026-03-01", "%Y-%m-%d").ok());
    }
}
