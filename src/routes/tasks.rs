//! Worker task endpoints (section 4.8): every handler here is invoked by
//! the managed queue with an OIDC bearer whose audience must equal this
//! service's own URL, and answers through the 500/200 retry contract in
//! `error::task_response_for` rather than the dashboard's `IntoResponse`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::domain::conversation::{self, ConversationAction, ConversationContext};
use crate::domain::holds::{self, CancelHoldOutcome, ConvertHoldInput, ConvertHoldOutcome, CreateHoldInput, CreateHoldOutcome, ExpireHoldOutcome};
use crate::domain::quote::{compute_quote, QuoteResult};
use crate::error::{task_response_for, AppError, TaskResponse};
use crate::identity::read_contact_ref;
use crate::intent;
use crate::outbox::{self, DeliveryLease};
use crate::providers::{build_payment_provider, build_whatsapp_provider, PaymentProvider, WhatsAppProvider};
use crate::state::AppState;
use crate::tasks_dispatch::{enqueue_task, task_name, verify_task_token};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks/expire-hold", post(expire_hold))
        .route("/tasks/stripe", post(stripe_event))
        .route("/tasks/whatsapp-message", post(whatsapp_message))
        .route("/tasks/send-response", post(send_response))
}

async fn require_task_bearer(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()).into_response())?;
    verify_task_token(state, token).await.map_err(|error| error.into_response())
}

#[derive(Debug, Deserialize)]
struct ExpireHoldBody {
    property_id: String,
    hold_id: String,
}

async fn expire_hold(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ExpireHoldBody>) -> Response {
    if let Err(response) = require_task_bearer(&state, &headers).await {
        return response;
    }
    match holds::expire_hold(&state.db_pool, &body.property_id, &body.hold_id).await {
        Ok(ExpireHoldOutcome::Expired) => TaskResponse::done(json!({ "hold_id": body.hold_id, "status": "expired" })),
        Ok(ExpireHoldOutcome::NoOp) => TaskResponse::already_done(),
        Err(error) => task_response_for(&error),
    }
}

#[derive(Debug, Deserialize)]
struct StripeTaskBody {
    event_id: String,
}

/// Retrieves the event from the provider (never trusting the webhook body),
/// runs the convert-hold transaction, and on success enqueues the
/// confirmation send-response task per section 4.5.
async fn stripe_event(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<StripeTaskBody>) -> Response {
    if let Err(response) = require_task_bearer(&state, &headers).await {
        return response;
    }

    let provider = match build_payment_provider(&state) {
        Ok(provider) => provider,
        Err(error) => return task_response_for(&error),
    };
    let event = match provider.retrieve_event(&body.event_id).await {
        Ok(event) => event,
        Err(error) => return task_response_for(&error),
    };

    let Some((property_id, hold_id, provider_object_id, amount_cents)) = extract_payment_intent_fields(&event) else {
        return task_response_for(&AppError::permanent(
            "malformed_stripe_event",
            "event did not carry hold_id metadata",
        ));
    };

    let outcome = holds::convert_hold(
        &state.db_pool,
        ConvertHoldInput {
            property_id: &property_id,
            stripe_event_id: &body.event_id,
            provider_object_id: &provider_object_id,
            hold_id: &hold_id,
            amount_cents,
        },
    )
    .await;

    match outcome {
        Ok(ConvertHoldOutcome::AlreadyProcessed) => TaskResponse::already_done(),
        Ok(ConvertHoldOutcome::HoldNotActive) => TaskResponse::terminal("hold_not_active"),
        Ok(ConvertHoldOutcome::NeedsManual) => TaskResponse::done(json!({ "status": "needs_manual" })),
        Ok(ConvertHoldOutcome::Converted { reservation_id }) => {
            if let Err(error) = enqueue_confirmation_send(&state, &property_id, &hold_id, &reservation_id).await {
                tracing::warn!(%error, hold_id, "confirmation_send_enqueue_failed");
            }
            TaskResponse::done(json!({ "reservation_id": reservation_id }))
        }
        Err(error) => task_response_for(&error),
    }
}

fn extract_payment_intent_fields(event: &Value) -> Option<(String, String, String, i64)> {
    let object = event.pointer("/data/object")?;
    let metadata = object.get("metadata")?;
    let property_id = metadata.get("property_id")?.as_str()?.to_string();
    let hold_id = metadata.get("hold_id")?.as_str()?.to_string();
    let provider_object_id = object.get("id")?.as_str()?.to_string();
    let amount_cents = object.get("amount_total").or_else(|| object.get("amount")).and_then(Value::as_i64)?;
    Some((property_id, hold_id, provider_object_id, amount_cents))
}

/// If the converted hold carries a conversation with a live vault entry,
/// schedules the `reservation.confirmed` outbox event for delivery.
async fn enqueue_confirmation_send(
    state: &AppState,
    property_id: &str,
    hold_id: &str,
    reservation_id: &str,
) -> Result<(), AppError> {
    let conversation = sqlx::query(
        "SELECT c.id::text AS id, c.channel, c.contact_hash
         FROM holds h JOIN conversations c ON c.id = h.conversation_id
         WHERE h.id = $1",
    )
    .bind(hold_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;
    let Some(conversation) = conversation else {
        return Ok(());
    };
    let channel: String = conversation.get("channel");
    let contact_hash: String = conversation.get("contact_hash");

    if read_contact_ref(&state.db_pool, &state.vault, property_id, &channel, &contact_hash)
        .await?
        .is_none()
    {
        return Ok(());
    }

    let outbox_event_id: Option<String> = sqlx::query_scalar(
        "SELECT id::text FROM outbox_events
         WHERE property_id = $1 AND event_type = 'reservation.confirmed'
           AND payload->>'reservation_id' = $2
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(property_id)
    .bind(reservation_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;
    let Some(outbox_event_id) = outbox_event_id else {
        return Ok(());
    };

    let name = task_name("send-response", &outbox_event_id);
    enqueue_task(
        state,
        &name,
        "/tasks/send-response",
        json!({
            "property_id": property_id,
            "outbox_event_id": outbox_event_id,
            "channel": channel,
            "contact_hash": contact_hash,
        }),
    )
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct WhatsAppMessageBody {
    provider: String,
    message_id: String,
    property_id: String,
    contact_hash: String,
    redacted_text: String,
}

/// Runs the classify → decide → act pipeline for one inbound message.
/// Replies are sent inline (not through the outbox delivery guard) because
/// they are not domain mutations the substrate needs to dedupe beyond the
/// `processed_events` receipt on `message_id` taken here.
async fn whatsapp_message(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<WhatsAppMessageBody>) -> Response {
    if let Err(response) = require_task_bearer(&state, &headers).await {
        return response;
    }

    let mut conn = match state.db_pool.acquire().await {
        Ok(conn) => conn,
        Err(error) => return task_response_for(&AppError::from_sqlx(error)),
    };
    let first_time = match crate::idempotency::receive_once(&mut conn, &body.property_id, "tasks", &task_name("whatsapp-message", &body.message_id)).await {
        Ok(first_time) => first_time,
        Err(error) => return task_response_for(&error),
    };
    drop(conn);
    if !first_time {
        return TaskResponse::already_done();
    }

    match handle_whatsapp_message(&state, &body).await {
        Ok(()) => TaskResponse::done(json!({})),
        Err(error) => task_response_for(&error),
    }
}

async fn handle_whatsapp_message(state: &AppState, body: &WhatsAppMessageBody) -> Result<(), AppError> {
    let classification = intent::fallback_classify(&body.redacted_text, Utc::now().date_naive());
    let conversation = conversation::get_or_create_conversation(&state.db_pool, &body.property_id, &body.provider, &body.contact_hash).await?;
    let mut context = conversation::merge_entities(conversation.context, &classification.entities);
    let action = conversation::decide_action(classification.intent, &context);

    let reply = match &action {
        ConversationAction::AskForMissingInfo(fields) => Some(ask_for_missing_info_message(fields)),
        ConversationAction::PresentQuote => present_quote(state, &body.property_id, &mut context).await?,
        ConversationAction::CreateHoldAndCheckout => {
            create_hold_and_checkout(state, &body.property_id, &conversation.id, &context).await?
        }
        ConversationAction::CancelActiveHold => cancel_active_hold(state, &body.property_id, &conversation.id).await?,
        ConversationAction::HumanHandoff => Some("One of our team will follow up with you shortly.".to_string()),
        ConversationAction::Unclear => Some("Sorry, I didn't catch that -- could you tell me your dates and number of guests?".to_string()),
    };

    conversation::save_context(&state.db_pool, &conversation.id, &context).await?;

    if let Some(text) = reply {
        send_direct_reply(state, &body.property_id, &body.provider, &body.contact_hash, &text).await?;
    }
    Ok(())
}

fn ask_for_missing_info_message(fields: &[&'static str]) -> String {
    format!("To get you a quote I still need: {}.", fields.join(", "))
}

async fn present_quote(state: &AppState, property_id: &str, context: &mut ConversationContext) -> Result<Option<String>, AppError> {
    let Some(room_type_id) = context.room_type_id.clone() else {
        return Ok(Some("Which room type would you like a quote for?".to_string()));
    };
    let (Some(checkin), Some(checkout), Some(adult_count)) = (context.checkin, context.checkout, context.adult_count) else {
        return Ok(Some("I still need your check-in and check-out dates.".to_string()));
    };
    let children_ages: Vec<i16> = context.children_ages.clone().unwrap_or_default();

    match compute_quote(&state.db_pool, property_id, &room_type_id, checkin, checkout, adult_count, &children_ages, "USD").await? {
        QuoteResult::Ok { total_cents, currency } => {
            context.last_quote_cents = Some(total_cents);
            context.last_quote_currency = Some(currency.clone());
            Ok(Some(format!(
                "Your stay from {checkin} to {checkout} comes to {}. Reply 'book' to pay and confirm.",
                format_money(total_cents, &currency)
            )))
        }
        QuoteResult::Unavailable { reason, .. } => Ok(Some(format!("Sorry, that stay isn't available right now ({}).", reason.code()))),
    }
}

async fn create_hold_and_checkout(
    state: &AppState,
    property_id: &str,
    conversation_id: &str,
    context: &ConversationContext,
) -> Result<Option<String>, AppError> {
    let (Some(room_type_id), Some(checkin), Some(checkout), Some(adult_count), Some(total_cents), Some(currency)) = (
        context.room_type_id.clone(),
        context.checkin,
        context.checkout,
        context.adult_count,
        context.last_quote_cents,
        context.last_quote_currency.clone(),
    ) else {
        return Ok(Some("Let's get a quote first before checkout.".to_string()));
    };

    let input = CreateHoldInput {
        property_id: property_id.to_string(),
        conversation_id: Some(conversation_id.to_string()),
        room_type_id,
        checkin,
        checkout,
        adult_count,
        children_ages: context.children_ages.clone().unwrap_or_default(),
        total_cents,
        currency: currency.clone(),
        ttl_minutes: state.config.hold_ttl_minutes,
        guest_name: "WhatsApp guest".to_string(),
        email: None,
        phone: None,
        idempotency_key: Some(format!("{conversation_id}:{checkin}:{checkout}")),
    };

    let hold = match holds::create_hold(&state.db_pool, input).await? {
        CreateHoldOutcome::Created(hold) | CreateHoldOutcome::Replayed(hold) => hold,
        CreateHoldOutcome::NoInventory => return Ok(Some("Sorry, that room is no longer available for those dates.".to_string())),
    };

    schedule_hold_expiry(state, property_id, &hold.id, hold.expires_at).await?;

    let payment_provider = build_payment_provider(state)?;
    let mut metadata = serde_json::Map::new();
    metadata.insert("property_id".to_string(), json!(property_id));
    metadata.insert("hold_id".to_string(), json!(hold.id));
    metadata.insert("conversation_id".to_string(), json!(conversation_id));
    let session = payment_provider
        .create_checkout_session(total_cents, &currency, &metadata, &format!("hold:{}", hold.id))
        .await?;
    let checkout_url = session.get("url").and_then(Value::as_str).unwrap_or_default();

    Ok(Some(format!("Almost there! Pay securely here to confirm your booking: {checkout_url}")))
}

async fn schedule_hold_expiry(state: &AppState, property_id: &str, hold_id: &str, expires_at: chrono::DateTime<Utc>) -> Result<(), AppError> {
    let name = task_name("expire-hold", hold_id);
    enqueue_task(
        state,
        &name,
        "/tasks/expire-hold",
        json!({ "property_id": property_id, "hold_id": hold_id, "run_at": expires_at.to_rfc3339() }),
    )
    .await?;
    Ok(())
}

async fn cancel_active_hold(state: &AppState, property_id: &str, conversation_id: &str) -> Result<Option<String>, AppError> {
    let hold_id: Option<String> = sqlx::query_scalar(
        "SELECT id::text FROM holds WHERE property_id = $1 AND conversation_id = $2 AND status = 'active'
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(property_id)
    .bind(conversation_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let Some(hold_id) = hold_id else {
        return Ok(Some("You don't have an active booking to cancel.".to_string()));
    };
    match holds::cancel_hold(&state.db_pool, &hold_id, None).await? {
        CancelHoldOutcome::Cancelled => Ok(Some("Your hold has been cancelled.".to_string())),
        CancelHoldOutcome::NoOp => Ok(Some("That hold is no longer active.".to_string())),
    }
}

async fn send_direct_reply(state: &AppState, property_id: &str, channel: &str, contact_hash: &str, text: &str) -> Result<(), AppError> {
    let Some(destination) = read_contact_ref(&state.db_pool, &state.vault, property_id, channel, contact_hash).await? else {
        tracing::warn!(property_id, channel, "contact_ref_not_found");
        return Ok(());
    };
    let provider = build_whatsapp_provider(state)?;
    provider
        .send_message(&destination, text)
        .await
        .map_err(|error| match error {
            crate::providers::ProviderSendError::Transient(message) => AppError::Transient(message),
            crate::providers::ProviderSendError::Permanent(message) => AppError::permanent("provider_send_failed", message),
        })
}

fn format_money(cents: i64, currency: &str) -> String {
    format!("{:.2} {}", (cents as f64) / 100.0, currency)
}

#[derive(Debug, Deserialize)]
struct SendResponseBody {
    property_id: String,
    outbox_event_id: String,
    channel: String,
    contact_hash: String,
}

/// The delivery-guard path (section 4.9): the only caller today is the
/// stripe handler above, for `reservation.confirmed`. Inline conversational
/// replies go through `send_direct_reply` instead.
async fn send_response(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<SendResponseBody>) -> Response {
    if let Err(response) = require_task_bearer(&state, &headers).await {
        return response;
    }

    let lease = match outbox::acquire_delivery_lease(&state.db_pool, &body.property_id, &body.outbox_event_id).await {
        Ok(lease) => lease,
        Err(error) => return task_response_for(&error),
    };
    match lease {
        DeliveryLease::AlreadySent => return TaskResponse::already_done(),
        DeliveryLease::Held => return TaskResponse::transient("delivery lease held by another attempt"),
        DeliveryLease::Acquired => {}
    }

    let event_type: String = match sqlx::query_scalar("SELECT event_type FROM outbox_events WHERE id = $1")
        .bind(&body.outbox_event_id)
        .fetch_optional(&state.db_pool)
        .await
    {
        Ok(Some(event_type)) => event_type,
        Ok(None) => return TaskResponse::terminal("outbox_event_not_found"),
        Err(error) => return task_response_for(&AppError::from_sqlx(error)),
    };
    let text = render_outbound_message(&event_type);

    let destination = match read_contact_ref(&state.db_pool, &state.vault, &body.property_id, &body.channel, &body.contact_hash).await {
        Ok(Some(destination)) => destination,
        Ok(None) => {
            let _ = outbox::mark_failed_permanent(&state.db_pool, &body.property_id, &body.outbox_event_id, "contact_ref_not_found").await;
            return TaskResponse::terminal("contact_ref_not_found");
        }
        Err(error) => return task_response_for(&error),
    };

    let provider = match build_whatsapp_provider(&state) {
        Ok(provider) => provider,
        Err(error) => return task_response_for(&error),
    };

    match provider.send_message(&destination, &text).await {
        Ok(()) => match outbox::mark_sent(&state.db_pool, &body.property_id, &body.outbox_event_id).await {
            Ok(()) => TaskResponse::done(json!({})),
            Err(error) => task_response_for(&error),
        },
        Err(crate::providers::ProviderSendError::Permanent(reason)) => {
            let _ = outbox::mark_failed_permanent(&state.db_pool, &body.property_id, &body.outbox_event_id, &reason).await;
            TaskResponse::terminal(reason)
        }
        Err(crate::providers::ProviderSendError::Transient(reason)) => {
            let _ = outbox::mark_failed_transient(&state.db_pool, &body.property_id, &body.outbox_event_id, &reason).await;
            TaskResponse::transient(reason)
        }
    }
}

fn render_outbound_message(event_type: &str) -> String {
    match event_type {
        "reservation.confirmed" => "Your reservation is confirmed! We look forward to hosting you.".to_string(),
        "payment.late" => {
            "We received your payment, but your hold had expired -- our team will confirm your booking manually shortly.".to_string()
        }
        other => {
            tracing::warn!(event_type = other, "no_message_template_for_event_type");
            format!("Update on your booking ({other}).")
        }
    }
}
