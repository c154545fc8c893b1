//! Request DTOs for the dashboard HTTP surface (section 6). Mutating
//! endpoints validate with `validator::Validate` before touching the
//! domain layer; the handful of DTOs with their own business rules
//! (`CreateHoldInput`, `CreateManualReservationInput`) live next to the
//! domain functions that consume them in `domain/`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("validation failed: {errors}")))
}

/// Flattens a DTO into a JSON object so it can feed `table_service`'s
/// `jsonb_populate_record`-based insert/update helpers.
pub fn serialize_to_map<T: Serialize>(value: &T) -> serde_json::Map<String, serde_json::Value> {
    serde_json::to_value(value)
        .ok()
        .and_then(|json| json.as_object().cloned())
        .unwrap_or_default()
}

/// Drops absent-field nulls from a DTO map before a PATCH, so unset fields
/// leave existing column values untouched instead of overwriting them.
pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuoteRequest {
    #[validate(length(min = 1))]
    pub property_id: String,
    #[validate(length(min = 1))]
    pub room_type_id: String,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    #[validate(range(min = 1, max = 4))]
    pub adult_count: i16,
    #[validate(length(max = 3))]
    pub children_ages: Vec<i16>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransitionActionRequest {
    #[validate(length(min = 1))]
    pub to_status: String,
    pub guarantee_justification: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignRoomRequest {
    #[validate(length(min = 1))]
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RoomTypeUpsertRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1))]
    pub max_adults: i16,
    #[validate(range(min = 0, max = 3))]
    pub max_children: i16,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RoomUpsertRequest {
    #[validate(length(min = 1))]
    pub room_type_id: String,
    #[validate(length(min = 1))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RoomGovernanceRequest {
    #[validate(custom(function = "validate_governance_status"))]
    pub governance_status: String,
}

fn validate_governance_status(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "dirty" | "cleaning" | "clean" | "maintenance" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_governance_status")),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RateUpsertRequest {
    pub date: NaiveDate,
    #[validate(range(min = 0))]
    pub price_1pax_cents: i64,
    #[validate(range(min = 0))]
    pub price_2pax_cents: i64,
    #[validate(range(min = 0))]
    pub price_3pax_cents: i64,
    #[validate(range(min = 0))]
    pub price_4pax_cents: i64,
    #[validate(range(min = 0))]
    pub price_bucket1_chd_cents: i64,
    #[validate(range(min = 0))]
    pub price_bucket2_chd_cents: i64,
    #[validate(range(min = 0))]
    pub price_bucket3_chd_cents: i64,
    #[validate(range(min = 1))]
    pub min_nights: i16,
    pub max_nights: Option<i16>,
    #[serde(default)]
    pub closed_to_arrival: bool,
    #[serde(default)]
    pub closed_to_departure: bool,
    #[serde(default)]
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChildAgeBucketRequest {
    #[validate(range(min = 0, max = 17))]
    pub min_age: i16,
    #[validate(range(min = 0, max = 17))]
    pub max_age: i16,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CancellationPolicyRequest {
    #[validate(custom(function = "validate_policy_type"))]
    pub policy_type: String,
    #[validate(range(min = 0, max = 100))]
    pub penalty_percent: Option<i16>,
    #[validate(range(min = 0))]
    pub free_until_days_before_checkin: Option<i16>,
}

fn validate_policy_type(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "free" | "flexible" | "non_refundable" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_policy_type")),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GuestUpdateRequest {
    pub full_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RbacAssignRequest {
    #[validate(email)]
    pub user_email: String,
    #[validate(custom(function = "validate_role"))]
    pub role: String,
}

fn validate_role(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "viewer" | "governance" | "staff" | "manager" | "owner" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_role")),
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PendingRefundActionRequest {
    #[validate(custom(function = "validate_refund_status"))]
    pub status: String,
}

fn validate_refund_status(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "approved" | "processed" | "failed" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_refund_status")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_occupancy() {
        let request = QuoteRequest {
            property_id: "p1".into(),
            room_type_id: "rt1".into(),
            checkin: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            adult_count: 9,
            children_ages: vec![],
            currency: "USD".into(),
        };
        assert!(validate_input(&request).is_err());
    }

    #[test]
    fn accepts_well_formed_quote_request() {
        let request = QuoteRequest {
            property_id: "p1".into(),
            room_type_id: "rt1".into(),
            checkin: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            adult_count: 2,
            children_ages: vec![5],
            currency: "USD".into(),
        };
        assert!(validate_input(&request).is_ok());
    }

    #[test]
    fn rejects_unknown_role() {
        let request = RbacAssignRequest {
            user_email: "a@example.com".into(),
            role: "superadmin".into(),
        };
        assert!(validate_input(&request).is_err());
    }
}
