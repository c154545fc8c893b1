//! Tagged-result replacement for the source's `QuoteUnavailable(reason_code,
//! meta)` exception-for-control-flow pattern: pricing either resolves to a
//! total or surfaces one of the fourteen enumerated reasons it can't.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::domain::ari;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteUnavailableReason {
    InvalidDateRange,
    StayTooShort,
    StayTooLong,
    ClosedToArrival,
    ClosedToDeparture,
    RoomTypeBlocked,
    RoomTypeNotFound,
    RoomTypeDeleted,
    NoInventory,
    NoRateForDate,
    OccupancyExceedsCapacity,
    ChildAgeOutOfRange,
    AmbiguousChildBucket,
    CurrencyMismatch,
}

impl QuoteUnavailableReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDateRange => "invalid_date_range",
            Self::StayTooShort => "stay_too_short",
            Self::StayTooLong => "stay_too_long",
            Self::ClosedToArrival => "closed_to_arrival",
            Self::ClosedToDeparture => "closed_to_departure",
            Self::RoomTypeBlocked => "room_type_blocked",
            Self::RoomTypeNotFound => "room_type_not_found",
            Self::RoomTypeDeleted => "room_type_deleted",
            Self::NoInventory => "no_inventory",
            Self::NoRateForDate => "no_rate_for_date",
            Self::OccupancyExceedsCapacity => "occupancy_exceeds_capacity",
            Self::ChildAgeOutOfRange => "child_age_out_of_range",
            Self::AmbiguousChildBucket => "ambiguous_child_bucket",
            Self::CurrencyMismatch => "currency_mismatch",
        }
    }
}

/// Result of computing a price quote: either a total in cents, or one of
/// the enumerated reasons pricing could not proceed, plus structured meta
/// for the caller to build a user-facing message from.
pub enum QuoteResult {
    Ok { total_cents: i64, currency: String },
    Unavailable { reason: QuoteUnavailableReason, meta: Value },
}

fn unavailable(reason: QuoteUnavailableReason, meta: Value) -> QuoteResult {
    QuoteResult::Unavailable { reason, meta }
}

/// Computes the price of a stay, walking every night in the range and
/// checking restriction flags, inventory, and child-age-bucket assignment
/// along the way. Returns the first reason code it hits rather than
/// collecting all of them -- callers surface one actionable message.
pub async fn compute_quote(
    pool: &PgPool,
    property_id: &str,
    room_type_id: &str,
    checkin: NaiveDate,
    checkout: NaiveDate,
    adult_count: i16,
    children_ages: &[i16],
    currency: &str,
) -> Result<QuoteResult, AppError> {
    if checkout <= checkin {
        return Ok(unavailable(QuoteUnavailableReason::InvalidDateRange, json!({})));
    }

    let room_type = sqlx::query(
        "SELECT deleted_at, max_adults, max_children
         FROM room_types WHERE property_id = $1 AND id = $2",
    )
    .bind(property_id)
    .bind(room_type_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let Some(room_type) = room_type else {
        return Ok(unavailable(QuoteUnavailableReason::RoomTypeNotFound, json!({})));
    };
    if room_type
        .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("deleted_at")
        .ok()
        .flatten()
        .is_some()
    {
        return Ok(unavailable(QuoteUnavailableReason::RoomTypeDeleted, json!({})));
    }
    let max_adults: i16 = room_type.try_get("max_adults").unwrap_or(4);
    let max_children: i16 = room_type.try_get("max_children").unwrap_or(0);
    if adult_count > max_adults || children_ages.len() as i16 > max_children {
        return Ok(unavailable(
            QuoteUnavailableReason::OccupancyExceedsCapacity,
            json!({ "max_adults": max_adults, "max_children": max_children }),
        ));
    }

    let property = sqlx::query("SELECT default_currency FROM properties WHERE id = $1")
        .bind(property_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from_sqlx)?;
    if let Some(property) = property {
        let default_currency: String = property.try_get("default_currency").unwrap_or_default();
        if !default_currency.is_empty() && !currency.eq_ignore_ascii_case(&default_currency) {
            return Ok(unavailable(
                QuoteUnavailableReason::CurrencyMismatch,
                json!({ "expected": default_currency, "requested": currency }),
            ));
        }
    }

    let mut bucket_for_age = std::collections::HashMap::new();
    for age in children_ages {
        let buckets = sqlx::query(
            "SELECT bucket_no FROM child_age_buckets
             WHERE property_id = $1 AND min_age <= $2 AND max_age >= $2",
        )
        .bind(property_id)
        .bind(age)
        .fetch_all(pool)
        .await
        .map_err(AppError::from_sqlx)?;
        match buckets.len() {
            0 => {
                return Ok(unavailable(
                    QuoteUnavailableReason::ChildAgeOutOfRange,
                    json!({ "age": age }),
                ))
            }
            1 => {
                let bucket_no: i16 = buckets[0].try_get("bucket_no").unwrap_or(1);
                bucket_for_age.insert(*age, bucket_no);
            }
            _ => {
                return Ok(unavailable(
                    QuoteUnavailableReason::AmbiguousChildBucket,
                    json!({ "age": age }),
                ))
            }
        }
    }

    let nights = ari::nights(checkin, checkout);
    let stay_length = nights.len() as i16;
    let mut total_cents: i64 = 0;

    for (index, date) in nights.iter().enumerate() {
        let rate = sqlx::query(
            "SELECT price_1pax_cents, price_2pax_cents, price_3pax_cents, price_4pax_cents,
                    price_bucket1_chd_cents, price_bucket2_chd_cents, price_bucket3_chd_cents,
                    min_nights, max_nights, closed_to_arrival, closed_to_departure, is_blocked
             FROM room_type_rates WHERE property_id = $1 AND room_type_id = $2 AND date = $3",
        )
        .bind(property_id)
        .bind(room_type_id)
        .bind(date)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from_sqlx)?;

        let Some(rate) = rate else {
            return Ok(unavailable(
                QuoteUnavailableReason::NoRateForDate,
                json!({ "date": date.to_string() }),
            ));
        };

        let is_blocked: bool = rate.try_get("is_blocked").unwrap_or(false);
        if is_blocked {
            return Ok(unavailable(QuoteUnavailableReason::RoomTypeBlocked, json!({ "date": date.to_string() })));
        }

        if index == 0 {
            let closed_to_arrival: bool = rate.try_get("closed_to_arrival").unwrap_or(false);
            if closed_to_arrival {
                return Ok(unavailable(QuoteUnavailableReason::ClosedToArrival, json!({ "date": date.to_string() })));
            }
            let min_nights: i16 = rate.try_get("min_nights").unwrap_or(1);
            if stay_length < min_nights {
                return Ok(unavailable(
                    QuoteUnavailableReason::StayTooShort,
                    json!({ "min_nights": min_nights }),
                ));
            }
            let max_nights: Option<i16> = rate.try_get("max_nights").ok().flatten();
            if let Some(max_nights) = max_nights {
                if stay_length > max_nights {
                    return Ok(unavailable(
                        QuoteUnavailableReason::StayTooLong,
                        json!({ "max_nights": max_nights }),
                    ));
                }
            }
        }
        if index == nights.len() - 1 {
            let closed_to_departure: bool = rate.try_get("closed_to_departure").unwrap_or(false);
            if closed_to_departure {
                return Ok(unavailable(
                    QuoteUnavailableReason::ClosedToDeparture,
                    json!({ "date": date.to_string() }),
                ));
            }
        }

        let available = ari::night_available(pool, property_id, room_type_id, *date).await?;
        if available < 1 {
            return Ok(unavailable(QuoteUnavailableReason::NoInventory, json!({ "date": date.to_string() })));
        }

        let adult_price: i64 = match adult_count {
            1 => rate.try_get("price_1pax_cents").unwrap_or(0),
            2 => rate.try_get("price_2pax_cents").unwrap_or(0),
            3 => rate.try_get("price_3pax_cents").unwrap_or(0),
            _ => rate.try_get("price_4pax_cents").unwrap_or(0),
        };
        total_cents += adult_price;

        for age in children_ages {
            let bucket_no = bucket_for_age.get(age).copied().unwrap_or(1);
            let child_price: i64 = match bucket_no {
                1 => rate.try_get("price_bucket1_chd_cents").unwrap_or(0),
                2 => rate.try_get("price_bucket2_chd_cents").unwrap_or(0),
                _ => rate.try_get("price_bucket3_chd_cents").unwrap_or(0),
            };
            total_cents += child_price;
        }
    }

    Ok(QuoteResult::Ok {
        total_cents,
        currency: currency.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_reason_has_a_distinct_code() {
        let reasons = [
            QuoteUnavailableReason::InvalidDateRange,
            QuoteUnavailableReason::StayTooShort,
            QuoteUnavailableReason::StayTooLong,
            QuoteUnavailableReason::ClosedToArrival,
            QuoteUnavailableReason::ClosedToDeparture,
            QuoteUnavailableReason::RoomTypeBlocked,
            QuoteUnavailableReason::RoomTypeNotFound,
            QuoteUnavailableReason::RoomTypeDeleted,
            QuoteUnavailableReason::NoInventory,
            QuoteUnavailableReason::NoRateForDate,
            QuoteUnavailableReason::OccupancyExceedsCapacity,
            QuoteUnavailableReason::ChildAgeOutOfRange,
            QuoteUnavailableReason::AmbiguousChildBucket,
            QuoteUnavailableReason::CurrencyMismatch,
        ];
        let codes: std::collections::HashSet<&str> = reasons.iter().map(|r| r.code()).collect();
        assert_eq!(codes.len(), reasons.len());
    }
}
