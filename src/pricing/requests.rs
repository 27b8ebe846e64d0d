//! Quote request types: the typed in-process request and its JSON body.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::services::QuoteError;

/// Event bookings pay a flat rate; commercial bookings pay by duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    Event,
    Commercial,
}

impl FromStr for UsageType {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "event" | "events" | "special_event" | "special event" => Ok(UsageType::Event),
            "commercial" | "construction" => Ok(UsageType::Commercial),
            other => Err(QuoteError::InvalidRequest(format!(
                "unknown usage_type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageType::Event => write!(f, "event"),
            UsageType::Commercial => write!(f, "commercial"),
        }
    }
}

/// Requested add-on and quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraRequest {
    pub extra_id: String,
    pub qty: u32,
}

/// A single quote request from the call flow
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub request_id: String,
    pub delivery_address: String,
    pub product_id: String,
    pub rental_start_date: NaiveDate,
    pub rental_days: u32,
    pub usage_type: UsageType,
    pub extras: Vec<ExtraRequest>,
}

/// JSON body for `POST /quote`
///
/// `usage_type` stays a string here so that unknown values surface as
/// `InvalidRequest` instead of a generic deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct QuoteRequestBody {
    #[serde(default)]
    pub request_id: Option<String>,
    pub delivery_address: String,
    pub product_id: String,
    pub rental_start_date: NaiveDate,
    pub rental_days: u32,
    pub usage_type: String,
    #[serde(default)]
    pub extras: Vec<ExtraRequest>,
}

impl TryFrom<QuoteRequestBody> for QuoteRequest {
    type Error = QuoteError;

    fn try_from(body: QuoteRequestBody) -> Result<Self, Self::Error> {
        Ok(QuoteRequest {
            request_id: body
                .request_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            delivery_address: body.delivery_address,
            product_id: body.product_id,
            rental_start_date: body.rental_start_date,
            rental_days: body.rental_days,
            usage_type: body.usage_type.parse()?,
            extras: body.extras,
        })
    }
}

/// JSON body for `POST /locations/warm`
#[derive(Debug, Deserialize)]
pub struct WarmLocationRequest {
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_type_parsing() {
        assert_eq!("Event".parse::<UsageType>().unwrap(), UsageType::Event);
        assert_eq!(" COMMERCIAL ".parse::<UsageType>().unwrap(), UsageType::Commercial);
        assert!(matches!(
            "wedding".parse::<UsageType>(),
            Err(QuoteError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_body_conversion_generates_request_id() {
        let body: QuoteRequestBody = serde_json::from_value(serde_json::json!({
            "delivery_address": "100 Congress Ave, Austin TX",
            "product_id": "2 Stall Restroom Trailer",
            "rental_start_date": "2025-07-04",
            "rental_days": 3,
            "usage_type": "event",
            "extras": [{"extra_id": "hand_wash", "qty": 2}]
        }))
        .unwrap();
        let request = QuoteRequest::try_from(body).unwrap();
        assert!(!request.request_id.is_empty());
        assert_eq!(request.usage_type, UsageType::Event);
        assert_eq!(request.extras[0].qty, 2);
    }

    #[test]
    fn test_body_conversion_rejects_bad_usage_type() {
        let body: QuoteRequestBody = serde_json::from_value(serde_json::json!({
            "delivery_address": "x",
            "product_id": "y",
            "rental_start_date": "2025-07-04",
            "rental_days": 1,
            "usage_type": "party"
        }))
        .unwrap();
        assert!(QuoteRequest::try_from(body).is_err());
    }
}
