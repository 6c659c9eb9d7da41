use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AppResult, LedgerError};
use crate::ledger::models::{
    normalize_instruction_id, ConfirmationEvent, FeedEvent, SettlementIntent,
};

/// Ledger collaborator - submits settlement intents and delivers confirmations
///
/// Delivery is at-least-once: the same event may be returned by more than one fetch.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a settlement intent, returning the ledger transaction hash
    async fn submit_intent(&self, intent: &SettlementIntent) -> AppResult<String>;

    /// Fetch feed entries with sequence >= `since`, in ledger order.
    ///
    /// An undecodable entry is returned as `FeedEvent::Malformed`; it never
    /// fails the rest of the batch.
    async fn fetch_confirmation_events(&self, since: u64) -> AppResult<Vec<FeedEvent>>;
}

/// Wire format of a settlement intent
#[derive(Debug, Serialize)]
struct IntentRequest<'a> {
    instruction_id: String,
    amount: String,
    currency: &'a str,
    value_date: i64,
    ordering_institution: Option<&'a str>,
    beneficiary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contract_address: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    transaction_hash: String,
}

/// Wire format of a confirmation event; amounts are integer base units
#[derive(Debug, Deserialize)]
struct EventPayload {
    instruction_id: String,
    settled_amount: String,
    sequence: u64,
    #[serde(default)]
    gas_used: Option<u64>,
}

/// Entries stay raw so each one is decoded on its own
#[derive(Debug, Deserialize)]
struct EventsResponse {
    events: Vec<serde_json::Value>,
}

/// HTTP/JSON ledger gateway client
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    contract_address: Option<String>,
    amount_decimals: u32,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: &str,
        contract_address: Option<String>,
        amount_decimals: u32,
        request_timeout: Duration,
    ) -> AppResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        info!("Ledger client configured for {}", base_url);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            contract_address,
            amount_decimals,
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit_intent(&self, intent: &SettlementIntent) -> AppResult<String> {
        let value_date = intent
            .value_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let request = IntentRequest {
            instruction_id: format!("0x{}", intent.instruction_id),
            amount: to_base_units(intent.amount, self.amount_decimals)?,
            currency: &intent.currency,
            value_date,
            ordering_institution: intent.ordering_institution.as_deref(),
            beneficiary: intent.beneficiary.as_deref(),
            contract_address: self.contract_address.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/intents", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{}: {}", status, body)).into());
        }

        let body: IntentResponse = response.json().await?;
        info!(
            "Settlement intent {} submitted in tx {}",
            intent.instruction_id, body.transaction_hash
        );
        Ok(body.transaction_hash)
    }

    async fn fetch_confirmation_events(&self, since: u64) -> AppResult<Vec<FeedEvent>> {
        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("since", since)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LedgerError::Unreachable(format!(
                "event feed returned {}",
                response.status()
            ))
            .into());
        }

        let body: EventsResponse = response.json().await?;
        debug!("Fetched {} events since {}", body.events.len(), since);

        Ok(body
            .events
            .into_iter()
            .map(|raw| decode_event(raw, self.amount_decimals))
            .collect())
    }
}

/// Decode one raw feed entry, keeping its sequence when the rest is unusable
fn decode_event(raw: serde_json::Value, decimals: u32) -> FeedEvent {
    let sequence = raw.get("sequence").and_then(serde_json::Value::as_u64);

    let payload: EventPayload = match serde_json::from_value(raw) {
        Ok(payload) => payload,
        Err(e) => {
            return FeedEvent::Malformed {
                sequence,
                reason: e.to_string(),
            }
        }
    };

    match from_base_units(&payload.settled_amount, decimals) {
        Ok(settled_amount) => FeedEvent::Confirmation(ConfirmationEvent {
            instruction_id: normalize_instruction_id(&payload.instruction_id),
            settled_amount,
            sequence: payload.sequence,
            resource_cost: payload.gas_used,
        }),
        Err(e) => FeedEvent::Malformed {
            sequence: Some(payload.sequence),
            reason: e.to_string(),
        },
    }
}

/// Convert a decimal amount to integer base units (e.g. wei for 18 decimals)
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<String, LedgerError> {
    let out_of_range = || LedgerError::AmountOutOfRange {
        amount: amount.to_string(),
        decimals,
    };

    let multiplier = 10i128
        .checked_pow(decimals)
        .and_then(|m| Decimal::try_from_i128_with_scale(m, 0).ok())
        .ok_or_else(out_of_range)?;

    let units = amount.checked_mul(multiplier).ok_or_else(out_of_range)?;
    if units.is_sign_negative() || units.fract() != Decimal::ZERO {
        return Err(out_of_range());
    }

    units.to_u128().map(|u| u.to_string()).ok_or_else(out_of_range)
}

/// Convert integer base units back to a decimal amount without losing precision
pub fn from_base_units(raw: &str, decimals: u32) -> Result<Decimal, LedgerError> {
    let out_of_range = || LedgerError::AmountOutOfRange {
        amount: raw.to_string(),
        decimals,
    };

    let units = u128::from_str(raw.trim())
        .map_err(|e| LedgerError::MalformedEvent(format!("settled amount {:?}: {}", raw, e)))?;
    let units = i128::try_from(units).map_err(|_| out_of_range())?;

    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|_| out_of_range())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_base_units() {
        assert_eq!(to_base_units(dec!(100.50), 18).unwrap(), "100500000000000000000");
        assert_eq!(to_base_units(dec!(12345.67), 2).unwrap(), "1234567");
        assert_eq!(to_base_units(dec!(0), 18).unwrap(), "0");
    }

    #[test]
    fn test_to_base_units_rejects_lossy_amounts() {
        assert!(matches!(
            to_base_units(dec!(1.005), 2),
            Err(LedgerError::AmountOutOfRange { .. })
        ));
        assert!(to_base_units(dec!(-1), 18).is_err());
    }

    #[test]
    fn test_from_base_units() {
        assert_eq!(from_base_units("100500000000000000000", 18).unwrap(), dec!(100.5));
        assert_eq!(from_base_units("99990000000000000000", 18).unwrap(), dec!(99.99));
        assert_eq!(from_base_units("1234567", 2).unwrap(), dec!(12345.67));
    }

    #[test]
    fn test_from_base_units_rejects_garbage() {
        assert!(matches!(
            from_base_units("12.5", 18),
            Err(LedgerError::MalformedEvent(_))
        ));
        assert!(matches!(
            from_base_units("-5", 18),
            Err(LedgerError::MalformedEvent(_))
        ));
        // Exceeds the 96-bit decimal mantissa
        assert!(matches!(
            from_base_units(&u128::MAX.to_string(), 18),
            Err(LedgerError::AmountOutOfRange { .. })
        ));
    }

    fn decode_all(body: &str, decimals: u32) -> Vec<FeedEvent> {
        let body: EventsResponse = serde_json::from_str(body).unwrap();
        body.events
            .into_iter()
            .map(|raw| decode_event(raw, decimals))
            .collect()
    }

    #[test]
    fn test_event_payload_decodes() {
        let events = decode_all(
            r#"{"events":[{"instruction_id":"0xAB","settled_amount":"1000","sequence":7}]}"#,
            2,
        );

        assert_eq!(
            events,
            vec![FeedEvent::Confirmation(ConfirmationEvent {
                instruction_id: "ab".to_string(),
                settled_amount: dec!(10),
                sequence: 7,
                resource_cost: None,
            })]
        );
    }

    #[test]
    fn test_bad_amount_does_not_spoil_batch() {
        let events = decode_all(
            r#"{"events":[
                {"instruction_id":"0x01","settled_amount":"12.5","sequence":0},
                {"instruction_id":"0x02","settled_amount":"-5","sequence":1},
                {"instruction_id":"0x03","settled_amount":"2500","sequence":2,"gas_used":21000}
            ]}"#,
            2,
        );

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FeedEvent::Malformed { sequence: Some(0), .. }));
        assert!(matches!(events[1], FeedEvent::Malformed { sequence: Some(1), .. }));
        match &events[2] {
            FeedEvent::Confirmation(event) => {
                assert_eq!(event.instruction_id, "03");
                assert_eq!(event.settled_amount, dec!(25));
                assert_eq!(event.resource_cost, Some(21_000));
            }
            other => panic!("expected a confirmation, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_amount_and_missing_fields() {
        let body = format!(
            r#"{{"events":[
                {{"instruction_id":"0x01","settled_amount":"{}","sequence":4}},
                {{"settled_amount":"1","sequence":5}},
                {{"instruction_id":"0x02","settled_amount":"1"}}
            ]}}"#,
            u128::MAX
        );
        let events = decode_all(&body, 18);

        assert_eq!(events[0].sequence(), Some(4));
        assert!(matches!(events[0], FeedEvent::Malformed { .. }));
        assert!(matches!(events[1], FeedEvent::Malformed { sequence: Some(5), .. }));
        assert!(matches!(events[2], FeedEvent::Malformed { sequence: None, .. }));
    }
}
