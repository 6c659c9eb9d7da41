use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ParseError;

/// Canonical payment instruction parsed from a raw MT202 message.
///
/// Fields absent from the message stay `None`; nothing is defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_with_institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charges: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_to_receiver_info: Option<String>,
}

/// Value date, currency and amount carried by field 32A
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueDateCurrencyAmount {
    value_date: NaiveDate,
    currency: String,
    amount: Decimal,
}

/// Parse a raw MT202 message into a [`PaymentInstruction`].
///
/// Lines of the form `:TAG:VALUE` open a field; any other non-blank line
/// continues the currently open field. Text before the first tag is ignored.
pub fn parse_mt202(raw_message: &str) -> Result<PaymentInstruction, ParseError> {
    let fields = collect_fields(raw_message);

    // 32A is the only field that can fail, resolve it before building anything
    let value_fields = fields
        .get("32A")
        .map(|value| parse_value_date_currency_amount(value))
        .transpose()?;

    let mut instruction = PaymentInstruction {
        transaction_reference: fields.get("20").cloned(),
        related_reference: fields.get("21").cloned(),
        ordering_institution: fields
            .get("50A")
            .or_else(|| fields.get("50K"))
            .map(|value| flatten(value)),
        ordering_agent: fields.get("52A").cloned(),
        account_with_institution: fields.get("57A").cloned(),
        beneficiary: fields.get("59").map(|value| flatten(value)),
        charges: fields.get("71A").cloned(),
        sender_to_receiver_info: fields.get("72").map(|value| flatten(value)),
        ..Default::default()
    };

    if let Some(v) = value_fields {
        instruction.value_date = Some(v.value_date);
        instruction.currency = Some(v.currency);
        instruction.amount = Some(v.amount);
    }

    Ok(instruction)
}

/// Group message lines by tag, joining continuation lines with `\n`
fn collect_fields(raw_message: &str) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current_tag: Option<String> = None;

    for line in raw_message.trim().lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(':') {
            let (tag, value) = rest.split_once(':').unwrap_or((rest, ""));
            fields.insert(tag.to_string(), value.to_string());
            current_tag = Some(tag.to_string());
        } else if let Some(tag) = &current_tag {
            if let Some(value) = fields.get_mut(tag) {
                value.push('\n');
                value.push_str(line);
            }
        }
    }

    fields
}

/// Split a `YYMMDD` + `CCY` + amount composite field
fn parse_value_date_currency_amount(data: &str) -> Result<ValueDateCurrencyAmount, ParseError> {
    const TAG: &str = "32A";

    if data.chars().count() < 9 {
        return Err(ParseError::malformed(
            TAG,
            format!("expected at least 9 characters, got {:?}", data),
        ));
    }

    let (date_part, rest) = split_at_char(data, 6);
    let (currency, amount_part) = split_at_char(rest, 3);

    let value_date = NaiveDate::parse_from_str(&format!("20{}", date_part), "%Y%m%d")
        .map_err(|e| ParseError::malformed(TAG, format!("invalid value date {:?}: {}", date_part, e)))?;

    let normalized = amount_part.replace(',', ".");
    let amount = Decimal::from_str(normalized.trim())
        .map_err(|e| ParseError::malformed(TAG, format!("invalid amount {:?}: {}", amount_part, e)))?;

    Ok(ValueDateCurrencyAmount {
        value_date,
        currency: currency.to_string(),
        amount,
    })
}

/// Split after `n` characters without cutting through a UTF-8 sequence
fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    let idx = s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len());
    s.split_at(idx)
}

fn flatten(value: &str) -> String {
    value.replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
:20:TXREF12345
:21:RELREF67890
:32A:240815USD12345.67
:50K:/12345678
ORDERING BANK NAME
CITY
:52A:ORDERINGAGENTBIC
:57A:BENEFICIARYBANKBIC
:59:/987654321
BENEFICIARY NAME
ADDRESS LINE 1
:71A:OUR
:72:/SND2REC/INFO
SOME MORE INFO
"#;

    #[test]
    fn test_parse_reference_and_value_fields() {
        let parsed = parse_mt202(":20:TXREF12345\n:32A:240815USD12345.67").unwrap();

        assert_eq!(parsed.transaction_reference.as_deref(), Some("TXREF12345"));
        assert_eq!(parsed.value_date, NaiveDate::from_ymd_opt(2024, 8, 15));
        assert_eq!(parsed.currency.as_deref(), Some("USD"));
        assert_eq!(parsed.amount, Some(dec!(12345.67)));
        assert!(parsed.beneficiary.is_none());
        assert!(parsed.ordering_institution.is_none());
    }

    #[test]
    fn test_parse_full_message_flattens_multiline_fields() {
        let parsed = parse_mt202(SAMPLE).unwrap();

        assert_eq!(parsed.related_reference.as_deref(), Some("RELREF67890"));
        assert_eq!(
            parsed.ordering_institution.as_deref(),
            Some("/12345678 ORDERING BANK NAME CITY")
        );
        assert_eq!(parsed.ordering_agent.as_deref(), Some("ORDERINGAGENTBIC"));
        assert_eq!(parsed.account_with_institution.as_deref(), Some("BENEFICIARYBANKBIC"));
        assert_eq!(
            parsed.beneficiary.as_deref(),
            Some("/987654321 BENEFICIARY NAME ADDRESS LINE 1")
        );
        assert_eq!(parsed.charges.as_deref(), Some("OUR"));
        assert_eq!(
            parsed.sender_to_receiver_info.as_deref(),
            Some("/SND2REC/INFO SOME MORE INFO")
        );
    }

    #[test]
    fn test_comma_decimal_separator() {
        let parsed = parse_mt202(":20:ANOTHERREF\n:32A:250101EUR999,00\n:57A:SOMEOTHERBIC").unwrap();

        assert_eq!(parsed.amount, Some(dec!(999.00)));
        assert_eq!(parsed.currency.as_deref(), Some("EUR"));
        assert_eq!(parsed.value_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn test_tag_without_value_is_continued() {
        let parsed = parse_mt202(":20:REF\n:59:\nBENEFICIARY NAME\nLINE 2").unwrap();
        assert_eq!(parsed.beneficiary.as_deref(), Some("BENEFICIARY NAME LINE 2"));

        let parsed = parse_mt202(":20:REF\n:72").unwrap();
        assert_eq!(parsed.sender_to_receiver_info.as_deref(), Some(""));
    }

    #[test]
    fn test_50a_preferred_over_50k() {
        let parsed = parse_mt202(":50K:SOMEONE\n:50A:BANKBICXX").unwrap();
        assert_eq!(parsed.ordering_institution.as_deref(), Some("BANKBICXX"));
    }

    #[test]
    fn test_text_before_first_tag_is_ignored() {
        let parsed = parse_mt202("{1:F01BANKBEBBAXXX}\n:20:REF1").unwrap();
        assert_eq!(parsed.transaction_reference.as_deref(), Some("REF1"));
    }

    #[test]
    fn test_missing_fields_are_absent() {
        let parsed = parse_mt202("").unwrap();
        assert_eq!(parsed, PaymentInstruction::default());

        let json = serde_json::to_value(parse_mt202(":20:ONLYREF").unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "transaction_reference": "ONLYREF" }));
    }

    #[test]
    fn test_malformed_amount_names_tag() {
        let err = parse_mt202(":20:REF\n:32A:240815USDABC").unwrap_err();
        assert_eq!(err.tag(), "32A");
    }

    #[test]
    fn test_malformed_date_fails_whole_parse() {
        let err = parse_mt202(":20:REF\n:32A:241315USD10.00\n:59:BENEFICIARY").unwrap_err();
        assert!(matches!(err, ParseError::MalformedField { ref tag, .. } if tag == "32A"));
    }

    #[test]
    fn test_short_composite_field_rejected() {
        assert!(parse_mt202(":32A:240815US").is_err());
        // Date and currency present but no amount
        assert!(parse_mt202(":32A:240815USD").is_err());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let first = parse_mt202(SAMPLE).unwrap();
        let second = parse_mt202(SAMPLE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serializes_amount_as_number() {
        let json = serde_json::to_value(parse_mt202(":32A:240815USD12345.67").unwrap()).unwrap();
        assert_eq!(json["amount"], serde_json::json!(12345.67));
        assert_eq!(json["value_date"], serde_json::json!("2024-08-15"));
    }
}
