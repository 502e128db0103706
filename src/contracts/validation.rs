//! Payload checks that run before anything touches the database.
//!
//! [`validate_contract_payload`] reports every problem it finds, keyed by field, so a form can
//! highlight all of them at once. [`parse_contract_payload`] runs the same checks and then
//! extracts a typed [`ContractDraft`].

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::FieldErrors;
use crate::kinds::{ContractType, SignRole};
use crate::utils::json::{classify, classify_any, optional_text, text_of, FieldValue};

const PROPERTY_ADDRESS_KEYS: &[&str] = &["property_address", "property_address_full"];
const SALE_PRICE_KEYS: &[&str] = &["sale_price", "price_total"];
const DEFAULT_MONTHLY_PAYDAY: i32 = 1;

/// Column widths of the `contracts` table, counted in characters.
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_ADDRESS_LEN: usize = 200;

/// Result of coercing a loosely typed money value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerced {
    Missing,
    Invalid,
    Value(i64),
}

/// Integers pass through, floats are floored, strings lose their thousands separators.
/// Blank strings and null are missing, never zero.
pub fn to_int_safe(value: Option<&Value>) -> Coerced {
    match value {
        None | Some(Value::Null) => Coerced::Missing,
        Some(Value::Number(number)) => {
            if let Some(int) = number.as_i64() {
                Coerced::Value(int)
            } else {
                number.as_f64().map_or(Coerced::Invalid, floor_to_i64)
            }
        }
        Some(Value::String(text)) => {
            let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return Coerced::Missing;
            }
            match cleaned.parse::<i64>() {
                Ok(int) => Coerced::Value(int),
                Err(_) => cleaned.parse::<f64>().map_or(Coerced::Invalid, floor_to_i64),
            }
        }
        Some(_) => Coerced::Invalid,
    }
}

fn floor_to_i64(value: f64) -> Coerced {
    let floored = value.floor();
    if floored.is_finite() && floored >= i64::MIN as f64 && floored <= i64::MAX as f64 {
        Coerced::Value(floored as i64)
    } else {
        Coerced::Invalid
    }
}

pub fn exceeds(text: &str, max_chars: usize) -> bool {
    text.chars().count() > max_chars
}

pub fn is_valid_phone(raw: &str) -> bool {
    let trimmed = raw.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c.is_whitespace())
}

/// Accepts `YYYY-MM-DD`, tolerating a trailing `Z` and a time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim().trim_end_matches('Z');
    let date_part = trimmed
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn validate_contract_payload(payload: &Map<String, Value>) -> FieldErrors {
    let mut errors = FieldErrors::new();

    let contract_type = match classify(payload, "type") {
        FieldValue::Present(value) => match value.as_str().map(str::parse::<ContractType>) {
            Some(Ok(contract_type)) => Some(contract_type),
            _ => {
                errors.insert("type", "type must be one of SALE, JEONSE, WOLSE, BANJEONSE");
                None
            }
        },
        _ => {
            errors.insert("type", "type is required");
            None
        }
    };

    match payload.get("parties") {
        Some(Value::Array(parties)) => errors.merge(validate_parties(parties)),
        Some(Value::Null) | None => {
            for field in ["seller_name", "buyer_name"] {
                require_text(payload, field, &mut errors);
            }
            for field in ["seller_phone", "buyer_phone"] {
                check_phone(payload, field, &mut errors);
            }
        }
        Some(_) => errors.insert("parties", "parties must be a list"),
    }
    // Flat fields win over the party list, so their width is checked in both shapes.
    for (field, max) in [
        ("seller_name", MAX_NAME_LEN),
        ("buyer_name", MAX_NAME_LEN),
        ("seller_phone", MAX_PHONE_LEN),
        ("buyer_phone", MAX_PHONE_LEN),
    ] {
        if let Some(text) = optional_text(payload, field) {
            if !errors.contains(field) && exceeds(&text, max) {
                errors.insert(field, format!("{field} must be at most {max} characters"));
            }
        }
    }

    match classify_any(payload, PROPERTY_ADDRESS_KEYS) {
        FieldValue::Present(value) => match text_of(value) {
            Some(address) if exceeds(&address, MAX_ADDRESS_LEN) => errors.insert(
                "property_address",
                format!("property_address must be at most {MAX_ADDRESS_LEN} characters"),
            ),
            Some(_) => {}
            None => errors.insert("property_address", "property_address must be text"),
        },
        _ => errors.insert("property_address", "property_address is required"),
    }

    if let Some(contract_type) = contract_type {
        validate_money(payload, contract_type, &mut errors);
    }

    for field in ["contract_date", "handover_date"] {
        if let FieldValue::Present(value) = classify(payload, field) {
            if value.as_str().and_then(parse_date).is_none() {
                errors.insert(field, format!("{field} must be a date in YYYY-MM-DD format"));
            }
        }
    }

    if let FieldValue::Present(value) = classify(payload, "mgmt_fee") {
        match to_int_safe(Some(value)) {
            Coerced::Value(fee) if fee >= 0 => {}
            Coerced::Value(_) => errors.insert("mgmt_fee", "mgmt_fee must not be negative"),
            _ => errors.insert("mgmt_fee", "mgmt_fee must be a number"),
        }
    }

    errors
}

fn require_text(payload: &Map<String, Value>, field: &str, errors: &mut FieldErrors) {
    match classify(payload, field) {
        FieldValue::Present(value) if text_of(value).is_some() => {}
        FieldValue::Present(_) => errors.insert(field, format!("{field} must be text")),
        _ => errors.insert(field, format!("{field} is required")),
    }
}

fn check_phone(payload: &Map<String, Value>, field: &str, errors: &mut FieldErrors) {
    match classify(payload, field).value() {
        None => errors.insert(field, format!("{field} is required")),
        Some(value) => match text_of(value) {
            Some(phone) if is_valid_phone(&phone) => {}
            _ => errors.insert(
                field,
                format!("{field} may only contain digits, hyphens and spaces"),
            ),
        },
    }
}

fn validate_parties(parties: &[Value]) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let mut has_seller = false;
    let mut has_buyer = false;

    for (index, party) in parties.iter().enumerate() {
        let Some(party) = party.as_object() else {
            errors.insert(format!("parties[{index}]"), "party must be an object");
            continue;
        };

        match optional_text(party, "role").map(|role| role.parse::<SignRole>()) {
            Some(Ok(SignRole::Seller)) => has_seller = true,
            Some(Ok(SignRole::Buyer)) => has_buyer = true,
            Some(Ok(_)) => {}
            Some(Err(err)) => errors.insert(format!("parties[{index}].role"), err.to_string()),
            None => errors.insert(format!("parties[{index}].role"), "role is required"),
        }

        match optional_text(party, "name") {
            None => errors.insert(format!("parties[{index}].name"), "name is required"),
            Some(name) if exceeds(&name, MAX_NAME_LEN) => errors.insert(
                format!("parties[{index}].name"),
                format!("name must be at most {MAX_NAME_LEN} characters"),
            ),
            Some(_) => {}
        }
        match optional_text(party, "phone") {
            None => errors.insert(format!("parties[{index}].phone"), "phone is required"),
            Some(phone) if !is_valid_phone(&phone) => errors.insert(
                format!("parties[{index}].phone"),
                "phone may only contain digits, hyphens and spaces",
            ),
            Some(phone) if exceeds(&phone, MAX_PHONE_LEN) => errors.insert(
                format!("parties[{index}].phone"),
                format!("phone must be at most {MAX_PHONE_LEN} characters"),
            ),
            Some(_) => {}
        }
    }

    if !has_seller || !has_buyer {
        errors.insert("parties", "parties must include a SELLER and a BUYER");
    }
    errors
}

fn validate_money(
    payload: &Map<String, Value>,
    contract_type: ContractType,
    errors: &mut FieldErrors,
) {
    let (required, forbidden): (&[&str], &[&str]) = match contract_type {
        ContractType::Sale => (&["sale_price"], &["deposit", "monthly_rent"]),
        ContractType::Jeonse => (&["deposit"], &["sale_price", "monthly_rent"]),
        ContractType::Wolse | ContractType::Banjeonse => {
            (&["deposit", "monthly_rent"], &["sale_price"])
        }
    };

    for field in required {
        let value = money_value(payload, field);
        match to_int_safe(value.value()) {
            Coerced::Missing => errors.insert(*field, format!("{field} is required")),
            Coerced::Invalid => errors.insert(*field, format!("{field} must be a number")),
            Coerced::Value(amount) if amount <= 0 => {
                errors.insert(*field, format!("{field} must be greater than 0"))
            }
            Coerced::Value(_) => {}
        }
    }

    for field in forbidden {
        if !money_value(payload, field).is_missing() {
            errors.insert(
                *field,
                format!("{field} is not allowed for {contract_type} contracts"),
            );
        }
    }

    if matches!(contract_type, ContractType::Wolse | ContractType::Banjeonse) {
        if let FieldValue::Present(value) = classify(payload, "monthly_payday") {
            match to_int_safe(Some(value)) {
                Coerced::Value(day) if (1..=31).contains(&day) => {}
                _ => errors.insert("monthly_payday", "monthly_payday must be between 1 and 31"),
            }
        }
    }
}

fn money_value<'a>(payload: &'a Map<String, Value>, field: &str) -> FieldValue<'a> {
    if field == "sale_price" {
        classify_any(payload, SALE_PRICE_KEYS)
    } else {
        classify(payload, field)
    }
}

/// A validated contract payload with the party list folded into seller/buyer fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDraft {
    pub contract_type: ContractType,
    pub seller_name: String,
    pub seller_phone: String,
    pub buyer_name: String,
    pub buyer_phone: String,
    pub seller_pid: Option<String>,
    pub buyer_pid: Option<String>,
    pub property_address: String,
    pub unit: Option<Value>,
    pub sale_price: Option<i64>,
    pub deposit: Option<i64>,
    pub monthly_rent: Option<i64>,
    pub monthly_payday: Option<i32>,
    pub mgmt_fee: Option<i64>,
    pub mgmt_note: Option<String>,
    pub contract_date: Option<NaiveDate>,
    pub handover_date: Option<NaiveDate>,
    pub schedule: Map<String, Value>,
    pub brokerage: Option<Value>,
    pub special_terms: Option<String>,
}

pub fn parse_contract_payload(payload: &Map<String, Value>) -> Result<ContractDraft, FieldErrors> {
    validate_contract_payload(payload).into_result()?;

    let contract_type = optional_text(payload, "type")
        .and_then(|value| value.parse::<ContractType>().ok())
        .ok_or_else(|| FieldErrors::single("type", "type is required"))?;

    let party = |role: SignRole, key: &str| -> Option<String> {
        payload
            .get("parties")
            .and_then(Value::as_array)
            .and_then(|parties| {
                parties.iter().filter_map(Value::as_object).find(|party| {
                    optional_text(party, "role").and_then(|r| r.parse::<SignRole>().ok())
                        == Some(role)
                })
            })
            .and_then(|party| optional_text(party, key))
    };
    let flat_or_party = |field: &str, role: SignRole, key: &str| -> String {
        optional_text(payload, field)
            .or_else(|| party(role, key))
            .unwrap_or_default()
    };

    let amount = |field: &str| match to_int_safe(money_value(payload, field).value()) {
        Coerced::Value(amount) => Some(amount),
        _ => None,
    };

    let (sale_price, deposit, monthly_rent, monthly_payday) = match contract_type {
        ContractType::Sale => (amount("sale_price"), None, None, None),
        ContractType::Jeonse => (None, amount("deposit"), None, None),
        ContractType::Wolse | ContractType::Banjeonse => {
            let payday = match to_int_safe(classify(payload, "monthly_payday").value()) {
                Coerced::Value(day) => i32::try_from(day).unwrap_or(DEFAULT_MONTHLY_PAYDAY),
                _ => DEFAULT_MONTHLY_PAYDAY,
            };
            (None, amount("deposit"), amount("monthly_rent"), Some(payday))
        }
    };

    let object_field = |key: &str| classify(payload, key).value().filter(|v| v.is_object()).cloned();

    Ok(ContractDraft {
        contract_type,
        seller_name: flat_or_party("seller_name", SignRole::Seller, "name"),
        seller_phone: flat_or_party("seller_phone", SignRole::Seller, "phone"),
        buyer_name: flat_or_party("buyer_name", SignRole::Buyer, "name"),
        buyer_phone: flat_or_party("buyer_phone", SignRole::Buyer, "phone"),
        seller_pid: optional_text(payload, "seller_pid").or_else(|| party(SignRole::Seller, "pid")),
        buyer_pid: optional_text(payload, "buyer_pid").or_else(|| party(SignRole::Buyer, "pid")),
        property_address: classify_any(payload, PROPERTY_ADDRESS_KEYS)
            .value()
            .and_then(text_of)
            .unwrap_or_default(),
        unit: object_field("unit"),
        sale_price,
        deposit,
        monthly_rent,
        monthly_payday,
        mgmt_fee: match to_int_safe(classify(payload, "mgmt_fee").value()) {
            Coerced::Value(fee) => Some(fee),
            _ => None,
        },
        mgmt_note: optional_text(payload, "mgmt_note"),
        contract_date: optional_text(payload, "contract_date").and_then(|d| parse_date(&d)),
        handover_date: optional_text(payload, "handover_date").and_then(|d| parse_date(&d)),
        schedule: object_field("schedule")
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default(),
        brokerage: object_field("brokerage"),
        special_terms: optional_text(payload, "special_terms"),
    })
}
