//! Hashes that bind a contract's content, its rendered PDF and its audit log together.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::kinds::LifecycleStatus;
use crate::models::{Contract, ContractEvent};

pub const SHORT_HASH_LEN: usize = 16;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compact serialization with lexicographically ordered object keys.
pub fn canonical_json(value: &Value) -> String {
    // serde_json's default map is a BTreeMap, so keys serialize sorted at every depth.
    value.to_string()
}

pub fn canonical_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The fields a doc hash covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocHashInput<'a> {
    pub contract_type: &'a str,
    pub seller_name: &'a str,
    pub buyer_name: &'a str,
    pub property_address: &'a str,
    pub sale_price: Option<i64>,
    pub deposit: Option<i64>,
    pub monthly_rent: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl<'a> From<&'a Contract> for DocHashInput<'a> {
    fn from(contract: &'a Contract) -> Self {
        Self {
            contract_type: &contract.contract_type,
            seller_name: &contract.seller_name,
            buyer_name: &contract.buyer_name,
            property_address: &contract.property_address,
            sale_price: contract.sale_price,
            deposit: contract.deposit,
            monthly_rent: contract.monthly_rent,
            created_at: contract.created_at,
        }
    }
}

pub fn compute_doc_hash(input: &DocHashInput<'_>) -> String {
    let canonical = json!({
        "type": input.contract_type,
        "seller_name": input.seller_name,
        "buyer_name": input.buyer_name,
        "property_address": input.property_address,
        "price_total": input.sale_price,
        "deposit": input.deposit,
        "monthly_rent": input.monthly_rent,
        "created_at": canonical_timestamp(input.created_at),
    });
    sha256_hex(canonical_json(&canonical).as_bytes())
}

pub fn compute_pdf_hash(pdf: &[u8]) -> String {
    sha256_hex(pdf)
}

/// SHA-256 of a sensitive identifier; the raw value is never stored.
pub fn hash_identifier(raw: &str) -> String {
    sha256_hex(raw.trim().as_bytes())
}

/// Covers the previous event's hash, so removing or reordering a record breaks every later link.
pub fn compute_event_hash(
    contract_id: i32,
    event_type: &str,
    meta: &Value,
    created_at: NaiveDateTime,
    prev_hash: Option<&str>,
) -> String {
    let canonical = json!({
        "contract_id": contract_id,
        "event_type": event_type,
        "meta": meta,
        "created_at": canonical_timestamp(created_at),
        "prev_hash": prev_hash,
    });
    sha256_hex(canonical_json(&canonical).as_bytes())
}

pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrPayload {
    pub contract_id: i32,
    pub fingerprint: String,
}

/// Lookup aid printed on the PDF, not a credential.
pub fn build_qr_payload(contract_id: i32, doc_hash: &str) -> String {
    format!("CONTRACT_ID:{contract_id}|HASH:{}", short_hash(doc_hash))
}

pub fn parse_qr_payload(raw: &str) -> Option<QrPayload> {
    let (id_part, hash_part) = raw.trim().split_once('|')?;
    let contract_id = id_part.strip_prefix("CONTRACT_ID:")?.parse().ok()?;
    let fingerprint = hash_part.strip_prefix("HASH:")?;
    if fingerprint.len() != SHORT_HASH_LEN || !fingerprint.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }
    Some(QrPayload {
        contract_id,
        fingerprint: fingerprint.to_ascii_lowercase(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashCheck {
    pub is_valid: bool,
    pub current_hash: String,
    pub stored_hash: Option<String>,
}

impl HashCheck {
    fn compare(current_hash: String, stored_hash: Option<&str>) -> Self {
        Self {
            is_valid: stored_hash == Some(current_hash.as_str()),
            stored_hash: stored_hash.map(str::to_string),
            current_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventChainCheck {
    pub is_valid: bool,
    pub checked: usize,
    pub tampered_event_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub doc: HashCheck,
    pub pdf: HashCheck,
    pub events: EventChainCheck,
}

/// Walks the events in insertion order. An event is flagged when its own hash does not
/// recompute or when it does not link to the hash of the event before it.
pub fn verify_events(events: &[ContractEvent]) -> EventChainCheck {
    let mut ordered: Vec<&ContractEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.id);

    let mut tampered_event_ids = Vec::new();
    let mut previous: Option<&str> = None;
    for event in ordered {
        let recomputed = compute_event_hash(
            event.contract_id,
            &event.event_type,
            &event.meta,
            event.created_at,
            event.prev_hash.as_deref(),
        );
        if recomputed != event.event_hash || event.prev_hash.as_deref() != previous {
            tampered_event_ids.push(event.id);
        }
        previous = Some(event.event_hash.as_str());
    }
    EventChainCheck {
        is_valid: tampered_event_ids.is_empty(),
        checked: events.len(),
        tampered_event_ids,
    }
}

/// Mismatches are reported as data, never as errors.
pub fn verify(
    contract: &Contract,
    events: &[ContractEvent],
    recomputed_pdf: &[u8],
) -> IntegrityReport {
    let doc = HashCheck::compare(
        compute_doc_hash(&DocHashInput::from(contract)),
        contract.doc_hash.as_deref(),
    );
    let pdf = HashCheck::compare(
        compute_pdf_hash(recomputed_pdf),
        contract.pdf_sha256.as_deref(),
    );
    let events = verify_events(events);
    IntegrityReport {
        is_valid: doc.is_valid && pdf.is_valid && events.is_valid,
        doc,
        pdf,
        events,
    }
}

/// Advisory status from the contract and handover dates.
pub fn derive_lifecycle(
    contract_date: Option<NaiveDate>,
    handover_date: Option<NaiveDate>,
    today: NaiveDate,
) -> LifecycleStatus {
    match (contract_date, handover_date) {
        (Some(start), _) if today < start => LifecycleStatus::Draft,
        (_, Some(end)) if today > end => LifecycleStatus::Expired,
        (Some(_), _) => LifecycleStatus::Active,
        (None, _) => LifecycleStatus::Draft,
    }
}
