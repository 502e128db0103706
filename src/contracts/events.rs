use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::contracts::integrity::compute_event_hash;
use crate::models::{ContractEvent, NewContractEvent};
use crate::schema::{contract_events, contracts};

pub const EVENT_CREATED: &str = "CREATED";
pub const EVENT_SIGN_REQUESTED: &str = "SIGN_REQUESTED";
pub const EVENT_SIGN_REQUEST_CANCELED: &str = "SIGN_REQUEST_CANCELED";
pub const EVENT_SIGNED: &str = "SIGNED";
pub const EVENT_COMPLETED: &str = "COMPLETED";
pub const EVENT_PDF_GENERATED: &str = "PDF_GENERATED";

/// Appends an audit record linked to the contract's previous one. Rows are never updated
/// afterwards.
///
/// The contract row is locked for the rest of the caller's transaction so appends to one
/// contract's chain are serialized.
pub fn record_event(
    conn: &mut PgConnection,
    contract_id: i32,
    actor_id: Option<Uuid>,
    event_type: &str,
    meta: Value,
    at: NaiveDateTime,
) -> QueryResult<ContractEvent> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        contracts::table
            .find(contract_id)
            .select(contracts::id)
            .for_update()
            .first::<i32>(conn)?;
        let prev_hash: Option<String> = contract_events::table
            .filter(contract_events::contract_id.eq(contract_id))
            .order(contract_events::id.desc())
            .select(contract_events::event_hash)
            .first(conn)
            .optional()?;

        let event = NewContractEvent {
            contract_id,
            actor_id,
            event_type: event_type.to_string(),
            event_hash: compute_event_hash(contract_id, event_type, &meta, at, prev_hash.as_deref()),
            prev_hash,
            meta,
            created_at: at,
        };
        diesel::insert_into(contract_events::table)
            .values(&event)
            .get_result(conn)
    })
}

/// Newest first.
pub fn list_events(conn: &mut PgConnection, contract_id: i32) -> QueryResult<Vec<ContractEvent>> {
    contract_events::table
        .filter(contract_events::contract_id.eq(contract_id))
        .order((contract_events::created_at.desc(), contract_events::id.desc()))
        .load(conn)
}
