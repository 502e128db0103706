//! Persistence of signature requests. Every read re-checks expiry against `now` and persists
//! the `EXPIRED` flip the first time it is observed.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MAX_SIGN_TOKEN_TTL_DAYS;
use crate::contracts::events::{
    record_event, EVENT_SIGNED, EVENT_SIGN_REQUESTED, EVENT_SIGN_REQUEST_CANCELED,
};
use crate::contracts::validation::{exceeds, is_valid_phone, MAX_NAME_LEN, MAX_PHONE_LEN};
use crate::error::FieldErrors;
use crate::kinds::{SignRole, SignStatus};
use crate::models::{NewSignRequest, SignRequest};
use crate::schema::{contracts, sign_requests};
use crate::signing::state::{Lifecycle, SignConflict};
use crate::signing::token::{generate_token, token_prefix};
use crate::signing::SignError;

pub const MAX_TOKEN_ATTEMPTS: usize = 5;
pub const MAX_TTL_DAYS: i64 = MAX_SIGN_TOKEN_TTL_DAYS;
const MAX_EMAIL_LEN: usize = 255;
const TOKEN_CONSTRAINT: &str = "sign_requests_token_uc";

/// Outcome of a guarded transition. The outer error is infrastructure; the inner one is a
/// rejected trigger whose side effects (an expiry flip) must still be committed.
pub type Transition<T> = Result<T, SignConflict>;

pub fn settle<T>(result: Result<Transition<T>, SignError>) -> Result<T, SignError> {
    result.and_then(|transition| transition.map_err(SignError::from))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerSpec {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSigner {
    pub role: SignRole,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// All-or-nothing: any invalid spec rejects the whole batch.
pub fn validate_signer_specs(specs: &[SignerSpec]) -> Result<Vec<ValidSigner>, FieldErrors> {
    let mut errors = FieldErrors::new();
    if specs.is_empty() {
        errors.insert("signers", "at least one signer is required");
        return Err(errors);
    }

    let mut seen_roles: BTreeMap<SignRole, usize> = BTreeMap::new();
    let mut valid = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let field = |name: &str| format!("signers[{index}].{name}");

        let role = match trimmed(&spec.role).map(|role| role.parse::<SignRole>()) {
            Some(Ok(role)) => {
                if let Some(first) = seen_roles.insert(role, index) {
                    errors.insert(
                        field("role"),
                        format!("role {role} is already assigned to signers[{first}]"),
                    );
                }
                Some(role)
            }
            Some(Err(err)) => {
                errors.insert(field("role"), err.to_string());
                None
            }
            None => {
                errors.insert(field("role"), "role is required");
                None
            }
        };

        let name = trimmed(&spec.name);
        match &name {
            None => errors.insert(field("name"), "name is required"),
            Some(name) if exceeds(name, MAX_NAME_LEN) => errors.insert(
                field("name"),
                format!("name must be at most {MAX_NAME_LEN} characters"),
            ),
            Some(_) => {}
        }

        let email = trimmed(&spec.email);
        match &email {
            None => errors.insert(field("email"), "email is required"),
            Some(email) if exceeds(email, MAX_EMAIL_LEN) => errors.insert(
                field("email"),
                format!("email must be at most {MAX_EMAIL_LEN} characters"),
            ),
            Some(email) if !looks_like_email(email) => {
                errors.insert(field("email"), "email is not a valid address")
            }
            Some(_) => {}
        }

        let phone = trimmed(&spec.phone);
        match &phone {
            Some(phone) if !is_valid_phone(phone) => errors.insert(
                field("phone"),
                "phone may only contain digits, hyphens and spaces",
            ),
            Some(phone) if exceeds(phone, MAX_PHONE_LEN) => errors.insert(
                field("phone"),
                format!("phone must be at most {MAX_PHONE_LEN} characters"),
            ),
            _ => {}
        }

        if let (Some(role), Some(name), Some(email)) = (role, name, email) {
            valid.push(ValidSigner {
                role,
                name,
                email,
                phone,
            });
        }
    }

    errors.into_result().map(|()| valid)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !email.contains(' ')
        }
        None => false,
    }
}

pub fn lifecycle_of(request: &SignRequest) -> Result<Lifecycle, SignError> {
    let status = request
        .status
        .parse::<SignStatus>()
        .map_err(|err| SignError::Internal(err.into()))?;
    Ok(Lifecycle::new(status, request.expires_at))
}

pub fn role_of(request: &SignRequest) -> Result<SignRole, SignError> {
    request
        .role
        .parse::<SignRole>()
        .map_err(|err| SignError::Internal(err.into()))
}

/// A contract is complete once every role with a live (non-canceled) request has at least one
/// signed request. A contract without any live request is not complete.
pub fn all_roles_signed(requests: &[SignRequest]) -> bool {
    let mut roles: BTreeMap<&str, bool> = BTreeMap::new();
    for request in requests {
        if request.status == SignStatus::Canceled.as_str() {
            continue;
        }
        let signed = roles.entry(request.role.as_str()).or_insert(false);
        *signed |= request.status == SignStatus::Signed.as_str();
    }
    !roles.is_empty() && roles.values().all(|signed| *signed)
}

fn insert_with_fresh_token(
    conn: &mut PgConnection,
    mut request: NewSignRequest,
) -> Result<SignRequest, SignError> {
    for attempt in 1..=MAX_TOKEN_ATTEMPTS {
        request.token = generate_token();
        let inserted = conn.transaction::<SignRequest, DieselError, _>(|conn| {
            diesel::insert_into(sign_requests::table)
                .values(&request)
                .get_result(conn)
        });
        match inserted {
            Ok(row) => return Ok(row),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some(TOKEN_CONSTRAINT) =>
            {
                warn!(attempt, contract_id = request.contract_id, "sign token collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(SignError::Internal(anyhow::anyhow!(
        "could not allocate a unique sign token after {MAX_TOKEN_ATTEMPTS} attempts"
    )))
}

/// `now + ttl_days`, for a TTL between 1 and [`MAX_TTL_DAYS`].
pub fn expiry_for(now: NaiveDateTime, ttl_days: i64) -> Result<NaiveDateTime, FieldErrors> {
    if !(1..=MAX_TTL_DAYS).contains(&ttl_days) {
        return Err(FieldErrors::single(
            "ttl_days",
            format!("ttl_days must be between 1 and {MAX_TTL_DAYS}"),
        ));
    }
    Duration::try_days(ttl_days)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| FieldErrors::single("ttl_days", "ttl_days is out of range"))
}

/// Issues one request per signer inside a single transaction.
pub fn create_batch(
    conn: &mut PgConnection,
    contract_id: i32,
    signers: &[ValidSigner],
    ttl_days: i64,
    actor_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<Vec<SignRequest>, SignError> {
    let expires_at = expiry_for(now, ttl_days).map_err(SignError::Validation)?;

    conn.transaction::<_, SignError, _>(|conn| {
        contracts::table
            .find(contract_id)
            .select(contracts::id)
            .first::<i32>(conn)
            .optional()?
            .ok_or(SignError::ContractNotFound)?;

        let mut created = Vec::with_capacity(signers.len());
        for signer in signers {
            let row = insert_with_fresh_token(
                conn,
                NewSignRequest {
                    contract_id,
                    role: signer.role.as_str().to_string(),
                    signer_name: signer.name.clone(),
                    signer_email: signer.email.clone(),
                    signer_phone: signer.phone.clone(),
                    token: String::new(),
                    expires_at,
                    status: SignStatus::Pending.as_str().to_string(),
                    created_at: now,
                    updated_at: now,
                },
            )?;
            created.push(row);
        }

        record_event(
            conn,
            contract_id,
            actor_id,
            EVENT_SIGN_REQUESTED,
            json!({
                "sign_request_ids": created.iter().map(|r| r.id).collect::<Vec<_>>(),
                "roles": created.iter().map(|r| r.role.clone()).collect::<Vec<_>>(),
                "ttl_days": ttl_days,
            }),
            now,
        )?;

        info!(contract_id, count = created.len(), "issued signature requests");
        Ok(created)
    })
}

fn set_status(
    conn: &mut PgConnection,
    request_id: i32,
    status: SignStatus,
    now: NaiveDateTime,
) -> QueryResult<SignRequest> {
    diesel::update(sign_requests::table.find(request_id))
        .set((
            sign_requests::status.eq(status.as_str()),
            sign_requests::updated_at.eq(now),
        ))
        .get_result(conn)
}

fn expire_if_due(
    conn: &mut PgConnection,
    request: SignRequest,
    now: NaiveDateTime,
) -> Result<SignRequest, SignError> {
    if !lifecycle_of(&request)?.needs_expiry(now) {
        return Ok(request);
    }
    let open = [SignStatus::Pending.as_str(), SignStatus::Viewed.as_str()];
    let flipped = diesel::update(
        sign_requests::table
            .find(request.id)
            .filter(sign_requests::status.eq_any(open)),
    )
    .set((
        sign_requests::status.eq(SignStatus::Expired.as_str()),
        sign_requests::updated_at.eq(now),
    ))
    .get_result::<SignRequest>(conn)
    .optional()?;
    info!(
        sign_request_id = request.id,
        token = token_prefix(&request.token),
        "signature request expired"
    );
    match flipped {
        Some(row) => Ok(row),
        None => Ok(sign_requests::table.find(request.id).first(conn)?),
    }
}

/// Lookup without applying any trigger. Expired requests come back flipped to `EXPIRED`.
pub fn find_by_token(
    conn: &mut PgConnection,
    token: &str,
    now: NaiveDateTime,
) -> Result<SignRequest, SignError> {
    let request = sign_requests::table
        .filter(sign_requests::token.eq(token))
        .first::<SignRequest>(conn)
        .optional()?
        .ok_or(SignError::NotFound)?;
    expire_if_due(conn, request, now)
}

fn lock_request(conn: &mut PgConnection, request_id: i32) -> Result<SignRequest, SignError> {
    sign_requests::table
        .find(request_id)
        .for_update()
        .first::<SignRequest>(conn)
        .optional()?
        .ok_or(SignError::NotFound)
}

/// Locks the contract a request belongs to. Writers take the contract before the request.
fn lock_owning_contract(conn: &mut PgConnection, request_id: i32) -> Result<i32, SignError> {
    let contract_id = sign_requests::table
        .find(request_id)
        .select(sign_requests::contract_id)
        .first::<i32>(conn)
        .optional()?
        .ok_or(SignError::NotFound)?;
    contracts::table
        .find(contract_id)
        .select(contracts::id)
        .for_update()
        .first::<i32>(conn)
        .optional()?
        .ok_or(SignError::ContractNotFound)
}

/// Opening a signing link. A completed request is returned read-only.
pub fn view(
    conn: &mut PgConnection,
    token: &str,
    now: NaiveDateTime,
) -> Result<Transition<SignRequest>, SignError> {
    conn.transaction::<_, SignError, _>(|conn| {
        let request_id = sign_requests::table
            .filter(sign_requests::token.eq(token))
            .select(sign_requests::id)
            .first::<i32>(conn)
            .optional()?
            .ok_or(SignError::NotFound)?;
        let request = lock_request(conn, request_id)?;
        let lifecycle = lifecycle_of(&request)?;

        if lifecycle.needs_expiry(now) {
            expire_if_due(conn, request, now)?;
            return Ok(Err(SignConflict::Expired));
        }

        match lifecycle.view(now) {
            Ok(next) if lifecycle.status != next => {
                let viewed = set_status(conn, request.id, next, now)?;
                info!(
                    sign_request_id = viewed.id,
                    token = token_prefix(&viewed.token),
                    "signature request viewed"
                );
                Ok(Ok(viewed))
            }
            Ok(_) => Ok(Ok(request)),
            Err(SignConflict::AlreadySigned) => Ok(Ok(request)),
            Err(conflict) => Ok(Err(conflict)),
        }
    })
}

#[derive(Debug, Clone)]
pub struct SignedOutcome {
    pub request: SignRequest,
    pub contract_completed: bool,
}

/// Applies the `SIGNED` transition under row locks on the contract and the request, so two
/// submissions for one token cannot both succeed and completion is detected exactly once.
pub fn complete_signature(
    conn: &mut PgConnection,
    request_id: i32,
    image_key: &str,
    image_sha256: &str,
    now: NaiveDateTime,
) -> Result<Transition<SignedOutcome>, SignError> {
    conn.transaction::<_, SignError, _>(|conn| {
        let contract_id = lock_owning_contract(conn, request_id)?;
        let request = lock_request(conn, request_id)?;
        let lifecycle = lifecycle_of(&request)?;
        if lifecycle.needs_expiry(now) {
            expire_if_due(conn, request, now)?;
            return Ok(Err(SignConflict::Expired));
        }
        if let Err(conflict) = lifecycle.sign(now) {
            return Ok(Err(conflict));
        }

        let signed: SignRequest = diesel::update(sign_requests::table.find(request_id))
            .set((
                sign_requests::status.eq(SignStatus::Signed.as_str()),
                sign_requests::signed_at.eq(Some(now)),
                sign_requests::signature_image_path.eq(Some(image_key)),
                sign_requests::updated_at.eq(now),
            ))
            .get_result(conn)?;

        record_event(
            conn,
            contract_id,
            None,
            EVENT_SIGNED,
            json!({
                "sign_request_id": signed.id,
                "role": signed.role,
                "signer_name": signed.signer_name,
                "image_sha256": image_sha256,
                "via": "link",
            }),
            now,
        )?;

        let siblings: Vec<SignRequest> = sign_requests::table
            .filter(sign_requests::contract_id.eq(contract_id))
            .load(conn)?;
        let contract_completed = all_roles_signed(&siblings);

        info!(
            contract_id,
            sign_request_id = signed.id,
            role = %signed.role,
            contract_completed,
            "signature recorded"
        );
        Ok(Ok(SignedOutcome {
            request: signed,
            contract_completed,
        }))
    })
}

pub fn cancel(
    conn: &mut PgConnection,
    request_id: i32,
    actor_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<Transition<SignRequest>, SignError> {
    conn.transaction::<_, SignError, _>(|conn| {
        lock_owning_contract(conn, request_id)?;
        let request = lock_request(conn, request_id)?;
        let lifecycle = lifecycle_of(&request)?;
        if lifecycle.needs_expiry(now) {
            expire_if_due(conn, request, now)?;
            return Ok(Err(SignConflict::Expired));
        }
        let next = match lifecycle.cancel(now) {
            Ok(next) => next,
            Err(conflict) => return Ok(Err(conflict)),
        };

        let canceled = set_status(conn, request.id, next, now)?;
        record_event(
            conn,
            canceled.contract_id,
            actor_id,
            EVENT_SIGN_REQUEST_CANCELED,
            json!({ "sign_request_id": canceled.id, "role": canceled.role }),
            now,
        )?;
        info!(sign_request_id = canceled.id, "signature request canceled");
        Ok(Ok(canceled))
    })
}

pub fn list_for_contract(
    conn: &mut PgConnection,
    contract_id: i32,
    now: NaiveDateTime,
) -> Result<Vec<SignRequest>, SignError> {
    contracts::table
        .find(contract_id)
        .select(contracts::id)
        .first::<i32>(conn)
        .optional()?
        .ok_or(SignError::ContractNotFound)?;

    expire_overdue_where(conn, Some(contract_id), now)?;

    Ok(sign_requests::table
        .filter(sign_requests::contract_id.eq(contract_id))
        .order(sign_requests::id.asc())
        .load(conn)?)
}

/// Flips every overdue open request to `EXPIRED`.
pub fn expire_overdue(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
    expire_overdue_where(conn, None, now)
}

fn expire_overdue_where(
    conn: &mut PgConnection,
    contract_id: Option<i32>,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    let open = [SignStatus::Pending.as_str(), SignStatus::Viewed.as_str()];
    let overdue = sign_requests::status
        .eq_any(open)
        .and(sign_requests::expires_at.le(now));
    let changes = (
        sign_requests::status.eq(SignStatus::Expired.as_str()),
        sign_requests::updated_at.eq(now),
    );
    match contract_id {
        Some(contract_id) => diesel::update(
            sign_requests::table
                .filter(overdue)
                .filter(sign_requests::contract_id.eq(contract_id)),
        )
        .set(changes)
        .execute(conn),
        None => diesel::update(sign_requests::table.filter(overdue))
            .set(changes)
            .execute(conn),
    }
}
