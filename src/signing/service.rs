use diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contracts::integrity::sha256_hex;
use crate::contracts::service::{find_contract, finalize_contract};
use crate::contracts::ContractError;
use crate::models::{Contract, SignRequest};
use crate::notifier::{completion_email, sign_request_email, sign_request_sms};
use crate::signing::image::{decode_signature_image, request_image_key, SIGNATURE_CONTENT_TYPE};
use crate::signing::ledger::{self, settle, SignerSpec};
use crate::signing::token::{sign_url, token_prefix};
use crate::signing::SignError;
use crate::state::AppState;

type PooledConn =
    diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::pg::PgConnection>>;

fn connection(state: &AppState) -> Result<PooledConn, SignError> {
    state
        .pool
        .get()
        .map_err(|err| SignError::Internal(err.into()))
}

fn contract_of(conn: &mut PooledConn, contract_id: i32) -> Result<Contract, SignError> {
    find_contract(conn, contract_id).map_err(|err| match err {
        ContractError::NotFound => SignError::ContractNotFound,
        other => other.into(),
    })
}

#[derive(Debug, Clone)]
pub struct IssuedRequest {
    pub request: SignRequest,
    pub sign_url: String,
}

/// Creates one request per signer and notifies each of them. Delivery failures are logged and
/// never undo the batch.
pub async fn issue_batch(
    state: &AppState,
    contract_id: i32,
    specs: &[SignerSpec],
    ttl_days: Option<i64>,
    actor_id: Option<Uuid>,
) -> Result<Vec<IssuedRequest>, SignError> {
    let signers = ledger::validate_signer_specs(specs).map_err(SignError::Validation)?;
    let ttl_days = ttl_days.unwrap_or(state.config.sign_token_ttl_days);
    let now = state.clock.now();

    let (contract, created) = {
        let mut conn = connection(state)?;
        let created = ledger::create_batch(&mut conn, contract_id, &signers, ttl_days, actor_id, now)?;
        (contract_of(&mut conn, contract_id)?, created)
    };

    let mut issued = Vec::with_capacity(created.len());
    for request in created {
        let url = sign_url(&state.config.app_base_url, &request.token);
        notify_signer(state, &contract, &request, &url).await;
        issued.push(IssuedRequest {
            request,
            sign_url: url,
        });
    }
    Ok(issued)
}

async fn notify_signer(state: &AppState, contract: &Contract, request: &SignRequest, url: &str) {
    let expires_at = request.expires_at.format("%Y-%m-%d %H:%M UTC").to_string();
    let (subject, html) = sign_request_email(
        &request.signer_name,
        contract.id,
        &contract.contract_type,
        &request.role,
        &expires_at,
        url,
    );
    match state
        .notifier
        .send_email(&request.signer_email, &subject, &html)
        .await
    {
        Ok(receipt) => info!(
            sign_request_id = request.id,
            message_id = %receipt.message_id,
            "sign request email sent"
        ),
        Err(err) => warn!(
            sign_request_id = request.id,
            token = token_prefix(&request.token),
            error = %err,
            "failed to send sign request email"
        ),
    }

    if let Some(phone) = request.signer_phone.as_deref() {
        let text = sign_request_sms(&contract.contract_type, url);
        if let Err(err) = state.notifier.send_sms(phone, &text).await {
            warn!(
                sign_request_id = request.id,
                error = %err,
                "failed to send sign request sms"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct SigningView {
    pub request: SignRequest,
    pub contract: Contract,
}

/// Opening a signing link.
pub fn open_request(state: &AppState, token: &str) -> Result<SigningView, SignError> {
    let mut conn = connection(state)?;
    let request = settle(ledger::view(&mut conn, token, state.clock.now()))?;
    let contract = contract_of(&mut conn, request.contract_id)?;
    Ok(SigningView { request, contract })
}

/// Status poll. Reports every status, including terminal ones.
pub fn request_status(state: &AppState, token: &str) -> Result<SignRequest, SignError> {
    let mut conn = connection(state)?;
    ledger::find_by_token(&mut conn, token, state.clock.now())
}

#[derive(Debug, Clone)]
pub struct SubmittedSignature {
    pub request: SignRequest,
    pub contract_completed: bool,
}

/// Accepts the signer's image and applies the `SIGNED` transition. The image is stored before
/// the transition and removed again when the transition is rejected.
pub async fn submit_signature(
    state: &AppState,
    token: &str,
    signature: &str,
) -> Result<SubmittedSignature, SignError> {
    let now = state.clock.now();
    let mut conn = connection(state)?;
    let request = ledger::find_by_token(&mut conn, token, now)?;
    ledger::lifecycle_of(&request)?.sign(now)?;
    let role = ledger::role_of(&request)?;

    let image = decode_signature_image(signature)?;
    let image_sha256 = sha256_hex(&image.png);
    let key = request_image_key(request.contract_id, role, request.id);
    state
        .storage
        .put_object(&key, image.png, Some(SIGNATURE_CONTENT_TYPE.to_string()))
        .await
        .map_err(SignError::Storage)?;

    let renderer = state.renderer.as_ref();
    let watermark = state.config.pdf_watermark_text.as_str();
    let outcome = conn.transaction::<_, SignError, _>(|conn| {
        let signed = match ledger::complete_signature(conn, request.id, &key, &image_sha256, now)? {
            Ok(signed) => signed,
            Err(conflict) => return Ok(Err(conflict)),
        };
        let completed = if signed.contract_completed {
            finalize_contract(conn, renderer, watermark, signed.request.contract_id, now)?
        } else {
            None
        };
        Ok(Ok((signed.request, completed)))
    });
    drop(conn);

    let (signed, completed) = match settle(outcome) {
        Ok(result) => result,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(
                    sign_request_id = request.id,
                    key = %key,
                    error = %cleanup,
                    "failed to remove orphaned signature image"
                );
            }
            return Err(err);
        }
    };

    let contract_completed = completed.is_some();
    if let Some(contract) = completed {
        notify_completion(state, &contract).await;
    }
    Ok(SubmittedSignature {
        request: signed,
        contract_completed,
    })
}

/// Best-effort notice to the back office once every requested party has signed.
pub async fn notify_completion(state: &AppState, contract: &Contract) {
    let (subject, html) = completion_email(contract.id, &contract.doc_no, &contract.contract_type);
    if let Err(err) = state
        .notifier
        .send_email(&state.config.admin_email, &subject, &html)
        .await
    {
        warn!(contract_id = contract.id, error = %err, "failed to send completion email");
    }
}

pub fn cancel_request(
    state: &AppState,
    request_id: i32,
    actor_id: Option<Uuid>,
) -> Result<SignRequest, SignError> {
    let mut conn = connection(state)?;
    settle(ledger::cancel(&mut conn, request_id, actor_id, state.clock.now()))
}

pub fn list_requests(state: &AppState, contract_id: i32) -> Result<Vec<SignRequest>, SignError> {
    let mut conn = connection(state)?;
    ledger::list_for_contract(&mut conn, contract_id, state.clock.now())
}
