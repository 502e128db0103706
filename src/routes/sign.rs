//! Public signing surface. The token in the path is the signer's only credential.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::contracts::integrity::short_hash;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::kinds::SignStatus;
use crate::models::Contract;
use crate::signing::ledger::lifecycle_of;
use crate::signing::service as signing_service;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SigningContractSummary {
    pub id: i32,
    pub doc_no: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    pub property_address: String,
    pub seller_name: String,
    pub buyer_name: String,
    pub sale_price: Option<i64>,
    pub deposit: Option<i64>,
    pub monthly_rent: Option<i64>,
    pub contract_date: Option<chrono::NaiveDate>,
    pub handover_date: Option<chrono::NaiveDate>,
    pub fingerprint: Option<String>,
}

impl From<Contract> for SigningContractSummary {
    fn from(contract: Contract) -> Self {
        Self {
            id: contract.id,
            fingerprint: contract.doc_hash.as_deref().map(|hash| short_hash(hash).to_string()),
            doc_no: contract.doc_no,
            contract_type: contract.contract_type,
            property_address: contract.property_address,
            seller_name: contract.seller_name,
            buyer_name: contract.buyer_name,
            sale_price: contract.sale_price,
            deposit: contract.deposit,
            monthly_rent: contract.monthly_rent,
            contract_date: contract.contract_date,
            handover_date: contract.handover_date,
        }
    }
}

#[derive(Serialize)]
pub struct SigningPageResponse {
    pub sign_request_id: i32,
    pub role: String,
    pub signer_name: String,
    pub status: String,
    pub expires_at: NaiveDateTime,
    pub signed_at: Option<NaiveDateTime>,
    pub contract: SigningContractSummary,
}

#[derive(Deserialize)]
pub struct SubmitSignatureRequest {
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Serialize)]
pub struct SubmitSignatureResponse {
    pub sign_request_id: i32,
    pub status: String,
    pub signed_at: Option<NaiveDateTime>,
    pub contract_completed: bool,
}

#[derive(Serialize)]
pub struct SignStatusResponse {
    pub status: SignStatus,
    pub is_valid: bool,
    pub expires_at: NaiveDateTime,
    pub signed_at: Option<NaiveDateTime>,
}

pub async fn open_sign_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<SigningPageResponse>> {
    let view = signing_service::open_request(&state, &token)?;
    Ok(Json(SigningPageResponse {
        sign_request_id: view.request.id,
        role: view.request.role,
        signer_name: view.request.signer_name,
        status: view.request.status,
        expires_at: view.request.expires_at,
        signed_at: view.request.signed_at,
        contract: view.contract.into(),
    }))
}

pub async fn submit_signature(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitSignatureRequest>,
) -> AppResult<Json<SubmitSignatureResponse>> {
    let signature = payload
        .signature
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            AppError::validation(FieldErrors::single("signature", "signature is required"))
        })?;

    let submitted = signing_service::submit_signature(&state, &token, &signature).await?;
    Ok(Json(SubmitSignatureResponse {
        sign_request_id: submitted.request.id,
        status: submitted.request.status,
        signed_at: submitted.request.signed_at,
        contract_completed: submitted.contract_completed,
    }))
}

pub async fn sign_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<SignStatusResponse>> {
    let now = state.clock.now();
    let request = signing_service::request_status(&state, &token)?;
    let lifecycle = lifecycle_of(&request)?;
    Ok(Json(SignStatusResponse {
        status: lifecycle.effective_status(now),
        is_valid: lifecycle.is_valid(now),
        expires_at: request.expires_at,
        signed_at: request.signed_at,
    }))
}
