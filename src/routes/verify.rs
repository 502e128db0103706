use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::contracts::integrity::{parse_qr_payload, short_hash};
use crate::contracts::service::find_contract;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub code: Option<String>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub is_valid: bool,
    pub contract_id: i32,
    pub doc_no: String,
    pub status: String,
    pub fingerprint: String,
}

/// Public check of a QR payload printed on a contract PDF.
pub async fn verify_code(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> AppResult<Json<VerifyResponse>> {
    let code = query.code.unwrap_or_default();
    let payload = parse_qr_payload(&code).ok_or_else(|| {
        AppError::validation(FieldErrors::single("code", "code is not a contract QR payload"))
    })?;

    let mut conn = state.db()?;
    let contract = find_contract(&mut conn, payload.contract_id)?;
    let is_valid = contract
        .doc_hash
        .as_deref()
        .is_some_and(|hash| short_hash(hash) == payload.fingerprint);

    Ok(Json(VerifyResponse {
        is_valid,
        contract_id: contract.id,
        doc_no: contract.doc_no,
        status: contract.status,
        fingerprint: payload.fingerprint,
    }))
}
