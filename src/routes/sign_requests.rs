use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::kinds::SignStatus;
use crate::models::SignRequest;
use crate::signing::ledger::{lifecycle_of, SignerSpec};
use crate::signing::service::{self as signing_service, IssuedRequest};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSignRequestsRequest {
    pub contract_id: i32,
    #[serde(default)]
    pub signers: Vec<SignerSpec>,
    pub ttl_days: Option<i64>,
}

#[derive(Serialize)]
pub struct IssuedSignRequestResponse {
    pub id: i32,
    pub role: String,
    pub signer_name: String,
    pub signer_email: String,
    pub sign_url: String,
    pub expires_at: NaiveDateTime,
}

impl From<IssuedRequest> for IssuedSignRequestResponse {
    fn from(issued: IssuedRequest) -> Self {
        Self {
            id: issued.request.id,
            role: issued.request.role,
            signer_name: issued.request.signer_name,
            signer_email: issued.request.signer_email,
            sign_url: issued.sign_url,
            expires_at: issued.request.expires_at,
        }
    }
}

#[derive(Serialize)]
pub struct CreateSignRequestsResponse {
    pub sign_requests: Vec<IssuedSignRequestResponse>,
}

/// Back-office view of a request. The token itself is never echoed back.
#[derive(Serialize)]
pub struct SignRequestResponse {
    pub id: i32,
    pub contract_id: i32,
    pub role: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_phone: Option<String>,
    pub status: String,
    pub expires_at: NaiveDateTime,
    pub signed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl SignRequestResponse {
    pub fn new(request: SignRequest, status: SignStatus) -> Self {
        Self {
            id: request.id,
            contract_id: request.contract_id,
            role: request.role,
            signer_name: request.signer_name,
            signer_email: request.signer_email,
            signer_phone: request.signer_phone,
            status: status.as_str().to_string(),
            expires_at: request.expires_at,
            signed_at: request.signed_at,
            created_at: request.created_at,
        }
    }
}

pub async fn create_sign_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateSignRequestsRequest>,
) -> AppResult<(StatusCode, Json<CreateSignRequestsResponse>)> {
    let issued = signing_service::issue_batch(
        &state,
        payload.contract_id,
        &payload.signers,
        payload.ttl_days,
        Some(user.user_id),
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSignRequestsResponse {
            sign_requests: issued.into_iter().map(Into::into).collect(),
        }),
    ))
}

pub async fn list_contract_sign_requests(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<Json<Vec<SignRequestResponse>>> {
    let now = state.clock.now();
    let requests = signing_service::list_requests(&state, contract_id)?;
    let mut response = Vec::with_capacity(requests.len());
    for request in requests {
        let status = lifecycle_of(&request)?.effective_status(now);
        response.push(SignRequestResponse::new(request, status));
    }
    Ok(Json(response))
}

pub async fn cancel_sign_request(
    State(state): State<AppState>,
    Path(request_id): Path<i32>,
    user: AuthenticatedUser,
) -> AppResult<Json<SignRequestResponse>> {
    let canceled = signing_service::cancel_request(&state, request_id, Some(user.user_id))?;
    Ok(Json(SignRequestResponse::new(canceled, SignStatus::Canceled)))
}
