use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::contracts::events::list_events;
use crate::contracts::integrity::{build_qr_payload, derive_lifecycle, short_hash, IntegrityReport};
use crate::contracts::service::{
    self as contract_service, ClientInfo, ContractFilter, SlotSignature, DEFAULT_PER_PAGE,
};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::kinds::{ContractType, LifecycleStatus};
use crate::models::{Contract, ContractEvent, ContractSignature};
use crate::signing::image::SIGNATURE_CONTENT_TYPE;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ContractResponse {
    pub id: i32,
    pub doc_no: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    pub status: String,
    pub form_version: String,
    pub seller_name: String,
    pub seller_phone: String,
    pub buyer_name: String,
    pub buyer_phone: String,
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
    pub schedule: Value,
    pub brokerage: Option<Value>,
    pub special_terms: Option<String>,
    pub doc_hash: Option<String>,
    pub pdf_sha256: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Contract> for ContractResponse {
    fn from(contract: Contract) -> Self {
        Self {
            id: contract.id,
            doc_no: contract.doc_no,
            contract_type: contract.contract_type,
            status: contract.status,
            form_version: contract.form_version,
            seller_name: contract.seller_name,
            seller_phone: contract.seller_phone,
            buyer_name: contract.buyer_name,
            buyer_phone: contract.buyer_phone,
            property_address: contract.property_address,
            unit: contract.unit,
            sale_price: contract.sale_price,
            deposit: contract.deposit,
            monthly_rent: contract.monthly_rent,
            monthly_payday: contract.monthly_payday,
            mgmt_fee: contract.mgmt_fee,
            mgmt_note: contract.mgmt_note,
            contract_date: contract.contract_date,
            handover_date: contract.handover_date,
            schedule: contract.schedule,
            brokerage: contract.brokerage,
            special_terms: contract.special_terms,
            doc_hash: contract.doc_hash,
            pdf_sha256: contract.pdf_sha256,
            created_by: contract.user_id,
            created_at: contract.created_at,
            updated_at: contract.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct SignatureResponse {
    pub id: i32,
    pub role: String,
    pub auth_method: Option<String>,
    pub signed: bool,
    pub signed_payload_hash: Option<String>,
    pub signed_at: Option<NaiveDateTime>,
}

impl From<ContractSignature> for SignatureResponse {
    fn from(signature: ContractSignature) -> Self {
        Self {
            id: signature.id,
            role: signature.role,
            auth_method: signature.auth_method,
            signed: signature.signed_at.is_some(),
            signed_payload_hash: signature.signed_payload_hash,
            signed_at: signature.signed_at,
        }
    }
}

#[derive(Serialize)]
pub struct ContractDetailResponse {
    #[serde(flatten)]
    pub contract: ContractResponse,
    pub computed_status: LifecycleStatus,
    pub qr_payload: Option<String>,
    pub signatures: Vec<SignatureResponse>,
}

#[derive(Serialize)]
pub struct ContractListResponse {
    pub items: Vec<ContractResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: i32,
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub meta: Value,
    pub event_hash: String,
    pub prev_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<ContractEvent> for EventResponse {
    fn from(event: ContractEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            actor_id: event.actor_id,
            meta: event.meta,
            event_hash: event.event_hash,
            prev_hash: event.prev_hash,
            created_at: event.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct ContractListQuery {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub contract_type: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct SlotSignatureRequest {
    pub image: String,
    pub auth_method: Option<String>,
    pub auth_ref: Option<String>,
}

#[derive(Serialize)]
pub struct SlotSignatureResponse {
    pub signature: SignatureResponse,
    pub contract_completed: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PdfMode {
    #[default]
    Inline,
    Download,
}

#[derive(Deserialize)]
pub struct PdfQuery {
    #[serde(default)]
    pub mode: PdfMode,
}

#[derive(Serialize)]
pub struct PdfInfoResponse {
    pub contract_id: i32,
    pub doc_no: String,
    pub doc_hash: Option<String>,
    pub short_hash: Option<String>,
    pub pdf_sha256: Option<String>,
    pub qr_payload: Option<String>,
}

fn detail(
    state: &AppState,
    contract: Contract,
    signatures: Vec<ContractSignature>,
) -> ContractDetailResponse {
    let computed_status = derive_lifecycle(
        contract.contract_date,
        contract.handover_date,
        state.clock.today(),
    );
    let qr_payload = contract
        .doc_hash
        .as_deref()
        .map(|hash| build_qr_payload(contract.id, hash));
    ContractDetailResponse {
        contract: contract.into(),
        computed_status,
        qr_payload,
        signatures: signatures.into_iter().map(SignatureResponse::from).collect(),
    }
}

pub async fn create_contract(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<ContractDetailResponse>)> {
    let payload = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;

    let mut conn = state.db()?;
    let contract = contract_service::create_contract(
        &mut conn,
        payload,
        &state.config.contract_form_version,
        Some(user.user_id),
        state.clock.now(),
    )?;
    let signatures = contract_service::list_signatures(&mut conn, contract.id)?;
    Ok((StatusCode::CREATED, Json(detail(&state, contract, signatures))))
}

pub async fn list_contracts(
    State(state): State<AppState>,
    Query(params): Query<ContractListQuery>,
) -> AppResult<Json<ContractListResponse>> {
    let contract_type = params
        .contract_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<ContractType>()
                .map_err(|err| AppError::validation(FieldErrors::single("type", err.to_string())))
        })
        .transpose()?;
    let filter = ContractFilter {
        q: params.q,
        contract_type,
    };
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, contract_service::MAX_PER_PAGE);

    let mut conn = state.db()?;
    let (rows, total) = contract_service::list_contracts(&mut conn, &filter, page, per_page)?;
    Ok(Json(ContractListResponse {
        items: rows.into_iter().map(ContractResponse::from).collect(),
        total,
        page,
        per_page,
    }))
}

pub async fn get_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<Json<ContractDetailResponse>> {
    let mut conn = state.db()?;
    let contract = contract_service::find_contract(&mut conn, contract_id)?;
    let signatures = contract_service::list_signatures(&mut conn, contract_id)?;
    Ok(Json(detail(&state, contract, signatures)))
}

pub async fn delete_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<StatusCode> {
    contract_service::delete_contract(&state, contract_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    ClientInfo {
        ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

pub async fn sign_slot(
    State(state): State<AppState>,
    Path((contract_id, role)): Path<(i32, String)>,
    user: AuthenticatedUser,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<SlotSignatureRequest>,
) -> AppResult<Json<SlotSignatureResponse>> {
    let client = client_info(&headers, peer.map(|ConnectInfo(addr)| addr));
    let outcome = contract_service::sign_slot(
        &state,
        contract_id,
        &role,
        SlotSignature {
            image: payload.image,
            auth_method: payload.auth_method,
            auth_ref: payload.auth_ref,
        },
        client,
        Some(user.user_id),
    )
    .await?;
    Ok(Json(SlotSignatureResponse {
        signature: outcome.signature.into(),
        contract_completed: outcome.completed.is_some(),
    }))
}

pub async fn signature_image(
    State(state): State<AppState>,
    Path((contract_id, signature_id)): Path<(i32, i32)>,
) -> AppResult<impl IntoResponse> {
    let bytes = contract_service::signature_image(&state, contract_id, signature_id).await?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(SIGNATURE_CONTENT_TYPE))],
        bytes,
    ))
}

pub async fn list_contract_events(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let mut conn = state.db()?;
    contract_service::find_contract(&mut conn, contract_id)?;
    let events = list_events(&mut conn, contract_id)?;
    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}

pub async fn contract_pdf(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
    user: AuthenticatedUser,
    Query(query): Query<PdfQuery>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let (contract, pdf) = contract_service::generate_pdf(
        &mut conn,
        state.renderer.as_ref(),
        &state.config.pdf_watermark_text,
        contract_id,
        Some(user.user_id),
        state.clock.now(),
    )?;

    let disposition = match query.mode {
        PdfMode::Inline => "inline",
        PdfMode::Download => "attachment",
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{disposition}; filename=\"{}.pdf\"", contract.doc_no))
            .map_err(AppError::internal)?,
    );
    if let Some(digest) = contract.pdf_sha256.as_deref() {
        headers.insert(
            "x-pdf-sha256",
            HeaderValue::from_str(digest).map_err(AppError::internal)?,
        );
    }
    Ok((headers, pdf))
}

pub async fn pdf_info(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<Json<PdfInfoResponse>> {
    let mut conn = state.db()?;
    let contract = contract_service::find_contract(&mut conn, contract_id)?;
    Ok(Json(PdfInfoResponse {
        contract_id: contract.id,
        short_hash: contract.doc_hash.as_deref().map(|hash| short_hash(hash).to_string()),
        qr_payload: contract
            .doc_hash
            .as_deref()
            .map(|hash| build_qr_payload(contract.id, hash)),
        doc_no: contract.doc_no,
        doc_hash: contract.doc_hash,
        pdf_sha256: contract.pdf_sha256,
    }))
}

pub async fn verify_pdf(
    State(state): State<AppState>,
    Path(contract_id): Path<i32>,
) -> AppResult<Json<IntegrityReport>> {
    let mut conn = state.db()?;
    let report = contract_service::verify_contract(
        &mut conn,
        state.renderer.as_ref(),
        &state.config.pdf_watermark_text,
        contract_id,
    )?;
    Ok(Json(report))
}
