use chrono::{NaiveDate, NaiveDateTime};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::{rngs::OsRng, RngCore};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::contracts::events::{
    list_events, record_event, EVENT_COMPLETED, EVENT_CREATED, EVENT_PDF_GENERATED, EVENT_SIGNED,
};
use crate::contracts::integrity::{
    self, build_qr_payload, canonical_timestamp, compute_doc_hash, compute_pdf_hash,
    hash_identifier, sha256_hex, DocHashInput, IntegrityReport,
};
use crate::contracts::schedule::compute_terms;
use crate::contracts::validation::parse_contract_payload;
use crate::contracts::ContractError;
use crate::error::FieldErrors;
use crate::kinds::{AuthMethod, ContractStatus, ContractType, SignRole, SignStatus};
use crate::models::{
    Contract, ContractSignature, NewContract, NewContractSignature, SignRequest,
};
use crate::pdf::PdfRenderer;
use crate::schema::{contract_signatures, contracts, sign_requests};
use crate::signing::image::{decode_signature_image, slot_image_key, SIGNATURE_CONTENT_TYPE};
use crate::signing::service::notify_completion;
use crate::state::AppState;
use crate::storage::contract_signature_prefix;

const MAX_DOC_NO_ATTEMPTS: usize = 5;
const DOC_NO_CONSTRAINT: &str = "contracts_doc_no_key";
const MAX_IP_LEN: usize = 45;
pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// `CONTRACT_<YYYYMMDD>_<6 hex>`.
pub fn generate_doc_no(today: NaiveDate) -> String {
    let mut suffix = [0u8; 3];
    OsRng.fill_bytes(&mut suffix);
    format!("CONTRACT_{}_{}", today.format("%Y%m%d"), hex::encode(suffix))
}

pub fn contract_type_of(contract: &Contract) -> Result<ContractType, ContractError> {
    contract
        .contract_type
        .parse()
        .map_err(|err: crate::kinds::UnknownVariant| ContractError::Internal(err.into()))
}

pub fn find_contract(conn: &mut PgConnection, contract_id: i32) -> Result<Contract, ContractError> {
    contracts::table
        .find(contract_id)
        .first(conn)
        .optional()?
        .ok_or(ContractError::NotFound)
}

fn lock_contract(conn: &mut PgConnection, contract_id: i32) -> Result<Contract, ContractError> {
    contracts::table
        .find(contract_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(ContractError::NotFound)
}

/// Validates, schedules and persists a contract with its signature placeholders and a
/// `CREATED` event, all in one transaction.
pub fn create_contract(
    conn: &mut PgConnection,
    payload: &Map<String, Value>,
    form_version: &str,
    actor_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<Contract, ContractError> {
    let draft = parse_contract_payload(payload)?;
    let today = now.date();

    let mut money = Map::new();
    for (key, amount) in [
        ("sale_price", draft.sale_price),
        ("deposit", draft.deposit),
        ("monthly_rent", draft.monthly_rent),
    ] {
        if let Some(amount) = amount {
            money.insert(key.to_string(), json!(amount));
        }
    }
    if let Some(payday) = draft.monthly_payday {
        money.insert("monthly_payday".to_string(), json!(payday));
    }
    let terms = compute_terms(draft.contract_type, &money, today)?;

    let mut schedule = draft.schedule.clone();
    schedule.extend(terms.to_schedule_map());

    let doc_hash = compute_doc_hash(&DocHashInput {
        contract_type: draft.contract_type.as_str(),
        seller_name: &draft.seller_name,
        buyer_name: &draft.buyer_name,
        property_address: &draft.property_address,
        sale_price: draft.sale_price,
        deposit: draft.deposit,
        monthly_rent: draft.monthly_rent,
        created_at: now,
    });

    let mut new_contract = NewContract {
        user_id: actor_id,
        doc_no: String::new(),
        contract_type: draft.contract_type.as_str().to_string(),
        status: ContractStatus::Draft.as_str().to_string(),
        form_version: form_version.to_string(),
        seller_name: draft.seller_name,
        seller_phone: draft.seller_phone,
        buyer_name: draft.buyer_name,
        buyer_phone: draft.buyer_phone,
        seller_pid_hash: draft.seller_pid.as_deref().map(hash_identifier),
        buyer_pid_hash: draft.buyer_pid.as_deref().map(hash_identifier),
        property_address: draft.property_address,
        unit: draft.unit,
        sale_price: draft.sale_price,
        deposit: draft.deposit,
        monthly_rent: draft.monthly_rent,
        monthly_payday: draft.monthly_payday,
        mgmt_fee: draft.mgmt_fee,
        mgmt_note: draft.mgmt_note,
        contract_date: draft.contract_date.or(Some(terms.schedule.contract_date)),
        handover_date: draft.handover_date.or(Some(terms.handover_date())),
        schedule: Value::Object(schedule),
        brokerage: draft.brokerage,
        special_terms: draft.special_terms,
        doc_hash: Some(doc_hash.clone()),
        created_at: now,
        updated_at: now,
    };

    conn.transaction::<_, ContractError, _>(|conn| {
        let contract = insert_with_fresh_doc_no(conn, &mut new_contract, today)?;

        let placeholders: Vec<NewContractSignature> = draft
            .contract_type
            .signature_roles()
            .iter()
            .map(|role| NewContractSignature {
                contract_id: contract.id,
                role: role.as_str().to_string(),
            })
            .collect();
        diesel::insert_into(contract_signatures::table)
            .values(&placeholders)
            .execute(conn)?;

        record_event(
            conn,
            contract.id,
            actor_id,
            EVENT_CREATED,
            json!({
                "doc_no": contract.doc_no,
                "type": contract.contract_type,
                "doc_hash": doc_hash,
            }),
            now,
        )?;

        info!(
            contract_id = contract.id,
            doc_no = %contract.doc_no,
            contract_type = %contract.contract_type,
            "contract created"
        );
        Ok(contract)
    })
}

fn insert_with_fresh_doc_no(
    conn: &mut PgConnection,
    new_contract: &mut NewContract,
    today: NaiveDate,
) -> Result<Contract, ContractError> {
    for attempt in 1..=MAX_DOC_NO_ATTEMPTS {
        new_contract.doc_no = generate_doc_no(today);
        let inserted = conn.transaction::<Contract, DieselError, _>(|conn| {
            diesel::insert_into(contracts::table)
                .values(&*new_contract)
                .get_result(conn)
        });
        match inserted {
            Ok(contract) => return Ok(contract),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some(DOC_NO_CONSTRAINT) =>
            {
                warn!(attempt, doc_no = %new_contract.doc_no, "doc_no collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ContractError::Internal(anyhow::anyhow!(
        "could not allocate a unique doc_no after {MAX_DOC_NO_ATTEMPTS} attempts"
    )))
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub q: Option<String>,
    pub contract_type: Option<ContractType>,
}

fn filtered(filter: &ContractFilter) -> contracts::BoxedQuery<'static, Pg> {
    let mut query = contracts::table.into_boxed();
    if let Some(contract_type) = filter.contract_type {
        query = query.filter(contracts::contract_type.eq(contract_type.as_str()));
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        query = query.filter(
            contracts::seller_name
                .ilike(pattern.clone())
                .or(contracts::buyer_name.ilike(pattern.clone()))
                .or(contracts::property_address.ilike(pattern.clone()))
                .or(contracts::doc_no.ilike(pattern)),
        );
    }
    query
}

/// Newest first, with the total count of matching rows.
pub fn list_contracts(
    conn: &mut PgConnection,
    filter: &ContractFilter,
    page: i64,
    per_page: i64,
) -> Result<(Vec<Contract>, i64), ContractError> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let total: i64 = filtered(filter).count().get_result(conn)?;
    let rows = filtered(filter)
        .order((contracts::created_at.desc(), contracts::id.desc()))
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(conn)?;
    Ok((rows, total))
}

pub fn list_signatures(
    conn: &mut PgConnection,
    contract_id: i32,
) -> Result<Vec<ContractSignature>, ContractError> {
    Ok(contract_signatures::table
        .filter(contract_signatures::contract_id.eq(contract_id))
        .order(contract_signatures::id.asc())
        .load(conn)?)
}

/// Removes the rows (children cascade) and then the stored signature images.
pub async fn delete_contract(state: &AppState, contract_id: i32) -> Result<(), ContractError> {
    let mut conn = state
        .pool
        .get()
        .map_err(|err| ContractError::Internal(err.into()))?;
    let deleted = diesel::delete(contracts::table.find(contract_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ContractError::NotFound);
    }
    info!(contract_id, "contract deleted");

    if let Err(err) = state
        .storage
        .delete_prefix(&contract_signature_prefix(contract_id))
        .await
    {
        warn!(contract_id, error = %err, "failed to remove signature images");
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlotSignature {
    pub image: String,
    pub auth_method: Option<String>,
    pub auth_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlotOutcome {
    pub signature: ContractSignature,
    pub completed: Option<Contract>,
}

/// Fills a contract's signature placeholder for `role`. A slot is signed at most once.
pub async fn sign_slot(
    state: &AppState,
    contract_id: i32,
    role: &str,
    submission: SlotSignature,
    client: ClientInfo,
    actor_id: Option<Uuid>,
) -> Result<SlotOutcome, ContractError> {
    let role: SignRole = role
        .parse()
        .map_err(|err: crate::kinds::UnknownVariant| FieldErrors::single("role", err.to_string()))?;
    let auth_method = submission
        .auth_method
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value.parse::<AuthMethod>().map_err(|err| {
                ContractError::Validation(FieldErrors::single("auth_method", err.to_string()))
            })
        })
        .transpose()?;

    let mut conn = state
        .pool
        .get()
        .map_err(|err| ContractError::Internal(err.into()))?;
    find_contract(&mut conn, contract_id)?;
    let slot = find_slot(&mut conn, contract_id, role)?;
    if slot.signed_at.is_some() {
        return Err(ContractError::AlreadySigned(role));
    }

    let image = decode_signature_image(&submission.image)?;
    let image_sha256 = sha256_hex(&image.png);
    let key = slot_image_key(contract_id, role);
    state
        .storage
        .put_object(&key, image.png, Some(SIGNATURE_CONTENT_TYPE.to_string()))
        .await
        .map_err(ContractError::Storage)?;

    let now = state.clock.now();
    let renderer = state.renderer.as_ref();
    let watermark = state.config.pdf_watermark_text.as_str();
    let result = conn.transaction::<_, ContractError, _>(|conn| {
        // Contract first, then slot: concurrent signers on one contract serialize here so
        // exactly one of them observes the last placeholder being filled.
        lock_contract(conn, contract_id)?;
        let slot: ContractSignature = contract_signatures::table
            .find(slot.id)
            .for_update()
            .first(conn)?;
        if slot.signed_at.is_some() {
            return Err(ContractError::AlreadySigned(role));
        }

        let signature: ContractSignature = diesel::update(contract_signatures::table.find(slot.id))
            .set((
                contract_signatures::auth_method.eq(auth_method.map(|method| method.as_str())),
                contract_signatures::auth_ref.eq(submission.auth_ref.as_deref()),
                contract_signatures::image_path.eq(Some(key.as_str())),
                contract_signatures::signed_payload_hash.eq(Some(image_sha256.as_str())),
                contract_signatures::ip.eq(client
                    .ip
                    .as_deref()
                    .map(|ip| ip.chars().take(MAX_IP_LEN).collect::<String>())),
                contract_signatures::ua.eq(client.user_agent.as_deref()),
                contract_signatures::signed_at.eq(Some(now)),
            ))
            .get_result(conn)?;

        record_event(
            conn,
            contract_id,
            actor_id,
            EVENT_SIGNED,
            json!({
                "signature_id": signature.id,
                "role": signature.role,
                "auth_method": signature.auth_method,
                "image_sha256": image_sha256,
                "via": "direct",
            }),
            now,
        )?;

        let completed = if all_slots_signed(conn, contract_id)? {
            finalize_contract(conn, renderer, watermark, contract_id, now)?
        } else {
            None
        };
        Ok(SlotOutcome {
            signature,
            completed,
        })
    });

    drop(conn);

    match &result {
        Ok(outcome) => {
            info!(contract_id, role = %role, "contract slot signed");
            if let Some(contract) = &outcome.completed {
                notify_completion(state, contract).await;
            }
        }
        Err(_) => {
            if let Err(err) = state.storage.delete_object(&key).await {
                warn!(contract_id, key = %key, error = %err, "failed to remove orphaned signature image");
            }
        }
    }
    result
}

fn find_slot(
    conn: &mut PgConnection,
    contract_id: i32,
    role: SignRole,
) -> Result<ContractSignature, ContractError> {
    contract_signatures::table
        .filter(contract_signatures::contract_id.eq(contract_id))
        .filter(contract_signatures::role.eq(role.as_str()))
        .first(conn)
        .optional()?
        .ok_or_else(|| {
            ContractError::Validation(FieldErrors::single(
                "role",
                format!("this contract has no {role} signature slot"),
            ))
        })
}

fn all_slots_signed(conn: &mut PgConnection, contract_id: i32) -> Result<bool, ContractError> {
    let slots = list_signatures(conn, contract_id)?;
    Ok(!slots.is_empty() && slots.iter().all(|slot| slot.signed_at.is_some()))
}

/// Stored image of a signed slot.
pub async fn signature_image(
    state: &AppState,
    contract_id: i32,
    signature_id: i32,
) -> Result<Vec<u8>, ContractError> {
    let mut conn = state
        .pool
        .get()
        .map_err(|err| ContractError::Internal(err.into()))?;
    let path: Option<String> = contract_signatures::table
        .filter(contract_signatures::id.eq(signature_id))
        .filter(contract_signatures::contract_id.eq(contract_id))
        .select(contract_signatures::image_path)
        .first(&mut conn)
        .optional()?
        .ok_or(ContractError::SignatureNotFound)?;
    let path = path.ok_or(ContractError::SignatureNotFound)?;
    state
        .storage
        .get_object(&path)
        .await
        .map_err(ContractError::Storage)
}

fn optional_timestamp(at: Option<NaiveDateTime>) -> Value {
    at.map_or(Value::Null, |at| json!(canonical_timestamp(at)))
}

/// Data handed to the renderer. Built only from persisted state, so the same contract always
/// renders to the same bytes.
pub fn render_context(
    contract: &Contract,
    slots: &[ContractSignature],
    requests: &[SignRequest],
    watermark: &str,
) -> Value {
    let signatures: Vec<Value> = slots
        .iter()
        .filter(|slot| slot.signed_at.is_some())
        .map(|slot| {
            json!({
                "role": slot.role,
                "signed_at": optional_timestamp(slot.signed_at),
                "image_sha256": slot.signed_payload_hash,
                "via": "direct",
            })
        })
        .chain(
            requests
                .iter()
                .filter(|request| request.status == SignStatus::Signed.as_str())
                .map(|request| {
                    json!({
                        "role": request.role,
                        "signer_name": request.signer_name,
                        "signed_at": optional_timestamp(request.signed_at),
                        "via": "link",
                    })
                }),
        )
        .collect();

    let doc_hash = contract.doc_hash.clone().unwrap_or_default();
    json!({
        "doc_no": contract.doc_no,
        "form_version": contract.form_version,
        "contract_type": contract.contract_type,
        "status": contract.status,
        "property": {
            "address": contract.property_address,
            "unit": contract.unit,
        },
        "parties": {
            "seller": { "name": contract.seller_name, "phone": contract.seller_phone },
            "buyer": { "name": contract.buyer_name, "phone": contract.buyer_phone },
        },
        "money": {
            "sale_price": contract.sale_price,
            "deposit": contract.deposit,
            "monthly_rent": contract.monthly_rent,
            "monthly_payday": contract.monthly_payday,
            "mgmt_fee": contract.mgmt_fee,
            "mgmt_note": contract.mgmt_note,
        },
        "contract_date": contract.contract_date,
        "handover_date": contract.handover_date,
        "schedule": contract.schedule,
        "brokerage": contract.brokerage,
        "special_terms": contract.special_terms,
        "signatures": signatures,
        "integrity": {
            "doc_hash": doc_hash,
            "qr_payload": build_qr_payload(contract.id, &doc_hash),
            "created_at": canonical_timestamp(contract.created_at),
        },
        "watermark": watermark,
    })
}

pub fn render_contract(
    conn: &mut PgConnection,
    renderer: &dyn PdfRenderer,
    watermark: &str,
    contract: &Contract,
) -> Result<Vec<u8>, ContractError> {
    let slots = list_signatures(conn, contract.id)?;
    let requests: Vec<SignRequest> = sign_requests::table
        .filter(sign_requests::contract_id.eq(contract.id))
        .order(sign_requests::id.asc())
        .load(conn)?;
    let template = contract_type_of(contract)?.pdf_template();
    renderer
        .render(template, &render_context(contract, &slots, &requests, watermark))
        .map_err(ContractError::Render)
}

fn store_pdf_hash(
    conn: &mut PgConnection,
    contract: &Contract,
    pdf: &[u8],
    trigger: &str,
    actor_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<Contract, ContractError> {
    let pdf_sha256 = compute_pdf_hash(pdf);
    let updated: Contract = diesel::update(contracts::table.find(contract.id))
        .set((
            contracts::pdf_sha256.eq(Some(pdf_sha256.as_str())),
            contracts::updated_at.eq(now),
        ))
        .get_result(conn)?;
    record_event(
        conn,
        contract.id,
        actor_id,
        EVENT_PDF_GENERATED,
        json!({
            "pdf_sha256": pdf_sha256,
            "template": contract_type_of(contract)?.pdf_template(),
            "trigger": trigger,
        }),
        now,
    )?;
    Ok(updated)
}

/// Renders the current state and records the PDF digest.
pub fn generate_pdf(
    conn: &mut PgConnection,
    renderer: &dyn PdfRenderer,
    watermark: &str,
    contract_id: i32,
    actor_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<(Contract, Vec<u8>), ContractError> {
    conn.transaction::<_, ContractError, _>(|conn| {
        let contract = lock_contract(conn, contract_id)?;
        let pdf = render_contract(conn, renderer, watermark, &contract)?;
        let updated = store_pdf_hash(conn, &contract, &pdf, "download", actor_id, now)?;
        info!(contract_id, pdf_sha256 = ?updated.pdf_sha256, "contract pdf generated");
        Ok((updated, pdf))
    })
}

/// Re-renders without touching the stored digest and compares every hash.
pub fn verify_contract(
    conn: &mut PgConnection,
    renderer: &dyn PdfRenderer,
    watermark: &str,
    contract_id: i32,
) -> Result<IntegrityReport, ContractError> {
    let contract = find_contract(conn, contract_id)?;
    let pdf = render_contract(conn, renderer, watermark, &contract)?;
    let events = list_events(conn, contract_id)?;
    Ok(integrity::verify(&contract, &events, &pdf))
}

/// Marks the contract `SIGNED` and records the digest of its final PDF. Returns `None` when
/// the contract was already finalized.
pub fn finalize_contract(
    conn: &mut PgConnection,
    renderer: &dyn PdfRenderer,
    watermark: &str,
    contract_id: i32,
    now: NaiveDateTime,
) -> Result<Option<Contract>, ContractError> {
    conn.transaction::<_, ContractError, _>(|conn| {
        let contract = lock_contract(conn, contract_id)?;
        if contract.status == ContractStatus::Signed.as_str() {
            return Ok(None);
        }

        let signed: Contract = diesel::update(contracts::table.find(contract_id))
            .set((
                contracts::status.eq(ContractStatus::Signed.as_str()),
                contracts::updated_at.eq(now),
            ))
            .get_result(conn)?;
        record_event(
            conn,
            contract_id,
            None,
            EVENT_COMPLETED,
            json!({ "status": ContractStatus::Signed.as_str() }),
            now,
        )?;

        let pdf = render_contract(conn, renderer, watermark, &signed)?;
        let finalized = store_pdf_hash(conn, &signed, &pdf, "completed", None, now)?;
        info!(contract_id, doc_no = %finalized.doc_no, "contract fully signed");
        Ok(Some(finalized))
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn contract() -> Contract {
        let at = NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_hms_micro_opt(9, 0, 0, 5)
            .unwrap();
        Contract {
            id: 3,
            user_id: None,
            doc_no: "CONTRACT_20261014_0a1b2c".into(),
            contract_type: "JEONSE".into(),
            status: "DRAFT".into(),
            form_version: "v1".into(),
            seller_name: "Kim".into(),
            seller_phone: "010".into(),
            buyer_name: "Lee".into(),
            buyer_phone: "011".into(),
            seller_pid_hash: None,
            buyer_pid_hash: None,
            property_address: "Seoul".into(),
            unit: None,
            sale_price: None,
            deposit: Some(100),
            monthly_rent: None,
            monthly_payday: None,
            mgmt_fee: None,
            mgmt_note: None,
            contract_date: None,
            handover_date: None,
            schedule: json!({}),
            brokerage: None,
            special_terms: None,
            doc_hash: Some("ab".repeat(32)),
            pdf_sha256: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn doc_numbers_follow_the_format() {
        let doc_no = generate_doc_no(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap());
        assert!(doc_no.starts_with("CONTRACT_20261014_"));
        let suffix = doc_no.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn render_context_embeds_qr_payload_and_watermark() {
        let context = render_context(&contract(), &[], &[], "watermark text");
        assert_eq!(context["watermark"], json!("watermark text"));
        assert_eq!(
            context["integrity"]["qr_payload"],
            json!(format!("CONTRACT_ID:3|HASH:{}", "ab".repeat(8)))
        );
        assert_eq!(context["signatures"], json!([]));
    }

    #[test]
    fn render_context_ignores_updated_at() {
        let mut touched = contract();
        touched.updated_at = touched.updated_at + chrono::Duration::hours(1);
        assert_eq!(
            render_context(&contract(), &[], &[], "w"),
            render_context(&touched, &[], &[], "w")
        );
    }
}
