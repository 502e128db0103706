use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = contracts)]
pub struct Contract {
    pub id: i32,
    pub user_id: Option<Uuid>,
    pub doc_no: String,
    pub contract_type: String,
    pub status: String,
    pub form_version: String,
    pub seller_name: String,
    pub seller_phone: String,
    pub buyer_name: String,
    pub buyer_phone: String,
    pub seller_pid_hash: Option<String>,
    pub buyer_pid_hash: Option<String>,
    pub property_address: String,
    pub unit: Option<serde_json::Value>,
    pub sale_price: Option<i64>,
    pub deposit: Option<i64>,
    pub monthly_rent: Option<i64>,
    pub monthly_payday: Option<i32>,
    pub mgmt_fee: Option<i64>,
    pub mgmt_note: Option<String>,
    pub contract_date: Option<NaiveDate>,
    pub handover_date: Option<NaiveDate>,
    pub schedule: serde_json::Value,
    pub brokerage: Option<serde_json::Value>,
    pub special_terms: Option<String>,
    pub doc_hash: Option<String>,
    pub pdf_sha256: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contracts)]
pub struct NewContract {
    pub user_id: Option<Uuid>,
    pub doc_no: String,
    pub contract_type: String,
    pub status: String,
    pub form_version: String,
    pub seller_name: String,
    pub seller_phone: String,
    pub buyer_name: String,
    pub buyer_phone: String,
    pub seller_pid_hash: Option<String>,
    pub buyer_pid_hash: Option<String>,
    pub property_address: String,
    pub unit: Option<serde_json::Value>,
    pub sale_price: Option<i64>,
    pub deposit: Option<i64>,
    pub monthly_rent: Option<i64>,
    pub monthly_payday: Option<i32>,
    pub mgmt_fee: Option<i64>,
    pub mgmt_note: Option<String>,
    pub contract_date: Option<NaiveDate>,
    pub handover_date: Option<NaiveDate>,
    pub schedule: serde_json::Value,
    pub brokerage: Option<serde_json::Value>,
    pub special_terms: Option<String>,
    pub doc_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = contract_signatures)]
#[diesel(belongs_to(Contract))]
pub struct ContractSignature {
    pub id: i32,
    pub contract_id: i32,
    pub role: String,
    pub auth_method: Option<String>,
    pub auth_ref: Option<String>,
    pub image_path: Option<String>,
    pub signed_payload_hash: Option<String>,
    pub ip: Option<String>,
    pub ua: Option<String>,
    pub signed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = contract_signatures)]
pub struct NewContractSignature {
    pub contract_id: i32,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = contract_events)]
#[diesel(belongs_to(Contract))]
pub struct ContractEvent {
    pub id: i32,
    pub contract_id: i32,
    pub actor_id: Option<Uuid>,
    pub event_type: String,
    pub meta: serde_json::Value,
    pub event_hash: String,
    pub prev_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = contract_events)]
pub struct NewContractEvent {
    pub contract_id: i32,
    pub actor_id: Option<Uuid>,
    pub event_type: String,
    pub meta: serde_json::Value,
    pub event_hash: String,
    pub prev_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sign_requests)]
#[diesel(belongs_to(Contract))]
pub struct SignRequest {
    pub id: i32,
    pub contract_id: i32,
    pub role: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_phone: Option<String>,
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub status: String,
    pub signed_at: Option<NaiveDateTime>,
    pub signature_image_path: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sign_requests)]
pub struct NewSignRequest {
    pub contract_id: i32,
    pub role: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_phone: Option<String>,
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
