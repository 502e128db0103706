use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Outbound email and SMS. Callers treat every failure as non-fatal.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<DeliveryReceipt>;

    async fn send_sms(&self, phone: &str, text: &str) -> Result<DeliveryReceipt>;
}

/// Records messages in the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<DeliveryReceipt> {
        let message_id = format!("log-email-{}", Uuid::new_v4());
        info!(%to, %subject, body_len = html.len(), %message_id, "email recorded");
        Ok(DeliveryReceipt { message_id })
    }

    async fn send_sms(&self, phone: &str, text: &str) -> Result<DeliveryReceipt> {
        let message_id = format!("log-sms-{}", Uuid::new_v4());
        // The text carries the signing link, so only its size is logged.
        info!(%phone, text_len = text.len(), %message_id, "sms recorded");
        Ok(DeliveryReceipt { message_id })
    }
}

/// Hands messages to a delivery gateway that accepts JSON over HTTP.
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct WebhookResponse {
    message_id: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn deliver(&self, payload: serde_json::Value) -> Result<DeliveryReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("notification gateway unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("notification gateway returned {status}: {body}");
        }

        let parsed: WebhookResponse = response
            .json()
            .await
            .context("notification gateway returned invalid JSON")?;
        Ok(DeliveryReceipt {
            message_id: parsed
                .message_id
                .unwrap_or_else(|| format!("webhook-{}", Uuid::new_v4())),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<DeliveryReceipt> {
        self.deliver(json!({
            "channel": "email",
            "to": to,
            "subject": subject,
            "html": html,
        }))
        .await
    }

    async fn send_sms(&self, phone: &str, text: &str) -> Result<DeliveryReceipt> {
        self.deliver(json!({
            "channel": "sms",
            "to": phone,
            "text": text,
        }))
        .await
    }
}

pub fn sign_request_email(
    signer_name: &str,
    contract_id: i32,
    contract_type: &str,
    role: &str,
    expires_at: &str,
    sign_url: &str,
) -> (String, String) {
    let subject = format!("[e-signature] {contract_type} contract signature request");
    let html = format!(
        "<h2>Electronic signature request</h2>\
         <p>Hello {signer_name},</p>\
         <p>You have been asked to sign a contract.</p>\
         <p><strong>Contract ID:</strong> {contract_id}</p>\
         <p><strong>Signer role:</strong> {role}</p>\
         <p><strong>Expires:</strong> {expires_at}</p>\
         <p><a href=\"{sign_url}\">Sign now</a></p>"
    );
    (subject, html)
}

pub fn sign_request_sms(contract_type: &str, sign_url: &str) -> String {
    format!("[e-signature] A {contract_type} contract is waiting for your signature. {sign_url}")
}

pub fn completion_email(contract_id: i32, doc_no: &str, contract_type: &str) -> (String, String) {
    let subject = format!("[signed] {contract_type} contract {doc_no} fully signed");
    let html = format!(
        "<h2>Signature completion</h2>\
         <p>Every requested party has signed contract {contract_id} ({doc_no}).</p>"
    );
    (subject, html)
}
