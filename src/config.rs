use std::env;

use anyhow::{ensure, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_SIGN_TOKEN_TTL_DAYS: i64 = 7;
pub const MAX_SIGN_TOKEN_TTL_DAYS: i64 = 365;
pub const DEFAULT_FORM_VERSION: &str = "association-standard-2025-01-01";
pub const DEFAULT_WATERMARK_TEXT: &str =
    "Hatch generated contract - based on the MOLIT standard form";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub app_base_url: String,
    pub sign_token_ttl_days: i64,
    pub admin_email: String,
    pub signature_storage_dir: String,
    pub notifier_webhook_url: Option<String>,
    pub pdf_watermark_text: String,
    pub contract_form_version: String,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "hatch".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "hatch-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let app_base_url = normalize_base_url(
            &env::var("APP_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:5000".to_string()),
        )?;
        let sign_token_ttl_days: i64 = env::var("SIGN_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| DEFAULT_SIGN_TOKEN_TTL_DAYS.to_string())
            .parse()
            .context("SIGN_TOKEN_TTL_DAYS must be an integer")?;
        ensure!(
            (1..=MAX_SIGN_TOKEN_TTL_DAYS).contains(&sign_token_ttl_days),
            "SIGN_TOKEN_TTL_DAYS must be between 1 and {MAX_SIGN_TOKEN_TTL_DAYS}"
        );
        let admin_email =
            env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".to_string());
        let signature_storage_dir =
            env::var("SIGNATURE_STORAGE_DIR").unwrap_or_else(|_| "uploads".to_string());
        let notifier_webhook_url = env::var("NOTIFIER_WEBHOOK_URL").ok();
        let pdf_watermark_text =
            env::var("PDF_WATERMARK_TEXT").unwrap_or_else(|_| DEFAULT_WATERMARK_TEXT.to_string());
        let contract_form_version = env::var("CONTRACT_FORM_VERSION")
            .unwrap_or_else(|_| DEFAULT_FORM_VERSION.to_string());
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").ok().filter(|value| !value.trim().is_empty());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            app_base_url,
            sign_token_ttl_days,
            admin_email,
            signature_storage_dir,
            notifier_webhook_url,
            pdf_watermark_text,
            contract_form_version,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(trimmed).with_context(|| format!("APP_BASE_URL is not a valid URL: {raw}"))?;
    Ok(trimmed.to_string())
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
