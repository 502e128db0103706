use std::collections::HashMap;
use std::env;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use hatch_backend::auth::jwt::JwtService;
use hatch_backend::auth::password::hash_password;
use hatch_backend::clock::Clock;
use hatch_backend::config::AppConfig;
use hatch_backend::db::{self, PgPool, MIGRATIONS};
use hatch_backend::models::NewUser;
use hatch_backend::notifier::{DeliveryReceipt, Notifier};
use hatch_backend::routes;
use hatch_backend::state::AppState;
use hatch_backend::storage::ObjectStorage;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const ADMIN_EMAIL: &str = "office@hatch.test";

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.objects
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: &'static str,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Keeps every message; can be switched to fail every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn fail_deliveries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    async fn record(&self, message: SentMessage) -> Result<DeliveryReceipt> {
        ensure!(
            !self.failing.load(Ordering::SeqCst),
            "delivery to {} refused",
            message.to
        );
        let mut sent = self.sent.lock().await;
        sent.push(message);
        Ok(DeliveryReceipt {
            message_id: format!("test-{}", sent.len()),
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<DeliveryReceipt> {
        self.record(SentMessage {
            channel: "email",
            to: to.to_string(),
            subject: Some(subject.to_string()),
            body: html.to_string(),
        })
        .await
    }

    async fn send_sms(&self, phone: &str, text: &str) -> Result<DeliveryReceipt> {
        self.record(SentMessage {
            channel: "sms",
            to: phone.to_string(),
            subject: None,
            body: text.to_string(),
        })
        .await
    }
}

/// Virtual time for expiry tests.
pub struct ManualClock {
    now: std::sync::Mutex<NaiveDateTime>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn start_of_test_day() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .and_then(|date| date.and_hms_micro_opt(9, 0, 0, 250_000))
        .expect("valid test timestamp")
}

#[derive(Clone)]
pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl TestApp {
    /// `None` (with a note on stderr) when no test database is configured.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("skipping: TEST_DATABASE_URL is not set");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            app_base_url: "https://sign.hatch.test".to_string(),
            sign_token_ttl_days: 7,
            admin_email: ADMIN_EMAIL.to_string(),
            signature_storage_dir: "unused".to_string(),
            notifier_webhook_url: None,
            pdf_watermark_text: "test watermark".to_string(),
            contract_form_version: "test-form-v1".to_string(),
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(start_of_test_day()));
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, jwt)
            .with_notifier(notifier.clone())
            .with_clock(clock.clone());
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            notifier,
            clock,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub fn notifier(&self) -> Arc<RecordingNotifier> {
        self.notifier.clone()
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, role: &str) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                username,
                password_hash: hash_password(&password)?,
                role,
            };
            diesel::insert_into(hatch_backend::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "username": username, "password": password }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response without access_token"))
    }

    /// A fresh back-office account and its bearer token.
    pub async fn admin_token(&self) -> Result<String> {
        self.insert_user("agent01", "s3cret-pass", "admin").await?;
        self.login_token("agent01", "s3cret-pass").await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::POST, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::PUT, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, token).await
    }

    /// Creates a contract and returns its detail body.
    pub async fn create_contract(&self, token: &str, payload: &Value) -> Result<Value> {
        let response = self.post_json("/api/contracts", payload, Some(token)).await?;
        let status = response.status();
        let body = json_body(response).await?;
        ensure!(
            status == StatusCode::CREATED,
            "contract creation failed with {status}: {body}"
        );
        Ok(body)
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

#[allow(dead_code)]
pub fn token_from_sign_url(sign_url: &str) -> Result<String> {
    sign_url
        .rsplit('/')
        .next()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("sign url {sign_url} has no token"))
}

/// A small signature drawing as a PNG data URL.
#[allow(dead_code)]
pub fn signature_data_url() -> Result<String> {
    let mut img = RgbaImage::from_pixel(24, 8, Rgba([255, 255, 255, 0]));
    for x in 2..22 {
        img.put_pixel(x, 4, Rgba([0, 0, 0, 255]));
    }
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(png.into_inner())
    ))
}

#[allow(dead_code)]
pub fn jeonse_payload() -> Value {
    json!({
        "type": "JEONSE",
        "seller_name": "Park Jiwoo",
        "seller_phone": "010-1234-5678",
        "buyer_name": "Choi Yuna",
        "buyer_phone": "010-8765-4321",
        "property_address": "12 Teheran-ro, Gangnam-gu, Seoul",
        "deposit": 300_000_000,
    })
}

#[allow(dead_code)]
pub fn sale_payload() -> Value {
    json!({
        "type": "SALE",
        "parties": [
            { "role": "SELLER", "name": "Kim Minsu", "phone": "010-1111-2222", "pid": "800101-1234567" },
            { "role": "BUYER", "name": "Lee Seoyeon", "phone": "010-3333-4444" }
        ],
        "property_address_full": "7 Sejong-daero, Jung-gu, Seoul",
        "price_total": "1,000,000,000",
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE contract_events, contract_signatures, sign_requests, contracts, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
