use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod contracts;
pub mod health;
pub mod sign;
pub mod sign_requests;
pub mod verify;

/// Base64 signature images are the largest bodies accepted.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route(
            "/me",
            get(auth::me).layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(
                state.clone(),
            )),
        );

    let contracts_routes = Router::new()
        .route(
            "/",
            get(contracts::list_contracts).post(contracts::create_contract),
        )
        .route(
            "/:id",
            get(contracts::get_contract).delete(contracts::delete_contract),
        )
        .route("/:id/events", get(contracts::list_contract_events))
        .route("/:id/pdf", get(contracts::contract_pdf))
        .route("/:id/pdf/info", get(contracts::pdf_info))
        .route("/:id/pdf/verify", post(contracts::verify_pdf))
        // PUT takes a role, the image route a signature id; the segment is shared.
        .route("/:id/signatures/:slot", put(contracts::sign_slot))
        .route("/:id/signatures/:slot/image", get(contracts::signature_image))
        .route(
            "/:id/sign-requests",
            get(sign_requests::list_contract_sign_requests),
        );

    let sign_requests_routes = Router::new()
        .route("/", post(sign_requests::create_sign_requests))
        .route("/:id/cancel", post(sign_requests::cancel_sign_request));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/contracts", contracts_routes)
        .nest("/api/sign-requests", sign_requests_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let public_routes = Router::new()
        .route(
            "/api/sign/:token",
            get(sign::open_sign_page).post(sign::submit_signature),
        )
        .route("/api/sign/:token/status", get(sign::sign_status))
        .route("/api/verify", get(verify::verify_code))
        .route("/api/health", get(health::health_check));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .nest("/api/auth", auth_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
