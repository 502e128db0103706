use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

pub const TOKEN_LENGTH: usize = 32;
const LOG_PREFIX_LEN: usize = 6;

/// Opaque bearer credential for one signature request.
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// What may appear in logs.
pub fn token_prefix(token: &str) -> &str {
    token.get(..LOG_PREFIX_LEN).unwrap_or(token)
}

pub fn sign_url(base_url: &str, token: &str) -> String {
    format!("{}/sign/{token}", base_url.trim_end_matches('/'))
}
