pub mod image;
pub mod ledger;
pub mod service;
pub mod state;
pub mod token;

use thiserror::Error;

use crate::contracts::ContractError;
use crate::error::{AppError, FieldErrors};

pub use self::image::ImageError;
pub use self::state::{Lifecycle, SignConflict};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("signature request not found")]
    NotFound,
    #[error("contract not found")]
    ContractNotFound,
    #[error(transparent)]
    Conflict(#[from] SignConflict),
    #[error("invalid signature request: {0}")]
    Validation(FieldErrors),
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<SignError> for AppError {
    fn from(value: SignError) -> Self {
        match value {
            SignError::NotFound => AppError::new(
                axum::http::StatusCode::NOT_FOUND,
                "not_found",
                "signature request not found",
            ),
            SignError::ContractNotFound => AppError::not_found(),
            SignError::Conflict(conflict @ SignConflict::AlreadySigned) => {
                AppError::conflict(conflict.code(), conflict.to_string())
            }
            SignError::Conflict(conflict) => AppError::gone(conflict.code(), conflict.to_string()),
            SignError::Validation(errors) => AppError::validation(errors),
            SignError::InvalidImage(err) => {
                AppError::validation(FieldErrors::single("signature", err.to_string()))
            }
            SignError::Database(err) => AppError::internal(err),
            SignError::Contract(err) => err.into(),
            SignError::Storage(err) | SignError::Internal(err) => AppError::internal(err),
        }
    }
}
