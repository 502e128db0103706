pub mod events;
pub mod integrity;
pub mod schedule;
pub mod service;
pub mod validation;

use thiserror::Error;

use crate::error::{AppError, FieldErrors};
use crate::kinds::SignRole;
use crate::signing::ImageError;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("contract not found")]
    NotFound,
    #[error("signature not found")]
    SignatureNotFound,
    #[error("invalid contract: {0}")]
    Validation(FieldErrors),
    #[error("{0} has already signed this contract")]
    AlreadySigned(SignRole),
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
    #[error("pdf rendering failed: {0}")]
    Render(anyhow::Error),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<FieldErrors> for ContractError {
    fn from(value: FieldErrors) -> Self {
        ContractError::Validation(value)
    }
}

impl From<ContractError> for AppError {
    fn from(value: ContractError) -> Self {
        match value {
            ContractError::NotFound => AppError::not_found(),
            ContractError::SignatureNotFound => AppError::not_found(),
            ContractError::Validation(errors) => AppError::validation(errors),
            ContractError::AlreadySigned(role) => AppError::conflict(
                "already_signed",
                format!("{role} has already signed this contract"),
            ),
            ContractError::InvalidImage(err) => {
                AppError::validation(FieldErrors::single("image", err.to_string()))
            }
            ContractError::Database(err) => AppError::internal(err),
            ContractError::Storage(err)
            | ContractError::Render(err)
            | ContractError::Internal(err) => AppError::internal(err),
        }
    }
}
