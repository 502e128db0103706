//! Transition rules for a signature request, independent of storage.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::kinds::SignStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignConflict {
    #[error("signature request already completed")]
    AlreadySigned,
    #[error("signature request has expired")]
    Expired,
    #[error("signature request was canceled")]
    Canceled,
}

impl SignConflict {
    pub fn code(self) -> &'static str {
        match self {
            SignConflict::AlreadySigned => "already_signed",
            SignConflict::Expired => "expired",
            SignConflict::Canceled => "canceled",
        }
    }
}

/// The boundary instant itself counts as expired.
pub fn is_expired(expires_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    now >= expires_at
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub status: SignStatus,
    pub expires_at: NaiveDateTime,
}

impl Lifecycle {
    pub fn new(status: SignStatus, expires_at: NaiveDateTime) -> Self {
        Self { status, expires_at }
    }

    /// Status a caller should see at `now`. Anything short of a completed signature reads as
    /// expired once the deadline passes, even a canceled request.
    pub fn effective_status(&self, now: NaiveDateTime) -> SignStatus {
        if self.status != SignStatus::Signed && is_expired(self.expires_at, now) {
            SignStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_valid(&self, now: NaiveDateTime) -> bool {
        self.effective_status(now).is_open()
    }

    /// Whether the stored status must be flipped to `EXPIRED` on this access.
    pub fn needs_expiry(&self, now: NaiveDateTime) -> bool {
        self.status.is_open() && is_expired(self.expires_at, now)
    }

    fn guard(&self, now: NaiveDateTime) -> Result<(), SignConflict> {
        match self.effective_status(now) {
            SignStatus::Pending | SignStatus::Viewed => Ok(()),
            SignStatus::Signed => Err(SignConflict::AlreadySigned),
            SignStatus::Expired => Err(SignConflict::Expired),
            SignStatus::Canceled => Err(SignConflict::Canceled),
        }
    }

    /// Opening the link. Repeated views stay `VIEWED`.
    pub fn view(&self, now: NaiveDateTime) -> Result<SignStatus, SignConflict> {
        self.guard(now).map(|()| SignStatus::Viewed)
    }

    /// Signing is allowed straight from `PENDING`.
    pub fn sign(&self, now: NaiveDateTime) -> Result<SignStatus, SignConflict> {
        self.guard(now).map(|()| SignStatus::Signed)
    }

    pub fn cancel(&self, now: NaiveDateTime) -> Result<SignStatus, SignConflict> {
        self.guard(now).map(|()| SignStatus::Canceled)
    }
}
