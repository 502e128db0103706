//! Closed vocabularies stored as text columns.
//!
//! Every enum round-trips through its upper-case wire name with `as_str` and `FromStr`;
//! unknown names surface as [`UnknownVariant`] instead of panicking deep in a handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            /// Case-insensitive, surrounding whitespace ignored.
            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = value.trim().to_ascii_uppercase();
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(
    /// Transaction kind of a contract.
    ContractType, "contract type", {
        Sale => "SALE",
        Jeonse => "JEONSE",
        Wolse => "WOLSE",
        Banjeonse => "BANJEONSE",
    }
);

text_enum!(
    /// Persisted contract status.
    ContractStatus, "contract status", {
        Draft => "DRAFT",
        Signed => "SIGNED",
        Archived => "ARCHIVED",
    }
);

text_enum!(
    /// Advisory status derived from the schedule dates, never persisted.
    LifecycleStatus, "lifecycle status", {
        Draft => "DRAFT",
        Active => "ACTIVE",
        Expired => "EXPIRED",
    }
);

text_enum!(
    SignRole, "signer role", {
        Seller => "SELLER",
        Buyer => "BUYER",
        Lessor => "LESSOR",
        Lessee => "LESSEE",
        Broker => "BROKER",
        Agent => "AGENT",
        Guarantor => "GUARANTOR",
    }
);

text_enum!(
    SignStatus, "sign status", {
        Pending => "PENDING",
        Viewed => "VIEWED",
        Signed => "SIGNED",
        Expired => "EXPIRED",
        Canceled => "CANCELED",
    }
);

text_enum!(
    AuthMethod, "auth method", {
        Mobile => "MOBILE",
        Cert => "CERT",
    }
);

impl ContractType {
    /// Signing slots created as placeholders for every new contract.
    pub fn signature_roles(self) -> &'static [SignRole] {
        match self {
            ContractType::Sale => &[SignRole::Seller, SignRole::Buyer, SignRole::Agent],
            ContractType::Jeonse | ContractType::Wolse | ContractType::Banjeonse => {
                &[SignRole::Lessor, SignRole::Lessee, SignRole::Broker]
            }
        }
    }

    pub fn pdf_template(self) -> &'static str {
        match self {
            ContractType::Sale => "contracts/sale",
            ContractType::Jeonse => "contracts/jeonse",
            ContractType::Wolse | ContractType::Banjeonse => "contracts/wolse",
        }
    }
}

impl SignRole {
    pub fn slug(self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl SignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignStatus::Signed | SignStatus::Expired | SignStatus::Canceled
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, SignStatus::Pending | SignStatus::Viewed)
    }
}
