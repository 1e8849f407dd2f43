//! Typed identifiers.
//!
//! Every externally supplied id enters the core as a string and must pass
//! through [`parse_id`] before any store is touched, so a malformed id
//! always surfaces as a validation error rather than a failed lookup.

use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Human readable entity name used in error messages.
            pub const LABEL: &'static str = $label;

            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = PaymentError;

            fn from_str(raw: &str) -> Result<Self> {
                Uuid::parse_str(raw.trim()).map(Self).map_err(|_| {
                    PaymentError::ValidationError(format!("Invalid {} ID format: {}", $label, raw))
                })
            }
        }
    };
}

entity_id!(
    /// Identity of a user owned by the external user directory.
    UserId,
    "user"
);
entity_id!(
    /// Identity of a product owned by the external catalog.
    ProductId,
    "product"
);
entity_id!(CheckoutId, "checkout");
entity_id!(CheckoutItemId, "checkout item");
entity_id!(PaymentId, "payment");

/// Parses an externally supplied identifier into its typed form.
pub fn parse_id<T>(raw: &str) -> Result<T>
where
    T: FromStr<Err = PaymentError>,
{
    raw.parse()
}
