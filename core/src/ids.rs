//! Strongly-typed identifiers.
//!
//! Every entity and collaborator reference gets its own newtype over [`Uuid`] so a
//! `StaffId` can never be passed where a `BranchId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Whether this is the nil UUID (an "empty" identifier from the wire)
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a service branch (a physical location with its own queue)
    BranchId
);
define_id!(
    /// Identifier of a staff member who serves appointments
    StaffId
);
define_id!(
    /// Identifier of a customer
    CustomerId
);
define_id!(
    /// Identifier of a bookable service offered by a branch
    ServiceId
);
define_id!(
    /// Identifier of a bookable time slot
    SlotId
);
define_id!(
    /// Identifier of an appointment
    AppointmentId
);
define_id!(
    /// Identifier of a queue token (ticket)
    TokenId
);
