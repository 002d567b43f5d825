//! # Branchline Core
//!
//! Domain model and collaborator traits for appointment booking and branch ticket queues.
//!
//! This crate holds everything that does not touch I/O:
//!
//! - **Identifiers**: one UUID newtype per entity ([`ids`])
//! - **Appointments**: lifecycle and the window-overlap rule ([`appointment`])
//! - **Slots**: coverage and capacity rules ([`slot`])
//! - **Tokens**: the WAITING -> CALLED -> SERVING -> COMPLETED machine ([`token`])
//! - **Queue math**: derived status and wait estimates ([`queue`])
//! - **Collaborators**: ledger and cache traits ([`store`]), injected [`Clock`]
//!
//! The engines that combine these live in `branchline-engine`.
//!
//! ## Example
//!
//! ```
//! use branchline_core::appointment::BookingWindow;
//! use chrono::{Duration, TimeZone, Utc};
//!
//! let ten = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
//! let existing = BookingWindow::starting_at(ten, Duration::minutes(30));
//! let requested = BookingWindow::starting_at(ten + Duration::minutes(15), Duration::minutes(30));
//! assert!(existing.overlaps(&requested));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod appointment;
pub mod config;
pub mod environment;
pub mod error;
pub mod ids;
pub mod queue;
pub mod slot;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use appointment::{Appointment, AppointmentFilter, AppointmentStatus, BookingWindow};
pub use chrono::{DateTime, NaiveDate, Utc};
pub use chrono_tz::Tz;
pub use config::EngineConfig;
pub use environment::{Clock, SystemClock};
pub use error::{StoreError, TransitionError};
pub use ids::{AppointmentId, BranchId, CustomerId, ServiceId, SlotId, StaffId, TokenId};
pub use queue::QueueStatus;
pub use slot::{NewTimeSlot, SlotQuery, TimeSlot};
pub use store::{
    AppointmentLedger, BookingCandidate, BookingMode, BookingOutcome, DisabledQueueCache,
    NewToken, QueueCache, SlotDeletion, SlotStore, StoreFuture, TokenLedger,
};
pub use token::{QueueEntry, QueueKey, Token, TokenStatus};
