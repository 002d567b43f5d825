//! # Branchline Engine
//!
//! The two request-facing engines:
//!
//! - [`BookingEngine`]: admits appointments against slot capacity and staff overlap, manages
//!   slots and the appointment lifecycle
//! - [`QueueEngine`]: issues per-branch, per-day tokens and advances the serving pointer
//!
//! Both receive their collaborators as `Arc<dyn ...>` at construction and never reach for
//! global clients.
//!
//! ## Example
//!
//! ```no_run
//! use branchline_core::{EngineConfig, SystemClock, Tz};
//! use branchline_engine::{AppointmentRequest, BookingEngine};
//! use std::sync::Arc;
//! # use branchline_core::store::{AppointmentLedger, SlotStore};
//!
//! # async fn example(
//! #     slots: Arc<dyn SlotStore>,
//! #     ledger: Arc<dyn AppointmentLedger>,
//! #     request: AppointmentRequest,
//! # ) -> Result<(), branchline_engine::EngineError> {
//! let engine = BookingEngine::new(
//!     slots,
//!     ledger,
//!     Arc::new(SystemClock),
//!     EngineConfig::new(Tz::UTC),
//! );
//! let booked = engine.create_appointment(request).await?;
//! println!("booked {}", booked.id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod error;
pub mod locks;
pub mod queue;
pub mod views;

pub use booking::BookingEngine;
pub use error::{EngineError, Result};
pub use locks::KeyedLocks;
pub use queue::QueueEngine;
pub use views::{
    Ack, AppointmentRequest, AppointmentView, CreateSlotRequest, IssueTokenRequest,
    QueueEntryView, QueueStatusView, SlotSearch, SlotView, TokenView, UpdateAppointmentRequest,
};
