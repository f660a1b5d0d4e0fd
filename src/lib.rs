//! Session history with a back/forward cache of live document viewers.
//!
//! A [`HistoryRegistry`] holds every [`SessionHistory`] of the process and
//! enforces a global cap on cached viewers. Each history keeps cached viewers
//! only near its current index and ages them out through an
//! [`ExpirationTracker`](expiration::ExpirationTracker).

pub mod error;
pub mod expiration;
pub mod platform;
pub mod session;
pub mod timer;

pub use error::{HistoryError, Result};
pub use session::{Entry, HistoryRegistry, HistorySettings, SessionHistory};
