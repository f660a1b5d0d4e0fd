pub mod tracker;

pub use tracker::{ExpirationHandler, ExpirationTracker, DEFAULT_GENERATIONS};
