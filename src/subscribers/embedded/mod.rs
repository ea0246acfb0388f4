//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders status events through `tracing`.

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
