//! Runtime core: connection lifecycle and the public handle.
//!
//! Internal modules:
//! - [`session`]: one connected lifetime (bootstrap, message loop, background reads);
//! - [`supervisor`]: reconnect loop with capped exponential backoff;
//! - [`bridge`]: the public [`Bridge`] handle;
//! - [`builder`]: [`BridgeBuilder`];
//! - [`config`]: [`Config`].

mod bridge;
mod builder;
mod config;
mod session;
mod supervisor;

pub use bridge::Bridge;
pub use builder::BridgeBuilder;
pub use config::Config;
