//! Device token registry.
//!
//! Owns device-token records and their validation lifecycle. Tokens are
//! validated against the push gateway before they become addressable, and
//! are soft-invalidated (never deleted) so historical dispatch records keep
//! a stable reference.

mod registry;
mod types;

pub use registry::TokenRegistry;
pub use types::{DeviceToken, Platform, TokenFilter, TokenStatus};
