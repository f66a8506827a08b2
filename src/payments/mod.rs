//! Payment gateway integration: shared types, errors, the gateway contract
//! and webhook signature verification.

pub mod error;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;
