// HTTP middleware
pub mod drain_auth;

pub use drain_auth::*;
