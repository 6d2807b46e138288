pub mod auth;
pub mod error_handler;
pub mod rate_limit;
