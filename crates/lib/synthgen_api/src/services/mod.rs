//! Helpers shared by handlers.

pub mod client_ip;
pub mod cookies;
