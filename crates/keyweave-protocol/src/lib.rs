pub mod config;
pub mod evaluation;
pub mod fingerprint;
pub mod layout;
pub mod message;
