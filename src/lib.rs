pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod services;
pub mod visibility;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
pub use services::Services;
