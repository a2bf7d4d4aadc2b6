pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod follow;
pub mod forms;
pub mod models;
pub mod openapi;
pub mod posts;
pub mod repo;
pub mod routes;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use routes::AppState;
