pub mod api;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod kafka;
pub mod models;
pub mod notifications;
pub mod pg_store;
pub mod queue;
pub mod redis_store;
pub mod schema;
pub mod store;
