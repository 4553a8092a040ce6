pub mod analytics;
pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;

pub use config::AppConfig;
pub use error::{JournalError, Result};
pub use store::{open_store, JournalStore};
