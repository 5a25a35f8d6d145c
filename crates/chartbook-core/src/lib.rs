//! chartbook-core - Core library for Chartbook
//!
//! This crate contains the shared models, local store, sync engine, and
//! business logic used by every Chartbook interface.

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Song, SongId};
pub use services::CatalogService;
