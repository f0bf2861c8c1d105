//! Digital Workspace core services: the team hierarchy and site search

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod search;
pub mod state;
pub mod teams;

pub use error::{AppError, Result};
