//! Team hierarchy maintained as a closure table

pub mod error;
pub mod service;
pub mod slug;

pub use error::TeamServiceError;
pub use service::{TeamDraft, TeamService};
pub use slug::slugify;
