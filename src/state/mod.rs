pub mod cache;
pub mod factory;
pub mod sled_store;
pub mod store;

pub use cache::*;
pub use factory::{create_in_memory_stores, create_stores, Stores};
pub use sled_store::SledStore;
pub use store::*;
