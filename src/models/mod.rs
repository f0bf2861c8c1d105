pub mod audit;
pub mod curation;
pub mod page;
pub mod person;
pub mod team;

pub use audit::*;
pub use curation::*;
pub use page::*;
pub use person::*;
pub use team::*;
