pub mod job;
pub mod relationship;
pub mod target;

pub use job::{JobStatus, ScrapeJob, ScrapeType};
pub use relationship::{RelationKind, Relationship};
pub use target::Target;
