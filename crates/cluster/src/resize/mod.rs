//! Resize jobs
//!
//! - `plan`: which fragments move when membership changes
//! - `job`: coordinator-side tracking of outstanding destinations
//! - `migrator`: destination-side execution of one instruction

pub mod job;
pub mod migrator;
pub mod plan;

pub use job::{JobProgress, JobStatus, JobSummary, JobTracker, ResizeJob};
pub use migrator::{FragmentMigrator, MigrationError};
pub use plan::resize_instructions;
