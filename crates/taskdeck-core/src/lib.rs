/*
[INPUT]:  Public API exports for taskdeck-core crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod events;
pub mod manager;
pub mod status;
pub mod task;
pub mod worker;

// Re-export main types for convenience
pub use events::{Field, FieldChange, FieldValue, Subscription};
pub use manager::{ManagerSnapshot, TaskManager};
pub use status::{StatusLabels, TaskStatus};
pub use task::{QueueTask, TaskCore, TaskSnapshot};
pub use worker::{TaskProbe, WorkerTask};
