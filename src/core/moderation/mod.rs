// Core moderation module - the asynchronous post moderation pipeline.
// Models, ports, the pure policies, and the services that drive them.

pub mod moderation_models;
pub mod moderation_ports;
pub mod moderation_queue;
pub mod moderation_service;
pub mod pending_sweeper;
pub mod rejection_classifier;
pub mod retry_scheduler;
pub mod side_effects;

#[cfg(test)]
pub(crate) mod test_doubles;

pub use moderation_models::*;
pub use moderation_ports::*;
pub use moderation_queue::ModerationQueue;
pub use moderation_service::{ModerationCollaborators, ModerationOrchestrator};
pub use pending_sweeper::PendingSweeper;
