//! Runtime of the agent: producers, the delivery path and the work loop.

pub mod artifacts;
pub mod collectors;
pub mod debounce;
pub mod event;
pub mod link;
pub mod router;
pub mod scheduler;
pub mod spool;
pub mod supervisor;
pub mod vision;
