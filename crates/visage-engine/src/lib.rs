//! The generation-task core: task registry, external worker invocation,
//! artifact location/publishing, and the orchestrator that ties them
//! together around a broadcast channel.

pub mod artifact;
pub mod orchestrator;
pub mod registry;
pub mod worker;
