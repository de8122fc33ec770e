pub mod config;
pub mod conversation;
pub mod engine;
pub mod errors;
pub mod kind;
pub mod logging;
pub mod marker;
pub mod node;
pub mod prompts;
pub mod scheduler;
pub mod snapshot;
pub mod spawn;
pub mod tools;
pub mod tree;

pub use kind::NodeKind;
pub use node::{Node, NodeId, NodeState};
pub use scheduler::{RunOutcome, Scheduler, SchedulerSettings};
pub use tree::DecompositionTree;
