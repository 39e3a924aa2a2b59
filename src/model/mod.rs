//! Core data model: nodes, tasks, identifiers.

mod id;
mod node;
mod task;

pub use id::IdGenerator;
pub use node::{GpuDescriptor, Node, NodeMetrics, NodeStatus, NumaNode};
pub use task::{
    CommandPayload, MountSpec, ResourceRequest, Target, Task, TaskKind, TaskPayload, TaskStatus,
    VpsPayload, NO_CONTAINER,
};
