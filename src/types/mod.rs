//! Graph data model shared by every backend.

pub mod node;
pub mod edge;
pub mod value;
pub mod stats;

pub use node::{Node, NodeState, Content, ContentPayload, GENERATED_FROM_KEY};
pub use edge::{Edge, EdgeKey};
pub use value::{Meta, MetaValue, MetaValueError};
pub use stats::{IceStats, WaterStats, SweepReport};
