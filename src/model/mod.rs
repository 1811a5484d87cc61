pub mod channel;
pub mod graph;

pub use channel::{Channel, ChannelId, LocalPolicy};
pub use graph::{EdgePolicy, GraphEdge, GraphSnapshot};
