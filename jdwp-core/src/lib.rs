// JDWP protocol engine for Java debuggers
//
// Multiplexes many callers over one debuggee connection:
// - Frame codec and reply correlation
// - Suspend-scoped caching
// - Remote object lifetimes and batched disposal
// - Event fan-out with hold/release flow control

pub mod cache;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
mod eventloop;
pub mod events;
pub mod flow;
pub mod objects;
pub mod pending;
pub mod pool;
pub mod protocol;
pub mod reader;
pub mod transport;
pub mod types;
pub mod vm;
pub mod writer;

pub use cache::ScopeState;
pub use config::ConnectionConfig;
pub use connection::JdwpConnection;
pub use error::{FaultKind, JdwpError, JdwpResult, ProtocolFault};
pub use events::{Delivery, EventBatch, EventSubscription};
pub use flow::EventFlowController;
pub use objects::RemoteHandle;
pub use pending::ReplyHandle;
pub use transport::{FrameRead, FrameWrite};
