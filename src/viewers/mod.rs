//! Viewer bookkeeping and per-connection output

pub mod registry;
pub mod session;

pub use registry::{SharedRegistry, StreamingState, ViewerHandle, ViewerRegistry};
pub use session::{encode_chunk, ViewerSession};
