//! Frame storage and fan-out

pub mod broadcaster;
pub mod frame;

pub use broadcaster::{FrameBroadcaster, SharedBroadcaster};
pub use frame::Frame;
