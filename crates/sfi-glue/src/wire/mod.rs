//! Com wire: framed messages over pipes to a peer process.
//!
//! # Architecture
//!
//! - **Frame**: header layout, validation and incremental decoding
//! - **ComWire**: request/result correlation and non-blocking pipe I/O
//! - **Spawn**: starting a peer with a command channel on two inherited fds

mod com_wire;
pub mod frame;
mod spawn;

pub use com_wire::{ComWire, WireDispatch, WireFds, WirePollFd};
pub use frame::{encode_frame, Decoded, FrameBuffer, Message, MessageType};
pub use spawn::{spawn_async, SpawnOptions, SpawnedChild};
