//! SFI Glue - proxy-object RPC over framed pipe transports.
//!
//! A client talks to objects owned by another process through integer proxy
//! handles. Procedure calls, property access and signal notification are
//! encoded as messages on a [`wire::ComWire`]; the owning side answers them
//! with a [`glue::Decoder`] wrapped around its own [`glue::GlueContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sfi_glue::glue::{vcall_int, CallArgs, Encoder};
//! use sfi_glue::wire::{spawn_async, SpawnOptions};
//!
//! fn main() -> sfi_glue::Result<()> {
//!     let child = spawn_async(&SpawnOptions::new("sfi-glue-peer").command_fd_option("--command-fds"))?;
//!     let (wire, _child) = child.into_wire("peer");
//!     let mut ctx = Encoder::new(wire).into_context();
//!
//!     let answer = vcall_int(&mut ctx, "echo", CallArgs::new().int(42));
//!     println!("echo returned {}", answer);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod glue;
pub mod primitives;
pub mod wire;

pub use config::{GlueConfig, RetryPolicy, SpawnConfig, WireConfig};
pub use error::{GlueError, Result};
pub use glue::{GlueBackend, GlueContext};
pub use primitives::{Proxy, Rec, Seq, Value};
