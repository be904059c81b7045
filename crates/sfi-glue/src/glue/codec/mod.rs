//! Glue operations encoded as `[opcode, args...]` messages on a com wire.
//!
//! The [`Encoder`] is a [`super::GlueBackend`] for the client side. The
//! [`Decoder`] answers its requests from a local [`super::GlueContext`] and
//! posts that context's events back as `AsyncEvent` messages.

mod decoder;
mod encoder;
mod opcode;

pub use decoder::{ClientMsgHandler, Decoder};
pub use encoder::Encoder;
pub use opcode::{decode_message, encode_message, Opcode};
