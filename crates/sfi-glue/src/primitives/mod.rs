//! Generic value containers shared by the wire and glue layers.
//!
//! # Contents
//!
//! - [`Value`]: tagged value carried in messages
//! - [`Seq`] / [`Rec`]: ordered and named containers of values
//! - [`Ring`]: queue primitive with stable merge sort
//! - [`UStore`] / [`UPool`]: ordered id maps and sets

mod rec;
mod ring;
mod seq;
mod ustore;
mod value;

pub use rec::{canonical_field_name, Rec};
pub use ring::Ring;
pub use seq::Seq;
pub use ustore::{UPool, UStore};
pub use value::{Category, ParamSpec, Proxy, Value};
