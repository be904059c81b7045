//! Glue layer: remote procedure calls and proxy objects.
//!
//! # Architecture
//!
//! - **Context**: [`GlueContext`] owns a [`GlueBackend`], the proxy table,
//!   the deferred-free table and pending events
//! - **Backends**: [`Encoder`] forwards over a com wire, [`LocalBackend`]
//!   answers in process
//! - **Decoder**: [`Decoder`] serves a context to a remote encoder
//! - **Calls**: `vcall_*` helpers with typed returns

pub mod backend;
pub mod codec;
pub mod context;
pub mod event;
pub mod gc;
pub mod local;
pub mod proxy;
pub mod vcall;

pub use backend::{GlueBackend, IfaceInfo, ProcInfo};
pub use codec::{Decoder, Encoder, Opcode};
pub use context::{current, push, with_current, ContextGuard, GlueContext, SharedContext};
pub use event::{canonical_signal, GlueEvent, GlueEventType};
pub use gc::{GcFreeFn, GcKey, GcTable};
pub use local::{LocalBackend, ProcHandler};
pub use proxy::{ProxyHandle, ProxyTable, ReleasedProxy, SignalHandler, SignalSpec, WeakNotify};
pub use vcall::{
    call_seq, call_valist, free_value, value_key, vcall_bblock, vcall_bool, vcall_choice,
    vcall_fblock, vcall_int, vcall_num, vcall_pspec, vcall_proxy, vcall_real, vcall_rec,
    vcall_seq, vcall_string, vcall_void, CallArgs,
};
