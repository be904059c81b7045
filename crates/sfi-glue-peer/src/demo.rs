//! Demo object system served by the peer.
//!
//! Registers an `Osc` interface and a handful of procedures for driving
//! objects from a client:
//!
//! - `echo`: returns its first argument
//! - `list`: returns its arguments as a sequence
//! - `proxy-new`: creates an object of the named interface (default `Osc`)
//! - `proxy-emit`: emits a signal on an object
//! - `proxy-release`: destroys an object

use sfi_glue::glue::{Decoder, LocalBackend, ProcInfo};
use sfi_glue::primitives::{Category, ParamSpec, Seq, Value};
use std::rc::Rc;
use tracing::debug;

pub const OSC_IFACE: &str = "Osc";

fn osc_properties() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("freq", Category::Real)
            .with_default(Value::Real(440.0))
            .with_blurb("Oscillator frequency in Hz")
            .with_hints(":r:w:G:"),
        ParamSpec::new("name", Category::String)
            .with_default(Value::from("osc"))
            .with_hints(":r:w:G:"),
    ]
}

pub fn backend() -> LocalBackend {
    let backend = LocalBackend::new();
    backend.register_iface(OSC_IFACE, LocalBackend::BASE_IFACE, osc_properties());

    backend.register_proc(
        ProcInfo::new("echo").with_help("Return the first argument"),
        |_, params| params.get(0).cloned(),
    );
    backend.register_proc(
        ProcInfo::new("list").with_help("Return all arguments as a sequence"),
        |_, params| Some(Value::Seq(Rc::new(params.clone()))),
    );
    backend.register_proc(
        ProcInfo::new("proxy-new")
            .with_help("Create an object")
            .param(ParamSpec::new("iface", Category::String))
            .returns(ParamSpec::new("object", Category::Proxy)),
        |backend, params| {
            let iface = params.get_string(0).unwrap_or(OSC_IFACE);
            Some(Value::Proxy(backend.create_object(iface)))
        },
    );
    backend.register_proc(
        ProcInfo::new("proxy-emit")
            .with_help("Emit a signal on an object; further arguments are passed along")
            .param(ParamSpec::new("object", Category::Proxy))
            .param(ParamSpec::new("signal", Category::String)),
        |backend, params| {
            let proxy = params.get_proxy(0);
            let signal = params.get_string(1)?;
            let args: Seq = params.iter().skip(2).cloned().collect();
            Some(Value::Bool(backend.emit(proxy, signal, args)))
        },
    );
    backend.register_proc(
        ProcInfo::new("proxy-release")
            .with_help("Destroy an object")
            .param(ParamSpec::new("object", Category::Proxy)),
        |backend, params| Some(Value::Bool(backend.release(params.get_proxy(0)))),
    );
    backend
}

/// Client messages answered by the peer itself.
pub fn add_handlers(decoder: &mut Decoder) {
    decoder.add_handler(|msg, value| match msg {
        "ping" => Some(value.clone()),
        "version" => Some(Value::from(env!("CARGO_PKG_VERSION"))),
        _ => {
            debug!("passing on client message {}", msg);
            None
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfi_glue::glue::{vcall_bool, vcall_int, vcall_proxy, vcall_seq, CallArgs, GlueContext};

    #[test]
    fn test_echo_and_list() {
        let mut ctx = GlueContext::new(backend());
        assert_eq!(vcall_int(&mut ctx, "echo", CallArgs::new().int(42)), 42);
        let list = vcall_seq(&mut ctx, "list", CallArgs::new().int(1).string("two")).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_string(1), Some("two"));
    }

    #[test]
    fn test_object_lifecycle() {
        let demo = backend();
        let mut ctx = GlueContext::new(demo.clone());
        let osc = vcall_proxy(&mut ctx, "proxy-new", CallArgs::new());
        assert_ne!(osc, 0);
        assert_eq!(ctx.proxy_iface(osc).as_deref(), Some(OSC_IFACE));
        assert_eq!(
            ctx.proxy_get_property(osc, "freq"),
            Some(Value::Real(440.0))
        );

        // nobody asked for the signal yet
        assert!(!vcall_bool(
            &mut ctx,
            "proxy-emit",
            CallArgs::new().proxy(osc).string("changed")
        ));
        assert!(vcall_bool(&mut ctx, "proxy-release", CallArgs::new().proxy(osc)));
        assert_eq!(demo.object_count(), 0);
        assert_eq!(vcall_proxy(&mut ctx, "proxy-new", CallArgs::new().string("Nope")), 0);
    }
}
