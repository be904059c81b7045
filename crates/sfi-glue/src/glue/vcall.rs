//! Typed procedure call helpers.
//!
//! [`call_seq`] hands the return value to the context's GC, where it stays
//! registered until the next sweep. The `vcall_*` helpers unwrap a typed
//! return and release the GC registration right away; a return of another
//! category yields the type's empty value.

use super::context::GlueContext;
use super::gc::GcKey;
use crate::primitives::{ParamSpec, Proxy, Rec, Seq, Value};
use std::rc::Rc;

/// Free function for values registered by [`call_seq`].
pub fn free_value(value: Rc<Value>) {
    drop(value);
}

/// GC key of a value registered by [`call_seq`].
pub fn value_key(value: &Rc<Value>) -> GcKey {
    GcKey::new(value, free_value)
}

/// Positional arguments of a procedure call.
///
/// ```rust,ignore
/// let args = CallArgs::new().proxy(osc).string("freq").real(440.0);
/// vcall_void(&mut ctx, "Osc+set", args);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    params: Seq,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.params.append(value);
        self
    }

    pub fn bool(self, value: bool) -> Self {
        self.value(value)
    }

    pub fn int(self, value: i32) -> Self {
        self.value(value)
    }

    pub fn num(self, value: i64) -> Self {
        self.value(value)
    }

    pub fn real(self, value: f64) -> Self {
        self.value(value)
    }

    pub fn string(self, value: impl Into<String>) -> Self {
        self.value(Value::String(value.into()))
    }

    pub fn choice(self, value: impl Into<String>) -> Self {
        self.value(Value::Choice(value.into()))
    }

    pub fn proxy(self, value: Proxy) -> Self {
        self.value(Value::Proxy(value))
    }

    pub fn seq(self, value: Seq) -> Self {
        self.value(value)
    }

    pub fn rec(self, value: Rec) -> Self {
        self.value(value)
    }

    pub fn bblock(self, value: Vec<u8>) -> Self {
        self.value(Value::BBlock(value))
    }

    pub fn fblock(self, value: Vec<f32>) -> Self {
        self.value(Value::FBlock(value))
    }

    pub fn pspec(self, value: ParamSpec) -> Self {
        self.value(value)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_seq(self) -> Seq {
        self.params
    }
}

impl From<CallArgs> for Seq {
    fn from(args: CallArgs) -> Self {
        args.into_seq()
    }
}

/// Execute `proc_name` and register its return value with the GC. The
/// value stays registered until the next [`GlueContext::gc_run`].
pub fn call_seq(ctx: &mut GlueContext, proc_name: &str, params: &Seq) -> Option<Rc<Value>> {
    let value = Rc::new(ctx.exec_proc(proc_name, params)?);
    ctx.gc_add(Rc::clone(&value), free_value);
    Some(value)
}

/// [`call_seq`] with a [`CallArgs`] list.
pub fn call_valist(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<Rc<Value>> {
    call_seq(ctx, proc_name, &args.into_seq())
}

fn vcall_typed<R>(
    ctx: &mut GlueContext,
    proc_name: &str,
    args: CallArgs,
    extract: impl FnOnce(&Value) -> Option<R>,
) -> Option<R> {
    let value = call_valist(ctx, proc_name, args)?;
    let result = extract(&value);
    ctx.gc_free_now(value_key(&value));
    result
}

pub fn vcall_void(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) {
    vcall_typed(ctx, proc_name, args, |_| Some(()));
}

pub fn vcall_bool(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> bool {
    vcall_typed(ctx, proc_name, args, Value::as_bool).unwrap_or(false)
}

pub fn vcall_int(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> i32 {
    vcall_typed(ctx, proc_name, args, Value::as_int).unwrap_or(0)
}

pub fn vcall_num(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> i64 {
    vcall_typed(ctx, proc_name, args, Value::as_num).unwrap_or(0)
}

pub fn vcall_real(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> f64 {
    vcall_typed(ctx, proc_name, args, Value::as_real).unwrap_or(0.0)
}

pub fn vcall_string(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<String> {
    vcall_typed(ctx, proc_name, args, |v| v.as_str().map(str::to_string))
}

pub fn vcall_choice(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<String> {
    vcall_typed(ctx, proc_name, args, |v| v.as_choice().map(str::to_string))
}

pub fn vcall_proxy(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Proxy {
    vcall_typed(ctx, proc_name, args, Value::as_proxy).unwrap_or(0)
}

/// The returned sequence is shared with nobody once the GC entry is gone.
pub fn vcall_seq(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<Rc<Seq>> {
    vcall_typed(ctx, proc_name, args, |v| v.as_seq().map(Seq::shallow_share))
}

pub fn vcall_rec(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<Rc<Rec>> {
    vcall_typed(ctx, proc_name, args, |v| v.as_rec().map(Rec::shallow_share))
}

pub fn vcall_bblock(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<Vec<u8>> {
    vcall_typed(ctx, proc_name, args, |v| v.as_bblock().map(<[u8]>::to_vec))
}

pub fn vcall_fblock(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<Vec<f32>> {
    vcall_typed(ctx, proc_name, args, |v| v.as_fblock().map(<[f32]>::to_vec))
}

pub fn vcall_pspec(ctx: &mut GlueContext, proc_name: &str, args: CallArgs) -> Option<ParamSpec> {
    vcall_typed(ctx, proc_name, args, |v| v.as_pspec().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glue::{LocalBackend, ProcInfo};
    use crate::primitives::Category;

    fn echo_context() -> GlueContext {
        let backend = LocalBackend::new();
        backend.register_proc(ProcInfo::new("echo"), |_, params| params.get(0).cloned());
        GlueContext::new(backend)
    }

    #[test]
    fn test_call_seq_registers_until_sweep() {
        let mut ctx = echo_context();
        let params = Seq::from_iter([Value::Int(42)]);
        let value = call_seq(&mut ctx, "echo", &params).unwrap();
        assert_eq!(*value, Value::Int(42));
        assert!(ctx.gc_test(value_key(&value)));
        assert_eq!(Rc::strong_count(&value), 2);

        ctx.gc_run();
        assert!(!ctx.gc_test(value_key(&value)));
        assert_eq!(Rc::strong_count(&value), 1);
    }

    #[test]
    fn test_typed_returns() {
        let mut ctx = echo_context();
        assert_eq!(vcall_int(&mut ctx, "echo", CallArgs::new().int(42)), 42);
        assert_eq!(vcall_num(&mut ctx, "echo", CallArgs::new().num(1 << 40)), 1 << 40);
        assert!(vcall_bool(&mut ctx, "echo", CallArgs::new().bool(true)));
        assert_eq!(
            vcall_string(&mut ctx, "echo", CallArgs::new().string("hi")).as_deref(),
            Some("hi")
        );
        assert_eq!(vcall_proxy(&mut ctx, "echo", CallArgs::new().proxy(9)), 9);
        assert_eq!(
            vcall_fblock(&mut ctx, "echo", CallArgs::new().fblock(vec![0.5])),
            Some(vec![0.5])
        );
        let pspec = ParamSpec::new("gain", Category::Real);
        assert_eq!(
            vcall_pspec(&mut ctx, "echo", CallArgs::new().pspec(pspec.clone())),
            Some(pspec)
        );
        assert!(ctx.gc_run() == 0);
    }

    #[test]
    fn test_mismatched_return_yields_default() {
        let mut ctx = echo_context();
        assert_eq!(vcall_int(&mut ctx, "echo", CallArgs::new().string("x")), 0);
        assert_eq!(vcall_proxy(&mut ctx, "echo", CallArgs::new().int(3)), 0);
        assert_eq!(vcall_string(&mut ctx, "echo", CallArgs::new().int(3)), None);
        assert!(!vcall_bool(&mut ctx, "missing", CallArgs::new()));
        assert_eq!(ctx.gc_run(), 0);
    }

    #[test]
    fn test_seq_return_is_shared() {
        let mut ctx = echo_context();
        let inner = Seq::from_strings(["a", "b"]);
        let seq = vcall_seq(&mut ctx, "echo", CallArgs::new().seq(inner.clone())).unwrap();
        assert_eq!(*seq, inner);
        assert_eq!(Rc::strong_count(&seq), 1);
    }
}
