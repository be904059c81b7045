//! Server side: answers encoded requests from a local glue context.

use super::opcode::{decode_message, encode_message, Opcode};
use crate::glue::backend::rc_seq;
use crate::glue::context::GlueContext;
use crate::glue::vcall::free_value;
use crate::primitives::{Ring, Seq, Value};
use crate::wire::{ComWire, WirePollFd};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interceptor for client messages. Returning `None` passes the message on.
pub type ClientMsgHandler = Box<dyn FnMut(&str, &Value) -> Option<Value>>;

struct Outgoing {
    /// Request answered by this message; events are posted unanswered.
    answer: Option<u32>,
    opcode: Opcode,
    args: Seq,
}

/// Routes requests arriving on a [`ComWire`] to a [`GlueContext`] and sends
/// back return values and the context's events.
pub struct Decoder {
    context: GlueContext,
    wire: ComWire,
    handlers: Vec<ClientMsgHandler>,
    outgoing: Ring<Outgoing>,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("wire", &self.wire.ident())
            .field("context", &self.context)
            .field("handlers", &self.handlers.len())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

impl Decoder {
    pub fn new(wire: ComWire, context: GlueContext) -> Self {
        Self {
            context,
            wire,
            handlers: Vec::new(),
            outgoing: Ring::new(),
        }
    }

    /// Register a client message interceptor. Interceptors run in
    /// registration order before the context's own `client_msg`.
    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&str, &Value) -> Option<Value> + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn context(&self) -> &GlueContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut GlueContext {
        &mut self.context
    }

    pub fn wire(&self) -> &ComWire {
        &self.wire
    }

    pub fn connected(&self) -> bool {
        self.wire.connected()
    }

    /// Whether a [`Decoder::dispatch`] call has work to do.
    pub fn pending(&mut self) -> bool {
        if !self.outgoing.is_empty() {
            return true;
        }
        self.wire.process_io();
        self.wire.need_dispatch() || self.context.pending()
    }

    /// Fds of the context's backend followed by the wire's.
    pub fn poll_fds(&mut self) -> Vec<WirePollFd> {
        let mut pfds = self.context.list_poll_fds();
        pfds.extend(self.wire.poll_fds());
        pfds
    }

    /// One dispatch cycle: flush events, answer at most one request, flush
    /// the events it produced, send, pump I/O and sweep the context's GC.
    pub fn dispatch(&mut self) {
        self.queue_events();
        if let Some((request, payload)) = self.wire.receive_request() {
            self.handle_request(request, &payload);
        }
        self.queue_events();
        self.flush_outgoing();
        self.wire.process_io();
        self.context.gc_run();
    }

    /// Dispatch until the peer disconnects, sleeping up to `poll_interval`
    /// while idle.
    pub fn serve(&mut self, poll_interval: Duration) {
        info!("{}: serving requests", self.wire.ident());
        while self.wire.connected() {
            if !self.pending() {
                self.wire.select(poll_interval);
            }
            self.dispatch();
        }
        info!("{}: peer disconnected", self.wire.ident());
    }

    fn queue_events(&mut self) {
        while let Some(event) = self.context.fetch_event() {
            self.outgoing.append(Outgoing {
                answer: None,
                opcode: Opcode::AsyncEvent,
                args: Seq::from_iter([rc_seq(event.to_seq())]),
            });
        }
    }

    /// Queue the `AsyncReturn` for `request`. The value is kept alive by the
    /// context's GC until the end of the cycle.
    fn queue_return(&mut self, request: u32, value: Option<Value>) {
        let mut args = Seq::new();
        if let Some(value) = value {
            let value = Rc::new(value);
            args.append(value.shallow_share());
            self.context.gc_add(value, free_value);
        }
        self.outgoing.append(Outgoing {
            answer: Some(request),
            opcode: Opcode::AsyncReturn,
            args,
        });
    }

    fn handle_request(&mut self, request: u32, payload: &str) {
        if payload.is_empty() {
            warn!("discarding invalid empty request");
            self.queue_return(request, None);
            return;
        }
        let (code, args) = match decode_message(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("discarding invalid request: {}", err);
                self.queue_return(request, None);
                return;
            }
        };
        let Some(opcode) = Opcode::from_i32(code).filter(|opcode| opcode.is_request()) else {
            warn!("ignoring request with invalid ID: {}", code);
            self.queue_return(request, None);
            return;
        };
        debug!("{}: {:?} (request={})", self.wire.ident(), opcode, request);
        let value = self.execute(opcode, &args);
        if opcode.is_one_way() {
            self.wire.discard_request(request);
        } else {
            self.queue_return(request, value);
        }
    }

    fn execute(&mut self, opcode: Opcode, args: &Seq) -> Option<Value> {
        let text = move |index: usize| args.get_string(index).unwrap_or_default();
        let strings = |names: Vec<String>| Some(rc_seq(Seq::from_strings(names)));
        let proxy = args.get_proxy(0);
        let ctx = &mut self.context;
        match opcode {
            Opcode::DescribeIface => ctx
                .describe_iface(text(0))
                .map(|info| Value::from(info.to_rec())),
            Opcode::DescribeProc => ctx
                .describe_proc(text(0))
                .map(|info| Value::from(info.to_rec())),
            Opcode::ListProcNames => strings(ctx.list_proc_names()),
            Opcode::ListMethodNames => strings(ctx.list_method_names(text(0))),
            Opcode::BaseIface => ctx.base_iface().map(Value::String),
            Opcode::IfaceChildren => strings(ctx.iface_children(text(0))),
            Opcode::ExecProc => {
                let params = args
                    .get_seq(1)
                    .map(|params| params.as_ref().clone())
                    .unwrap_or_default();
                ctx.exec_proc(text(0), &params)
            }
            Opcode::ProxyIface => ctx.proxy_iface(proxy).map(Value::String),
            Opcode::ProxyIsA => Some(Value::Bool(ctx.proxy_is_a(proxy, text(1)))),
            Opcode::ProxyListProperties => {
                strings(ctx.proxy_list_properties(proxy, text(1), text(2)))
            }
            Opcode::ProxyGetPspec => ctx.proxy_get_pspec(proxy, text(1)).map(Value::from),
            Opcode::ProxyGetPspecScategory => {
                let category = ctx.proxy_get_pspec_scategory(proxy, text(1));
                Some(Value::Int(category.as_char() as i32))
            }
            Opcode::ProxySetProperty => {
                let value = args.get(2).cloned().unwrap_or_default();
                ctx.proxy_set_property(proxy, text(1), &value);
                None
            }
            Opcode::ProxyGetProperty => ctx.proxy_get_property(proxy, text(1)),
            Opcode::ProxyWatchRelease => Some(Value::Bool(ctx.proxy_watch_release(proxy))),
            Opcode::ProxyRequestNotify => Some(Value::Bool(ctx.proxy_request_notify(
                proxy,
                text(1),
                args.get_bool(2),
            ))),
            Opcode::ProxyProcessedNotify => {
                match u32::try_from(args.get_num(0)) {
                    Ok(notify_id) => ctx.proxy_processed_notify(notify_id),
                    Err(_) => warn!("invalid notify id: {}", args.get_num(0)),
                }
                None
            }
            Opcode::ClientMsg => {
                let value = args.get(1).cloned().unwrap_or_default();
                self.client_msg(text(0), &value)
            }
            Opcode::AsyncReturn | Opcode::AsyncMessage | Opcode::AsyncEvent => None,
        }
    }

    fn client_msg(&mut self, msg: &str, value: &Value) -> Option<Value> {
        for handler in self.handlers.iter_mut() {
            if let Some(result) = handler(msg, value) {
                return Some(result);
            }
        }
        self.context.client_msg(msg, value)
    }

    fn flush_outgoing(&mut self) {
        while let Some(Outgoing {
            answer,
            opcode,
            args,
        }) = self.outgoing.pop_head()
        {
            let sent = encode_message(opcode, args).and_then(|payload| match answer {
                Some(request) => self.wire.send_result(request, &payload),
                None => self.wire.post_request(&payload).map(|_| ()),
            });
            let Err(err) = sent else {
                continue;
            };
            warn!("{}: failed to send {:?}: {}", self.wire.ident(), opcode, err);
            // the caller still waits for an answer
            if let Some(request) = answer {
                let empty = encode_message(Opcode::AsyncReturn, Seq::new())
                    .and_then(|payload| self.wire.send_result(request, &payload));
                if let Err(err) = empty {
                    warn!("{}: failed to answer {}: {}", self.wire.ident(), request, err);
                    self.wire.discard_request(request);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glue::{GlueEvent, LocalBackend, ProcInfo};
    use crate::primitives::{Category, ParamSpec, Proxy};
    use nix::unistd::pipe;

    struct Harness {
        client: ComWire,
        decoder: Decoder,
        backend: LocalBackend,
    }

    impl Harness {
        fn new() -> Self {
            let (client_in, server_out) = pipe().unwrap();
            let (server_in, client_out) = pipe().unwrap();
            let backend = LocalBackend::new();
            backend.register_proc(ProcInfo::new("echo"), |_, params| params.get(0).cloned());
            backend.register_iface(
                "Osc",
                LocalBackend::BASE_IFACE,
                vec![ParamSpec::new("freq", Category::Real).with_default(Value::Real(440.0))],
            );
            let context = GlueContext::new(backend.clone());
            Self {
                client: ComWire::from_pipe("client", client_in, client_out),
                decoder: Decoder::new(ComWire::from_pipe("server", server_in, server_out), context),
                backend,
            }
        }

        fn request(&mut self, opcode: Opcode, args: Seq) -> u32 {
            let payload = encode_message(opcode, args).unwrap();
            self.client.send_request(&payload).unwrap()
        }

        fn post(&mut self, opcode: Opcode, args: Seq) {
            let payload = encode_message(opcode, args).unwrap();
            self.client.post_request(&payload).unwrap();
        }

        /// Dispatch once and return the decoded answer to `request`.
        fn answer(&mut self, request: u32) -> (i32, Seq) {
            self.decoder.dispatch();
            self.client.process_io();
            let payload = self.client.receive_result(request).unwrap();
            decode_message(&payload).unwrap()
        }

        fn call(&mut self, opcode: Opcode, args: Seq) -> Option<Value> {
            let request = self.request(opcode, args);
            let (code, ret) = self.answer(request);
            assert_eq!(code, Opcode::AsyncReturn as i32);
            ret.into_iter().next()
        }

        fn posted_events(&mut self) -> Vec<GlueEvent> {
            self.client.process_io();
            let mut events = Vec::new();
            while let Some((request, payload)) = self.client.receive_request() {
                let (code, args) = decode_message(&payload).unwrap();
                assert_eq!(code, Opcode::AsyncEvent as i32);
                events.push(GlueEvent::from_seq(args.get_seq(0).unwrap()).unwrap());
                self.client.discard_request(request);
            }
            events
        }
    }

    fn proxy_args(proxy: Proxy, rest: impl IntoIterator<Item = Value>) -> Seq {
        std::iter::once(Value::Proxy(proxy)).chain(rest).collect()
    }

    #[test]
    fn test_exec_proc_answers_with_return() {
        let mut h = Harness::new();
        let params = rc_seq(Seq::from_iter([Value::Int(42)]));
        let ret = h.call(Opcode::ExecProc, Seq::from_iter([Value::from("echo"), params]));
        assert_eq!(ret, Some(Value::Int(42)));
        // the return value was swept at the end of the cycle
        assert_eq!(h.decoder.context_mut().gc_run(), 0);
    }

    #[test]
    fn test_unknown_opcode_gets_empty_return() {
        let mut h = Harness::new();
        let payload = r#"[{"t":"int","v":200}]"#;
        let request = h.client.send_request(payload).unwrap();
        let (code, ret) = h.answer(request);
        assert_eq!(code, Opcode::AsyncReturn as i32);
        assert!(ret.is_empty());

        let request = h.client.send_request("").unwrap();
        let (_, ret) = h.answer(request);
        assert!(ret.is_empty());
    }

    #[test]
    fn test_notifications_are_posted_as_events() {
        let mut h = Harness::new();
        let osc = h.backend.create_object("Osc");
        let enabled = h.call(
            Opcode::ProxyRequestNotify,
            proxy_args(osc, [Value::from("value_changed"), Value::Bool(true)]),
        );
        assert_eq!(enabled, Some(Value::Bool(true)));

        assert!(h.backend.emit(osc, "value-changed", Seq::new()));
        assert!(h.decoder.pending());
        h.decoder.dispatch();
        let events = h.posted_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_notify_for(osc, "value-changed"));

        let notify_id = events[0].notify_id().unwrap();
        h.post(
            Opcode::ProxyProcessedNotify,
            Seq::from_iter([Value::Num(i64::from(notify_id))]),
        );
        h.decoder.dispatch();
        assert_eq!(h.backend.unacknowledged_notifies(), 0);
    }

    #[test]
    fn test_set_property_is_one_way_and_notifies() {
        let mut h = Harness::new();
        let osc = h.backend.create_object("Osc");
        h.call(
            Opcode::ProxyRequestNotify,
            proxy_args(osc, [Value::from("property-notify"), Value::Bool(true)]),
        );
        h.post(
            Opcode::ProxySetProperty,
            proxy_args(osc, [Value::from("freq"), Value::Real(110.0)]),
        );
        h.decoder.dispatch();
        assert!(h.client.outstanding_requests().is_empty());
        let events = h.posted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].proxy(), osc);

        let freq = h.call(Opcode::ProxyGetProperty, proxy_args(osc, [Value::from("freq")]));
        assert_eq!(freq, Some(Value::Real(110.0)));
        let category = h.call(
            Opcode::ProxyGetPspecScategory,
            proxy_args(osc, [Value::from("freq")]),
        );
        assert_eq!(category, Some(Value::Int('r' as i32)));
    }

    #[test]
    fn test_client_msg_handlers_run_first() {
        let mut h = Harness::new();
        h.decoder.add_handler(|msg, value| match msg {
            "ping" => Some(value.clone()),
            _ => None,
        });
        let args = Seq::from_iter([Value::from("ping"), Value::Int(7)]);
        assert_eq!(h.call(Opcode::ClientMsg, args), Some(Value::Int(7)));

        let args = Seq::from_iter([Value::from("other"), Value::None]);
        let ret = h.call(Opcode::ClientMsg, args).unwrap();
        assert_eq!(ret.as_str(), Some("unhandled client message: other"));
    }

    #[test]
    fn test_one_request_per_cycle() {
        let mut h = Harness::new();
        let first = h.request(Opcode::BaseIface, Seq::new());
        let second = h.request(Opcode::ListProcNames, Seq::new());
        h.decoder.dispatch();
        h.client.process_io();
        assert!(h.client.receive_result(first).is_some());
        assert!(h.client.is_outstanding(second));
        h.decoder.dispatch();
        h.client.process_io();
        assert!(h.client.receive_result(second).is_some());
    }
}
