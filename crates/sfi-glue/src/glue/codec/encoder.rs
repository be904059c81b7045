//! Client stub: forwards glue operations over a com wire.

use super::opcode::{decode_message, encode_message, Opcode};
use crate::config::GlueConfig;
use crate::glue::backend::{rc_seq, GlueBackend, IfaceInfo, ProcInfo};
use crate::glue::context::GlueContext;
use crate::glue::event::GlueEvent;
use crate::primitives::{Category, ParamSpec, Proxy, Ring, Seq, Value};
use crate::wire::{ComWire, WirePollFd};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`GlueBackend`] whose operations are answered by a decoder on the other
/// end of a [`ComWire`].
///
/// Events the peer sends while a call is in flight are stashed and handed
/// out by the next `fetch_events`.
pub struct Encoder {
    wire: ComWire,
    events: Ring<GlueEvent>,
    poll_interval: Duration,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("wire", &self.wire.ident())
            .field("connected", &self.wire.connected())
            .field("events", &self.events.len())
            .finish()
    }
}

impl Encoder {
    pub fn new(wire: ComWire) -> Self {
        Self {
            wire,
            events: Ring::new(),
            poll_interval: GlueConfig::ROUND_TRIP_POLL_INTERVAL,
        }
    }

    /// How long a round trip sleeps in `poll` between I/O pumps.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn wire(&self) -> &ComWire {
        &self.wire
    }

    pub fn wire_mut(&mut self) -> &mut ComWire {
        &mut self.wire
    }

    /// Wrap the encoder in a fresh client context.
    pub fn into_context(self) -> GlueContext {
        GlueContext::new(self)
    }

    fn handle_incoming(&mut self, payload: &str) {
        let (opcode, args) = match decode_message(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("{}: ignoring invalid message: {}", self.wire.ident(), err);
                return;
            }
        };
        match Opcode::from_i32(opcode) {
            Some(Opcode::AsyncEvent) => match args.get_seq(0).map(|seq| GlueEvent::from_seq(seq)) {
                Some(Ok(event)) => self.events.append(event),
                Some(Err(reason)) => warn!("ignoring message with NULL event: {}", reason),
                None => warn!("ignoring message with NULL event"),
            },
            Some(Opcode::AsyncMessage) => match args.get_string(0) {
                Some(text) => info!("{}: {}", self.wire.ident(), text),
                None => warn!("ignoring message with invalid message contents"),
            },
            Some(Opcode::AsyncReturn) => warn!("ignoring message with spurious return value"),
            _ => warn!("ignoring message with invalid ID: {}", opcode),
        }
    }

    /// Consume every request the peer has posted.
    fn drain_incoming(&mut self) {
        while let Some((request, payload)) = self.wire.receive_request() {
            self.handle_incoming(&payload);
            self.wire.discard_request(request);
        }
    }

    fn exec_one_way(&mut self, opcode: Opcode, args: Seq) {
        let sent = encode_message(opcode, args).and_then(|payload| self.wire.post_request(&payload));
        if let Err(err) = sent {
            warn!("{}: failed to send {:?}: {}", self.wire.ident(), opcode, err);
        }
        self.wire.process_io();
        self.drain_incoming();
    }

    /// Send a request and block until its `AsyncReturn` arrives. `None` for
    /// an empty return or when the connection is lost first.
    fn exec_round_trip(&mut self, opcode: Opcode, args: Seq) -> Option<Value> {
        let sent = encode_message(opcode, args).and_then(|payload| self.wire.send_request(&payload));
        let request = match sent {
            Ok(request) => request,
            Err(err) => {
                warn!("{}: failed to send {:?}: {}", self.wire.ident(), opcode, err);
                return None;
            }
        };
        loop {
            self.wire.process_io();
            self.drain_incoming();
            if let Some(result) = self.wire.receive_result(request) {
                return self.decode_return(&result);
            }
            if !self.wire.connected() {
                warn!(
                    "{}: connection lost while waiting for {:?}",
                    self.wire.ident(),
                    opcode
                );
                self.wire.forget_request(request);
                return None;
            }
            self.wire.select(self.poll_interval);
        }
    }

    fn decode_return(&self, payload: &str) -> Option<Value> {
        match decode_message(payload) {
            Ok((opcode, args)) if opcode == Opcode::AsyncReturn as i32 => {
                args.into_iter().next().filter(|value| !value.is_none())
            }
            Ok((opcode, _)) => {
                warn!("{}: result with unexpected opcode {}", self.wire.ident(), opcode);
                None
            }
            Err(err) => {
                warn!("{}: invalid result: {}", self.wire.ident(), err);
                None
            }
        }
    }

    fn round_trip_strings(&mut self, opcode: Opcode, args: Seq) -> Vec<String> {
        self.exec_round_trip(opcode, args)
            .and_then(|value| value.as_seq().map(|seq| seq.to_strings()))
            .unwrap_or_default()
    }

    fn round_trip_bool(&mut self, opcode: Opcode, args: Seq) -> bool {
        self.exec_round_trip(opcode, args)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    fn round_trip_string(&mut self, opcode: Opcode, args: Seq) -> Option<String> {
        self.exec_round_trip(opcode, args)
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

fn proxy_args(proxy: Proxy, strings: &[&str]) -> Seq {
    let mut args = Seq::new();
    args.append(Value::Proxy(proxy));
    for s in strings {
        args.append(*s);
    }
    args
}

impl GlueBackend for Encoder {
    fn describe_iface(&mut self, iface: &str) -> Option<IfaceInfo> {
        let value = self.exec_round_trip(Opcode::DescribeIface, Seq::from_strings([iface]))?;
        IfaceInfo::from_rec(value.as_rec()?)
    }

    fn describe_proc(&mut self, proc_name: &str) -> Option<ProcInfo> {
        let value = self.exec_round_trip(Opcode::DescribeProc, Seq::from_strings([proc_name]))?;
        ProcInfo::from_rec(value.as_rec()?)
    }

    fn list_proc_names(&mut self) -> Vec<String> {
        self.round_trip_strings(Opcode::ListProcNames, Seq::new())
    }

    fn list_method_names(&mut self, iface: &str) -> Vec<String> {
        self.round_trip_strings(Opcode::ListMethodNames, Seq::from_strings([iface]))
    }

    fn base_iface(&mut self) -> Option<String> {
        self.round_trip_string(Opcode::BaseIface, Seq::new())
    }

    fn iface_children(&mut self, iface: &str) -> Vec<String> {
        self.round_trip_strings(Opcode::IfaceChildren, Seq::from_strings([iface]))
    }

    fn exec_proc(&mut self, proc_name: &str, params: &Seq) -> Option<Value> {
        let args = Seq::from_iter([Value::from(proc_name), rc_seq(params.clone())]);
        self.exec_round_trip(Opcode::ExecProc, args)
    }

    fn proxy_iface(&mut self, proxy: Proxy) -> Option<String> {
        self.round_trip_string(Opcode::ProxyIface, proxy_args(proxy, &[]))
    }

    fn proxy_is_a(&mut self, proxy: Proxy, iface: &str) -> bool {
        self.round_trip_bool(Opcode::ProxyIsA, proxy_args(proxy, &[iface]))
    }

    fn proxy_list_properties(
        &mut self,
        proxy: Proxy,
        first_ancestor: &str,
        last_ancestor: &str,
    ) -> Vec<String> {
        self.round_trip_strings(
            Opcode::ProxyListProperties,
            proxy_args(proxy, &[first_ancestor, last_ancestor]),
        )
    }

    fn proxy_get_pspec(&mut self, proxy: Proxy, name: &str) -> Option<ParamSpec> {
        let value = self.exec_round_trip(Opcode::ProxyGetPspec, proxy_args(proxy, &[name]))?;
        value.as_pspec().cloned()
    }

    fn proxy_get_pspec_scategory(&mut self, proxy: Proxy, name: &str) -> Category {
        self.exec_round_trip(Opcode::ProxyGetPspecScategory, proxy_args(proxy, &[name]))
            .and_then(|value| value.as_int())
            .and_then(|code| u32::try_from(code).ok())
            .and_then(char::from_u32)
            .and_then(Category::from_char)
            .unwrap_or_default()
    }

    fn proxy_set_property(&mut self, proxy: Proxy, name: &str, value: &Value) {
        let mut args = proxy_args(proxy, &[name]);
        args.append(value.clone());
        self.exec_one_way(Opcode::ProxySetProperty, args);
    }

    fn proxy_get_property(&mut self, proxy: Proxy, name: &str) -> Option<Value> {
        self.exec_round_trip(Opcode::ProxyGetProperty, proxy_args(proxy, &[name]))
    }

    fn proxy_watch_release(&mut self, proxy: Proxy) -> bool {
        self.round_trip_bool(Opcode::ProxyWatchRelease, proxy_args(proxy, &[]))
    }

    fn proxy_request_notify(&mut self, proxy: Proxy, signal: &str, enable: bool) -> bool {
        let mut args = proxy_args(proxy, &[signal]);
        args.append(enable);
        self.round_trip_bool(Opcode::ProxyRequestNotify, args)
    }

    fn proxy_processed_notify(&mut self, notify_id: u32) {
        let args = Seq::from_iter([Value::Num(i64::from(notify_id))]);
        self.exec_one_way(Opcode::ProxyProcessedNotify, args);
    }

    fn client_msg(&mut self, msg: &str, value: &Value) -> Option<Value> {
        let args = Seq::from_iter([Value::from(msg), value.clone()]);
        self.exec_round_trip(Opcode::ClientMsg, args)
    }

    fn fetch_events(&mut self) -> Vec<GlueEvent> {
        self.wire.process_io();
        self.drain_incoming();
        std::mem::take(&mut self.events).into_iter().collect()
    }

    fn list_poll_fds(&mut self) -> Vec<WirePollFd> {
        self.wire.poll_fds()
    }

    fn destroy(&mut self) {
        if !self.events.is_empty() {
            debug!(
                "{}: dropping {} undelivered events",
                self.wire.ident(),
                self.events.len()
            );
        }
        self.events.clear();
        self.wire.close_remote(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use std::thread::{self, JoinHandle};

    const TICK: Duration = Duration::from_millis(10);

    /// An encoder talking to a raw wire driven by `script` on another thread.
    fn scripted_peer<F>(script: F) -> (Encoder, JoinHandle<()>)
    where
        F: FnOnce(&mut ComWire) + Send + 'static,
    {
        let (client_in, peer_out) = pipe().unwrap();
        let (peer_in, client_out) = pipe().unwrap();
        let handle = thread::spawn(move || {
            let mut peer = ComWire::from_pipe("peer", peer_in, peer_out);
            script(&mut peer);
        });
        let encoder = Encoder::new(ComWire::from_pipe("client", client_in, client_out))
            .with_poll_interval(TICK);
        (encoder, handle)
    }

    fn wait_request(peer: &mut ComWire) -> (u32, i32, Seq) {
        loop {
            peer.process_io();
            if let Some((request, payload)) = peer.receive_request() {
                let (opcode, args) = decode_message(&payload).unwrap();
                return (request, opcode, args);
            }
            assert!(peer.connected(), "client went away");
            peer.select(TICK);
        }
    }

    fn answer(peer: &mut ComWire, request: u32, value: Value) {
        let payload = encode_message(Opcode::AsyncReturn, Seq::from_iter([value])).unwrap();
        peer.send_result(request, &payload).unwrap();
    }

    #[test]
    fn test_round_trip_stashes_interleaved_events() {
        let (mut encoder, peer) = scripted_peer(|peer| {
            let (request, opcode, args) = wait_request(peer);
            assert_eq!(opcode, Opcode::ExecProc as i32);
            assert_eq!(args.get_string(0), Some("echo"));

            let event = rc_seq(GlueEvent::release(5).to_seq());
            let post = encode_message(Opcode::AsyncEvent, Seq::from_iter([event])).unwrap();
            peer.post_request(&post).unwrap();
            answer(peer, request, args.get_seq(1).unwrap().get(0).cloned().unwrap());
        });

        let result = encoder.exec_proc("echo", &Seq::from_iter([Value::Int(42)]));
        assert_eq!(result, Some(Value::Int(42)));
        peer.join().unwrap();
        assert_eq!(encoder.fetch_events(), vec![GlueEvent::release(5)]);
        assert!(encoder.fetch_events().is_empty());
    }

    #[test]
    fn test_disconnect_returns_default() {
        let (mut encoder, peer) = scripted_peer(|peer| {
            let (_, opcode, _) = wait_request(peer);
            assert_eq!(opcode, Opcode::ProxyIsA as i32);
        });
        assert!(!encoder.proxy_is_a(1, "Item"));
        peer.join().unwrap();
        assert!(!encoder.wire().connected());
        assert!(encoder.wire().outstanding_requests().is_empty());
    }

    #[test]
    fn test_one_way_does_not_wait() {
        let (mut encoder, peer) = scripted_peer(|peer| {
            let (request, opcode, args) = wait_request(peer);
            assert_eq!(opcode, Opcode::ProxySetProperty as i32);
            assert_eq!(args.get_proxy(0), 3);
            assert_eq!(args.get_string(1), Some("freq"));
            assert_eq!(args.get(2), Some(&Value::Real(220.0)));
            peer.discard_request(request);
        });
        encoder.proxy_set_property(3, "freq", &Value::Real(220.0));
        assert!(encoder.wire().outstanding_requests().is_empty());
        peer.join().unwrap();
    }

    #[test]
    fn test_scategory_decodes_char_code() {
        let (mut encoder, peer) = scripted_peer(|peer| {
            let (request, _, _) = wait_request(peer);
            answer(peer, request, Value::Int('r' as i32));
        });
        assert_eq!(encoder.proxy_get_pspec_scategory(3, "freq"), Category::Real);
        peer.join().unwrap();
    }
}
