//! Framed request/result transport over a pair of non-blocking pipes.
//!
//! # Request bookkeeping
//!
//! - **orequests**: ids this side sent and still waits for
//! - **iresults**: results that arrived for an outstanding id
//! - **irequests**: requests from the peer not yet picked up
//! - **rrequests**: requests picked up but not yet answered
//!
//! Transport faults never panic. A broken direction is closed on the next
//! [`ComWire::process_io`] and [`ComWire::connected`] turns false.

use super::frame::{encode_frame, Decoded, FrameBuffer, Message, MessageType};
use crate::config::{RetryPolicy, WireConfig};
use crate::primitives::{Ring, UPool};
use crate::{GlueError, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tracing::{debug, warn};

/// Handler for requests picked up through [`ComWire::dispatch`].
///
/// Returning `false` hands the request to the default dispatcher, which logs
/// it and discards it.
pub trait WireDispatch {
    fn dispatch(&mut self, wire: &mut ComWire, request: u32, message: &str) -> bool;
}

/// File descriptors owned by a wire. Every one of them is optional.
#[derive(Debug, Default)]
pub struct WireFds {
    /// Readable end carrying the peer's messages.
    pub remote_input: Option<OwnedFd>,
    /// Writable end for messages to the peer.
    pub remote_output: Option<OwnedFd>,
    pub standard_input: Option<OwnedFd>,
    pub standard_output: Option<OwnedFd>,
    pub standard_error: Option<OwnedFd>,
}

/// An fd and the events a host loop should poll it for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePollFd {
    pub fd: RawFd,
    pub events: PollFlags,
}

struct Channel {
    file: Option<File>,
    broke: bool,
}

impl Channel {
    fn open(fd: Option<OwnedFd>, ident: &str) -> Self {
        if let Some(fd) = &fd {
            if let Err(err) = set_nonblocking(fd) {
                warn!("{}: failed to set fd {} non-blocking: {}", ident, fd.as_raw_fd(), err);
            }
        }
        Self {
            file: fd.map(File::from),
            broke: false,
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    fn close_if_broken(&mut self) {
        if self.broke {
            self.file = None;
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Read everything currently available. Returns false once the channel broke.
fn read_available(file: &mut File, sink: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; WireConfig::READ_CHUNK_SIZE];
    loop {
        match file.read(&mut chunk) {
            // end-of-file on a pipe: the peer closed its end
            Ok(0) => return false,
            Ok(n) => sink.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return true,
            Err(err) => {
                debug!("read failed: {}", err);
                return false;
            }
        }
    }
}

/// Framed message transport to a peer process.
pub struct ComWire {
    ident: String,
    remote_pid: Option<i32>,
    connected: bool,
    remote_input: Channel,
    remote_output: Channel,
    standard_input: Channel,
    standard_output: Channel,
    standard_error: Channel,
    ibuffer: FrameBuffer,
    obuffer: Vec<u8>,
    orequests: UPool,
    iresults: Ring<Message>,
    irequests: Ring<Message>,
    rrequests: Ring<Message>,
    captured_stdout: Vec<u8>,
    captured_stderr: Vec<u8>,
    dispatcher: Option<Box<dyn WireDispatch>>,
}

impl ComWire {
    /// Wrap the fds of a spawned child. All fds are made non-blocking.
    pub fn from_child(ident: &str, fds: WireFds, remote_pid: Option<i32>) -> Self {
        let ident = match remote_pid {
            Some(pid) => format!("{ident}[{pid}]"),
            None => ident.to_string(),
        };
        let connected = fds.remote_input.is_some()
            || fds.remote_output.is_some()
            || fds.standard_input.is_some()
            || fds.standard_output.is_some()
            || fds.standard_error.is_some();
        Self {
            remote_input: Channel::open(fds.remote_input, &ident),
            remote_output: Channel::open(fds.remote_output, &ident),
            standard_input: Channel::open(fds.standard_input, &ident),
            standard_output: Channel::open(fds.standard_output, &ident),
            standard_error: Channel::open(fds.standard_error, &ident),
            ident,
            remote_pid,
            connected,
            ibuffer: FrameBuffer::new(),
            obuffer: Vec::new(),
            orequests: UPool::new(),
            iresults: Ring::new(),
            irequests: Ring::new(),
            rrequests: Ring::new(),
            captured_stdout: Vec::new(),
            captured_stderr: Vec::new(),
            dispatcher: None,
        }
    }

    /// Wrap an already connected pipe pair.
    pub fn from_pipe(ident: &str, remote_input: OwnedFd, remote_output: OwnedFd) -> Self {
        Self::from_child(
            ident,
            WireFds {
                remote_input: Some(remote_input),
                remote_output: Some(remote_output),
                ..WireFds::default()
            },
            None,
        )
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn remote_pid(&self) -> Option<i32> {
        self.remote_pid
    }

    fn update_alive(&mut self) {
        if self.remote_input.broke
            || self.remote_output.broke
            || self.standard_input.broke
            || self.standard_output.broke
            || self.standard_error.broke
        {
            if self.connected {
                debug!("{}: connection lost", self.ident);
            }
            self.connected = false;
        }
    }

    fn alloc_request(&self) -> u32 {
        let mut request: u32 = rand::random();
        while request == 0 || self.orequests.contains(u64::from(request)) {
            request = request.wrapping_add(1);
        }
        request
    }

    fn write_remote(&mut self) {
        let Some(file) = self.remote_output.file.as_mut() else {
            return;
        };
        while !self.obuffer.is_empty() {
            match file.write(&self.obuffer) {
                Ok(0) => {
                    self.remote_output.broke = true;
                    break;
                }
                Ok(n) => {
                    self.obuffer.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!("{}: write failed: {}", self.ident, err);
                    self.remote_output.broke = true;
                    break;
                }
            }
        }
    }

    fn send_frame(&mut self, kind: MessageType, request: u32, payload: &str) -> Result<()> {
        if self.remote_output.file.is_none() {
            return Err(GlueError::Disconnected {
                ident: self.ident.clone(),
            });
        }
        let frame = encode_frame(kind, request, payload)?;
        self.obuffer.extend_from_slice(&frame);
        self.write_remote();
        Ok(())
    }

    fn read_remote(&mut self) {
        let mut data = Vec::new();
        if let Some(file) = self.remote_input.file.as_mut() {
            if !read_available(file, &mut data) {
                self.remote_input.broke = true;
            }
        }
        self.ibuffer.extend(&data);
    }

    /// Read available input and sort complete frames into the request and
    /// result queues.
    fn receive(&mut self) {
        self.read_remote();
        loop {
            match self.ibuffer.next_frame() {
                Decoded::Message(msg) => match msg.kind {
                    MessageType::Request => self.irequests.append(msg),
                    _ => {
                        if self.orequests.contains(u64::from(msg.request)) {
                            self.iresults.append(msg);
                        } else {
                            warn!(
                                "{}: ignoring spurious result (request={}): {}",
                                self.ident, msg.request, msg.payload
                            );
                        }
                    }
                },
                Decoded::Skipped { kind, request } => {
                    warn!(
                        "{}: ignoring message with unknown type: {:?} (request={})",
                        self.ident, kind, request
                    );
                }
                Decoded::Incomplete => break,
                Decoded::Invalid(message) => {
                    let err = GlueError::Framing {
                        ident: self.ident.clone(),
                        message,
                    };
                    warn!("{}", err);
                    self.remote_input.broke = true;
                    break;
                }
            }
        }
        self.ibuffer.compact();
        self.update_alive();
    }

    fn capture(&mut self) {
        if let Some(file) = self.standard_output.file.as_mut() {
            if !read_available(file, &mut self.captured_stdout) {
                self.standard_output.broke = true;
            }
        }
        if let Some(file) = self.standard_error.file.as_mut() {
            if !read_available(file, &mut self.captured_stderr) {
                self.standard_error.broke = true;
            }
        }
    }

    /// Send a request and return its freshly allocated non-zero id.
    pub fn send_request(&mut self, payload: &str) -> Result<u32> {
        let request = self.alloc_request();
        self.send_frame(MessageType::Request, request, payload)?;
        self.orequests.add(u64::from(request));
        self.update_alive();
        Ok(request)
    }

    /// Send a request that expects no result. The receiver discards it once
    /// handled; nothing is recorded as outstanding here.
    pub fn post_request(&mut self, payload: &str) -> Result<u32> {
        let request = self.alloc_request();
        self.send_frame(MessageType::Request, request, payload)?;
        self.update_alive();
        Ok(request)
    }

    /// Return the result for `request` if it has arrived.
    pub fn receive_result(&mut self, request: u32) -> Option<String> {
        if !self.orequests.contains(u64::from(request)) {
            warn!("{}: no outstanding request {}", self.ident, request);
            return None;
        }
        self.receive();
        let position = self.iresults.find(|msg| msg.request == request)?;
        let msg = self.iresults.remove_node(position)?;
        self.orequests.remove(u64::from(request));
        Some(msg.payload)
    }

    /// Abandon an outstanding request. A late result is dropped as spurious.
    pub fn forget_request(&mut self, request: u32) -> bool {
        let forgotten = self.orequests.remove(u64::from(request));
        if forgotten {
            self.iresults.retain(|msg| msg.request != request);
        } else {
            warn!("{}: cannot forget unknown request {}", self.ident, request);
        }
        forgotten
    }

    /// Whether `request` is still awaiting its result.
    pub fn is_outstanding(&self, request: u32) -> bool {
        self.orequests.contains(u64::from(request))
    }

    pub fn outstanding_requests(&self) -> Vec<u32> {
        self.orequests
            .list()
            .into_iter()
            .filter_map(|id| u32::try_from(id).ok())
            .collect()
    }

    /// Id and payload of the earliest queued result, if any.
    pub fn peek_first_result(&self) -> Option<(u32, &str)> {
        self.iresults
            .head()
            .map(|msg| (msg.request, msg.payload.as_str()))
    }

    /// Pick up the earliest queued request from the peer.
    pub fn receive_request(&mut self) -> Option<(u32, String)> {
        self.receive();
        while let Some(msg) = self.irequests.pop_head() {
            if msg.request == 0 {
                // id 0 is reserved for low level messages
                warn!("{}: ignoring message with request_id=0", self.ident);
                continue;
            }
            let picked = (msg.request, msg.payload.clone());
            self.rrequests.prepend(msg);
            return Some(picked);
        }
        None
    }

    fn take_received(&mut self, request: u32) -> Option<Message> {
        let position = self.rrequests.find(|msg| msg.request == request)?;
        self.rrequests.remove_node(position)
    }

    /// Answer a request previously returned by [`ComWire::receive_request`].
    pub fn send_result(&mut self, request: u32, payload: &str) -> Result<()> {
        if self.rrequests.find(|msg| msg.request == request).is_none() {
            return Err(GlueError::UnknownRequest {
                ident: self.ident.clone(),
                request,
            });
        }
        self.send_frame(MessageType::Result, request, payload)?;
        self.take_received(request);
        self.update_alive();
        Ok(())
    }

    /// Drop a received request without answering it.
    pub fn discard_request(&mut self, request: u32) -> bool {
        let discarded = self.take_received(request).is_some();
        if !discarded {
            warn!("{}: cannot discard unknown request {}", self.ident, request);
        }
        self.update_alive();
        discarded
    }

    /// Install a dispatcher, or restore the default one with `None`.
    pub fn set_dispatcher(&mut self, dispatcher: Option<Box<dyn WireDispatch>>) {
        self.dispatcher = dispatcher;
    }

    fn default_dispatch(&mut self, request: u32, message: &str) {
        warn!(
            "{}: unhandled request (id={}): {}",
            self.ident, request, message
        );
        self.discard_request(request);
    }

    /// Run the dispatcher on a received, unanswered request.
    pub fn dispatch(&mut self, request: u32) {
        let Some(message) = self
            .rrequests
            .iter()
            .find(|msg| msg.request == request)
            .map(|msg| msg.payload.clone())
        else {
            warn!("{}: cannot dispatch unknown request {}", self.ident, request);
            return;
        };
        let handled = match self.dispatcher.take() {
            Some(mut dispatcher) => {
                let handled = dispatcher.dispatch(self, request, &message);
                if self.dispatcher.is_none() {
                    self.dispatcher = Some(dispatcher);
                }
                handled
            }
            None => false,
        };
        if !handled && self.rrequests.find(|msg| msg.request == request).is_some() {
            self.default_dispatch(request, &message);
        }
    }

    /// Pick up one request and dispatch it. Returns false if none was queued.
    pub fn receive_dispatch(&mut self) -> bool {
        match self.receive_request() {
            Some((request, _)) => {
                self.dispatch(request);
                true
            }
            None => false,
        }
    }

    /// Whether results, requests or captured output are waiting.
    pub fn need_dispatch(&self) -> bool {
        !self.iresults.is_empty()
            || !self.irequests.is_empty()
            || !self.captured_stdout.is_empty()
            || !self.captured_stderr.is_empty()
    }

    pub fn read_fds(&self) -> Vec<RawFd> {
        [
            &self.remote_input,
            &self.standard_output,
            &self.standard_error,
        ]
        .into_iter()
        .filter_map(Channel::raw_fd)
        .collect()
    }

    /// The output fd, while there is unsent data.
    pub fn write_fds(&self) -> Vec<RawFd> {
        if self.obuffer.is_empty() {
            return Vec::new();
        }
        self.remote_output.raw_fd().into_iter().collect()
    }

    pub fn poll_fds(&self) -> Vec<WirePollFd> {
        let input =
            PollFlags::POLLIN | PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLHUP;
        let mut pfds: Vec<WirePollFd> = self
            .read_fds()
            .into_iter()
            .map(|fd| WirePollFd { fd, events: input })
            .collect();
        if let Some(fd) = self.remote_output.raw_fd() {
            let mut events = PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLHUP;
            if !self.obuffer.is_empty() {
                events |= PollFlags::POLLOUT;
            }
            pfds.push(WirePollFd { fd, events });
        }
        pfds
    }

    /// One non-blocking I/O cycle: capture, flush output, fill and parse
    /// input, capture.
    pub fn process_io(&mut self) {
        self.capture();
        self.write_remote();
        self.receive();
        self.capture();

        for channel in [
            &mut self.remote_input,
            &mut self.remote_output,
            &mut self.standard_input,
            &mut self.standard_output,
            &mut self.standard_error,
        ] {
            channel.close_if_broken();
        }
        self.update_alive();
    }

    /// Block until an fd is ready or `timeout` passes.
    pub fn select(&self, timeout: Duration) {
        let mut pfds = Vec::new();
        for channel in [
            &self.remote_input,
            &self.standard_output,
            &self.standard_error,
        ] {
            if let Some(file) = channel.file.as_ref() {
                pfds.push(PollFd::new(file.as_fd(), PollFlags::POLLIN));
            }
        }
        if !self.obuffer.is_empty() {
            if let Some(file) = self.remote_output.file.as_ref() {
                pfds.push(PollFd::new(file.as_fd(), PollFlags::POLLOUT));
            }
        }
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        if let Err(err) = poll(&mut pfds, PollTimeout::from(millis)) {
            debug!("{}: poll interrupted: {}", self.ident, err);
        }
    }

    /// Round trip with the default [`RetryPolicy`].
    pub fn ping_pong(&mut self, ping: &str, timeout: Duration) -> Option<String> {
        self.ping_pong_with(ping, timeout, RetryPolicy::default())
    }

    /// Send `ping` and wait for its answer for at most `timeout`.
    ///
    /// On exhaustion the request is forgotten and `None` returned.
    pub fn ping_pong_with(
        &mut self,
        ping: &str,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Option<String> {
        let request = match self.send_request(ping) {
            Ok(request) => request,
            Err(err) => {
                warn!("{}: ping failed: {}", self.ident, err);
                return None;
            }
        };
        if let Some(pong) = self.receive_result(request) {
            return Some(pong);
        }
        let slice = policy.slice(timeout);
        for _ in 0..policy.attempts {
            self.select(slice);
            self.process_io();
            if let Some(pong) = self.receive_result(request) {
                return Some(pong);
            }
        }
        self.forget_request(request);
        None
    }

    /// Take the child's captured stdout.
    pub fn collect_stdout(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.captured_stdout)).into_owned()
    }

    /// Take the child's captured stderr.
    pub fn collect_stderr(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.captured_stderr)).into_owned()
    }

    /// Close every fd; with `terminate`, also send SIGTERM to the child.
    pub fn close_remote(&mut self, terminate: bool) {
        self.connected = false;
        for channel in [
            &mut self.remote_input,
            &mut self.remote_output,
            &mut self.standard_input,
            &mut self.standard_output,
            &mut self.standard_error,
        ] {
            channel.file = None;
        }
        if let Some(pid) = self.remote_pid.take() {
            if terminate && pid > 1 {
                if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    debug!("{}: failed to terminate child {}: {}", self.ident, pid, err);
                }
            }
        }
    }
}

impl Drop for ComWire {
    fn drop(&mut self) {
        self.dispatcher = None;
        self.close_remote(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    fn wire_pair() -> (ComWire, ComWire) {
        let (client_in, server_out) = pipe().unwrap();
        let (server_in, client_out) = pipe().unwrap();
        (
            ComWire::from_pipe("client", client_in, client_out),
            ComWire::from_pipe("server", server_in, server_out),
        )
    }

    #[test]
    fn test_request_and_result() {
        let (mut client, mut server) = wire_pair();
        let id = client.send_request("ping").unwrap();
        assert_ne!(id, 0);
        assert!(client.is_outstanding(id));

        let (request, payload) = server.receive_request().unwrap();
        assert_eq!(request, id);
        assert_eq!(payload, "ping");
        server.send_result(request, "pong").unwrap();

        assert_eq!(client.receive_result(id).as_deref(), Some("pong"));
        assert!(!client.is_outstanding(id));
    }

    #[test]
    fn test_results_matched_by_id_out_of_order() {
        let (mut client, mut server) = wire_pair();
        let ids: Vec<u32> = (0..5)
            .map(|n| client.send_request(&format!("req-{n}")).unwrap())
            .collect();

        let mut received = Vec::new();
        while let Some(req) = server.receive_request() {
            received.push(req);
        }
        assert_eq!(received.len(), 5);
        for (request, payload) in received.iter().rev() {
            server.send_result(*request, &format!("re:{payload}")).unwrap();
        }

        for (n, id) in ids.iter().enumerate() {
            assert_eq!(client.receive_result(*id), Some(format!("re:req-{n}")));
        }
        assert!(client.outstanding_requests().is_empty());
    }

    #[test]
    fn test_forgotten_request_drops_late_result() {
        let (mut client, mut server) = wire_pair();
        let id = client.send_request("slow").unwrap();
        assert!(client.forget_request(id));
        assert!(!client.is_outstanding(id));

        let (request, _) = server.receive_request().unwrap();
        server.send_result(request, "late").unwrap();

        client.process_io();
        // parsing the input drops the late result as spurious
        assert_eq!(client.receive_request(), None);
        assert_eq!(client.receive_result(id), None);
        assert_eq!(client.peek_first_result(), None);
        assert!(!client.is_outstanding(id));
        assert!(client.connected());
    }

    #[test]
    fn test_posted_request_is_not_outstanding() {
        let (mut client, mut server) = wire_pair();
        let id = client.post_request("notice").unwrap();
        assert!(!client.is_outstanding(id));

        let (request, payload) = server.receive_request().unwrap();
        assert_eq!((request, payload.as_str()), (id, "notice"));
        assert!(server.discard_request(request));
    }

    #[test]
    fn test_send_result_requires_received_request() {
        let (_client, mut server) = wire_pair();
        assert!(matches!(
            server.send_result(42, "nope"),
            Err(GlueError::UnknownRequest { request: 42, .. })
        ));
    }

    #[test]
    fn test_discard_request() {
        let (mut client, mut server) = wire_pair();
        client.send_request("drop me").unwrap();
        let (request, _) = server.receive_request().unwrap();
        assert!(server.discard_request(request));
        assert!(!server.discard_request(request));
    }

    #[test]
    fn test_peer_close_marks_disconnected() {
        let (mut client, server) = wire_pair();
        drop(server);
        client.process_io();
        assert!(!client.connected());
        assert!(client.read_fds().is_empty());
    }

    #[test]
    fn test_garbage_input_breaks_connection() {
        let (client_in, garbage) = pipe().unwrap();
        let (_unused_in, client_out) = pipe().unwrap();
        let mut client = ComWire::from_pipe("client", client_in, client_out);
        let mut garbage = File::from(garbage);
        garbage.write_all(b"this is not a frame header").unwrap();

        assert_eq!(client.receive_request(), None);
        assert!(!client.connected());
    }

    struct Echo;

    impl WireDispatch for Echo {
        fn dispatch(&mut self, wire: &mut ComWire, request: u32, message: &str) -> bool {
            wire.send_result(request, message).is_ok()
        }
    }

    #[test]
    fn test_dispatcher_answers_requests() {
        let (mut client, mut server) = wire_pair();
        server.set_dispatcher(Some(Box::new(Echo)));
        let id = client.send_request("hello").unwrap();
        assert!(server.receive_dispatch());
        assert_eq!(client.receive_result(id).as_deref(), Some("hello"));
    }

    #[test]
    fn test_default_dispatcher_discards() {
        let (mut client, mut server) = wire_pair();
        let id = client.send_request("nobody home").unwrap();
        assert!(server.receive_dispatch());
        assert!(!server.discard_request(id));
        assert!(!server.need_dispatch());
    }

    #[test]
    fn test_ping_pong_times_out_and_forgets() {
        let (mut client, _server) = wire_pair();
        let pong = client.ping_pong_with(
            "anyone?",
            Duration::from_millis(40),
            RetryPolicy::with_attempts(2),
        );
        assert_eq!(pong, None);
        assert!(client.outstanding_requests().is_empty());
    }

    #[test]
    fn test_wire_without_fds_starts_disconnected() {
        let wire = ComWire::from_child("nothing", WireFds::default(), None);
        assert!(!wire.connected());

        let (stdout, _writer) = pipe().unwrap();
        let fds = WireFds {
            standard_output: Some(stdout),
            ..WireFds::default()
        };
        assert!(ComWire::from_child("stdout-only", fds, None).connected());
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let (mut client, server) = wire_pair();
        drop(server);
        client.send_request("first").ok();
        client.process_io();
        assert!(!client.connected());
        assert!(matches!(
            client.send_request("second"),
            Err(GlueError::Disconnected { .. })
        ));
        assert!(matches!(
            client.post_request("third"),
            Err(GlueError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_child_output_is_captured() {
        use crate::wire::{spawn_async, SpawnOptions};

        let options = SpawnOptions::new("/bin/sh")
            .arg("-c")
            .arg("echo to-stdout; echo to-stderr >&2");
        let (mut wire, mut child) = spawn_async(&options).unwrap().into_wire("sh");
        assert!(wire.connected());
        child.wait().unwrap();

        let mut stdout = String::new();
        let mut stderr = String::new();
        for _ in 0..100 {
            wire.process_io();
            stdout.push_str(&wire.collect_stdout());
            stderr.push_str(&wire.collect_stderr());
            if !wire.connected() {
                break;
            }
            wire.select(Duration::from_millis(10));
        }
        assert_eq!(stdout, "to-stdout\n");
        assert_eq!(stderr, "to-stderr\n");
        assert!(!wire.connected());
        assert!(wire.collect_stdout().is_empty());
    }

    #[test]
    fn test_poll_fds_include_output_direction() {
        let (client, _server) = wire_pair();
        let pfds = client.poll_fds();
        assert_eq!(pfds.len(), 2);
        assert!(pfds[0].events.contains(PollFlags::POLLIN));
        assert!(!pfds[1].events.contains(PollFlags::POLLOUT));
        assert!(client.write_fds().is_empty());
    }
}
