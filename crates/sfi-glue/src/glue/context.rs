//! Per-connection glue context.
//!
//! A [`GlueContext`] owns a backend, the proxy table, the deferred-free table
//! and the queue of events fetched from the backend but not yet dispatched.
//! Every operation takes the context explicitly. Code that needs an ambient
//! context can [`push`] a shared one onto the thread's context stack and look
//! it up with [`current`].

use super::backend::{GlueBackend, IfaceInfo, ProcInfo};
use super::event::GlueEvent;
use super::gc::{GcFreeFn, GcKey, GcTable};
use super::proxy::{ProxyHandle, ProxyTable, SignalSpec, WeakNotify};
use super::vcall::free_value;
use crate::config::GlueConfig;
use crate::primitives::{Category, ParamSpec, Proxy, Ring, Seq, Value};
use crate::wire::WirePollFd;
use crate::{GlueError, Result};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::{debug, warn};

/// A context shared with the thread-local context stack.
pub type SharedContext = Rc<RefCell<GlueContext>>;

pub struct GlueContext {
    backend: Box<dyn GlueBackend>,
    proxies: ProxyTable,
    gc: GcTable,
    pending_events: Ring<GlueEvent>,
    seq_hook_id: u64,
    destroyed: bool,
}

impl fmt::Debug for GlueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlueContext")
            .field("proxies", &self.proxies)
            .field("gc", &self.gc)
            .field("pending_events", &self.pending_events.len())
            .field("seq_hook_id", &self.seq_hook_id)
            .finish()
    }
}

/// A weak reference registered on a proxy that could not be watched. It
/// fires on the next GC sweep.
struct BrokenWeakRef {
    proxy: Proxy,
    notify: RefCell<Option<WeakNotify>>,
}

fn fire_broken_weak_ref(wref: Rc<BrokenWeakRef>) {
    let notify = wref.notify.borrow_mut().take();
    if let Some(notify) = notify {
        notify(wref.proxy);
    }
}

fn invalid_proxy(proxy: Proxy) {
    warn!("invalid proxy id specified: {}", proxy);
}

impl GlueContext {
    pub fn new(backend: impl GlueBackend + 'static) -> Self {
        Self::from_backend(Box::new(backend))
    }

    pub fn from_backend(backend: Box<dyn GlueBackend>) -> Self {
        Self {
            backend,
            proxies: ProxyTable::new(),
            gc: GcTable::new(),
            pending_events: Ring::new(),
            seq_hook_id: GlueConfig::FIRST_HOOK_ID,
            destroyed: false,
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Rc::new(RefCell::new(self))
    }

    pub fn backend_mut(&mut self) -> &mut dyn GlueBackend {
        self.backend.as_mut()
    }

    pub fn proxies(&self) -> &ProxyTable {
        &self.proxies
    }

    // --- Introspection ---

    pub fn describe_iface(&mut self, iface: &str) -> Option<IfaceInfo> {
        self.backend.describe_iface(iface)
    }

    pub fn describe_proc(&mut self, proc_name: &str) -> Option<ProcInfo> {
        self.backend.describe_proc(proc_name)
    }

    pub fn list_proc_names(&mut self) -> Vec<String> {
        self.backend.list_proc_names()
    }

    pub fn list_method_names(&mut self, iface: &str) -> Vec<String> {
        self.backend.list_method_names(iface)
    }

    pub fn base_iface(&mut self) -> Option<String> {
        self.backend.base_iface()
    }

    pub fn iface_children(&mut self, iface: &str) -> Vec<String> {
        self.backend.iface_children(iface)
    }

    /// Run a procedure. The returned value is owned by the caller; see
    /// [`super::call_seq`] for the GC-tracked variant.
    pub fn exec_proc(&mut self, proc_name: &str, params: &Seq) -> Option<Value> {
        self.backend.exec_proc(proc_name, params)
    }

    // --- Proxy queries and properties ---

    pub fn proxy_iface(&mut self, proxy: Proxy) -> Option<String> {
        self.backend.proxy_iface(proxy)
    }

    pub fn proxy_is_a(&mut self, proxy: Proxy, iface: &str) -> bool {
        self.backend.proxy_is_a(proxy, iface)
    }

    pub fn proxy_list_properties(
        &mut self,
        proxy: Proxy,
        first_ancestor: &str,
        last_ancestor: &str,
    ) -> Vec<String> {
        self.backend
            .proxy_list_properties(proxy, first_ancestor, last_ancestor)
    }

    pub fn proxy_get_pspec(&mut self, proxy: Proxy, name: &str) -> Option<ParamSpec> {
        self.backend.proxy_get_pspec(proxy, name)
    }

    pub fn proxy_get_pspec_scategory(&mut self, proxy: Proxy, name: &str) -> Category {
        self.backend.proxy_get_pspec_scategory(proxy, name)
    }

    pub fn proxy_set_property(&mut self, proxy: Proxy, name: &str, value: &Value) {
        if proxy == 0 {
            invalid_proxy(proxy);
            return;
        }
        self.backend.proxy_set_property(proxy, name, value);
    }

    pub fn proxy_get_property(&mut self, proxy: Proxy, name: &str) -> Option<Value> {
        if proxy == 0 {
            invalid_proxy(proxy);
            return None;
        }
        self.backend.proxy_get_property(proxy, name)
    }

    /// Set several properties in order. Each value must match the category
    /// of its property; the first unknown property or mismatch stops the
    /// loop, leaving earlier assignments in place. Returns how many were set.
    pub fn proxy_set_many(&mut self, proxy: Proxy, props: &[(&str, Value)]) -> Result<usize> {
        if proxy == 0 {
            return Err(GlueError::InvalidProxy(proxy));
        }
        for (done, (name, value)) in props.iter().enumerate() {
            let category = self.backend.proxy_get_pspec_scategory(proxy, name);
            if category == Category::None {
                return Err(GlueError::Validation {
                    field: name.to_string(),
                    message: format!("unknown property (set {done} of {})", props.len()),
                });
            }
            if value.category() != category {
                return Err(GlueError::Validation {
                    field: name.to_string(),
                    message: format!("expected {:?}, got {:?}", category, value.category()),
                });
            }
            self.backend.proxy_set_property(proxy, name, value);
        }
        Ok(props.len())
    }

    /// Read several properties. The values stay registered with the GC
    /// until the next sweep, like the returns of [`super::call_seq`].
    pub fn proxy_get_many(&mut self, proxy: Proxy, names: &[&str]) -> Result<Vec<Rc<Value>>> {
        if proxy == 0 {
            return Err(GlueError::InvalidProxy(proxy));
        }
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let Some(value) = self.backend.proxy_get_property(proxy, name) else {
                return Err(GlueError::Validation {
                    field: name.to_string(),
                    message: "unknown property".to_string(),
                });
            };
            let value = Rc::new(value);
            self.gc.add(Rc::clone(&value), free_value);
            values.push(value);
        }
        Ok(values)
    }

    pub fn client_msg(&mut self, msg: &str, value: &Value) -> Option<Value> {
        self.backend.client_msg(msg, value)
    }

    pub fn list_poll_fds(&mut self) -> Vec<WirePollFd> {
        self.backend.list_poll_fds()
    }

    // --- Notification ---

    /// Enable or disable notification of `signal` on `proxy`.
    ///
    /// Disabling also fetches every available event and turns queued
    /// notifications of that signal into cancellations, so no handler runs
    /// for them while their notify ids are still acknowledged.
    pub fn proxy_request_notify(&mut self, proxy: Proxy, signal: &str, enable: bool) -> bool {
        let connected = self.backend.proxy_request_notify(proxy, signal, enable);
        if !enable {
            self.fetch_all_events();
            for event in self.pending_events.iter_mut() {
                if event.is_notify_for(proxy, signal) {
                    event.cancel();
                }
            }
        }
        connected
    }

    pub fn proxy_watch_release(&mut self, proxy: Proxy) -> bool {
        proxy != 0 && self.backend.proxy_watch_release(proxy)
    }

    pub fn proxy_processed_notify(&mut self, notify_id: u32) {
        if notify_id == 0 {
            warn!("ignoring acknowledgement of notify id 0");
            return;
        }
        self.backend.proxy_processed_notify(notify_id);
    }

    // --- Proxy registry ---

    /// Ensure `proxy` has a table entry, asking the backend to watch it the
    /// first time.
    fn fetch_proxy(&mut self, proxy: Proxy) -> bool {
        if proxy == 0 {
            return false;
        }
        if self.proxies.contains(proxy) {
            return true;
        }
        if !self.backend.proxy_watch_release(proxy) {
            return false;
        }
        self.proxies.insert(proxy);
        true
    }

    /// Handle for `proxy` in its current generation.
    pub fn proxy_handle(&mut self, proxy: Proxy) -> Option<ProxyHandle> {
        if !self.fetch_proxy(proxy) {
            invalid_proxy(proxy);
            return None;
        }
        Some(self.proxies.handle(proxy))
    }

    pub fn is_alive(&self, handle: ProxyHandle) -> bool {
        self.proxies.is_alive(handle)
    }

    /// Connect `handler` to `signal` on `proxy`. Returns the hook id, or 0 if
    /// the proxy or signal is unknown.
    pub fn signal_connect<F>(&mut self, proxy: Proxy, signal: &str, handler: F) -> u64
    where
        F: FnMut(&Seq) + 'static,
    {
        if !self.fetch_proxy(proxy) {
            invalid_proxy(proxy);
            return 0;
        }
        if !self.proxies.signal_pending(proxy, signal)
            && !self.proxy_request_notify(proxy, signal, true)
        {
            warn!("no such signal \"{}\" on proxy ({}) to connect to", signal, proxy);
            return 0;
        }
        let hook_id = self.seq_hook_id;
        self.seq_hook_id += 1;
        self.proxies
            .add_hook(proxy, signal, hook_id, Box::new(handler));
        hook_id
    }

    /// Disconnect a handler. The last handler of a signal also disables its
    /// notification.
    pub fn signal_disconnect(&mut self, proxy: Proxy, hook_id: u64) -> bool {
        if !self.proxies.contains(proxy) {
            invalid_proxy(proxy);
            return false;
        }
        match self.proxies.remove_hook(proxy, hook_id) {
            Some((signal, true)) => {
                self.proxy_request_notify(proxy, &signal, false);
                true
            }
            Some((_, false)) => true,
            None => {
                debug!("proxy ({}) has no signal handler with id {}", proxy, hook_id);
                false
            }
        }
    }

    pub fn signal_pending(&self, proxy: Proxy, signal: &str) -> bool {
        self.proxies.signal_pending(proxy, signal)
    }

    /// Connect through a [`SignalSpec`] string. `swapped_signal::` handlers
    /// get the emitting proxy last instead of first.
    pub fn proxy_connect<F>(&mut self, proxy: Proxy, spec: &str, handler: F) -> u64
    where
        F: FnMut(&Seq) + 'static,
    {
        match SignalSpec::parse(spec) {
            Some(SignalSpec::Signal(signal)) => self.signal_connect(proxy, signal, handler),
            Some(SignalSpec::SwappedSignal(signal)) => {
                let mut handler = handler;
                self.signal_connect(proxy, signal, move |args: &Seq| {
                    let swapped: Seq = args
                        .iter()
                        .skip(1)
                        .chain(args.iter().take(1))
                        .cloned()
                        .collect();
                    handler(&swapped);
                })
            }
            _ => {
                warn!("invalid signal spec \"{}\"", spec);
                0
            }
        }
    }

    /// Disconnect through an `any_signal` spec string. Returns the number of
    /// handlers removed.
    pub fn proxy_disconnect(&mut self, proxy: Proxy, spec: &str) -> usize {
        let Some(SignalSpec::AnySignal(signal)) = SignalSpec::parse(spec) else {
            warn!("invalid signal spec \"{}\"", spec);
            return 0;
        };
        let removed = self
            .proxies
            .hook_ids(proxy, signal)
            .into_iter()
            .filter(|hook_id| self.signal_disconnect(proxy, *hook_id))
            .count();
        if removed == 0 {
            debug!("proxy ({}) has no handlers for \"{}\"", proxy, spec);
        }
        removed
    }

    /// Observe the release of `proxy`. Returns the weak reference id, or 0 if
    /// the proxy cannot be watched, in which case `notify` runs on the next
    /// GC sweep.
    pub fn weak_ref<F>(&mut self, proxy: Proxy, notify: F) -> u64
    where
        F: FnOnce(Proxy) + 'static,
    {
        if !self.fetch_proxy(proxy) {
            invalid_proxy(proxy);
            let wref = Rc::new(BrokenWeakRef {
                proxy,
                notify: RefCell::new(Some(Box::new(notify))),
            });
            self.gc.add(wref, fire_broken_weak_ref);
            return 0;
        }
        self.proxies
            .weak_ref(proxy, Box::new(notify))
            .unwrap_or_default()
    }

    pub fn weak_unref(&mut self, proxy: Proxy, weak_id: u64) -> bool {
        if !self.proxies.contains(proxy) {
            invalid_proxy(proxy);
            return false;
        }
        let removed = self.proxies.weak_unref(proxy, weak_id);
        if !removed {
            debug!("proxy ({}) has no weak ref {}", proxy, weak_id);
        }
        removed
    }

    pub fn set_qdata<T: Any>(&mut self, proxy: Proxy, key: &str, data: T) -> bool {
        if !self.fetch_proxy(proxy) {
            invalid_proxy(proxy);
            return false;
        }
        self.proxies.set_qdata(proxy, key, Box::new(data))
    }

    pub fn get_qdata<T: Any>(&self, proxy: Proxy, key: &str) -> Option<&T> {
        self.proxies.get_qdata(proxy, key)
    }

    /// Remove qdata without dropping it. Data of another type stays in place.
    pub fn steal_qdata<T: Any>(&mut self, proxy: Proxy, key: &str) -> Option<T> {
        self.proxies.get_qdata::<T>(proxy, key)?;
        let data = self.proxies.steal_qdata(proxy, key)?;
        data.downcast::<T>().ok().map(|data| *data)
    }

    /// Drop the entry of a released proxy. Notifications are withdrawn
    /// before any weak reference runs.
    fn release_proxy(&mut self, proxy: Proxy) {
        let Some(released) = self.proxies.release(proxy) else {
            invalid_proxy(proxy);
            return;
        };
        for signal in &released.signals {
            self.proxy_request_notify(proxy, signal, false);
        }
        released.notify_weak_refs();
    }

    // --- Events ---

    /// Append everything the backend has to the pending queue.
    pub fn fetch_all_events(&mut self) {
        let events = self.backend.fetch_events();
        self.pending_events.extend(events);
    }

    /// Next event, fetching from the backend first.
    pub fn fetch_event(&mut self) -> Option<GlueEvent> {
        self.fetch_all_events();
        self.pending_events.pop_head()
    }

    /// Whether events are waiting to be dispatched.
    pub fn pending(&mut self) -> bool {
        if self.pending_events.is_empty() {
            self.fetch_all_events();
        }
        !self.pending_events.is_empty()
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &GlueEvent> {
        self.pending_events.iter()
    }

    /// Dispatch one event. Returns false when there was none.
    pub fn dispatch(&mut self) -> bool {
        match self.fetch_event() {
            Some(event) => {
                self.dispatch_event(event);
                true
            }
            None => false,
        }
    }

    pub fn dispatch_event(&mut self, event: GlueEvent) {
        match event {
            GlueEvent::Release { proxy } => {
                if proxy == 0 {
                    warn!("release event without proxy");
                } else {
                    self.release_proxy(proxy);
                }
            }
            GlueEvent::Notify {
                signal,
                notify_id,
                args,
            } => {
                let proxy = args.get_proxy(0);
                if notify_id != 0 && proxy != 0 && !signal.is_empty() {
                    self.proxies.emit(proxy, &signal, &args);
                } else if notify_id == 0 {
                    warn!("signal event without notify id");
                } else if proxy == 0 {
                    warn!("signal event without proxy");
                } else {
                    warn!("signal event without name");
                }
                if notify_id != 0 {
                    self.proxy_processed_notify(notify_id);
                }
            }
            GlueEvent::NotifyCancel { notify_id, .. } => {
                if notify_id != 0 {
                    self.proxy_processed_notify(notify_id);
                }
            }
        }
    }

    // --- GC ---

    /// Register `free(data)` for the next sweep. Panics on duplicates.
    pub fn gc_add<T: 'static>(&mut self, data: Rc<T>, free: GcFreeFn<T>) -> GcKey {
        self.gc.add(data, free)
    }

    pub fn gc_run(&mut self) -> usize {
        self.gc.run()
    }

    /// Release one entry now. Panics if it is not registered.
    pub fn gc_free_now(&mut self, key: GcKey) {
        self.gc.free_now(key);
    }

    /// Forget one entry without releasing it. Panics if it is not registered.
    pub fn gc_remove(&mut self, key: GcKey) {
        self.gc.remove(key);
    }

    pub fn gc_test(&self, key: GcKey) -> bool {
        self.gc.test(key)
    }

    /// Tear the context down: sweep, drop every proxy without telling the
    /// remote side, sweep again, discard pending events and destroy the
    /// backend. Runs at most once; dropping the context calls it too.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.gc.run();
        let cleared = self.proxies.clear();
        if !cleared.is_empty() {
            debug!("destroying context with {} proxies", cleared.len());
        }
        self.gc.run();
        self.pending_events.clear();
        self.backend.destroy();
    }
}

impl Drop for GlueContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

// --- Context stack ---

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<SharedContext>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a context on the thread's stack; popping happens on drop.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<Rc<()>>,
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("depth", &self.depth)
            .finish()
    }
}

/// Make `context` current until the returned guard is dropped. Pushes nest.
pub fn push(context: SharedContext) -> ContextGuard {
    let depth = CONTEXT_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(context);
        stack.len()
    });
    ContextGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// The most recently pushed context of this thread.
pub fn current() -> Option<SharedContext> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Run `f` on the current context. `None` if no context is pushed.
///
/// # Panics
///
/// If the current context is already borrowed, e.g. from inside one of its
/// own signal handlers.
pub fn with_current<R>(f: impl FnOnce(&mut GlueContext) -> R) -> Option<R> {
    let context = current()?;
    let mut context = context.borrow_mut();
    Some(f(&mut context))
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() != self.depth {
                warn!(
                    "context guards dropped out of order (depth {} != {})",
                    stack.len(),
                    self.depth
                );
                stack.truncate(self.depth);
            }
            stack.pop()
        });
        // the last reference may be the stack's; destroy outside the borrow
        drop(popped);
    }
}
