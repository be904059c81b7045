//! Client-side bookkeeping for remote object handles.
//!
//! A proxy gets an entry the first time the client attaches something to it:
//! a signal handler, a weak reference or qdata. The entry lives until the
//! owner reports the object released, at which point the generation of the id
//! is bumped, signal handlers are dropped and weak references fire once.
//!
//! The table does not talk to the backend. [`super::GlueContext`] asks the
//! backend to watch the object and to enable notifications, then records the
//! outcome here.

use super::event::canonical_signal;
use crate::primitives::{Proxy, Seq, UStore};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Callback for a connected signal. Receives the notification arguments,
/// whose first element is the emitting proxy.
pub type SignalHandler = Box<dyn FnMut(&Seq)>;

/// Callback run once when an observed proxy goes away.
pub type WeakNotify = Box<dyn FnOnce(Proxy)>;

/// A proxy id paired with the generation it was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyHandle {
    pub id: Proxy,
    pub generation: u32,
}

struct Hook {
    id: u64,
    handler: SignalHandler,
}

/// A connect or disconnect request written as a prefixed signal name.
///
/// | Spec | Meaning |
/// |---|---|
/// | `signal::NAME` | connect a handler receiving `[proxy, args...]` |
/// | `swapped_signal::NAME` | connect a handler receiving `[args..., proxy]` |
/// | `any_signal::NAME` | disconnect every handler of `NAME` |
/// | `any_signal` | disconnect every handler of the proxy |
///
/// Dashes and underscores are interchangeable in the prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSpec<'a> {
    Signal(&'a str),
    SwappedSignal(&'a str),
    AnySignal(Option<&'a str>),
}

/// Strip `prefix`, accepting dashes for its underscores. The remaining
/// name must not be empty.
fn strip_spec_prefix<'a>(spec: &'a str, prefix: &str) -> Option<&'a str> {
    spec.strip_prefix(prefix)
        .or_else(|| spec.strip_prefix(prefix.replace('_', "-").as_str()))
        .filter(|name| !name.is_empty())
}

impl<'a> SignalSpec<'a> {
    pub fn parse(spec: &'a str) -> Option<Self> {
        if let Some(name) = strip_spec_prefix(spec, "signal::") {
            Some(SignalSpec::Signal(name))
        } else if let Some(name) = strip_spec_prefix(spec, "swapped_signal::") {
            Some(SignalSpec::SwappedSignal(name))
        } else if let Some(name) = strip_spec_prefix(spec, "any_signal::") {
            Some(SignalSpec::AnySignal(Some(name)))
        } else if spec == "any_signal" || spec == "any-signal" {
            Some(SignalSpec::AnySignal(None))
        } else {
            None
        }
    }
}

#[derive(Default)]
struct ProxyEntry {
    signals: BTreeMap<String, Vec<Hook>>,
    weak_refs: Vec<(u64, WeakNotify)>,
    qdata: HashMap<String, Box<dyn Any>>,
}

impl ProxyEntry {
    fn into_released(mut self, proxy: Proxy) -> ReleasedProxy {
        ReleasedProxy {
            proxy,
            signals: std::mem::take(&mut self.signals).into_keys().collect(),
            weak_refs: std::mem::take(&mut self.weak_refs),
        }
    }
}

/// What is left of a proxy entry after its removal: the signals that had
/// handlers and the weak references still to be fired.
pub struct ReleasedProxy {
    pub proxy: Proxy,
    pub signals: Vec<String>,
    weak_refs: Vec<(u64, WeakNotify)>,
}

impl fmt::Debug for ReleasedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasedProxy")
            .field("proxy", &self.proxy)
            .field("signals", &self.signals)
            .field("weak_refs", &self.weak_refs.len())
            .finish()
    }
}

impl ReleasedProxy {
    /// Fire weak references in registration order.
    pub fn notify_weak_refs(self) -> usize {
        let fired = self.weak_refs.len();
        for (_, notify) in self.weak_refs {
            notify(self.proxy);
        }
        fired
    }
}

#[derive(Default)]
pub struct ProxyTable {
    entries: UStore<ProxyEntry>,
    generations: HashMap<Proxy, u32>,
    next_weak_id: u64,
}

impl fmt::Debug for ProxyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTable")
            .field("proxies", &self.entries.ids())
            .field("generations", &self.generations)
            .finish()
    }
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, proxy: Proxy) -> bool {
        self.entries.contains(proxy)
    }

    /// Create an empty entry. Returns false if one already exists.
    pub fn insert(&mut self, proxy: Proxy) -> bool {
        if self.entries.contains(proxy) {
            return false;
        }
        self.entries.insert(proxy, ProxyEntry::default());
        true
    }

    pub fn generation(&self, proxy: Proxy) -> u32 {
        self.generations.get(&proxy).copied().unwrap_or(0)
    }

    pub fn handle(&self, proxy: Proxy) -> ProxyHandle {
        ProxyHandle {
            id: proxy,
            generation: self.generation(proxy),
        }
    }

    /// Whether `handle` still names a live entry of the same generation.
    pub fn is_alive(&self, handle: ProxyHandle) -> bool {
        self.entries.contains(handle.id) && self.generation(handle.id) == handle.generation
    }

    /// Whether any handler is connected to `signal` on `proxy`.
    pub fn signal_pending(&self, proxy: Proxy, signal: &str) -> bool {
        let signal = canonical_signal(signal);
        self.entries
            .lookup(proxy)
            .and_then(|entry| entry.signals.get(&signal))
            .map(|hooks| !hooks.is_empty())
            .unwrap_or(false)
    }

    /// Append a handler. The caller has already made sure the entry exists
    /// and, for the first hook of a signal, that notification is enabled.
    pub fn add_hook(
        &mut self,
        proxy: Proxy,
        signal: &str,
        hook_id: u64,
        handler: SignalHandler,
    ) -> bool {
        let Some(entry) = self.entries.lookup_mut(proxy) else {
            return false;
        };
        entry
            .signals
            .entry(canonical_signal(signal))
            .or_default()
            .push(Hook {
                id: hook_id,
                handler,
            });
        true
    }

    /// Remove a handler by id. Returns the signal it was connected to and
    /// whether that was the signal's last handler.
    pub fn remove_hook(&mut self, proxy: Proxy, hook_id: u64) -> Option<(String, bool)> {
        let entry = self.entries.lookup_mut(proxy)?;
        let (signal, hooks) = entry
            .signals
            .iter_mut()
            .find(|(_, hooks)| hooks.iter().any(|hook| hook.id == hook_id))?;
        hooks.retain(|hook| hook.id != hook_id);
        let signal = signal.clone();
        let emptied = hooks.is_empty();
        if emptied {
            entry.signals.remove(&signal);
        }
        Some((signal, emptied))
    }

    /// Ids of the handlers connected to `signal`, or to any signal for
    /// `None`, in connection order per signal.
    pub fn hook_ids(&self, proxy: Proxy, signal: Option<&str>) -> Vec<u64> {
        let Some(entry) = self.entries.lookup(proxy) else {
            return Vec::new();
        };
        let hooks = |hooks: &Vec<Hook>| hooks.iter().map(|hook| hook.id).collect::<Vec<_>>();
        match signal {
            Some(signal) => entry
                .signals
                .get(&canonical_signal(signal))
                .map(hooks)
                .unwrap_or_default(),
            None => entry.signals.values().flat_map(hooks).collect(),
        }
    }

    /// Names of the signals with connected handlers on `proxy`.
    pub fn signals(&self, proxy: Proxy) -> Vec<String> {
        self.entries
            .lookup(proxy)
            .map(|entry| entry.signals.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run every handler connected to `signal` on `proxy`, in connection
    /// order. Returns the number of handlers run.
    pub fn emit(&mut self, proxy: Proxy, signal: &str, args: &Seq) -> usize {
        let signal = canonical_signal(signal);
        let Some(hooks) = self
            .entries
            .lookup_mut(proxy)
            .and_then(|entry| entry.signals.get_mut(&signal))
        else {
            return 0;
        };
        for hook in hooks.iter_mut() {
            (hook.handler)(args);
        }
        hooks.len()
    }

    /// Register a release observer. `None` if `proxy` has no entry.
    pub fn weak_ref(&mut self, proxy: Proxy, notify: WeakNotify) -> Option<u64> {
        let entry = self.entries.lookup_mut(proxy)?;
        self.next_weak_id += 1;
        entry.weak_refs.push((self.next_weak_id, notify));
        Some(self.next_weak_id)
    }

    pub fn weak_unref(&mut self, proxy: Proxy, weak_id: u64) -> bool {
        let Some(entry) = self.entries.lookup_mut(proxy) else {
            return false;
        };
        let before = entry.weak_refs.len();
        entry.weak_refs.retain(|(id, _)| *id != weak_id);
        entry.weak_refs.len() != before
    }

    pub fn set_qdata(&mut self, proxy: Proxy, key: &str, data: Box<dyn Any>) -> bool {
        match self.entries.lookup_mut(proxy) {
            Some(entry) => {
                entry.qdata.insert(key.to_string(), data);
                true
            }
            None => false,
        }
    }

    pub fn get_qdata<T: 'static>(&self, proxy: Proxy, key: &str) -> Option<&T> {
        self.entries
            .lookup(proxy)?
            .qdata
            .get(key)?
            .downcast_ref::<T>()
    }

    pub fn steal_qdata(&mut self, proxy: Proxy, key: &str) -> Option<Box<dyn Any>> {
        self.entries.lookup_mut(proxy)?.qdata.remove(key)
    }

    /// Handle a RELEASE: unlink the entry, bump the generation and drop the
    /// handlers. The weak references are handed back unfired, so the caller
    /// can first withdraw notifications for the returned signals. `None` for
    /// proxies without an entry.
    pub fn release(&mut self, proxy: Proxy) -> Option<ReleasedProxy> {
        let entry = self.entries.remove(proxy)?;
        *self.generations.entry(proxy).or_insert(0) += 1;
        Some(entry.into_released(proxy))
    }

    /// Unlink every entry without bumping generations. Weak references still
    /// fire. Returns each removed proxy with the signals that were connected.
    pub fn clear(&mut self) -> Vec<(Proxy, Vec<String>)> {
        self.entries
            .take_all()
            .into_iter()
            .map(|(proxy, entry)| {
                let released = entry.into_released(proxy);
                let signals = released.signals.clone();
                released.notify_weak_refs();
                (proxy, signals)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_release_bumps_generation_and_fires_weak_refs_once() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut table = ProxyTable::new();
        assert!(table.insert(5));
        let handle = table.handle(5);
        assert!(table.is_alive(handle));

        for tag in ["a", "b"] {
            let fired = Rc::clone(&fired);
            table.weak_ref(5, Box::new(move |proxy| fired.borrow_mut().push((tag, proxy))));
        }
        let released = table.release(5).unwrap();
        assert!(released.signals.is_empty());
        assert!(table.release(5).is_none());
        assert!(fired.borrow().is_empty());
        assert_eq!(released.notify_weak_refs(), 2);

        assert_eq!(*fired.borrow(), vec![("a", 5), ("b", 5)]);
        assert!(!table.is_alive(handle));
        assert_eq!(table.generation(5), 1);

        table.insert(5);
        assert!(!table.is_alive(handle));
        assert!(table.is_alive(table.handle(5)));
    }

    #[test]
    fn test_weak_unref() {
        let fired = Rc::new(RefCell::new(0));
        let mut table = ProxyTable::new();
        table.insert(1);
        let counter = Rc::clone(&fired);
        let id = table
            .weak_ref(1, Box::new(move |_| *counter.borrow_mut() += 1))
            .unwrap();
        assert!(table.weak_unref(1, id));
        assert!(!table.weak_unref(1, id));
        assert_eq!(table.release(1).map(ReleasedProxy::notify_weak_refs), Some(0));
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_hooks_run_in_order_and_report_last_removal() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut table = ProxyTable::new();
        table.insert(3);
        for id in [1, 2] {
            let seen = Rc::clone(&seen);
            table.add_hook(
                3,
                "value_changed",
                id,
                Box::new(move |args| seen.borrow_mut().push((id, args.get_proxy(0)))),
            );
        }
        assert!(table.signal_pending(3, "value-changed"));

        let args = Seq::from_iter([Value::Proxy(3)]);
        assert_eq!(table.emit(3, "value_changed", &args), 2);
        assert_eq!(*seen.borrow(), vec![(1, 3), (2, 3)]);

        assert_eq!(table.remove_hook(3, 1), Some(("value-changed".to_string(), false)));
        assert_eq!(table.remove_hook(3, 2), Some(("value-changed".to_string(), true)));
        assert_eq!(table.remove_hook(3, 2), None);
        assert!(!table.signal_pending(3, "value-changed"));
    }

    #[test]
    fn test_signal_spec_parsing() {
        assert_eq!(SignalSpec::parse("signal::changed"), Some(SignalSpec::Signal("changed")));
        assert_eq!(
            SignalSpec::parse("swapped-signal::value_changed"),
            Some(SignalSpec::SwappedSignal("value_changed"))
        );
        assert_eq!(
            SignalSpec::parse("any_signal::changed"),
            Some(SignalSpec::AnySignal(Some("changed")))
        );
        assert_eq!(SignalSpec::parse("any-signal"), Some(SignalSpec::AnySignal(None)));
        assert_eq!(SignalSpec::parse("changed"), None);
        assert_eq!(SignalSpec::parse("signal::"), None);
        assert_eq!(SignalSpec::parse("object_signal::changed"), None);
    }

    #[test]
    fn test_hook_ids_by_signal() {
        let mut table = ProxyTable::new();
        table.insert(4);
        table.add_hook(4, "changed", 1, Box::new(|_| {}));
        table.add_hook(4, "released", 2, Box::new(|_| {}));
        table.add_hook(4, "changed", 3, Box::new(|_| {}));
        assert_eq!(table.hook_ids(4, Some("changed")), vec![1, 3]);
        assert_eq!(table.hook_ids(4, None), vec![1, 3, 2]);
        assert!(table.hook_ids(4, Some("moved")).is_empty());
        assert!(table.hook_ids(8, None).is_empty());
    }

    #[test]
    fn test_qdata() {
        let mut table = ProxyTable::new();
        assert!(!table.set_qdata(9, "label", Box::new(1u32)));
        table.insert(9);
        assert!(table.set_qdata(9, "label", Box::new(String::from("osc"))));
        assert_eq!(table.get_qdata::<String>(9, "label").map(String::as_str), Some("osc"));
        assert_eq!(table.get_qdata::<u32>(9, "label"), None);
        assert!(table.steal_qdata(9, "label").is_some());
        assert_eq!(table.get_qdata::<String>(9, "label"), None);
    }

    #[test]
    fn test_clear_returns_connected_signals() {
        let mut table = ProxyTable::new();
        table.insert(1);
        table.insert(2);
        table.add_hook(1, "changed", 1, Box::new(|_| {}));
        let cleared = table.clear();
        assert_eq!(
            cleared,
            vec![(1, vec!["changed".to_string()]), (2, Vec::new())]
        );
        assert!(table.is_empty());
        assert_eq!(table.generation(1), 0);
    }
}
