//! In-process object system implementing [`GlueBackend`].
//!
//! Objects are instances of registered interfaces and carry the properties
//! those interfaces declare. Procedures are closures registered by name;
//! methods of an interface are procedures named `"<iface>+<method>"`.
//!
//! `LocalBackend` is a cheap handle: clones share the same objects, so a test
//! or a procedure can keep one while a [`super::GlueContext`] owns another.

use super::backend::{GlueBackend, IfaceInfo, ProcInfo};
use super::event::{canonical_signal, GlueEvent};
use crate::primitives::{
    canonical_field_name, Category, ParamSpec, Proxy, Rec, Ring, Seq, UPool, UStore, Value,
};
use crate::wire::WirePollFd;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Procedure body. Receives a handle to the backend running it.
pub type ProcHandler = Rc<dyn Fn(&LocalBackend, &Seq) -> Option<Value>>;

struct LocalIface {
    parent: Option<String>,
    props: Vec<ParamSpec>,
}

struct LocalProc {
    info: ProcInfo,
    handler: ProcHandler,
}

struct LocalObject {
    iface: String,
    properties: Rec,
    watched: bool,
    notify: BTreeSet<String>,
}

struct LocalState {
    base_iface: String,
    ifaces: BTreeMap<String, LocalIface>,
    procs: BTreeMap<String, LocalProc>,
    objects: UStore<LocalObject>,
    next_proxy: Proxy,
    next_notify_id: u32,
    unacknowledged: UPool,
    events: Ring<GlueEvent>,
}

impl LocalState {
    /// `iface` followed by its ancestors.
    fn ancestry(&self, iface: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut next = Some(iface.to_string());
        while let Some(name) = next {
            let Some(info) = self.ifaces.get(&name) else {
                break;
            };
            next = info.parent.clone();
            chain.push(name);
        }
        chain
    }

    fn find_pspec(&self, iface: &str, name: &str) -> Option<ParamSpec> {
        let name = canonical_field_name(name);
        self.ancestry(iface).iter().find_map(|ancestor| {
            self.ifaces
                .get(ancestor)?
                .props
                .iter()
                .find(|pspec| canonical_field_name(&pspec.name) == name)
                .cloned()
        })
    }

    fn queue_notify(&mut self, proxy: Proxy, signal: &str, args: Seq) -> bool {
        let signal = canonical_signal(signal);
        let Some(object) = self.objects.lookup(proxy) else {
            return false;
        };
        if !object.notify.contains(&signal) {
            return false;
        }
        self.next_notify_id = self.next_notify_id.wrapping_add(1).max(1);
        let notify_id = self.next_notify_id;
        self.unacknowledged.add(u64::from(notify_id));
        self.events
            .append(GlueEvent::notify(proxy, &signal, notify_id, args));
        true
    }
}

#[derive(Clone)]
pub struct LocalBackend {
    state: Rc<RefCell<LocalState>>,
}

impl fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LocalBackend")
            .field("base_iface", &state.base_iface)
            .field("objects", &state.objects.len())
            .field("procs", &state.procs.len())
            .finish()
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub const BASE_IFACE: &'static str = "Item";

    /// A backend with the root interface [`Self::BASE_IFACE`] and no
    /// procedures.
    pub fn new() -> Self {
        let mut ifaces = BTreeMap::new();
        ifaces.insert(
            Self::BASE_IFACE.to_string(),
            LocalIface {
                parent: None,
                props: Vec::new(),
            },
        );
        Self {
            state: Rc::new(RefCell::new(LocalState {
                base_iface: Self::BASE_IFACE.to_string(),
                ifaces,
                procs: BTreeMap::new(),
                objects: UStore::new(),
                next_proxy: 0,
                next_notify_id: 0,
                unacknowledged: UPool::new(),
                events: Ring::new(),
            })),
        }
    }

    /// Register an interface deriving from `parent`. Fails if the name is
    /// taken or the parent is unknown.
    pub fn register_iface(&self, name: &str, parent: &str, props: Vec<ParamSpec>) -> bool {
        let mut state = self.state.borrow_mut();
        if state.ifaces.contains_key(name) || !state.ifaces.contains_key(parent) {
            warn!("cannot register interface {} (parent {})", name, parent);
            return false;
        }
        state.ifaces.insert(
            name.to_string(),
            LocalIface {
                parent: Some(parent.to_string()),
                props,
            },
        );
        true
    }

    /// Register a procedure under `info.name`, replacing any previous one.
    pub fn register_proc<F>(&self, info: ProcInfo, handler: F)
    where
        F: Fn(&LocalBackend, &Seq) -> Option<Value> + 'static,
    {
        let name = info.name.clone();
        self.state.borrow_mut().procs.insert(
            name,
            LocalProc {
                info,
                handler: Rc::new(handler),
            },
        );
    }

    /// Create an instance of `iface` with default property values. Returns 0
    /// for unknown interfaces.
    pub fn create_object(&self, iface: &str) -> Proxy {
        let mut state = self.state.borrow_mut();
        if !state.ifaces.contains_key(iface) {
            warn!("cannot create object of unknown interface {}", iface);
            return 0;
        }
        let mut properties = Rec::new();
        for ancestor in state.ancestry(iface) {
            if let Some(info) = state.ifaces.get(&ancestor) {
                for pspec in &info.props {
                    properties.set(&pspec.name, pspec.default.clone());
                }
            }
        }
        state.next_proxy += 1;
        let proxy = state.next_proxy;
        state.objects.insert(
            proxy,
            LocalObject {
                iface: iface.to_string(),
                properties,
                watched: false,
                notify: BTreeSet::new(),
            },
        );
        debug!("created {} ({})", iface, proxy);
        proxy
    }

    /// Emit `signal` on `proxy`. A notification is queued only if the client
    /// asked for it; returns whether one was.
    pub fn emit(&self, proxy: Proxy, signal: &str, args: Seq) -> bool {
        self.state.borrow_mut().queue_notify(proxy, signal, args)
    }

    /// Destroy an object, queueing a RELEASE if the client watches it.
    pub fn release(&self, proxy: Proxy) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(object) = state.objects.remove(proxy) else {
            return false;
        };
        if object.watched {
            state.events.append(GlueEvent::release(proxy));
        }
        debug!("released {} ({})", object.iface, proxy);
        true
    }

    pub fn object_count(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Events queued for the client but not fetched yet.
    pub fn queued_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Notifications sent but not yet acknowledged by the client.
    pub fn unacknowledged_notifies(&self) -> usize {
        self.state.borrow().unacknowledged.len()
    }
}

impl GlueBackend for LocalBackend {
    fn describe_iface(&mut self, iface: &str) -> Option<IfaceInfo> {
        let state = self.state.borrow();
        if !state.ifaces.contains_key(iface) {
            return None;
        }
        let ifaces = state.ancestry(iface);
        let props = ifaces
            .iter()
            .filter_map(|ancestor| state.ifaces.get(ancestor))
            .flat_map(|info| info.props.iter().map(|pspec| pspec.name.clone()))
            .collect();
        Some(IfaceInfo {
            type_name: iface.to_string(),
            ifaces,
            props,
        })
    }

    fn describe_proc(&mut self, proc_name: &str) -> Option<ProcInfo> {
        self.state
            .borrow()
            .procs
            .get(proc_name)
            .map(|proc| proc.info.clone())
    }

    fn list_proc_names(&mut self) -> Vec<String> {
        self.state.borrow().procs.keys().cloned().collect()
    }

    fn list_method_names(&mut self, iface: &str) -> Vec<String> {
        let prefix = format!("{iface}+");
        self.state
            .borrow()
            .procs
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn base_iface(&mut self) -> Option<String> {
        Some(self.state.borrow().base_iface.clone())
    }

    fn iface_children(&mut self, iface: &str) -> Vec<String> {
        self.state
            .borrow()
            .ifaces
            .iter()
            .filter(|(_, info)| info.parent.as_deref() == Some(iface))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn exec_proc(&mut self, proc_name: &str, params: &Seq) -> Option<Value> {
        // the handler may call back into the backend, so no borrow is held
        let handler = self
            .state
            .borrow()
            .procs
            .get(proc_name)
            .map(|proc| Rc::clone(&proc.handler));
        match handler {
            Some(handler) => handler(self, params),
            None => {
                warn!("no such procedure: {}", proc_name);
                None
            }
        }
    }

    fn proxy_iface(&mut self, proxy: Proxy) -> Option<String> {
        self.state
            .borrow()
            .objects
            .lookup(proxy)
            .map(|object| object.iface.clone())
    }

    fn proxy_is_a(&mut self, proxy: Proxy, iface: &str) -> bool {
        let state = self.state.borrow();
        state
            .objects
            .lookup(proxy)
            .map(|object| state.ancestry(&object.iface).iter().any(|a| a == iface))
            .unwrap_or(false)
    }

    fn proxy_list_properties(
        &mut self,
        proxy: Proxy,
        first_ancestor: &str,
        last_ancestor: &str,
    ) -> Vec<String> {
        let state = self.state.borrow();
        let Some(object) = state.objects.lookup(proxy) else {
            return Vec::new();
        };
        let chain = state.ancestry(&object.iface);
        let start = if first_ancestor.is_empty() {
            Some(0)
        } else {
            chain.iter().position(|a| a == first_ancestor)
        };
        let end = if last_ancestor.is_empty() {
            chain.len().checked_sub(1)
        } else {
            chain.iter().position(|a| a == last_ancestor)
        };
        let (Some(start), Some(end)) = (start, end) else {
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }
        chain[start..=end]
            .iter()
            .filter_map(|ancestor| state.ifaces.get(ancestor))
            .flat_map(|info| info.props.iter().map(|pspec| pspec.name.clone()))
            .collect()
    }

    fn proxy_get_pspec(&mut self, proxy: Proxy, name: &str) -> Option<ParamSpec> {
        let state = self.state.borrow();
        let object = state.objects.lookup(proxy)?;
        state.find_pspec(&object.iface, name)
    }

    fn proxy_get_pspec_scategory(&mut self, proxy: Proxy, name: &str) -> Category {
        self.proxy_get_pspec(proxy, name)
            .map(|pspec| pspec.category)
            .unwrap_or_default()
    }

    fn proxy_set_property(&mut self, proxy: Proxy, name: &str, value: &Value) {
        let mut state = self.state.borrow_mut();
        let Some(iface) = state.objects.lookup(proxy).map(|o| o.iface.clone()) else {
            warn!("set_property on unknown object ({})", proxy);
            return;
        };
        let Some(pspec) = state.find_pspec(&iface, name) else {
            warn!("{} ({}) has no property \"{}\"", iface, proxy, name);
            return;
        };
        if !pspec.accepts(value) {
            warn!(
                "property \"{}\" of {} expects {:?}, got {:?}",
                pspec.name,
                iface,
                pspec.category,
                value.category()
            );
            return;
        }
        if let Some(object) = state.objects.lookup_mut(proxy) {
            object.properties.set(&pspec.name, value.clone());
        }
        state.queue_notify(
            proxy,
            "property-notify",
            Seq::from_iter([Value::String(pspec.name)]),
        );
    }

    fn proxy_get_property(&mut self, proxy: Proxy, name: &str) -> Option<Value> {
        self.state
            .borrow()
            .objects
            .lookup(proxy)?
            .properties
            .lookup(name)
            .cloned()
    }

    fn proxy_watch_release(&mut self, proxy: Proxy) -> bool {
        match self.state.borrow_mut().objects.lookup_mut(proxy) {
            Some(object) => {
                object.watched = true;
                true
            }
            None => false,
        }
    }

    fn proxy_request_notify(&mut self, proxy: Proxy, signal: &str, enable: bool) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(object) = state.objects.lookup_mut(proxy) else {
            return false;
        };
        let signal = canonical_signal(signal);
        if enable {
            object.notify.insert(signal);
        } else {
            object.notify.remove(&signal);
        }
        true
    }

    fn proxy_processed_notify(&mut self, notify_id: u32) {
        if !self
            .state
            .borrow_mut()
            .unacknowledged
            .remove(u64::from(notify_id))
        {
            warn!("acknowledgement for unknown notify id {}", notify_id);
        }
    }

    fn client_msg(&mut self, msg: &str, _value: &Value) -> Option<Value> {
        Some(Value::String(format!("unhandled client message: {msg}")))
    }

    fn fetch_events(&mut self) -> Vec<GlueEvent> {
        let mut state = self.state.borrow_mut();
        std::mem::take(&mut state.events).into_iter().collect()
    }

    fn list_poll_fds(&mut self) -> Vec<WirePollFd> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_backend() -> LocalBackend {
        let backend = LocalBackend::new();
        assert!(backend.register_iface(
            "Source",
            "Item",
            vec![ParamSpec::new("name", Category::String).with_default(Value::from("unnamed"))],
        ));
        assert!(backend.register_iface(
            "Osc",
            "Source",
            vec![ParamSpec::new("freq", Category::Real).with_default(Value::Real(440.0))],
        ));
        backend
    }

    #[test]
    fn test_describe_iface_lists_ancestry() {
        let mut backend = synth_backend();
        let info = backend.describe_iface("Osc").unwrap();
        assert_eq!(info.ifaces, vec!["Osc", "Source", "Item"]);
        assert_eq!(info.props, vec!["freq", "name"]);
        assert_eq!(backend.iface_children("Item"), vec!["Source"]);
        assert!(backend.describe_iface("Nope").is_none());
    }

    #[test]
    fn test_list_properties_between_ancestors() {
        let mut backend = synth_backend();
        let osc = backend.create_object("Osc");
        assert_eq!(backend.proxy_list_properties(osc, "", ""), vec!["freq", "name"]);
        assert_eq!(backend.proxy_list_properties(osc, "Source", ""), vec!["name"]);
        assert_eq!(backend.proxy_list_properties(osc, "", "Osc"), vec!["freq"]);
        assert!(backend.proxy_list_properties(osc, "Item", "Osc").is_empty());
    }

    #[test]
    fn test_properties_validate_and_notify() {
        let mut backend = synth_backend();
        let osc = backend.create_object("Osc");
        assert_eq!(backend.proxy_get_property(osc, "freq"), Some(Value::Real(440.0)));
        assert_eq!(backend.proxy_get_pspec_scategory(osc, "name"), Category::String);

        backend.proxy_set_property(osc, "freq", &Value::from("loud"));
        assert_eq!(backend.proxy_get_property(osc, "freq"), Some(Value::Real(440.0)));

        assert!(backend.proxy_request_notify(osc, "property_notify", true));
        backend.proxy_set_property(osc, "freq", &Value::Real(220.0));
        assert_eq!(backend.proxy_get_property(osc, "freq"), Some(Value::Real(220.0)));
        let events = backend.fetch_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_notify_for(osc, "property-notify"));
    }

    #[test]
    fn test_release_queues_event_only_when_watched() {
        let mut backend = synth_backend();
        let a = backend.create_object("Osc");
        let b = backend.create_object("Osc");
        assert!(backend.proxy_watch_release(a));
        assert!(backend.release(a));
        assert!(backend.release(b));
        assert!(!backend.release(b));
        assert_eq!(backend.fetch_events(), vec![GlueEvent::release(a)]);
        assert!(!backend.proxy_watch_release(a));
    }

    #[test]
    fn test_procedures_can_reenter_backend() {
        let mut backend = synth_backend();
        backend.register_proc(ProcInfo::new("Osc+new"), |backend, _| {
            Some(Value::Proxy(backend.create_object("Osc")))
        });
        let proxy = backend.exec_proc("Osc+new", &Seq::new()).and_then(|v| v.as_proxy());
        assert_eq!(proxy, Some(1));
        assert_eq!(backend.list_method_names("Osc"), vec!["Osc+new"]);
        assert!(backend.exec_proc("missing", &Seq::new()).is_none());
    }

    #[test]
    fn test_notify_ids_are_acknowledged() {
        let mut backend = synth_backend();
        let osc = backend.create_object("Osc");
        assert!(!backend.emit(osc, "changed", Seq::new()));
        backend.proxy_request_notify(osc, "changed", true);
        assert!(backend.emit(osc, "changed", Seq::new()));
        let event = backend.fetch_events().remove(0);
        assert_eq!(backend.unacknowledged_notifies(), 1);
        backend.proxy_processed_notify(event.notify_id().unwrap());
        assert_eq!(backend.unacknowledged_notifies(), 0);
    }
}
