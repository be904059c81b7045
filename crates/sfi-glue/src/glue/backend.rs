//! The operation table every glue context dispatches through, plus the
//! descriptor types it returns.

use super::event::GlueEvent;
use crate::primitives::{Category, ParamSpec, Proxy, Rec, Seq, Value};
use crate::wire::WirePollFd;
use std::rc::Rc;

/// Description of an interface (object type).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IfaceInfo {
    pub type_name: String,
    /// Ancestor chain, starting with `type_name` itself.
    pub ifaces: Vec<String>,
    pub props: Vec<String>,
}

impl IfaceInfo {
    pub fn to_rec(&self) -> Rec {
        let mut rec = Rec::new();
        rec.set("type_name", self.type_name.as_str());
        rec.set("ifaces", Seq::from_strings(self.ifaces.iter().cloned()));
        rec.set("props", Seq::from_strings(self.props.iter().cloned()));
        rec
    }

    pub fn from_rec(rec: &Rec) -> Option<Self> {
        Some(Self {
            type_name: rec.get_string("type_name")?.to_string(),
            ifaces: rec
                .get_seq("ifaces")
                .map(|seq| seq.to_strings())
                .unwrap_or_default(),
            props: rec
                .get_seq("props")
                .map(|seq| seq.to_strings())
                .unwrap_or_default(),
        })
    }
}

/// Description of a procedure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcInfo {
    pub name: String,
    pub help: String,
    pub authors: String,
    pub license: String,
    pub params: Vec<ParamSpec>,
    pub ret_param: Option<ParamSpec>,
}

impl ProcInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn param(mut self, pspec: ParamSpec) -> Self {
        self.params.push(pspec);
        self
    }

    pub fn returns(mut self, pspec: ParamSpec) -> Self {
        self.ret_param = Some(pspec);
        self
    }

    pub fn to_rec(&self) -> Rec {
        let mut rec = Rec::new();
        rec.set("name", self.name.as_str());
        rec.set("help", self.help.as_str());
        rec.set("authors", self.authors.as_str());
        rec.set("license", self.license.as_str());
        let params: Seq = self
            .params
            .iter()
            .map(|pspec| Value::from(pspec.clone()))
            .collect();
        rec.set("params", params);
        if let Some(ret) = &self.ret_param {
            rec.set("ret_param", ret.clone());
        }
        rec
    }

    pub fn from_rec(rec: &Rec) -> Option<Self> {
        let text = |field: &str| rec.get_string(field).unwrap_or_default().to_string();
        Some(Self {
            name: rec.get_string("name")?.to_string(),
            help: text("help"),
            authors: text("authors"),
            license: text("license"),
            params: rec
                .get_seq("params")
                .map(|seq| seq.iter().filter_map(Value::as_pspec).cloned().collect())
                .unwrap_or_default(),
            ret_param: rec
                .lookup("ret_param")
                .and_then(Value::as_pspec)
                .cloned(),
        })
    }
}

/// Operations a glue context forwards to its implementation.
///
/// Two implementations ship with the crate: [`super::codec::Encoder`], which
/// forwards every call over a com wire, and [`super::LocalBackend`], an
/// in-process object system. Operations that cannot be answered return the
/// type's empty value (`None`, `false`, an empty list).
pub trait GlueBackend {
    // Introspection
    fn describe_iface(&mut self, iface: &str) -> Option<IfaceInfo>;
    fn describe_proc(&mut self, proc_name: &str) -> Option<ProcInfo>;
    fn list_proc_names(&mut self) -> Vec<String>;
    fn list_method_names(&mut self, iface: &str) -> Vec<String>;
    fn base_iface(&mut self) -> Option<String>;
    fn iface_children(&mut self, iface: &str) -> Vec<String>;

    // Procedure calls
    fn exec_proc(&mut self, proc_name: &str, params: &Seq) -> Option<Value>;

    // Proxy queries
    fn proxy_iface(&mut self, proxy: Proxy) -> Option<String>;
    fn proxy_is_a(&mut self, proxy: Proxy, iface: &str) -> bool;
    /// Property names of the ancestors between `first_ancestor` and
    /// `last_ancestor`, inclusive. Empty bounds are open.
    fn proxy_list_properties(
        &mut self,
        proxy: Proxy,
        first_ancestor: &str,
        last_ancestor: &str,
    ) -> Vec<String>;
    fn proxy_get_pspec(&mut self, proxy: Proxy, name: &str) -> Option<ParamSpec>;
    fn proxy_get_pspec_scategory(&mut self, proxy: Proxy, name: &str) -> Category;

    // Properties
    fn proxy_set_property(&mut self, proxy: Proxy, name: &str, value: &Value);
    fn proxy_get_property(&mut self, proxy: Proxy, name: &str) -> Option<Value>;

    // Notification
    /// Ask to be told with a RELEASE event when `proxy` goes away.
    fn proxy_watch_release(&mut self, proxy: Proxy) -> bool;
    fn proxy_request_notify(&mut self, proxy: Proxy, signal: &str, enable: bool) -> bool;
    /// Acknowledge a NOTIFY or NOTIFY_CANCEL event.
    fn proxy_processed_notify(&mut self, notify_id: u32);

    // Messaging and events
    fn client_msg(&mut self, msg: &str, value: &Value) -> Option<Value>;
    fn fetch_events(&mut self) -> Vec<GlueEvent>;
    fn list_poll_fds(&mut self) -> Vec<WirePollFd>;

    fn destroy(&mut self) {}
}

pub(crate) fn rc_seq(seq: Seq) -> Value {
    Value::Seq(Rc::new(seq))
}
