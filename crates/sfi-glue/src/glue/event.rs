//! Events delivered from the object owner to the glue client.
//!
//! On the wire an event is a [`Seq`] whose first element is the event type:
//!
//! ```text
//! RELEASE        [1, proxy]
//! NOTIFY         [2, signal, notify_id, args]
//! NOTIFY_CANCEL  [3, signal, notify_id, args]
//! ```
//!
//! `args` is a sequence whose first element is the emitting proxy.

use crate::primitives::{Proxy, Seq, Value};
use std::rc::Rc;

/// Canonical form of a signal name: every `_` becomes `-`.
pub fn canonical_signal(signal: &str) -> String {
    signal.replace('_', "-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlueEventType {
    Release = 1,
    Notify = 2,
    NotifyCancel = 3,
}

impl GlueEventType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(GlueEventType::Release),
            2 => Some(GlueEventType::Notify),
            3 => Some(GlueEventType::NotifyCancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlueEvent {
    Release {
        proxy: Proxy,
    },
    Notify {
        signal: String,
        notify_id: u32,
        args: Seq,
    },
    /// A notification whose subscription was withdrawn while it was queued.
    /// Only the acknowledgement remains to be sent.
    NotifyCancel {
        signal: String,
        notify_id: u32,
        args: Seq,
    },
}

impl GlueEvent {
    pub fn release(proxy: Proxy) -> Self {
        GlueEvent::Release { proxy }
    }

    /// Build a notification for `proxy`; `proxy` is prepended to `args`.
    pub fn notify(proxy: Proxy, signal: &str, notify_id: u32, args: Seq) -> Self {
        let mut full = Seq::new();
        full.append(Value::Proxy(proxy));
        for arg in args {
            full.append(arg);
        }
        GlueEvent::Notify {
            signal: canonical_signal(signal),
            notify_id,
            args: full,
        }
    }

    pub fn event_type(&self) -> GlueEventType {
        match self {
            GlueEvent::Release { .. } => GlueEventType::Release,
            GlueEvent::Notify { .. } => GlueEventType::Notify,
            GlueEvent::NotifyCancel { .. } => GlueEventType::NotifyCancel,
        }
    }

    /// The proxy the event concerns. Zero if a notification carries no proxy.
    pub fn proxy(&self) -> Proxy {
        match self {
            GlueEvent::Release { proxy } => *proxy,
            GlueEvent::Notify { args, .. } | GlueEvent::NotifyCancel { args, .. } => {
                args.get_proxy(0)
            }
        }
    }

    pub fn notify_id(&self) -> Option<u32> {
        match self {
            GlueEvent::Release { .. } => None,
            GlueEvent::Notify { notify_id, .. } | GlueEvent::NotifyCancel { notify_id, .. } => {
                Some(*notify_id)
            }
        }
    }

    /// Whether this is a live notification of `signal` on `proxy`.
    pub fn is_notify_for(&self, proxy: Proxy, signal: &str) -> bool {
        match self {
            GlueEvent::Notify {
                signal: queued,
                args,
                ..
            } => args.get_proxy(0) == proxy && *queued == canonical_signal(signal),
            _ => false,
        }
    }

    /// Turn a notification into its cancelled form. Other events are unchanged.
    pub fn cancel(&mut self) {
        if let GlueEvent::Notify {
            signal,
            notify_id,
            args,
        } = self
        {
            *self = GlueEvent::NotifyCancel {
                signal: std::mem::take(signal),
                notify_id: *notify_id,
                args: std::mem::take(args),
            };
        }
    }

    pub fn to_seq(&self) -> Seq {
        let mut seq = Seq::new();
        seq.append(self.event_type() as i32);
        match self {
            GlueEvent::Release { proxy } => seq.append(Value::Proxy(*proxy)),
            GlueEvent::Notify {
                signal,
                notify_id,
                args,
            }
            | GlueEvent::NotifyCancel {
                signal,
                notify_id,
                args,
            } => {
                seq.append(signal.as_str());
                seq.append(Value::Num(i64::from(*notify_id)));
                seq.append(Value::Seq(Rc::new(args.clone())));
            }
        }
        seq
    }

    /// Parse the wire form. Returns a description of the problem for bogus
    /// events.
    pub fn from_seq(seq: &Seq) -> std::result::Result<Self, String> {
        let kind = seq
            .get(0)
            .and_then(Value::as_int)
            .and_then(GlueEventType::from_i32)
            .ok_or_else(|| format!("bogus event type: {:?}", seq.get(0)))?;
        if kind == GlueEventType::Release {
            let proxy = seq.get_proxy(1);
            if proxy == 0 {
                return Err("release event without proxy".to_string());
            }
            return Ok(GlueEvent::Release { proxy });
        }

        let signal = seq
            .get_string(1)
            .ok_or_else(|| "notification without signal name".to_string())?;
        let notify_id = u32::try_from(seq.get_num(2))
            .map_err(|_| format!("notification with invalid id: {}", seq.get_num(2)))?;
        let args = seq
            .get_seq(3)
            .map(|args| args.as_ref().clone())
            .unwrap_or_default();
        let signal = canonical_signal(signal);
        Ok(match kind {
            GlueEventType::Notify => GlueEvent::Notify {
                signal,
                notify_id,
                args,
            },
            _ => GlueEvent::NotifyCancel {
                signal,
                notify_id,
                args,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_signal() {
        assert_eq!(canonical_signal("property_notify"), "property-notify");
        assert_eq!(canonical_signal("changed"), "changed");
    }

    #[test]
    fn test_notify_prepends_proxy() {
        let event = GlueEvent::notify(7, "value_changed", 3, Seq::from_iter([Value::Int(5)]));
        assert_eq!(event.proxy(), 7);
        assert_eq!(event.notify_id(), Some(3));
        assert!(event.is_notify_for(7, "value-changed"));
        assert!(event.is_notify_for(7, "value_changed"));
        assert!(!event.is_notify_for(8, "value-changed"));
    }

    #[test]
    fn test_wire_form() {
        let release = GlueEvent::release(12);
        let seq = release.to_seq();
        assert_eq!(seq.get_int(0), 1);
        assert_eq!(seq.get_proxy(1), 12);
        assert_eq!(GlueEvent::from_seq(&seq), Ok(release));

        let notify = GlueEvent::notify(4, "changed", 9, Seq::new());
        assert_eq!(GlueEvent::from_seq(&notify.to_seq()), Ok(notify));
    }

    #[test]
    fn test_cancel_keeps_notify_id() {
        let mut event = GlueEvent::notify(4, "changed", 9, Seq::new());
        event.cancel();
        assert_eq!(event.event_type(), GlueEventType::NotifyCancel);
        assert_eq!(event.notify_id(), Some(9));
        assert_eq!(event.proxy(), 4);
        assert!(!event.is_notify_for(4, "changed"));
    }

    #[test]
    fn test_bogus_events_rejected() {
        assert!(GlueEvent::from_seq(&Seq::new()).is_err());
        assert!(GlueEvent::from_seq(&Seq::from_iter([Value::Int(77)])).is_err());
        assert!(GlueEvent::from_seq(&Seq::from_iter([Value::Int(1)])).is_err());
        assert!(GlueEvent::from_seq(&Seq::from_iter([Value::Int(2), Value::Int(0)])).is_err());
    }
}
