//! Wire-stable opcodes and the `[opcode, args...]` message form.

use crate::primitives::{Seq, Value};
use crate::{GlueError, Result};

/// Message opcodes. The numbering is shared with the peer and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    AsyncReturn = 1,
    AsyncMessage = 2,
    AsyncEvent = 3,
    DescribeIface = 129,
    DescribeProc,
    ListProcNames,
    ListMethodNames,
    BaseIface,
    IfaceChildren,
    ExecProc,
    ProxyIface,
    ProxyIsA,
    ProxyListProperties,
    ProxyGetPspec,
    ProxyGetPspecScategory,
    ProxySetProperty,
    ProxyGetProperty,
    ProxyWatchRelease,
    ProxyRequestNotify,
    ProxyProcessedNotify,
    ClientMsg,
}

impl Opcode {
    const REQUESTS: [Opcode; 18] = [
        Opcode::DescribeIface,
        Opcode::DescribeProc,
        Opcode::ListProcNames,
        Opcode::ListMethodNames,
        Opcode::BaseIface,
        Opcode::IfaceChildren,
        Opcode::ExecProc,
        Opcode::ProxyIface,
        Opcode::ProxyIsA,
        Opcode::ProxyListProperties,
        Opcode::ProxyGetPspec,
        Opcode::ProxyGetPspecScategory,
        Opcode::ProxySetProperty,
        Opcode::ProxyGetProperty,
        Opcode::ProxyWatchRelease,
        Opcode::ProxyRequestNotify,
        Opcode::ProxyProcessedNotify,
        Opcode::ClientMsg,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Opcode::AsyncReturn),
            2 => Some(Opcode::AsyncMessage),
            3 => Some(Opcode::AsyncEvent),
            _ => Self::REQUESTS
                .iter()
                .copied()
                .find(|opcode| *opcode as i32 == value),
        }
    }

    /// Operations that are sent without waiting for an `AsyncReturn`.
    pub fn is_one_way(self) -> bool {
        matches!(
            self,
            Opcode::ProxySetProperty | Opcode::ProxyProcessedNotify
        )
    }

    /// Whether the opcode names an operation the decoder answers.
    pub fn is_request(self) -> bool {
        self as i32 >= Opcode::DescribeIface as i32
    }
}

/// Serialize `[opcode, args...]`.
pub fn encode_message(opcode: Opcode, args: Seq) -> Result<String> {
    let mut message = Seq::new();
    message.append(Value::Int(opcode as i32));
    for arg in args {
        message.append(arg);
    }
    Ok(serde_json::to_string(&message)?)
}

/// Split a payload into its opcode number and arguments.
///
/// The opcode is returned raw so callers can report numbers they do not know.
pub fn decode_message(payload: &str) -> Result<(i32, Seq)> {
    let message: Seq = serde_json::from_str(payload)?;
    let mut values = message.into_iter();
    let opcode = values
        .next()
        .and_then(|value| value.as_int())
        .ok_or_else(|| GlueError::codec("message without opcode"))?;
    Ok((opcode, values.collect()))
}
