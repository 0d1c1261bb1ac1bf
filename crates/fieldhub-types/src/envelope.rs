//! Wire format of the realtime channel.
//!
//! Every server→client frame is a JSON envelope `{"type": …, "data": …}`:
//!
//! | `type` | `data` |
//! |---|---|
//! | `device:add` | array of devices |
//! | `device:remove` | `{"device": address}` |
//! | `device:change` | `{"device": address, "changes": {…}}` |
//! | `ping` | absent |
//!
//! Clients send bare `{"device": …, "changes": {…}}` objects, parsed by
//! [`ChangeRequest::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::{Address, Device, DeviceLookup, StateChanges, Unit};
use crate::error::MessageError;
use crate::event::RegistryEventKind;

/// A server→client realtime message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Envelope {
    #[serde(rename = "device:add")]
    DeviceAdd(Vec<Device>),
    #[serde(rename = "device:remove")]
    DeviceRemove { device: Address },
    #[serde(rename = "device:change")]
    DeviceChange {
        device: Address,
        changes: StateChanges,
    },
    #[serde(rename = "ping")]
    Ping,
}

impl Envelope {
    /// The `type` tag as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::DeviceAdd(_) => "device:add",
            Envelope::DeviceRemove { .. } => "device:remove",
            Envelope::DeviceChange { .. } => "device:change",
            Envelope::Ping => "ping",
        }
    }
}

impl From<&RegistryEventKind> for Envelope {
    fn from(kind: &RegistryEventKind) -> Self {
        match kind {
            RegistryEventKind::Added(device) => Envelope::DeviceAdd(vec![device.clone()]),
            RegistryEventKind::Removed(address) => Envelope::DeviceRemove {
                device: address.clone(),
            },
            RegistryEventKind::Changed { address, changes } => Envelope::DeviceChange {
                device: address.clone(),
                changes: changes.clone(),
            },
        }
    }
}

/// A client request to merge `changes` into a device's state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub device: DeviceLookup,
    pub changes: StateChanges,
}

#[derive(Deserialize)]
struct RawChangeRequest {
    device: Value,
    changes: Value,
}

impl ChangeRequest {
    /// Validate and decode an inbound text frame.
    ///
    /// `device` may be an address string or a unit number; `changes` must be
    /// a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Malformed`] for anything else.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let raw: RawChangeRequest = serde_json::from_str(text)
            .map_err(|e| MessageError::Malformed(e.to_string()))?;

        let device = match &raw.device {
            Value::String(s) => DeviceLookup::parse(s),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| Unit::try_from(n).ok())
                .map(DeviceLookup::Unit),
            _ => None,
        }
        .ok_or_else(|| MessageError::Malformed(format!("invalid device reference {}", raw.device)))?;

        let Value::Object(map) = raw.changes else {
            return Err(MessageError::Malformed("`changes` must be an object".to_string()));
        };

        Ok(Self {
            device,
            changes: map.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_has_no_data() {
        let json = serde_json::to_value(Envelope::Ping).unwrap();
        assert_eq!(json, json!({"type": "ping"}));
    }

    #[test]
    fn change_envelope_shape() {
        let mut changes = StateChanges::new();
        changes.insert("position".into(), json!({"x": 1}));
        let envelope = Envelope::DeviceChange {
            device: Address::new("MOCK:MAC:1"),
            changes,
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "type": "device:change",
                "data": {"device": "MOCK:MAC:1", "changes": {"position": {"x": 1}}}
            })
        );
    }

    #[test]
    fn remove_envelope_shape() {
        let envelope = Envelope::from(&RegistryEventKind::Removed(Address::new("aabbccddeeff")));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"type": "device:remove", "data": {"device": "AA:BB:CC:DD:EE:FF"}})
        );
        assert_eq!(envelope.kind(), "device:remove");
    }

    #[test]
    fn added_event_becomes_single_element_array() {
        let device = Device::new(Address::new("MOCK:MAC:2"), Unit::new(2).unwrap());
        let envelope = Envelope::from(&RegistryEventKind::Added(device.clone()));
        assert_eq!(envelope, Envelope::DeviceAdd(vec![device]));
    }

    #[test]
    fn parse_accepts_address_and_unit_references() {
        let req = ChangeRequest::parse(r#"{"device":"MOCK:MAC:1","changes":{"led":true}}"#).unwrap();
        assert_eq!(req.device, DeviceLookup::Address(Address::new("MOCK:MAC:1")));
        assert_eq!(req.changes["led"], json!(true));

        let req = ChangeRequest::parse(r#"{"device":4,"changes":{}}"#).unwrap();
        assert_eq!(req.device, DeviceLookup::Unit(Unit::new(4).unwrap()));
        assert!(req.changes.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        for text in [
            "not json at all",
            "[]",
            r#"{"device":"MOCK:MAC:1"}"#,
            r#"{"changes":{}}"#,
            r#"{"device":null,"changes":{}}"#,
            r#"{"device":0,"changes":{}}"#,
            r#"{"device":"MOCK:MAC:1","changes":[1,2]}"#,
        ] {
            assert!(
                matches!(ChangeRequest::parse(text), Err(MessageError::Malformed(_))),
                "expected {text:?} to be rejected"
            );
        }
    }
}
