//! Device identity and state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InvalidUnit;

/// Named state channels of a device (`"position"`, `"magneticField"`, …).
pub type DeviceState = BTreeMap<String, Value>;

/// A partial [`DeviceState`]: every key replaces the channel of the same name.
pub type StateChanges = BTreeMap<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────────────────────────

/// Globally unique hardware identifier of a device.
///
/// Strings that look like a 48-bit MAC address (twelve hex digits, colons
/// optional) are normalized to upper-case colon form, so `aabbccddeeff` and
/// `AA:BB:CC:DD:EE:FF` name the same device.  Anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Build an address from any string, normalizing MAC-like input.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    /// The normalized textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address with colon separators stripped.
    pub fn compact(&self) -> String {
        self.0.chars().filter(|c| *c != ':').collect()
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let hex: String = trimmed.chars().filter(|c| *c != ':').collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return trimmed.to_string();
    }

    let mut out = String::with_capacity(17);
    for (i, c) in hex.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push(':');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit
// ─────────────────────────────────────────────────────────────────────────────

/// Field-bus slave identifier, always within `1..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u8")]
pub struct Unit(u8);

impl Unit {
    /// Lowest assignable unit.
    pub const MIN: Unit = Unit(1);
    /// Highest assignable unit.
    pub const MAX: Unit = Unit(u8::MAX);

    /// Returns `None` for `0`, which is the bus broadcast address.
    pub fn new(value: u8) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// The raw unit number.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Every assignable unit in ascending order.
    pub fn all() -> impl Iterator<Item = Unit> {
        (Self::MIN.0..=Self::MAX.0).map(Unit)
    }
}

impl TryFrom<u64> for Unit {
    type Error = InvalidUnit;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Unit::new)
            .ok_or(InvalidUnit(value))
    }
}

impl From<Unit> for u8 {
    fn from(unit: Unit) -> Self {
        unit.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeviceLookup
// ─────────────────────────────────────────────────────────────────────────────

/// Key used to find a device: either its address or its unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceLookup {
    Unit(Unit),
    Address(Address),
}

impl DeviceLookup {
    /// Interpret `raw` as a unit when it is all digits, otherwise as an
    /// address.
    ///
    /// Returns `None` for empty input and for digit strings outside
    /// `1..=255`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return raw
                .parse::<u64>()
                .ok()
                .and_then(|n| Unit::try_from(n).ok())
                .map(DeviceLookup::Unit);
        }
        Some(DeviceLookup::Address(Address::new(raw)))
    }
}

impl From<Address> for DeviceLookup {
    fn from(address: Address) -> Self {
        DeviceLookup::Address(address)
    }
}

impl From<Unit> for DeviceLookup {
    fn from(unit: Unit) -> Self {
        DeviceLookup::Unit(unit)
    }
}

impl fmt::Display for DeviceLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceLookup::Unit(unit) => write!(f, "unit {unit}"),
            DeviceLookup::Address(address) => write!(f, "{address}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

/// A sensor device known to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub address: Address,
    pub unit: Unit,
    pub enabled: bool,
    /// Time of the most recent report or state change.
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: DeviceState,
}

impl Device {
    /// An enabled device with empty state that has never been seen.
    pub fn new(address: Address, unit: Unit) -> Self {
        Self {
            address,
            unit,
            enabled: true,
            last_seen_at: None,
            state: DeviceState::new(),
        }
    }

    /// Builder-style override of the `enabled` flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replace each channel named in `changes` wholesale.  Channels not named
    /// are left untouched; nested objects are never merged field by field.
    pub fn merge(&mut self, changes: &StateChanges) {
        for (channel, reading) in changes {
            self.state.insert(channel.clone(), reading.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mac_addresses_are_normalized() {
        assert_eq!(Address::new("aabbccddeeff").as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(Address::new("aa:bb:cc:dd:ee:ff").as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(Address::new(" AA:BB:CC:DD:EE:FF ").as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn non_mac_addresses_are_kept_verbatim() {
        assert_eq!(Address::new("MOCK:MAC:1").as_str(), "MOCK:MAC:1");
        assert_eq!(Address::new("aabbcc").as_str(), "aabbcc");
    }

    #[test]
    fn address_compact_strips_colons() {
        assert_eq!(Address::new("AA:BB:CC:11:22:33").compact(), "AABBCC112233");
    }

    #[test]
    fn address_deserializes_normalized() {
        let address: Address = serde_json::from_value(json!("a0b1c2d3e4f5")).unwrap();
        assert_eq!(address.as_str(), "A0:B1:C2:D3:E4:F5");
    }

    #[test]
    fn unit_rejects_zero_and_out_of_range() {
        assert!(Unit::new(0).is_none());
        assert_eq!(Unit::new(7).map(Unit::get), Some(7));
        assert!(Unit::try_from(256u64).is_err());
        assert!(serde_json::from_value::<Unit>(json!(0)).is_err());
        assert!(serde_json::from_value::<Unit>(json!(300)).is_err());
        assert_eq!(serde_json::from_value::<Unit>(json!(255)).unwrap(), Unit::MAX);
    }

    #[test]
    fn unit_all_covers_full_range_in_order() {
        let units: Vec<u8> = Unit::all().map(Unit::get).collect();
        assert_eq!(units.len(), 255);
        assert_eq!(units.first(), Some(&1));
        assert_eq!(units.last(), Some(&255));
        assert!(units.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn lookup_parses_unit_or_address() {
        assert_eq!(
            DeviceLookup::parse("12"),
            Some(DeviceLookup::Unit(Unit::new(12).unwrap()))
        );
        assert_eq!(
            DeviceLookup::parse("aabbccddeeff"),
            Some(DeviceLookup::Address(Address::new("AA:BB:CC:DD:EE:FF")))
        );
        assert_eq!(DeviceLookup::parse("0"), None);
        assert_eq!(DeviceLookup::parse("999"), None);
        assert_eq!(DeviceLookup::parse(""), None);
    }

    #[test]
    fn merge_replaces_channels_wholesale() {
        let mut device = Device::new(Address::new("MOCK:MAC:1"), Unit::MIN);
        device.state.insert("position".into(), json!({"x": 0, "y": 0, "z": 0}));
        device.state.insert("magneticField".into(), json!({"x": 1, "y": 1, "z": 1}));

        let mut changes = StateChanges::new();
        changes.insert("position".into(), json!({"x": 5, "y": 5, "z": 5}));
        device.merge(&changes);

        assert_eq!(device.state["position"], json!({"x": 5, "y": 5, "z": 5}));
        assert_eq!(device.state["magneticField"], json!({"x": 1, "y": 1, "z": 1}));
    }

    #[test]
    fn merge_does_not_deep_merge_nested_objects() {
        let mut device = Device::new(Address::new("MOCK:MAC:1"), Unit::MIN);
        device.state.insert("position".into(), json!({"x": 0, "y": 0, "z": 0}));

        let mut changes = StateChanges::new();
        changes.insert("position".into(), json!({"x": 9}));
        device.merge(&changes);

        assert_eq!(device.state["position"], json!({"x": 9}));
    }

    #[test]
    fn device_serializes_camel_case() {
        let device = Device::new(Address::new("aabbccddeeff"), Unit::new(3).unwrap());
        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(value["unit"], 3);
        assert_eq!(value["enabled"], true);
        assert!(value.get("lastSeenAt").is_some());
        assert!(value["state"].as_object().unwrap().is_empty());
    }
}
