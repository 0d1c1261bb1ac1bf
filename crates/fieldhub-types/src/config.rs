//! The durable config document.
//!
//! The gateway rewrites the whole document on every persistence cycle, so
//! every struct here keeps the keys it does not know in a flattened `extra`
//! map and writes them back untouched.  That covers top-level sections as
//! well as per-device options such as `deviceTimeout`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::{Address, Unit};

/// One statically configured (or remembered) device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub unit: Unit,
    #[serde(alias = "mac")]
    pub address: Address,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceDescriptor {
    /// Enabled descriptor with no id and no extra options.
    pub fn new(unit: Unit, address: Address) -> Self {
        Self {
            id: None,
            enabled: true,
            unit,
            address,
            extra: Map::new(),
        }
    }

    /// Descriptor for an auto-discovered device.  The id is `auto-` plus the
    /// compact address minus its first six characters, which for a MAC is
    /// the device-specific half.
    pub fn discovered(address: Address, unit: Unit) -> Self {
        let suffix: String = address.compact().chars().skip(6).collect();
        Self {
            id: Some(format!("auto-{suffix}")),
            ..Self::new(unit, address)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDiscovery {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Persist discovered devices into `devices`.
    #[serde(default)]
    pub remember: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AutoDiscovery {
    fn default() -> Self {
        Self {
            enabled: true,
            remember: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_http_port(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Dedicated listener port.  Unset means "share the HTTP listener".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Keepalive interval in milliseconds; `<= 0` disables pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: None,
            ping_interval: default_ping_interval(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Debounce window in milliseconds.
    #[serde(default = "default_persistence_delay")]
    pub delay: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            delay: default_persistence_delay(),
            extra: Map::new(),
        }
    }
}

/// Simulated devices, for running without hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSettings {
    #[serde(default)]
    pub macs: Vec<Address>,
    /// Milliseconds between simulated position reports.
    #[serde(default = "default_mock_interval")]
    pub interval: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The whole config file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    /// Absent means auto-discovery is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_discovery: Option<AutoDiscovery>,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub ws: WsSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfigDocument {
    pub fn discovery_enabled(&self) -> bool {
        self.auto_discovery.as_ref().is_some_and(|d| d.enabled)
    }

    pub fn remember_discovered(&self) -> bool {
        self.auto_discovery.as_ref().is_some_and(|d| d.remember)
    }

    /// Append `descriptor` and keep `devices` sorted ascending by unit.
    pub fn record_device(&mut self, descriptor: DeviceDescriptor) {
        self.devices.push(descriptor);
        self.devices.sort_by_key(|d| d.unit);
    }
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_ping_interval() -> i64 {
    30_000
}
fn default_persistence_delay() -> u64 {
    500
}
fn default_mock_interval() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_uses_defaults() {
        let doc: ConfigDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.devices.is_empty());
        assert!(!doc.discovery_enabled());
        assert_eq!(doc.http.port, 8080);
        assert_eq!(doc.ws.ping_interval, 30_000);
        assert_eq!(doc.persistence.delay, 500);
        assert!(doc.mock.is_none());
    }

    #[test]
    fn discovery_section_defaults() {
        let doc: ConfigDocument = serde_json::from_value(json!({"autoDiscovery": {}})).unwrap();
        assert!(doc.discovery_enabled());
        assert!(!doc.remember_discovered());

        let doc: ConfigDocument =
            serde_json::from_value(json!({"autoDiscovery": {"enabled": false, "remember": true}}))
                .unwrap();
        assert!(!doc.discovery_enabled());
        assert!(doc.remember_discovered());
    }

    #[test]
    fn legacy_mac_key_is_accepted() {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "devices": [{"id": "a", "unit": 3, "mac": "aabbccddeeff"}]
        }))
        .unwrap();
        assert_eq!(doc.devices[0].address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert!(doc.devices[0].enabled);
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "ble": {"enabled": false},
            "devices": [
                {"id": "lab", "unit": 3, "mac": "00:12:6f:aa:bb:cc", "deviceTimeout": 60000}
            ],
            "autoDiscovery": {"remember": true, "scanWindow": 30},
            "http": {"port": 80, "keepAliveTimeout": 5000},
            "ws": {"pingInterval": 1000, "maxPayload": 4096},
            "persistence": {"delay": 250, "backup": true},
            "mock": {"macs": ["MOCK:MAC:1"], "jitter": 0.5}
        }))
        .unwrap();
        assert_eq!(doc.http.port, 80);
        assert_eq!(doc.ws.ping_interval, 1000);

        let written = serde_json::to_value(&doc).unwrap();
        assert_eq!(written["ble"], json!({"enabled": false}));
        assert_eq!(written["devices"][0]["deviceTimeout"], json!(60000));
        assert_eq!(written["devices"][0]["address"], json!("00:12:6F:AA:BB:CC"));
        assert!(written["devices"][0].get("mac").is_none());
        assert_eq!(written["autoDiscovery"]["scanWindow"], json!(30));
        assert_eq!(written["http"]["keepAliveTimeout"], json!(5000));
        assert_eq!(written["ws"]["maxPayload"], json!(4096));
        assert_eq!(written["persistence"]["backup"], json!(true));
        assert_eq!(written["mock"]["jitter"], json!(0.5));

        let reread: ConfigDocument = serde_json::from_value(written).unwrap();
        assert_eq!(reread, doc);
    }

    #[test]
    fn record_device_keeps_unit_order() {
        let mut doc = ConfigDocument::default();
        for unit in [9, 2, 5] {
            doc.record_device(DeviceDescriptor::discovered(
                Address::new(format!("MOCK:MAC:{unit}")),
                Unit::new(unit).unwrap(),
            ));
        }
        let units: Vec<u8> = doc.devices.iter().map(|d| d.unit.get()).collect();
        assert_eq!(units, vec![2, 5, 9]);
    }

    #[test]
    fn discovered_id_uses_device_half_of_mac() {
        let d = DeviceDescriptor::discovered(Address::new("AA:BB:CC:11:22:33"), Unit::MIN);
        assert_eq!(d.id.as_deref(), Some("auto-112233"));
        assert!(d.enabled);
    }
}
