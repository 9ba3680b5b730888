//! Device identity, pairing credential and the durable device record.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Auto disconnect time that means "never".
pub const AUTO_DISCONNECT_NEVER: u16 = 511;

/// Bluetooth device address in wire (little-endian) byte order.
///
/// Displays most significant byte first, `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub fn from_wire(bytes: [u8; 6]) -> Self {
        BdAddr(bytes)
    }

    pub fn as_wire(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bluetooth address: {0}")]
pub struct ParseAddrError(String);

impl FromStr for BdAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseAddrError(s.to_string()));
        }
        let mut out = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseAddrError(s.to_string()));
            }
            out[5 - i] = u8::from_str_radix(part, 16).map_err(|_| ParseAddrError(s.to_string()))?;
        }
        Ok(BdAddr(out))
    }
}

impl TryFrom<String> for BdAddr {
    type Error = ParseAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BdAddr> for String {
    fn from(addr: BdAddr) -> Self {
        addr.to_string()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl AddressType {
    pub fn from_random_flag(random: bool) -> Self {
        if random {
            AddressType::Random
        } else {
            AddressType::Public
        }
    }

    pub fn is_random(&self) -> bool {
        *self == AddressType::Random
    }
}

/// Store key: address plus address type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct DeviceKey {
    pub address: BdAddr,
    pub address_type: AddressType,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if self.address_type.is_random() {
            write!(f, " (random)")?;
        }
        Ok(())
    }
}

/// Long-term credential from a full verify. Possession proves a prior successful pairing.
#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct PairingCredential {
    pub id: u32,
    #[serde(with = "bytes_16")]
    pub key: [u8; 16],
}

impl PairingCredential {
    /// Split the 20-byte derivation output: id (u32 LE) then key.
    pub fn from_derived(pk: &[u8]) -> Option<Self> {
        let id = u32::from_le_bytes(pk.get(0..4)?.try_into().ok()?);
        let key = pk.get(4..20)?.try_into().ok()?;
        Some(Self { id, key })
    }
}

impl fmt::Debug for PairingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCredential")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

mod bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub voltage: f32,
    pub timestamp_utc_ms: u64,
}

/// Everything remembered about one button. Persisted once paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: BdAddr,
    /// Unknown until the first full verify.
    pub address_type: Option<AddressType>,
    pub uuid: Option<Uuid>,
    pub serial_number: Option<String>,
    #[serde(default)]
    pub name: String,
    /// 0 means the name came from the button.
    #[serde(default)]
    pub name_timestamp_utc_ms: u64,
    pub pairing: Option<PairingCredential>,
    #[serde(default)]
    pub boot_id: u32,
    #[serde(default)]
    pub event_count: u32,
    #[serde(default)]
    pub firmware_version: u32,
    #[serde(default)]
    pub next_firmware_check_utc_ms: u64,
    #[serde(default)]
    pub adv_settings_configured: bool,
    #[serde(default)]
    pub battery: Option<BatteryReading>,

    /// Set when the button told us our credential was revoked.
    #[serde(skip)]
    pub unpaired: bool,
    /// Button clock (ms) at the last init response.
    #[serde(skip)]
    pub ready_timestamp_ms: u64,
    #[serde(skip, default = "default_auto_disconnect_time")]
    pub auto_disconnect_time: u16,
}

fn default_auto_disconnect_time() -> u16 {
    AUTO_DISCONNECT_NEVER
}

impl DeviceRecord {
    /// Fresh record for a button that has never been paired.
    pub fn new(address: BdAddr) -> Self {
        Self {
            address,
            address_type: None,
            uuid: None,
            serial_number: None,
            name: String::new(),
            name_timestamp_utc_ms: 0,
            pairing: None,
            boot_id: 0,
            event_count: 0,
            firmware_version: 0,
            next_firmware_check_utc_ms: 0,
            adv_settings_configured: false,
            battery: None,
            unpaired: false,
            ready_timestamp_ms: 0,
            auto_disconnect_time: AUTO_DISCONNECT_NEVER,
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            address: self.address,
            address_type: self.address_type.unwrap_or_default(),
        }
    }

    /// Lowercase 32-digit hex, as the firmware service expects it.
    pub fn uuid_string(&self) -> Option<String> {
        self.uuid.map(|u| u.simple().to_string())
    }

    /// Completed presses: two events (down, up) per press.
    pub fn press_count(&self) -> u32 {
        self.event_count.wrapping_add(1) / 2
    }
}

/// Error returned by a [`DeviceStore`]. The session logs it and carries on.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Durable storage for paired devices, keyed by [`DeviceKey`].
///
/// Partial updates copy only the named fields from `record`.
pub trait DeviceStore {
    fn add(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    fn delete(&mut self, key: DeviceKey) -> Result<(), StoreError>;

    fn update_name(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    /// Boot id, event count, adv-configured flag and battery reading.
    fn update_boot_id_and_event_count(&mut self, record: &DeviceRecord)
        -> Result<(), StoreError>;

    fn update_event_count(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    fn update_adv_settings_configured(&mut self, record: &DeviceRecord)
        -> Result<(), StoreError>;

    fn update_firmware_version(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    fn update_firmware_check_timestamp(&mut self, record: &DeviceRecord)
        -> Result<(), StoreError>;

    fn update_battery(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<Vec<DeviceRecord>, StoreError>;
}

/// In-memory [`DeviceStore`]. Hosts can wrap it to add persistence.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<DeviceKey, DeviceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&DeviceRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn with<F: FnOnce(&mut DeviceRecord)>(&mut self, record: &DeviceRecord, f: F) {
        match self.records.get_mut(&record.key()) {
            Some(stored) => f(stored),
            None => log::debug!("update for unknown device {}", record.key()),
        }
    }
}

impl DeviceStore for MemoryStore {
    fn add(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    fn delete(&mut self, key: DeviceKey) -> Result<(), StoreError> {
        self.records.remove(&key);
        Ok(())
    }

    fn update_name(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.with(record, |s| {
            s.name = record.name.clone();
            s.name_timestamp_utc_ms = record.name_timestamp_utc_ms;
        });
        Ok(())
    }

    fn update_boot_id_and_event_count(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.with(record, |s| {
            s.boot_id = record.boot_id;
            s.event_count = record.event_count;
            s.adv_settings_configured = record.adv_settings_configured;
            s.battery = record.battery;
        });
        Ok(())
    }

    fn update_event_count(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.with(record, |s| s.event_count = record.event_count);
        Ok(())
    }

    fn update_adv_settings_configured(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.with(record, |s| {
            s.adv_settings_configured = record.adv_settings_configured
        });
        Ok(())
    }

    fn update_firmware_version(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.with(record, |s| s.firmware_version = record.firmware_version);
        Ok(())
    }

    fn update_firmware_check_timestamp(
        &mut self,
        record: &DeviceRecord,
    ) -> Result<(), StoreError> {
        self.with(record, |s| {
            s.next_firmware_check_utc_ms = record.next_firmware_check_utc_ms
        });
        Ok(())
    }

    fn update_battery(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.with(record, |s| s.battery = record.battery);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }
}
