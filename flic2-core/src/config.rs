//! Session policy. Hosts embed this in their own configuration file.

use serde::{Deserialize, Serialize};

use crate::ed25519::{vendor_key, VerifyingKey, VENDOR_PUBLIC_KEY};

/// Per-session policy shared by every button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Fail pairing when the button reports mismatching app credentials but does not care.
    #[serde(default)]
    pub force_app_credential_validation: bool,
    /// Key that signs device certificates, hex encoded.
    #[serde(default = "default_vendor_public_key", with = "hex_32")]
    pub vendor_public_key: [u8; 32],
    /// Delay before the first battery poll after a full verify (default 30 s).
    #[serde(default = "default_battery_first_poll_ms")]
    pub battery_first_poll_ms: u64,
    /// Interval between battery polls (default 3 h).
    #[serde(default = "default_battery_poll_interval_ms")]
    pub battery_poll_interval_ms: u64,
    /// Run the periodic firmware check (default true).
    #[serde(default = "default_firmware_updates")]
    pub firmware_updates: bool,
}

fn default_vendor_public_key() -> [u8; 32] {
    VENDOR_PUBLIC_KEY
}
fn default_battery_first_poll_ms() -> u64 {
    30_000
}
fn default_battery_poll_interval_ms() -> u64 {
    3 * 60 * 60 * 1000
}
fn default_firmware_updates() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            force_app_credential_validation: false,
            vendor_public_key: default_vendor_public_key(),
            battery_first_poll_ms: default_battery_first_poll_ms(),
            battery_poll_interval_ms: default_battery_poll_interval_ms(),
            firmware_updates: default_firmware_updates(),
        }
    }
}

impl SessionConfig {
    /// Check a device certificate against the configured vendor key.
    ///
    /// Returns the signature variant that verified, or `None`.
    pub fn verify_certificate(
        &self,
        signature: &[u8; 64],
        address: &[u8; 6],
        address_type_random: bool,
        device_public_key: &[u8; 32],
    ) -> Option<u8> {
        if self.vendor_public_key == VENDOR_PUBLIC_KEY {
            vendor_key()?.verify_certificate(
                signature,
                address,
                address_type_random,
                device_public_key,
            )
        } else {
            VerifyingKey::from_bytes(&self.vendor_public_key)?.verify_certificate(
                signature,
                address,
                address_type_random,
                device_public_key,
            )
        }
    }
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Write;

    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = String::with_capacity(64);
        for b in v {
            let _ = write!(s, "{b:02x}");
        }
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        if s.len() != 64 || !s.is_ascii() {
            return Err(serde::de::Error::custom("expected 64 hex digits"));
        }
        let mut out = [0u8; 32];
        for (i, o) in out.iter_mut().enumerate() {
            *o = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| serde::de::Error::custom("expected 64 hex digits"))?;
        }
        Ok(out)
    }
}
