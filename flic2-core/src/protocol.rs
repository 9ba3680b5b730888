//! Packet catalog: app-to-button requests/indications (`tx`) and button-to-app
//! responses/notifications (`rx`). The two opcode spaces overlap; direction disambiguates.
//!
//! Every message encodes to `opcode ‖ body`. Both directions can be encoded and decoded so
//! that a simulated button can be driven from tests.

use crate::codec::{Reader, Writer};
use crate::error::DecodeError;

/// Fixed-shape message with its opcode.
pub trait Packet: Sized {
    const OPCODE: u8;

    fn write(&self, w: &mut Writer);

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(Self::OPCODE);
        self.write(&mut w);
        w.finish()
    }

    /// Decode a body with the opcode already stripped. Trailing bytes are ignored.
    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Self::read(&mut Reader::new(body))
    }
}

/// Longest name the button stores, in bytes.
pub const MAX_NAME_LEN: usize = 23;

/// Button timestamps count 1/32768 s.
pub fn ticks_to_ms(ticks: u64) -> u64 {
    ticks * 1000 / 32768
}

macro_rules! empty_packet {
    ($(#[$m:meta])* $name:ident, $op:expr) => {
        $(#[$m])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl Packet for $name {
            const OPCODE: u8 = $op;

            fn write(&self, _w: &mut Writer) {}

            fn read(_r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                Ok($name)
            }
        }
    };
}

pub mod tx {
    use super::*;

    pub const FULL_VERIFY_REQUEST_1: u8 = 0;
    pub const FULL_VERIFY_REQUEST_2_WITH_APP_TOKEN: u8 = 1;
    pub const FULL_VERIFY_REQUEST_2_WITHOUT_APP_TOKEN: u8 = 2;
    pub const FULL_VERIFY_ABORT_IND: u8 = 3;
    pub const TEST_IF_REALLY_UNPAIRED_REQUEST: u8 = 4;
    pub const QUICK_VERIFY_REQUEST: u8 = 5;
    pub const FORCE_BT_DISCONNECT_IND: u8 = 6;
    pub const BLE_SECURITY_REQUEST_IND: u8 = 7;
    pub const GET_FIRMWARE_VERSION_REQUEST: u8 = 8;
    pub const DISCONNECT_VERIFIED_LINK_IND: u8 = 9;
    pub const SET_NAME_REQUEST: u8 = 10;
    pub const GET_NAME_REQUEST: u8 = 11;
    pub const SET_CONNECTION_PARAMETERS_IND: u8 = 12;
    pub const START_API_TIMER_IND: u8 = 13;
    pub const PING_RESPONSE: u8 = 14;
    pub const INIT_BUTTON_EVENTS_REQUEST: u8 = 15;
    pub const ACK_BUTTON_EVENTS: u8 = 16;
    pub const START_FIRMWARE_UPDATE_REQUEST: u8 = 17;
    pub const FIRMWARE_UPDATE_DATA_IND: u8 = 18;
    pub const SET_AUTO_DISCONNECT_TIME_IND: u8 = 19;
    pub const GET_BATTERY_LEVEL_REQUEST: u8 = 20;
    pub const INIT_BUTTON_EVENTS_LIGHT_REQUEST: u8 = 23;
    pub const SET_ADV_PARAMETERS_REQUEST: u8 = 27;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FullVerifyRequest1 {
        pub tmp_id: u32,
    }

    impl Packet for FullVerifyRequest1 {
        const OPCODE: u8 = FULL_VERIFY_REQUEST_1;

        fn write(&self, w: &mut Writer) {
            w.u32(self.tmp_id);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { tmp_id: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FullVerifyRequest2WithoutAppToken {
        pub ecdh_public_key: [u8; 32],
        pub random: [u8; 8],
        pub signature_variant: u8,
        pub encryption_variant: u8,
        pub must_validate_app_token: bool,
        pub verifier: [u8; 16],
    }

    impl Packet for FullVerifyRequest2WithoutAppToken {
        const OPCODE: u8 = FULL_VERIFY_REQUEST_2_WITHOUT_APP_TOKEN;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.ecdh_public_key);
            w.bytes(&self.random);
            w.bits(self.signature_variant as u64, 3);
            w.bits(self.encryption_variant as u64, 3);
            w.bit_bool(self.must_validate_app_token);
            w.padding(1);
            w.bytes(&self.verifier);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let ecdh_public_key = r.array()?;
            let random = r.array()?;
            let signature_variant = r.bits(3)? as u8;
            let encryption_variant = r.bits(3)? as u8;
            let must_validate_app_token = r.bit_bool()?;
            r.padding(1)?;
            Ok(Self {
                ecdh_public_key,
                random,
                signature_variant,
                encryption_variant,
                must_validate_app_token,
                verifier: r.array()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TestIfReallyUnpairedRequest {
        pub ecdh_public_key: [u8; 32],
        pub random: [u8; 8],
        pub pairing_id: u32,
        pub pairing_token: [u8; 16],
    }

    impl Packet for TestIfReallyUnpairedRequest {
        const OPCODE: u8 = TEST_IF_REALLY_UNPAIRED_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.ecdh_public_key);
            w.bytes(&self.random);
            w.u32(self.pairing_id);
            w.bytes(&self.pairing_token);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                ecdh_public_key: r.array()?,
                random: r.array()?,
                pairing_id: r.u32()?,
                pairing_token: r.array()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QuickVerifyRequest {
        pub random: [u8; 7],
        pub signature_variant: u8,
        pub encryption_variant: u8,
        pub tmp_id: u32,
        pub pairing_id: u32,
    }

    impl Packet for QuickVerifyRequest {
        const OPCODE: u8 = QUICK_VERIFY_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.random);
            w.bits(self.signature_variant as u64, 3);
            w.bits(self.encryption_variant as u64, 3);
            w.padding(2);
            w.u32(self.tmp_id);
            w.u32(self.pairing_id);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let random = r.array()?;
            let signature_variant = r.bits(3)? as u8;
            let encryption_variant = r.bits(3)? as u8;
            r.padding(2)?;
            Ok(Self {
                random,
                signature_variant,
                encryption_variant,
                tmp_id: r.u32()?,
                pairing_id: r.u32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ForceBtDisconnectInd {
        pub restart_advertising: bool,
    }

    impl Packet for ForceBtDisconnectInd {
        const OPCODE: u8 = FORCE_BT_DISCONNECT_IND;

        fn write(&self, w: &mut Writer) {
            w.bool(self.restart_advertising);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                restart_advertising: r.bool()?,
            })
        }
    }

    empty_packet!(GetFirmwareVersionRequest, GET_FIRMWARE_VERSION_REQUEST);
    empty_packet!(DisconnectVerifiedLinkInd, DISCONNECT_VERIFIED_LINK_IND);
    empty_packet!(GetNameRequest, GET_NAME_REQUEST);
    empty_packet!(PingResponse, PING_RESPONSE);
    empty_packet!(GetBatteryLevelRequest, GET_BATTERY_LEVEL_REQUEST);

    /// Name with its last-change time; `force` overrides a newer name on the button.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SetNameRequest {
        pub timestamp_utc_ms: u64,
        pub force: bool,
        pub name: String,
    }

    impl Packet for SetNameRequest {
        const OPCODE: u8 = SET_NAME_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.bits(self.timestamp_utc_ms, 47);
            w.bit_bool(self.force);
            w.str(&self.name);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let timestamp_utc_ms = r.bits(47)?;
            let force = r.bit_bool()?;
            let len = r.remaining();
            Ok(Self {
                timestamp_utc_ms,
                force,
                name: r.str(len)?,
            })
        }
    }

    /// Connection interval in 1.25 ms units, slave latency, supervision timeout in 10 ms units.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetConnectionParametersInd {
        pub interval_min: u16,
        pub interval_max: u16,
        pub latency: u16,
        pub timeout: u16,
    }

    impl Packet for SetConnectionParametersInd {
        const OPCODE: u8 = SET_CONNECTION_PARAMETERS_IND;

        fn write(&self, w: &mut Writer) {
            w.u16(self.interval_min);
            w.u16(self.interval_max);
            w.u16(self.latency);
            w.u16(self.timeout);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                interval_min: r.u16()?,
                interval_max: r.u16()?,
                latency: r.u16()?,
                timeout: r.u16()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitButtonEventsLightRequest {
        pub event_count: u32,
        pub boot_id: u32,
        /// 9 bits.
        pub auto_disconnect_time: u16,
        /// 5 bits.
        pub max_queued_packets: u8,
        /// 20 bits.
        pub max_queued_packets_age: u32,
    }

    impl Packet for InitButtonEventsLightRequest {
        const OPCODE: u8 = INIT_BUTTON_EVENTS_LIGHT_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.u32(self.event_count);
            w.u32(self.boot_id);
            w.bits(self.auto_disconnect_time as u64, 9);
            w.bits(self.max_queued_packets as u64, 5);
            w.bits(self.max_queued_packets_age as u64, 20);
            w.padding(6);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let event_count = r.u32()?;
            let boot_id = r.u32()?;
            let auto_disconnect_time = r.bits(9)? as u16;
            let max_queued_packets = r.bits(5)? as u8;
            let max_queued_packets_age = r.bits(20)? as u32;
            r.padding(6)?;
            Ok(Self {
                event_count,
                boot_id,
                auto_disconnect_time,
                max_queued_packets,
                max_queued_packets_age,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AckButtonEvents {
        pub event_count: u32,
    }

    impl Packet for AckButtonEvents {
        const OPCODE: u8 = ACK_BUTTON_EVENTS;

        fn write(&self, w: &mut Writer) {
            w.u32(self.event_count);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                event_count: r.u32()?,
            })
        }
    }

    /// `len` counts 32-bit words of the image (without the IV).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartFirmwareUpdateRequest {
        pub len: u16,
        pub iv: [u8; 8],
        pub status_interval: u16,
    }

    impl Packet for StartFirmwareUpdateRequest {
        const OPCODE: u8 = START_FIRMWARE_UPDATE_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.u16(self.len);
            w.bytes(&self.iv);
            w.u16(self.status_interval);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                len: r.u16()?,
                iv: r.array()?,
                status_interval: r.u16()?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FirmwareUpdateDataInd {
        pub chunk: Vec<u8>,
    }

    impl Packet for FirmwareUpdateDataInd {
        const OPCODE: u8 = FIRMWARE_UPDATE_DATA_IND;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.chunk);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let len = r.remaining();
            Ok(Self {
                chunk: r.bytes(len)?.to_vec(),
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetAutoDisconnectTimeInd {
        /// 9 bits; 511 disables auto disconnect.
        pub auto_disconnect_time: u16,
    }

    impl Packet for SetAutoDisconnectTimeInd {
        const OPCODE: u8 = SET_AUTO_DISCONNECT_TIME_IND;

        fn write(&self, w: &mut Writer) {
            w.bits(self.auto_disconnect_time as u64, 9);
            w.padding(7);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let auto_disconnect_time = r.bits(9)? as u16;
            r.padding(7)?;
            Ok(Self {
                auto_disconnect_time,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetAdvParametersRequest {
        pub is_active: bool,
        pub remove_other_pairings_adv_settings: bool,
        pub with_short_range: bool,
        pub with_long_range: bool,
        pub adv_interval0: u16,
        pub adv_interval1: u16,
        pub timeout_seconds: u32,
    }

    impl Packet for SetAdvParametersRequest {
        const OPCODE: u8 = SET_ADV_PARAMETERS_REQUEST;

        fn write(&self, w: &mut Writer) {
            w.bool(self.is_active);
            w.bool(self.remove_other_pairings_adv_settings);
            w.bool(self.with_short_range);
            w.bool(self.with_long_range);
            w.u16(self.adv_interval0);
            w.u16(self.adv_interval1);
            w.u32(self.timeout_seconds);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                is_active: r.bool()?,
                remove_other_pairings_adv_settings: r.bool()?,
                with_short_range: r.bool()?,
                with_long_range: r.bool()?,
                adv_interval0: r.u16()?,
                adv_interval1: r.u16()?,
                timeout_seconds: r.u32()?,
            })
        }
    }
}

pub mod rx {
    use super::*;

    pub const FULL_VERIFY_RESPONSE_1: u8 = 0;
    pub const FULL_VERIFY_RESPONSE_2: u8 = 1;
    pub const NO_LOGICAL_CONNECTION_SLOTS: u8 = 2;
    pub const FULL_VERIFY_FAIL_RESPONSE: u8 = 3;
    pub const TEST_IF_REALLY_UNPAIRED_RESPONSE: u8 = 4;
    pub const GET_FIRMWARE_VERSION_RESPONSE: u8 = 5;
    pub const QUICK_VERIFY_NEGATIVE_RESPONSE: u8 = 6;
    pub const PAIRING_FINISHED_IND: u8 = 7;
    pub const QUICK_VERIFY_RESPONSE: u8 = 8;
    pub const DISCONNECT_VERIFIED_LINK: u8 = 9;
    pub const INIT_BUTTON_EVENTS_RESPONSE_WITH_BOOT_ID: u8 = 10;
    pub const INIT_BUTTON_EVENTS_RESPONSE_WITHOUT_BOOT_ID: u8 = 11;
    pub const BUTTON_NOTIFICATION: u8 = 12;
    pub const API_TIMER_NOTIFICATION: u8 = 13;
    pub const NAME_UPDATED_NOTIFICATION: u8 = 14;
    pub const PING_REQUEST: u8 = 15;
    pub const GET_NAME_RESPONSE: u8 = 16;
    pub const SET_NAME_RESPONSE: u8 = 17;
    pub const START_FIRMWARE_UPDATE_RESPONSE: u8 = 18;
    pub const FIRMWARE_UPDATE_NOTIFICATION: u8 = 19;
    pub const GET_BATTERY_LEVEL_RESPONSE: u8 = 20;
    pub const SET_ADV_PARAMETERS_RESPONSE: u8 = 25;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FullVerifyResponse1 {
        pub tmp_id: u32,
        pub signature: [u8; 64],
        pub address: [u8; 6],
        pub address_type_random: bool,
        pub public_key: [u8; 32],
        pub random: [u8; 8],
    }

    impl Packet for FullVerifyResponse1 {
        const OPCODE: u8 = FULL_VERIFY_RESPONSE_1;

        fn write(&self, w: &mut Writer) {
            w.u32(self.tmp_id);
            w.bytes(&self.signature);
            w.bytes(&self.address);
            w.bool(self.address_type_random);
            w.bytes(&self.public_key);
            w.bytes(&self.random);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                tmp_id: r.u32()?,
                signature: r.array()?,
                address: r.array()?,
                address_type_random: r.bool()?,
                public_key: r.array()?,
                random: r.array()?,
            })
        }
    }

    /// Device identity sent once the verifier checked out.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FullVerifyResponse2 {
        pub app_credentials_match: bool,
        pub cares_about_app_credentials: bool,
        pub uuid: [u8; 16],
        pub name: String,
        pub firmware_version: u32,
        pub battery_level: u16,
        pub serial_number: String,
    }

    impl Packet for FullVerifyResponse2 {
        const OPCODE: u8 = FULL_VERIFY_RESPONSE_2;

        fn write(&self, w: &mut Writer) {
            w.bit_bool(self.app_credentials_match);
            w.bit_bool(self.cares_about_app_credentials);
            w.padding(6);
            w.bytes(&self.uuid);
            let name = &self.name.as_bytes()[..self.name.len().min(MAX_NAME_LEN)];
            w.u8(name.len() as u8);
            w.bytes(name);
            w.bytes(&[0u8; MAX_NAME_LEN][name.len()..]);
            w.u32(self.firmware_version);
            w.u16(self.battery_level);
            let mut serial = [0u8; 11];
            let len = self.serial_number.len().min(11);
            serial[..len].copy_from_slice(&self.serial_number.as_bytes()[..len]);
            w.bytes(&serial);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let app_credentials_match = r.bit_bool()?;
            let cares_about_app_credentials = r.bit_bool()?;
            r.padding(6)?;
            let uuid = r.array()?;
            let mut name_len = r.u8()? as usize;
            if name_len > MAX_NAME_LEN {
                name_len = 0;
            }
            let name = r.str(name_len)?;
            r.skip(MAX_NAME_LEN - name_len)?;
            Ok(Self {
                app_credentials_match,
                cares_about_app_credentials,
                uuid,
                name,
                firmware_version: r.u32()?,
                battery_level: r.u16()?,
                serial_number: r.str(11)?.trim_end_matches('\0').to_string(),
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NoLogicalConnectionSlots {
        pub tmp_ids: Vec<u32>,
    }

    impl Packet for NoLogicalConnectionSlots {
        const OPCODE: u8 = NO_LOGICAL_CONNECTION_SLOTS;

        fn write(&self, w: &mut Writer) {
            for id in &self.tmp_ids {
                w.u32(*id);
            }
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let n = r.remaining() / 4;
            let tmp_ids = (0..n).map(|_| r.u32()).collect::<Result<_, _>>()?;
            Ok(Self { tmp_ids })
        }
    }

    /// Reason 0: invalid verifier. Reason 1: not in pairable mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FullVerifyFailResponse {
        pub reason: u8,
    }

    impl FullVerifyFailResponse {
        pub const INVALID_VERIFIER: u8 = 0;
        pub const NOT_IN_PAIRABLE_MODE: u8 = 1;
    }

    impl Packet for FullVerifyFailResponse {
        const OPCODE: u8 = FULL_VERIFY_FAIL_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.u8(self.reason);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { reason: r.u8()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TestIfReallyUnpairedResponse {
        pub result: [u8; 16],
    }

    impl Packet for TestIfReallyUnpairedResponse {
        const OPCODE: u8 = TEST_IF_REALLY_UNPAIRED_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.result);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { result: r.array()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetFirmwareVersionResponse {
        pub version: u32,
    }

    impl Packet for GetFirmwareVersionResponse {
        const OPCODE: u8 = GET_FIRMWARE_VERSION_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.u32(self.version);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { version: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QuickVerifyNegativeResponse {
        pub tmp_id: u32,
    }

    impl Packet for QuickVerifyNegativeResponse {
        const OPCODE: u8 = QUICK_VERIFY_NEGATIVE_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.u32(self.tmp_id);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { tmp_id: r.u32()? })
        }
    }

    /// The random comes first on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QuickVerifyResponse {
        pub random: [u8; 8],
        pub tmp_id: u32,
    }

    impl Packet for QuickVerifyResponse {
        const OPCODE: u8 = QUICK_VERIFY_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.bytes(&self.random);
            w.u32(self.tmp_id);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                random: r.array()?,
                tmp_id: r.u32()?,
            })
        }
    }

    /// Encoded with the boot id; the `WITHOUT_BOOT_ID` variant omits it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitButtonEventsResponse {
        pub has_queued_events: bool,
        /// 47 bits, 1/32768 s since button boot.
        pub timestamp: u64,
        pub event_count: u32,
        pub boot_id: u32,
    }

    impl InitButtonEventsResponse {
        pub fn timestamp_ms(&self) -> u64 {
            ticks_to_ms(self.timestamp)
        }

        /// Decode the variant without a boot id, filling in `boot_id`.
        pub fn decode_without_boot_id(body: &[u8], boot_id: u32) -> Result<Self, DecodeError> {
            let mut r = Reader::new(body);
            let has_queued_events = r.bit_bool()?;
            let timestamp = r.bits(47)?;
            Ok(Self {
                has_queued_events,
                timestamp,
                event_count: r.u32()?,
                boot_id,
            })
        }
    }

    impl Packet for InitButtonEventsResponse {
        const OPCODE: u8 = INIT_BUTTON_EVENTS_RESPONSE_WITH_BOOT_ID;

        fn write(&self, w: &mut Writer) {
            w.bit_bool(self.has_queued_events);
            w.bits(self.timestamp, 47);
            w.u32(self.event_count);
            w.u32(self.boot_id);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let has_queued_events = r.bit_bool()?;
            let timestamp = r.bits(47)?;
            Ok(Self {
                has_queued_events,
                timestamp,
                event_count: r.u32()?,
                boot_id: r.u32()?,
            })
        }
    }

    /// One press-state change as seven bytes on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ButtonEventItem {
        /// 48 bits, 1/32768 s since button boot.
        pub timestamp: u64,
        /// 4 bits.
        pub encoded: u8,
        pub was_queued: bool,
        pub was_queued_last: bool,
    }

    impl ButtonEventItem {
        pub fn timestamp_ms(&self) -> u64 {
            ticks_to_ms(self.timestamp)
        }
    }

    /// A batch of events; `event_counter` belongs to the last item.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ButtonNotification {
        pub event_counter: u32,
        pub items: Vec<ButtonEventItem>,
    }

    impl Packet for ButtonNotification {
        const OPCODE: u8 = BUTTON_NOTIFICATION;

        fn write(&self, w: &mut Writer) {
            w.u32(self.event_counter);
            for item in &self.items {
                w.bits(item.timestamp, 48);
                w.bits(item.encoded as u64, 4);
                w.bit_bool(item.was_queued);
                w.bit_bool(item.was_queued_last);
                w.padding(2);
            }
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let event_counter = r.u32()?;
            let n = r.remaining() / 7;
            if n == 0 {
                return Err(DecodeError::EmptyBatch);
            }
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                let timestamp = r.bits(48)?;
                let encoded = r.bits(4)? as u8;
                let was_queued = r.bit_bool()?;
                let was_queued_last = r.bit_bool()?;
                r.padding(2)?;
                items.push(ButtonEventItem {
                    timestamp,
                    encoded,
                    was_queued,
                    was_queued_last,
                });
            }
            Ok(Self {
                event_counter,
                items,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NameUpdatedNotification {
        pub name: String,
    }

    impl Packet for NameUpdatedNotification {
        const OPCODE: u8 = NAME_UPDATED_NOTIFICATION;

        fn write(&self, w: &mut Writer) {
            w.str(&self.name);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let len = r.remaining();
            Ok(Self { name: r.str(len)? })
        }
    }

    empty_packet!(PingRequest, PING_REQUEST);
    empty_packet!(SetAdvParametersResponse, SET_ADV_PARAMETERS_RESPONSE);

    /// Answer to a set-name request. A get-name response (`GET_NAME_RESPONSE`) has the same body.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NameResponse {
        /// 48 bits.
        pub timestamp_utc_ms: u64,
        pub name: String,
    }

    impl Packet for NameResponse {
        const OPCODE: u8 = SET_NAME_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.bits(self.timestamp_utc_ms, 48);
            w.str(&self.name);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            let timestamp_utc_ms = r.bits(48)?;
            let len = r.remaining();
            Ok(Self {
                timestamp_utc_ms,
                name: r.str(len)?,
            })
        }
    }

    /// Negative means invalid parameters (-1) or busy (-2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartFirmwareUpdateResponse {
        pub start_pos: i32,
    }

    impl Packet for StartFirmwareUpdateResponse {
        const OPCODE: u8 = START_FIRMWARE_UPDATE_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.u32(self.start_pos as u32);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                start_pos: r.i32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FirmwareUpdateNotification {
        pub pos: u32,
    }

    impl Packet for FirmwareUpdateNotification {
        const OPCODE: u8 = FIRMWARE_UPDATE_NOTIFICATION;

        fn write(&self, w: &mut Writer) {
            w.u32(self.pos);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { pos: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetBatteryLevelResponse {
        pub level: u16,
    }

    impl GetBatteryLevelResponse {
        pub fn voltage(&self) -> f32 {
            self.level as f32 * 3.6 / 1024.0
        }
    }

    impl Packet for GetBatteryLevelResponse {
        const OPCODE: u8 = GET_BATTERY_LEVEL_RESPONSE;

        fn write(&self, w: &mut Writer) {
            w.u16(self.level);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
            Ok(Self { level: r.u16()? })
        }
    }
}
