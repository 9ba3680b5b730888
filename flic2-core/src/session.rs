//! Session state machine: handshake, signed packet exchange and the established-state
//! sub-protocols (button events, name sync, battery, firmware update).
//!
//! A session lives for one physical connection. It never does I/O itself; everything that
//! leaves the session goes through [`SessionHost`].

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::buttons::decode_notification;
use crate::chaskey::{Direction, Subkeys, TAG_LEN};
use crate::config::SessionConfig;
use crate::curve25519::EphemeralKey;
use crate::device::{AddressType, BatteryReading, DeviceRecord, DeviceStore, StoreError};
use crate::error::{DecodeError, Failure, GenuineCheck};
use crate::firmware::{
    FetchOutcome, FirmwareCheck, FirmwareState, FirmwareUpdate, Progress, RETRY_AFTER_UPDATE_MINUTES,
};
use crate::fragment::{Inbound, Link, LinkMode};
use crate::handshake::{self, SessionSecret};
use crate::listener::{ButtonListener, ListenerSet};
use crate::pipeline::RequestPipeline;
use crate::protocol::rx;
use crate::protocol::tx;
use crate::protocol::Packet;

/// Restart delay after the button reports no free logical connection slot for us.
pub const TOO_MANY_APPS_RESTART_MS: u64 = 30_000;
/// Restart delay after a packet with a bad signature.
pub const SIGNATURE_MISMATCH_RESTART_MS: u64 = 5_000;
/// Firmware check delay after a full verify.
pub const FIRMWARE_CHECK_DELAY_MS: u64 = 30_000;

/// Advertising parameters need firmware 6 or later.
const ADV_PARAMETERS_MIN_FIRMWARE: u32 = 6;
const MAX_QUEUED_PACKETS: u8 = 31;
const MAX_QUEUED_PACKETS_AGE: u32 = 0xfffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitFullVerify1,
    WaitFullVerify2,
    WaitQuickVerify,
    Established,
    /// Full verify after the button rejected our quick verify.
    WaitFullVerify1TestUnpaired,
    WaitTestIfReallyUnpairedResponse,
    Failed,
    Ended,
}

/// Timers a session asks its host to run. Starting a timer replaces a running one of the
/// same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    FirmwareCheck,
    BatteryPoll,
}

/// Capabilities the host gives a session.
///
/// Every callback runs on the host's serialized loop; results of asynchronous work
/// (timers, firmware fetches, write completions) come back through the session's `on_*`
/// methods on that same loop.
pub trait SessionHost {
    /// Write one fragment (or one whole packet on a streaming link).
    fn transmit(&mut self, data: Vec<u8>);

    /// Ask the platform to bond with the button.
    fn request_bond(&mut self);

    /// Tear down the physical link and start a new session after `delay_ms`.
    fn schedule_restart(&mut self, delay_ms: u64);

    /// A full verify completed and the new credential was stored.
    fn on_paired(&mut self);

    /// The button no longer knows our credential.
    fn on_revoked(&mut self);

    fn start_timer(&mut self, timer: Timer, delay_ms: u64);

    fn cancel_timer(&mut self, timer: Timer);

    /// Look up a firmware image; answer with [`Session::on_firmware_checked`].
    fn fetch_firmware(&mut self, uuid: String, current_version: u32);

    fn now_utc_ms(&self) -> u64;
}

/// Device state a session reads and updates while handling one event.
pub struct DeviceContext<'a> {
    pub record: &'a mut DeviceRecord,
    pub store: &'a mut dyn DeviceStore,
    pub listeners: &'a ListenerSet,
}

impl DeviceContext<'_> {
    fn emit(&self, mut f: impl FnMut(&dyn ButtonListener, &DeviceRecord)) {
        let record = &*self.record;
        self.listeners.for_each(|l| f(l, record));
    }
}

fn logged(result: Result<(), StoreError>, what: &str) {
    if let Err(e) = result {
        log::warn!("store {what}: {e}");
    }
}

pub struct Session<H: SessionHost> {
    host: H,
    config: Arc<SessionConfig>,
    link: Link,
    state: SessionState,
    tmp_id: u32,
    quick_verify: bool,
    full_verify_secret: Option<SessionSecret>,
    peer_address_type: AddressType,
    qv_local_random: [u8; 7],
    keys: Option<Subkeys>,
    tx_counter: u64,
    rx_counter: u64,
    pipeline: RequestPipeline,
    firmware: FirmwareUpdate,
    set_name_pending: bool,
    resend_name: bool,
}

impl<H: SessionHost> Session<H> {
    pub fn new(host: H, mode: LinkMode, config: Arc<SessionConfig>) -> Self {
        Self {
            host,
            config,
            link: Link::new(mode),
            state: SessionState::WaitFullVerify1,
            tmp_id: OsRng.next_u32(),
            quick_verify: false,
            full_verify_secret: None,
            peer_address_type: AddressType::Public,
            qv_local_random: [0; 7],
            keys: None,
            tx_counter: 0,
            rx_counter: 0,
            pipeline: RequestPipeline::new(),
            firmware: FirmwareUpdate::new(),
            set_name_pending: false,
            resend_name: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn is_quick_verified(&self) -> bool {
        self.quick_verify
    }

    pub fn firmware_state(&self) -> FirmwareState {
        self.firmware.state()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Begin the handshake: quick verify with a stored credential, full verify otherwise.
    pub fn start(&mut self, ctx: &mut DeviceContext<'_>) {
        match ctx.record.pairing {
            Some(pairing) => {
                self.quick_verify = true;
                OsRng.fill_bytes(&mut self.qv_local_random);
                self.send_unsigned(&tx::QuickVerifyRequest {
                    random: self.qv_local_random,
                    signature_variant: 0,
                    encryption_variant: 0,
                    tmp_id: self.tmp_id,
                    pairing_id: pairing.id,
                });
                self.state = SessionState::WaitQuickVerify;
            }
            None => self.send_full_verify(),
        }
        log::debug!("{} session started in {:?}", ctx.record.address, self.state);
    }

    /// Tear down: no further packets are handled and both timers are cancelled.
    pub fn end(&mut self) {
        self.state = SessionState::Ended;
        self.host.cancel_timer(Timer::FirmwareCheck);
        self.host.cancel_timer(Timer::BatteryPoll);
    }

    /// The previous [`SessionHost::transmit`] completed.
    pub fn on_write_done(&mut self) {
        if let Some(next) = self.link.write_done() {
            self.host.transmit(next);
        }
    }

    /// Bytes from the transport: one fragment, or one packet on a streaming link.
    pub fn on_data(&mut self, ctx: &mut DeviceContext<'_>, data: &[u8]) {
        let Some(inbound) = self.link.receive(data) else {
            return;
        };
        if let Err(e) = self.dispatch(ctx, inbound) {
            log::debug!("{}: dropping packet: {e}", ctx.record.address);
        }
    }

    pub fn on_timer(&mut self, ctx: &mut DeviceContext<'_>, timer: Timer) {
        if !self.is_established() {
            return;
        }
        match timer {
            Timer::FirmwareCheck => self.check_firmware_timer(ctx),
            Timer::BatteryPoll => self.send_request(&tx::GetBatteryLevelRequest),
        }
    }

    /// Result of the fetch started by [`SessionHost::fetch_firmware`].
    pub fn on_firmware_checked(&mut self, ctx: &mut DeviceContext<'_>, check: FirmwareCheck) {
        if !self.is_established() || self.firmware.state() != FirmwareState::Downloading {
            return;
        }
        match self.firmware.on_fetched(check) {
            FetchOutcome::Retry(minutes) => self.retry_firmware_in(ctx, minutes),
            FetchOutcome::Start(request) => {
                log::info!(
                    "{}: starting firmware update ({} words)",
                    ctx.record.address,
                    request.len
                );
                self.send_request(&request);
            }
        }
    }

    /// Push the record's name to the button, forcing it over the button's copy.
    pub fn send_name(&mut self, ctx: &mut DeviceContext<'_>) {
        if !self.is_established() {
            return;
        }
        if self.set_name_pending {
            self.resend_name = true;
            return;
        }
        self.send_request(&tx::SetNameRequest {
            timestamp_utc_ms: ctx.record.name_timestamp_utc_ms,
            force: true,
            name: ctx.record.name.clone(),
        });
        self.set_name_pending = true;
    }

    pub fn send_auto_disconnect_time(&mut self, auto_disconnect_time: u16) {
        if self.is_established() {
            self.send_signed(&tx::SetAutoDisconnectTimeInd {
                auto_disconnect_time,
            });
        }
    }

    fn send_full_verify(&mut self) {
        self.send_unsigned(&tx::FullVerifyRequest1 {
            tmp_id: self.tmp_id,
        });
        self.state = SessionState::WaitFullVerify1;
    }

    fn send_raw(&mut self, packet: &[u8]) {
        if let Some(write) = self.link.send(packet) {
            self.host.transmit(write);
        }
    }

    fn send_unsigned<P: Packet>(&mut self, packet: &P) {
        self.send_raw(&packet.encode());
    }

    fn sign_and_send(&mut self, mut packet: Vec<u8>) {
        let Some(keys) = self.keys else {
            log::warn!("signed packet before keys were derived");
            return;
        };
        let tag = keys.mac(Direction::ToDevice, self.tx_counter, &packet);
        self.tx_counter += 1;
        packet.extend_from_slice(&tag);
        self.send_raw(&packet);
    }

    /// Signed indication, sent immediately.
    fn send_signed<P: Packet>(&mut self, packet: &P) {
        self.sign_and_send(packet.encode());
    }

    /// Signed request, sent through the pipeline.
    fn send_request<P: Packet>(&mut self, packet: &P) {
        for released in self.pipeline.push(packet.encode()) {
            self.sign_and_send(released);
        }
    }

    fn response_received(&mut self) {
        for released in self.pipeline.response_received() {
            self.sign_and_send(released);
        }
    }

    /// Check the trailing tag of a received packet. Consumes a receive counter either way.
    fn check_tag(&mut self, packet: &[u8]) -> bool {
        let Some(keys) = self.keys else {
            return false;
        };
        if packet.len() < TAG_LEN {
            return false;
        }
        let (data, tag) = packet.split_at(packet.len() - TAG_LEN);
        let expected = keys.mac(Direction::FromDevice, self.rx_counter, data);
        self.rx_counter += 1;
        expected[..] == tag[..]
    }

    fn fail(&mut self, ctx: &mut DeviceContext<'_>, failure: Failure) {
        self.state = SessionState::Failed;
        log::warn!("{}: {failure}", ctx.record.address);
        ctx.emit(|l, r| l.on_failure(r, failure));
    }

    fn dispatch(&mut self, ctx: &mut DeviceContext<'_>, inbound: Inbound) -> Result<(), DecodeError> {
        let packet = &inbound.packet;
        let Some((&opcode, body)) = packet.split_first() else {
            return Ok(());
        };
        log::trace!("{}: opcode {opcode} in {:?}", ctx.record.address, self.state);

        if opcode == rx::NO_LOGICAL_CONNECTION_SLOTS
            && matches!(
                self.state,
                SessionState::WaitFullVerify1
                    | SessionState::WaitFullVerify1TestUnpaired
                    | SessionState::WaitQuickVerify
            )
        {
            let p = rx::NoLogicalConnectionSlots::decode(body)?;
            if p.tmp_ids.contains(&self.tmp_id) {
                self.fail(ctx, Failure::TooManyAppsConnected);
                self.host.schedule_restart(TOO_MANY_APPS_RESTART_MS);
            }
            return Ok(());
        }

        if opcode == rx::FULL_VERIFY_RESPONSE_1
            && matches!(
                self.state,
                SessionState::WaitFullVerify1 | SessionState::WaitFullVerify1TestUnpaired
            )
        {
            let p = rx::FullVerifyResponse1::decode(body)?;
            if p.tmp_id == self.tmp_id {
                self.link.adopt_conn_id(inbound.conn_id);
                self.on_full_verify_response_1(ctx, &p);
            }
            return Ok(());
        }

        if self.state == SessionState::WaitQuickVerify {
            if opcode == rx::QUICK_VERIFY_RESPONSE && body.len() >= 12 + TAG_LEN {
                let p = rx::QuickVerifyResponse::decode(body)?;
                if p.tmp_id != self.tmp_id {
                    return Ok(());
                }
                self.link.adopt_conn_id(inbound.conn_id);
                let Some(pairing) = ctx.record.pairing else {
                    return Ok(());
                };
                self.keys = Some(handshake::quick_verify_subkeys(
                    &pairing.key,
                    &self.qv_local_random,
                    &p.random,
                ));
                if !self.check_tag(packet) {
                    self.fail(ctx, Failure::QuickVerifySignatureMismatch);
                    return Ok(());
                }
                self.state = SessionState::Established;
                log::debug!("{}: quick verify done", ctx.record.address);
                self.send_init(ctx);
                return Ok(());
            }
            if opcode == rx::QUICK_VERIFY_NEGATIVE_RESPONSE {
                let p = rx::QuickVerifyNegativeResponse::decode(body)?;
                if p.tmp_id != self.tmp_id {
                    return Ok(());
                }
                log::info!("{}: quick verify rejected, checking pairing", ctx.record.address);
                self.send_full_verify();
                self.state = SessionState::WaitFullVerify1TestUnpaired;
                return Ok(());
            }
        }

        // Everything past the handshake must be addressed to our logical connection.
        if inbound.conn_id == Some(0) {
            return Ok(());
        }

        if opcode == rx::FULL_VERIFY_RESPONSE_2
            && self.state == SessionState::WaitFullVerify2
            && body.len() >= 17 + TAG_LEN
        {
            if !self.check_tag(packet) {
                self.fail(
                    ctx,
                    Failure::GenuineCheckFailed(GenuineCheck::InvalidCalculatedSignature),
                );
                return Ok(());
            }
            let p = rx::FullVerifyResponse2::decode(body)?;
            self.on_full_verify_response_2(ctx, p);
            return Ok(());
        }

        if opcode == rx::FULL_VERIFY_FAIL_RESPONSE
            && self.state == SessionState::WaitFullVerify2
            && !body.is_empty()
        {
            let p = rx::FullVerifyFailResponse::decode(body)?;
            let failure = match p.reason {
                rx::FullVerifyFailResponse::NOT_IN_PAIRABLE_MODE => Failure::NotInPairableMode,
                rx::FullVerifyFailResponse::INVALID_VERIFIER => {
                    Failure::GenuineCheckFailed(GenuineCheck::InvalidVerifier)
                }
                other => Failure::FullVerifyFailedUnknownReason(other),
            };
            self.fail(ctx, failure);
            return Ok(());
        }

        if opcode == rx::TEST_IF_REALLY_UNPAIRED_RESPONSE
            && self.state == SessionState::WaitTestIfReallyUnpairedResponse
        {
            let p = rx::TestIfReallyUnpairedResponse::decode(body)?;
            self.on_test_if_really_unpaired_response(ctx, &p);
            return Ok(());
        }

        if self.state != SessionState::Established || body.len() < TAG_LEN {
            return Ok(());
        }

        if !self.check_tag(packet) {
            self.send_signed(&tx::DisconnectVerifiedLinkInd);
            self.fail(ctx, Failure::PacketSignatureMismatch);
            self.host.schedule_restart(SIGNATURE_MISMATCH_RESTART_MS);
            return Ok(());
        }
        let body = &body[..body.len() - TAG_LEN];
        self.dispatch_established(ctx, opcode, body)
    }

    fn on_full_verify_response_1(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        p: &rx::FullVerifyResponse1,
    ) {
        let address_type_mismatch = ctx
            .record
            .address_type
            .is_some_and(|t| t.is_random() != p.address_type_random);
        if &p.address != ctx.record.address.as_wire() || address_type_mismatch {
            self.fail(ctx, Failure::GenuineCheckFailed(GenuineCheck::UnexpectedAddress));
            return;
        }
        self.peer_address_type = AddressType::from_random_flag(p.address_type_random);

        let Some(variant) = self.config.verify_certificate(
            &p.signature,
            &p.address,
            p.address_type_random,
            &p.public_key,
        ) else {
            self.fail(ctx, Failure::GenuineCheckFailed(GenuineCheck::InvalidCertificate));
            return;
        };

        let key = EphemeralKey::generate();
        let shared = key.shared_secret(&p.public_key);
        let mut app_random = [0u8; 8];
        OsRng.fill_bytes(&mut app_random);
        let secret = handshake::session_secret(&shared, variant, &p.random, &app_random);
        self.full_verify_secret = Some(secret);

        if self.state == SessionState::WaitFullVerify1 {
            self.host.request_bond();
            self.send_unsigned(&tx::FullVerifyRequest2WithoutAppToken {
                ecdh_public_key: *key.public_key(),
                random: app_random,
                signature_variant: 0,
                encryption_variant: 0,
                must_validate_app_token: false,
                verifier: handshake::verifier(&secret),
            });
            self.keys = Some(handshake::session_subkeys(&secret));
            self.state = SessionState::WaitFullVerify2;
        } else {
            let Some(pairing) = ctx.record.pairing else {
                return;
            };
            self.send_unsigned(&tx::TestIfReallyUnpairedRequest {
                ecdh_public_key: *key.public_key(),
                random: app_random,
                pairing_id: pairing.id,
                pairing_token: handshake::pairing_token(&secret, &pairing),
            });
            self.state = SessionState::WaitTestIfReallyUnpairedResponse;
        }
    }

    fn on_full_verify_response_2(&mut self, ctx: &mut DeviceContext<'_>, p: rx::FullVerifyResponse2) {
        if !p.app_credentials_match {
            if p.cares_about_app_credentials {
                self.fail(ctx, Failure::AppCredentialsDeniedByButton);
                return;
            }
            if self.config.force_app_credential_validation {
                self.fail(ctx, Failure::AppCredentialsDeniedByApp);
                return;
            }
        }
        let Some(secret) = self.full_verify_secret else {
            return;
        };

        let now = self.host.now_utc_ms();
        let battery = rx::GetBatteryLevelResponse {
            level: p.battery_level,
        };
        let record = &mut *ctx.record;
        record.uuid = Some(Uuid::from_bytes(p.uuid));
        record.serial_number = Some(p.serial_number);
        record.firmware_version = p.firmware_version;
        record.name = p.name;
        record.pairing = Some(handshake::pairing_credential(&secret));
        record.address_type = Some(self.peer_address_type);
        record.battery = Some(BatteryReading {
            voltage: battery.voltage(),
            timestamp_utc_ms: now,
        });
        logged(ctx.store.add(ctx.record), "add");

        self.state = SessionState::Established;
        log::info!("{}: paired", ctx.record.address);
        self.send_init(ctx);
        self.host.on_paired();
    }

    fn on_test_if_really_unpaired_response(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        p: &rx::TestIfReallyUnpairedResponse,
    ) {
        let (Some(secret), Some(pairing)) = (self.full_verify_secret, ctx.record.pairing) else {
            return;
        };
        let token = handshake::pairing_token(&secret, &pairing);
        if handshake::not_found_tag(&secret, &token) == p.result {
            log::info!("{}: pairing no longer known by button", ctx.record.address);
            ctx.record.pairing = None;
            ctx.record.unpaired = true;
            self.link.adopt_conn_id(Some(0));
            self.host.on_revoked();
            ctx.emit(|l, r| l.on_unpaired(r));
            return;
        }
        let exists = handshake::exists_tag(&secret, &token) == p.result;
        log::warn!(
            "{}: unexpected unpaired test result (exists: {exists})",
            ctx.record.address
        );
        if !exists {
            let failure = Failure::GenuineCheckFailed(GenuineCheck::InvalidCalculatedSignature);
            ctx.emit(|l, r| l.on_failure(r, failure));
        }
    }

    fn dispatch_established(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        opcode: u8,
        body: &[u8],
    ) -> Result<(), DecodeError> {
        match opcode {
            rx::INIT_BUTTON_EVENTS_RESPONSE_WITH_BOOT_ID
            | rx::INIT_BUTTON_EVENTS_RESPONSE_WITHOUT_BOOT_ID => {
                self.response_received();
                let p = if opcode == rx::INIT_BUTTON_EVENTS_RESPONSE_WITH_BOOT_ID {
                    rx::InitButtonEventsResponse::decode(body)?
                } else {
                    rx::InitButtonEventsResponse::decode_without_boot_id(body, ctx.record.boot_id)?
                };
                self.on_init_response(ctx, &p);
            }
            rx::BUTTON_NOTIFICATION => {
                let p = rx::ButtonNotification::decode(body)?;
                self.on_button_notification(ctx, &p);
            }
            rx::PING_REQUEST => self.send_signed(&tx::PingResponse),
            rx::GET_FIRMWARE_VERSION_RESPONSE
                if body.len() >= 4 && self.firmware.state() == FirmwareState::GettingVersion =>
            {
                self.response_received();
                let p = rx::GetFirmwareVersionResponse::decode(body)?;
                self.on_firmware_version(ctx, p.version);
            }
            rx::START_FIRMWARE_UPDATE_RESPONSE
                if body.len() >= 4 && self.firmware.state() == FirmwareState::Starting =>
            {
                self.response_received();
                let p = rx::StartFirmwareUpdateResponse::decode(body)?;
                let progress = self.firmware.on_start_response(p.start_pos);
                self.on_firmware_progress(ctx, progress);
            }
            rx::FIRMWARE_UPDATE_NOTIFICATION
                if body.len() >= 4 && self.firmware.state() == FirmwareState::Performing =>
            {
                let p = rx::FirmwareUpdateNotification::decode(body)?;
                let progress = self.firmware.on_notification(p.pos);
                self.on_firmware_progress(ctx, progress);
            }
            rx::GET_BATTERY_LEVEL_RESPONSE if body.len() >= 2 => {
                self.response_received();
                let p = rx::GetBatteryLevelResponse::decode(body)?;
                let reading = BatteryReading {
                    voltage: p.voltage(),
                    timestamp_utc_ms: self.host.now_utc_ms(),
                };
                ctx.record.battery = Some(reading);
                logged(ctx.store.update_battery(ctx.record), "battery");
                log::debug!("{}: battery level {}", ctx.record.address, p.level);
                ctx.emit(|l, r| l.on_battery_level_updated(r, reading));
                self.host
                    .start_timer(Timer::BatteryPoll, self.config.battery_poll_interval_ms);
            }
            rx::SET_NAME_RESPONSE | rx::GET_NAME_RESPONSE if body.len() >= 6 => {
                self.response_received();
                let p = rx::NameResponse::decode(body)?;
                self.on_got_name(ctx, p.name);
            }
            rx::NAME_UPDATED_NOTIFICATION => {
                let p = rx::NameUpdatedNotification::decode(body)?;
                self.set_name_from_button(ctx, p.name);
            }
            rx::SET_ADV_PARAMETERS_RESPONSE => {
                self.response_received();
                ctx.record.adv_settings_configured = true;
                logged(
                    ctx.store.update_adv_settings_configured(ctx.record),
                    "adv settings",
                );
            }
            _ => log::trace!("{}: ignoring opcode {opcode}", ctx.record.address),
        }
        Ok(())
    }

    fn send_init(&mut self, ctx: &mut DeviceContext<'_>) {
        self.send_request(&tx::InitButtonEventsLightRequest {
            event_count: ctx.record.event_count,
            boot_id: ctx.record.boot_id,
            auto_disconnect_time: ctx.record.auto_disconnect_time,
            max_queued_packets: if self.quick_verify {
                MAX_QUEUED_PACKETS
            } else {
                0
            },
            max_queued_packets_age: MAX_QUEUED_PACKETS_AGE,
        });
    }

    fn on_init_response(&mut self, ctx: &mut DeviceContext<'_>, p: &rx::InitButtonEventsResponse) {
        let record = &mut *ctx.record;
        let boot_id_changed = record.boot_id != p.boot_id;
        let event_count_changed = record.event_count != p.event_count;
        record.boot_id = p.boot_id;
        record.event_count = p.event_count;
        if event_count_changed && !boot_id_changed {
            logged(ctx.store.update_event_count(ctx.record), "event count");
        } else if boot_id_changed {
            ctx.record.adv_settings_configured = false;
            if self.quick_verify {
                ctx.record.battery = None;
            }
            logged(
                ctx.store.update_boot_id_and_event_count(ctx.record),
                "boot id",
            );
        }
        if !p.has_queued_events {
            self.post_init(ctx);
        }
        ctx.record.ready_timestamp_ms = p.timestamp_ms();
        log::info!("{}: ready", ctx.record.address);
        let ts = ctx.record.ready_timestamp_ms;
        ctx.emit(|l, r| l.on_ready(r, ts));
        if !self.quick_verify {
            if let Some(battery) = ctx.record.battery {
                ctx.emit(|l, r| l.on_battery_level_updated(r, battery));
            }
        }
    }

    /// Runs once the button has delivered its queued events.
    fn post_init(&mut self, ctx: &mut DeviceContext<'_>) {
        if ctx.record.firmware_version >= ADV_PARAMETERS_MIN_FIRMWARE
            && !ctx.record.adv_settings_configured
        {
            self.send_request(&tx::SetAdvParametersRequest {
                is_active: true,
                remove_other_pairings_adv_settings: false,
                with_short_range: true,
                with_long_range: false,
                adv_interval0: 64,
                adv_interval1: 1636,
                timeout_seconds: 86_400,
            });
        }
        if !self.set_name_pending {
            self.send_request(&tx::SetNameRequest {
                timestamp_utc_ms: ctx.record.name_timestamp_utc_ms,
                force: false,
                name: ctx.record.name.clone(),
            });
            self.set_name_pending = true;
        }
        self.send_signed(&tx::SetConnectionParametersInd {
            interval_min: 80,
            interval_max: 90,
            latency: 17,
            timeout: 800,
        });
        if self.quick_verify {
            self.send_request(&tx::GetBatteryLevelRequest);
        } else {
            self.host
                .start_timer(Timer::BatteryPoll, self.config.battery_first_poll_ms);
        }
        if self.config.firmware_updates {
            let delay = if self.quick_verify {
                0
            } else {
                FIRMWARE_CHECK_DELAY_MS
            };
            self.host.start_timer(Timer::FirmwareCheck, delay);
        }
    }

    fn on_button_notification(&mut self, ctx: &mut DeviceContext<'_>, p: &rx::ButtonNotification) {
        let mut ack = false;
        let mut any_last_queued = false;
        for item in decode_notification(p) {
            ctx.record.event_count = item.event_count;
            for event in item.events.iter().copied() {
                let meta = item.meta;
                ctx.emit(|l, r| l.on_button_event(r, event, meta));
            }
            ack |= item.needs_ack;
            any_last_queued |= item.meta.last_queued;
        }
        logged(ctx.store.update_event_count(ctx.record), "event count");
        if ack {
            self.send_signed(&tx::AckButtonEvents {
                event_count: p.event_counter,
            });
        }
        if any_last_queued {
            self.post_init(ctx);
        }
    }

    fn on_got_name(&mut self, ctx: &mut DeviceContext<'_>, name: String) {
        self.set_name_pending = false;
        if self.resend_name {
            self.resend_name = false;
            self.send_name(ctx);
            return;
        }
        if name != ctx.record.name {
            self.set_name_from_button(ctx, name);
        }
    }

    fn set_name_from_button(&mut self, ctx: &mut DeviceContext<'_>, name: String) {
        ctx.record.name_timestamp_utc_ms = 0;
        ctx.record.name = name;
        logged(ctx.store.update_name(ctx.record), "name");
        ctx.emit(|l, r| l.on_name_updated(r, &r.name));
    }

    fn check_firmware_timer(&mut self, ctx: &mut DeviceContext<'_>) {
        if !self.firmware.is_idle() {
            return;
        }
        let now = self.host.now_utc_ms();
        let next = ctx.record.next_firmware_check_utc_ms;
        if now >= next {
            self.firmware.begin_version_query();
            self.send_request(&tx::GetFirmwareVersionRequest);
        } else {
            self.host.start_timer(Timer::FirmwareCheck, next - now);
        }
    }

    fn retry_firmware_in(&mut self, ctx: &mut DeviceContext<'_>, minutes: u32) {
        ctx.record.next_firmware_check_utc_ms =
            self.host.now_utc_ms() + u64::from(minutes) * 60 * 1000;
        logged(
            ctx.store.update_firmware_check_timestamp(ctx.record),
            "firmware check",
        );
        self.check_firmware_timer(ctx);
    }

    fn on_firmware_version(&mut self, ctx: &mut DeviceContext<'_>, version: u32) {
        let changed = ctx.record.firmware_version != version;
        if changed {
            ctx.record.firmware_version = version;
            logged(
                ctx.store.update_firmware_version(ctx.record),
                "firmware version",
            );
        }
        log::debug!("{}: firmware version {version}", ctx.record.address);
        self.firmware.begin_download();
        let uuid = ctx.record.uuid_string().unwrap_or_default();
        self.host.fetch_firmware(uuid, version);
        if changed {
            ctx.emit(|l, r| l.on_firmware_version_updated(r, version));
        }
    }

    fn on_firmware_progress(&mut self, ctx: &mut DeviceContext<'_>, progress: Progress) {
        match progress {
            Progress::Send(chunks) => {
                for chunk in &chunks {
                    self.send_signed(chunk);
                }
            }
            Progress::Aborted(minutes) => self.retry_firmware_in(ctx, minutes),
            Progress::Complete => {
                log::info!("{}: firmware update done", ctx.record.address);
                // The button installs the image when the link drops.
                self.send_signed(&tx::ForceBtDisconnectInd {
                    restart_advertising: true,
                });
                ctx.record.next_firmware_check_utc_ms =
                    self.host.now_utc_ms() + u64::from(RETRY_AFTER_UPDATE_MINUTES) * 60 * 1000;
                logged(
                    ctx.store.update_firmware_check_timestamp(ctx.record),
                    "firmware check",
                );
            }
        }
    }
}
