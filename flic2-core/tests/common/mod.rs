//! Test harness: a recording host, a recording listener and a simulated button that
//! answers the app side of the protocol.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signer, SigningKey};
use flic2_core::chaskey::{Direction, Subkeys, TAG_LEN};
use flic2_core::handshake::{self, SessionSecret};
use flic2_core::protocol::{rx, tx, Packet};
use flic2_core::{
    BatteryReading, BdAddr, Button, ButtonEvent, ButtonListener, DeviceRecord, EventMeta,
    Failure, LinkMode, MemoryStore, PairingCredential, SessionConfig, SessionHost, Timer,
};
use x25519_dalek::{PublicKey, StaticSecret};

pub const ADDRESS: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
pub const DEVICE_RANDOM: [u8; 8] = [9, 8, 7, 6, 5, 4, 3, 2];

/// Everything the session asked its host to do.
#[derive(Debug, Default)]
pub struct HostLog {
    pub written: Vec<Vec<u8>>,
    pub bonds: u32,
    pub restarts: Vec<u64>,
    pub paired: u32,
    pub revoked: u32,
    pub timers: HashMap<Timer, u64>,
    pub cancelled: Vec<Timer>,
    pub fetches: Vec<(String, u32)>,
    pub now: u64,
}

pub struct TestHost {
    log: Rc<RefCell<HostLog>>,
}

impl SessionHost for TestHost {
    fn transmit(&mut self, data: Vec<u8>) {
        self.log.borrow_mut().written.push(data);
    }

    fn request_bond(&mut self) {
        self.log.borrow_mut().bonds += 1;
    }

    fn schedule_restart(&mut self, delay_ms: u64) {
        self.log.borrow_mut().restarts.push(delay_ms);
    }

    fn on_paired(&mut self) {
        self.log.borrow_mut().paired += 1;
    }

    fn on_revoked(&mut self) {
        self.log.borrow_mut().revoked += 1;
    }

    fn start_timer(&mut self, timer: Timer, delay_ms: u64) {
        self.log.borrow_mut().timers.insert(timer, delay_ms);
    }

    fn cancel_timer(&mut self, timer: Timer) {
        let mut log = self.log.borrow_mut();
        log.timers.remove(&timer);
        log.cancelled.push(timer);
    }

    fn fetch_firmware(&mut self, uuid: String, current_version: u32) {
        self.log.borrow_mut().fetches.push((uuid, current_version));
    }

    fn now_utc_ms(&self) -> u64 {
        self.log.borrow().now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connect,
    Ready(u64),
    Disconnect,
    Unpaired,
    Failure(Failure),
    Name(String),
    Firmware(u32),
    Battery(f32),
    Event(ButtonEvent, EventMeta),
}

#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    fn push(&self, s: Seen) {
        self.seen.lock().unwrap().push(s);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Seen) -> bool) -> usize {
        self.seen.lock().unwrap().iter().filter(|s| f(s)).count()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Failure(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ButtonEvent> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Event(e, _) => Some(e),
                _ => None,
            })
            .collect()
    }
}

impl ButtonListener for Recorder {
    fn on_connect(&self, _: &DeviceRecord) {
        self.push(Seen::Connect);
    }
    fn on_ready(&self, _: &DeviceRecord, timestamp_ms: u64) {
        self.push(Seen::Ready(timestamp_ms));
    }
    fn on_disconnect(&self, _: &DeviceRecord) {
        self.push(Seen::Disconnect);
    }
    fn on_unpaired(&self, _: &DeviceRecord) {
        self.push(Seen::Unpaired);
    }
    fn on_failure(&self, _: &DeviceRecord, failure: Failure) {
        self.push(Seen::Failure(failure));
    }
    fn on_name_updated(&self, _: &DeviceRecord, name: &str) {
        self.push(Seen::Name(name.to_string()));
    }
    fn on_firmware_version_updated(&self, _: &DeviceRecord, version: u32) {
        self.push(Seen::Firmware(version));
    }
    fn on_battery_level_updated(&self, _: &DeviceRecord, battery: BatteryReading) {
        self.push(Seen::Battery(battery.voltage));
    }
    fn on_button_event(&self, _: &DeviceRecord, event: ButtonEvent, meta: EventMeta) {
        self.push(Seen::Event(event, meta));
    }
}

/// The button end of the link: holds its identity keys and signs what it sends.
pub struct SimButton {
    pub vendor: SigningKey,
    pub identity: StaticSecret,
    pub keys: Option<Subkeys>,
    /// Packets sent by the button.
    pub tx_counter: u64,
    /// Signed packets received from the app.
    pub rx_counter: u64,
}

impl SimButton {
    pub fn new() -> Self {
        Self {
            vendor: SigningKey::from_bytes(&[0x42; 32]),
            identity: StaticSecret::from([0x24; 32]),
            keys: None,
            tx_counter: 0,
            rx_counter: 0,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.identity).to_bytes()
    }

    /// Config whose vendor key signed this button's certificate.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            vendor_public_key: self.vendor.verifying_key().to_bytes(),
            ..SessionConfig::default()
        }
    }

    pub fn certificate(&self, address: &[u8; 6], random: bool) -> [u8; 64] {
        let mut msg = address.to_vec();
        msg.push(random as u8);
        msg.extend_from_slice(&self.public_key());
        self.vendor.sign(&msg).to_bytes()
    }

    pub fn full_verify_response_1(&self, tmp_id: u32) -> Vec<u8> {
        rx::FullVerifyResponse1 {
            tmp_id,
            signature: self.certificate(&ADDRESS, false),
            address: ADDRESS,
            address_type_random: false,
            public_key: self.public_key(),
            random: DEVICE_RANDOM,
        }
        .encode()
    }

    /// Session secret the app derived from the given ephemeral key and random.
    pub fn secret_for(&self, app_public: &[u8; 32], app_random: &[u8; 8]) -> SessionSecret {
        let shared = self
            .identity
            .diffie_hellman(&PublicKey::from(*app_public))
            .to_bytes();
        let variant = self.certificate(&ADDRESS, false)[32] & 3;
        handshake::session_secret(&shared, variant, &DEVICE_RANDOM, app_random)
    }

    pub fn use_keys(&mut self, keys: Subkeys) {
        self.keys = Some(keys);
        self.tx_counter = 0;
        self.rx_counter = 0;
    }

    pub fn sign<P: Packet>(&mut self, packet: &P) -> Vec<u8> {
        let keys = self.keys.expect("button keys");
        let mut bytes = packet.encode();
        let tag = keys.mac(Direction::FromDevice, self.tx_counter, &bytes);
        self.tx_counter += 1;
        bytes.extend_from_slice(&tag);
        bytes
    }

    /// Check the tag of a packet from the app; returns opcode and body.
    pub fn open(&mut self, packet: &[u8]) -> (u8, Vec<u8>) {
        let keys = self.keys.expect("button keys");
        let (data, tag) = packet.split_at(packet.len() - TAG_LEN);
        assert_eq!(
            keys.mac(Direction::ToDevice, self.rx_counter, data)[..],
            tag[..],
            "bad tag on app packet {}",
            data[0]
        );
        self.rx_counter += 1;
        (data[0], data[1..].to_vec())
    }
}

pub fn paired_record() -> DeviceRecord {
    let mut record = DeviceRecord::new(BdAddr::from_wire(ADDRESS));
    record.name = "desk".to_string();
    record.uuid = Some(uuid::Uuid::from_bytes([0xab; 16]));
    record.pairing = Some(PairingCredential {
        id: 0x0102_0304,
        key: [0x5a; 16],
    });
    record
}

pub struct Harness {
    pub button: Button<TestHost>,
    pub store: MemoryStore,
    pub log: Rc<RefCell<HostLog>>,
    pub recorder: Arc<Recorder>,
    pub sim: SimButton,
    pub config: Arc<SessionConfig>,
    taken: usize,
}

impl Harness {
    pub fn new(record: DeviceRecord) -> Self {
        let sim = SimButton::new();
        let config = Arc::new(sim.config());
        Self::with_config(record, sim, config)
    }

    pub fn with_config(record: DeviceRecord, sim: SimButton, config: Arc<SessionConfig>) -> Self {
        let store = if record.pairing.is_some() {
            MemoryStore::from_records([record.clone()])
        } else {
            MemoryStore::new()
        };
        let mut button = Button::new(record);
        button.set_want_connected(true);
        let recorder = Arc::new(Recorder::default());
        button.add_listener(recorder.clone());
        Self {
            button,
            store,
            log: Rc::new(RefCell::new(HostLog::default())),
            recorder,
            sim,
            config,
            taken: 0,
        }
    }

    pub fn connect(&mut self) {
        let host = TestHost {
            log: self.log.clone(),
        };
        self.button
            .on_connected(&mut self.store, host, LinkMode::Stream, self.config.clone());
    }

    /// Complete every pending write so queued packets reach the wire.
    pub fn pump(&mut self) {
        loop {
            let before = self.log.borrow().written.len();
            self.button.on_write_done();
            if self.log.borrow().written.len() == before {
                break;
            }
        }
    }

    /// Packets written since the last call.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.pump();
        let log = self.log.borrow();
        let out = log.written[self.taken..].to_vec();
        self.taken = log.written.len();
        out
    }

    /// Signed packets written since the last call, checked and split into opcode and body.
    pub fn take_signed(&mut self) -> Vec<(u8, Vec<u8>)> {
        self.take_sent()
            .iter()
            .map(|p| self.sim.open(p))
            .collect()
    }

    pub fn opcodes(&mut self) -> Vec<u8> {
        self.take_signed().into_iter().map(|(op, _)| op).collect()
    }

    pub fn deliver(&mut self, packet: &[u8]) {
        self.button.on_data(&mut self.store, packet);
    }

    pub fn deliver_signed<P: Packet>(&mut self, packet: &P) {
        let bytes = self.sim.sign(packet);
        self.deliver(&bytes);
    }

    /// Quick verify with the record's credential. Leaves the init request unread.
    pub fn establish_quick(&mut self) {
        self.connect();
        let sent = self.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], tx::QUICK_VERIFY_REQUEST);
        let req = tx::QuickVerifyRequest::decode(&sent[0][1..]).unwrap();
        let pairing = self.button.record().pairing.expect("paired record");
        assert_eq!(req.pairing_id, pairing.id);
        self.sim.use_keys(handshake::quick_verify_subkeys(
            &pairing.key,
            &req.random,
            &DEVICE_RANDOM,
        ));
        self.deliver_signed(&rx::QuickVerifyResponse {
            random: DEVICE_RANDOM,
            tmp_id: req.tmp_id,
        });
    }

    /// Full verify as an unpaired app. Leaves the init request unread.
    pub fn establish_full(&mut self) -> SessionSecret {
        self.connect();
        let sent = self.take_sent();
        assert_eq!(sent[0][0], tx::FULL_VERIFY_REQUEST_1);
        let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;
        let fvr1 = self.sim.full_verify_response_1(tmp_id);
        self.deliver(&fvr1);

        let sent = self.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], tx::FULL_VERIFY_REQUEST_2_WITHOUT_APP_TOKEN);
        let req = tx::FullVerifyRequest2WithoutAppToken::decode(&sent[0][1..]).unwrap();
        let secret = self.sim.secret_for(&req.ecdh_public_key, &req.random);
        assert_eq!(req.verifier, handshake::verifier(&secret));
        self.sim.use_keys(handshake::session_subkeys(&secret));
        self.deliver_signed(&rx::FullVerifyResponse2 {
            app_credentials_match: true,
            cares_about_app_credentials: false,
            uuid: [0xcd; 16],
            name: "hall".to_string(),
            firmware_version: 9,
            battery_level: 900,
            serial_number: "BA12-C34567".to_string(),
        });
        secret
    }

    /// Answer the init request so the session runs its post-init sequence.
    pub fn finish_init(&mut self, boot_id: u32, event_count: u32) -> Vec<u8> {
        let sent = self.take_signed();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, tx::INIT_BUTTON_EVENTS_LIGHT_REQUEST);
        self.deliver_signed(&rx::InitButtonEventsResponse {
            has_queued_events: false,
            timestamp: 5 * 32768,
            event_count,
            boot_id,
        });
        self.opcodes()
    }
}
