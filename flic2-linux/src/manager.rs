//! The daemon's serialized loop. Every button, its session and the store are touched only
//! here; sockets, timers and firmware fetches run as tasks that report back through
//! [`LoopEvent`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flic2_core::{
    BatteryReading, BdAddr, Button, ButtonEvent, ButtonListener, DeviceRecord, DeviceStore,
    EventMeta, Failure, FirmwareCheck, LinkMode, SessionConfig, SessionHost, Timer,
};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::Config;
use crate::firmware::FirmwareClient;
use crate::store::JsonStore;
use crate::transport::{self, BridgeLink};

/// Identifies one dial of one button. Events from an older dial are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTag {
    pub address: BdAddr,
    pub conn: u64,
}

impl fmt::Display for LinkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.conn)
    }
}

#[derive(Debug)]
pub enum LoopEvent {
    Connected { tag: LinkTag, link: BridgeLink },
    ConnectFailed { tag: LinkTag, error: String },
    Data { tag: LinkTag, packet: Vec<u8> },
    WriteDone { tag: LinkTag },
    Disconnected { tag: LinkTag },
    Timer { tag: LinkTag, timer: Timer },
    FirmwareFetched { tag: LinkTag, check: FirmwareCheck },
    Restart { tag: LinkTag, delay_ms: u64 },
    Revoked { tag: LinkTag },
}

impl LoopEvent {
    fn tag(&self) -> LinkTag {
        match self {
            LoopEvent::Connected { tag, .. }
            | LoopEvent::ConnectFailed { tag, .. }
            | LoopEvent::Data { tag, .. }
            | LoopEvent::WriteDone { tag }
            | LoopEvent::Disconnected { tag }
            | LoopEvent::Timer { tag, .. }
            | LoopEvent::FirmwareFetched { tag, .. }
            | LoopEvent::Restart { tag, .. }
            | LoopEvent::Revoked { tag } => *tag,
        }
    }
}

fn post(events: &mpsc::UnboundedSender<LoopEvent>, event: LoopEvent) {
    if let Err(e) = events.send(event) {
        log::trace!("{}: loop gone, event dropped", e.0.tag());
    }
}

fn now_utc_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a session can do to the outside world, for one bridge connection.
///
/// Dropping it (when the button drops its session) closes the link and stops its timers
/// and fetches.
pub struct LinkHost {
    tag: LinkTag,
    link: Option<BridgeLink>,
    events: mpsc::UnboundedSender<LoopEvent>,
    firmware: Arc<FirmwareClient>,
    timers: HashMap<Timer, AbortHandle>,
    fetch: Option<AbortHandle>,
}

impl LinkHost {
    fn new(
        tag: LinkTag,
        link: Option<BridgeLink>,
        events: mpsc::UnboundedSender<LoopEvent>,
        firmware: Arc<FirmwareClient>,
    ) -> Self {
        Self {
            tag,
            link,
            events,
            firmware,
            timers: HashMap::new(),
            fetch: None,
        }
    }
}

impl Drop for LinkHost {
    fn drop(&mut self) {
        for (_, t) in self.timers.drain() {
            t.abort();
        }
        if let Some(f) = self.fetch.take() {
            f.abort();
        }
    }
}

impl SessionHost for LinkHost {
    fn transmit(&mut self, data: Vec<u8>) {
        match &self.link {
            Some(link) => link.send(data),
            None => log::debug!("{}: no link for {} bytes", self.tag, data.len()),
        }
    }

    fn request_bond(&mut self) {
        // The bridge owns the radio and bonds on its own.
        log::debug!("{}: bond requested", self.tag);
    }

    fn schedule_restart(&mut self, delay_ms: u64) {
        post(
            &self.events,
            LoopEvent::Restart {
                tag: self.tag,
                delay_ms,
            },
        );
    }

    fn on_paired(&mut self) {
        log::info!("{}: paired", self.tag);
    }

    fn on_revoked(&mut self) {
        post(&self.events, LoopEvent::Revoked { tag: self.tag });
    }

    fn start_timer(&mut self, timer: Timer, delay_ms: u64) {
        self.cancel_timer(timer);
        let tag = self.tag;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            post(&events, LoopEvent::Timer { tag, timer });
        });
        self.timers.insert(timer, task.abort_handle());
    }

    fn cancel_timer(&mut self, timer: Timer) {
        if let Some(t) = self.timers.remove(&timer) {
            t.abort();
        }
    }

    fn fetch_firmware(&mut self, uuid: String, current_version: u32) {
        if let Some(f) = self.fetch.take() {
            f.abort();
        }
        let tag = self.tag;
        let events = self.events.clone();
        let firmware = self.firmware.clone();
        let task = tokio::spawn(async move {
            let check = firmware.check(&uuid, current_version).await;
            post(&events, LoopEvent::FirmwareFetched { tag, check });
        });
        self.fetch = Some(task.abort_handle());
    }

    fn now_utc_ms(&self) -> u64 {
        now_utc_ms()
    }
}

/// Logs what a button reports.
struct EventLog;

impl ButtonListener for EventLog {
    fn on_ready(&self, b: &DeviceRecord, _timestamp_ms: u64) {
        log::info!("{} ({}) ready, {} presses", b.address, b.name, b.press_count());
    }

    fn on_disconnect(&self, b: &DeviceRecord) {
        log::info!("{} disconnected", b.address);
    }

    fn on_unpaired(&self, b: &DeviceRecord) {
        log::warn!("{} unpaired by the button", b.address);
    }

    fn on_failure(&self, b: &DeviceRecord, failure: Failure) {
        log::warn!(
            "{}: {failure} ({}/{})",
            b.address,
            failure.code(),
            failure.subcode()
        );
    }

    fn on_name_updated(&self, b: &DeviceRecord, name: &str) {
        log::info!("{} renamed to {name:?}", b.address);
    }

    fn on_firmware_version_updated(&self, b: &DeviceRecord, version: u32) {
        log::info!("{} firmware {version}", b.address);
    }

    fn on_battery_level_updated(&self, b: &DeviceRecord, battery: BatteryReading) {
        log::info!("{} battery {:.2} V", b.address, battery.voltage);
    }

    fn on_button_event(&self, b: &DeviceRecord, event: ButtonEvent, meta: EventMeta) {
        let queued = if meta.was_queued { " (queued)" } else { "" };
        log::info!("{} {event:?} at {} ms{queued}", b.address, meta.timestamp_ms);
    }
}

struct Device {
    button: Button<LinkHost>,
    conn: u64,
    dial: Option<AbortHandle>,
}

pub struct Manager {
    bridge: String,
    reconnect_delay_ms: u64,
    session: Arc<SessionConfig>,
    firmware: Arc<FirmwareClient>,
    store: JsonStore,
    devices: HashMap<BdAddr, Device>,
    events: mpsc::UnboundedSender<LoopEvent>,
    inbox: mpsc::UnboundedReceiver<LoopEvent>,
}

impl Manager {
    /// Every stored button plus the configured ones to pair, all wanted.
    pub fn new(cfg: Config, store: JsonStore) -> anyhow::Result<Self> {
        let firmware = Arc::new(FirmwareClient::new(&cfg.firmware_url)?);
        let (events, inbox) = mpsc::unbounded_channel();
        let mut records: Vec<DeviceRecord> = store
            .load_all()
            .map_err(|e| anyhow::anyhow!("loading buttons: {e}"))?;
        for address in &cfg.pair {
            if !records.iter().any(|r| r.address == *address) {
                records.push(DeviceRecord::new(*address));
            }
        }
        let listener: Arc<dyn ButtonListener> = Arc::new(EventLog);
        let devices = records
            .into_iter()
            .map(|r| {
                let address = r.address;
                let mut button = Button::new(r);
                button.set_want_connected(true);
                button.add_listener(listener.clone());
                let device = Device {
                    button,
                    conn: 0,
                    dial: None,
                };
                (address, device)
            })
            .collect();
        Ok(Self {
            bridge: cfg.bridge,
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            session: Arc::new(cfg.session),
            firmware,
            store,
            devices,
            events,
            inbox,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        if self.devices.is_empty() {
            log::warn!("no buttons stored or configured to pair");
        }
        let addresses: Vec<BdAddr> = self.devices.keys().copied().collect();
        for address in addresses {
            self.dial(address, 0);
        }
        while let Some(event) = self.inbox.recv().await {
            self.handle(event);
        }
        Ok(())
    }

    /// Connect after `delay_ms`. Supersedes any earlier dial and its link's events.
    fn dial(&mut self, address: BdAddr, delay_ms: u64) {
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        if let Some(d) = device.dial.take() {
            d.abort();
        }
        device.conn += 1;
        let tag = LinkTag {
            address,
            conn: device.conn,
        };
        let key = device.button.record().key();
        let bridge = self.bridge.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            log::debug!("{tag}: dialing {bridge}");
            let event = match transport::open(&bridge, key, tag, events.clone()).await {
                Ok(link) => LoopEvent::Connected { tag, link },
                Err(e) => LoopEvent::ConnectFailed {
                    tag,
                    error: e.to_string(),
                },
            };
            post(&events, event);
        });
        device.dial = Some(task.abort_handle());
    }

    fn handle(&mut self, event: LoopEvent) {
        let tag = event.tag();
        let Some(device) = self.devices.get_mut(&tag.address) else {
            return;
        };
        if device.conn != tag.conn {
            log::trace!("{tag}: stale event");
            return;
        }
        let button = &mut device.button;
        let store = &mut self.store;
        match event {
            LoopEvent::Connected { link, .. } => {
                device.dial = None;
                log::info!("{tag}: link up");
                let host = LinkHost::new(
                    tag,
                    Some(link),
                    self.events.clone(),
                    self.firmware.clone(),
                );
                button.on_connected(store, host, LinkMode::Stream, self.session.clone());
            }
            LoopEvent::ConnectFailed { error, .. } => {
                log::warn!("{tag}: bridge connect failed: {error}");
                device.dial = None;
                self.redial(tag.address, self.reconnect_delay_ms);
            }
            LoopEvent::Data { packet, .. } => button.on_data(store, &packet),
            LoopEvent::WriteDone { .. } => button.on_write_done(),
            LoopEvent::Timer { timer, .. } => button.on_timer(store, timer),
            LoopEvent::FirmwareFetched { check, .. } => button.on_firmware_checked(store, check),
            LoopEvent::Disconnected { .. } => {
                button.on_disconnected();
                self.redial(tag.address, self.reconnect_delay_ms);
            }
            LoopEvent::Restart { delay_ms, .. } => {
                log::info!("{tag}: restarting in {delay_ms} ms");
                button.on_disconnected();
                self.redial(tag.address, delay_ms);
            }
            LoopEvent::Revoked { .. } => {
                button.forget(store);
                if let Some(d) = self.devices.remove(&tag.address) {
                    if let Some(dial) = d.dial {
                        dial.abort();
                    }
                }
                log::info!("{tag}: forgotten");
            }
        }
    }

    fn redial(&mut self, address: BdAddr, delay_ms: u64) {
        let wanted = self
            .devices
            .get(&address)
            .is_some_and(|d| d.button.want_connected());
        if wanted {
            self.dial(address, delay_ms);
        }
    }
}
