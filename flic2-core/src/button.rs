//! One button as the host sees it: its record, listeners and the session of the current
//! physical connection, if any.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::device::{BatteryReading, DeviceRecord, DeviceStore, AUTO_DISCONNECT_NEVER};
use crate::firmware::FirmwareCheck;
use crate::fragment::LinkMode;
use crate::listener::{ButtonListener, ListenerSet};
use crate::protocol::MAX_NAME_LEN;
use crate::session::{DeviceContext, Session, SessionHost, Timer};

/// Shortest auto disconnect time the button accepts, in seconds.
pub const MIN_AUTO_DISCONNECT_TIME: u16 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Link up, handshake or initial sync in progress.
    ConnectedStarting,
    ConnectedReady,
}

/// Longest prefix of `name` that fits the button's name field.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

pub struct Button<H: SessionHost> {
    record: DeviceRecord,
    listeners: Arc<ListenerSet>,
    session: Option<Session<H>>,
    want_connected: bool,
}

impl<H: SessionHost> Button<H> {
    pub fn new(record: DeviceRecord) -> Self {
        Self {
            record,
            listeners: Arc::new(ListenerSet::new()),
            session: None,
            want_connected: false,
        }
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn ButtonListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ButtonListener>) {
        self.listeners.remove(listener);
    }

    pub fn session(&self) -> Option<&Session<H>> {
        self.session.as_ref()
    }

    pub fn want_connected(&self) -> bool {
        self.want_connected
    }

    pub fn set_want_connected(&mut self, want: bool) {
        self.want_connected = want;
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn press_count(&self) -> u32 {
        self.record.press_count()
    }

    pub fn firmware_version(&self) -> u32 {
        self.record.firmware_version
    }

    pub fn last_known_battery(&self) -> Option<BatteryReading> {
        self.record.battery
    }

    pub fn ready_timestamp_ms(&self) -> u64 {
        self.record.ready_timestamp_ms
    }

    pub fn is_unpaired(&self) -> bool {
        self.record.unpaired
    }

    pub fn connection_state(&self) -> ConnectionState {
        if !self.want_connected {
            return ConnectionState::Disconnected;
        }
        match &self.session {
            None => ConnectionState::Connecting,
            Some(s) if s.is_established() => ConnectionState::ConnectedReady,
            Some(_) => ConnectionState::ConnectedStarting,
        }
    }

    fn with_session(
        &mut self,
        store: &mut dyn DeviceStore,
        f: impl FnOnce(&mut Session<H>, &mut DeviceContext<'_>),
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut ctx = DeviceContext {
            record: &mut self.record,
            store,
            listeners: &self.listeners,
        };
        f(session, &mut ctx);
    }

    /// The physical link is up: start a session over it.
    pub fn on_connected(
        &mut self,
        store: &mut dyn DeviceStore,
        host: H,
        mode: LinkMode,
        config: Arc<SessionConfig>,
    ) {
        if let Some(mut old) = self.session.take() {
            old.end();
        }
        self.session = Some(Session::new(host, mode, config));
        let record = &self.record;
        self.listeners.for_each(|l| l.on_connect(record));
        self.with_session(store, |s, ctx| s.start(ctx));
    }

    /// The physical link went away. Returns the ended session so the host can drop its
    /// resources.
    pub fn on_disconnected(&mut self) -> Option<Session<H>> {
        let mut session = self.session.take()?;
        session.end();
        let record = &self.record;
        self.listeners.for_each(|l| l.on_disconnect(record));
        Some(session)
    }

    pub fn on_data(&mut self, store: &mut dyn DeviceStore, data: &[u8]) {
        self.with_session(store, |s, ctx| s.on_data(ctx, data));
    }

    pub fn on_write_done(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_write_done();
        }
    }

    pub fn on_timer(&mut self, store: &mut dyn DeviceStore, timer: Timer) {
        self.with_session(store, |s, ctx| s.on_timer(ctx, timer));
    }

    pub fn on_firmware_checked(&mut self, store: &mut dyn DeviceStore, check: FirmwareCheck) {
        self.with_session(store, |s, ctx| s.on_firmware_checked(ctx, check));
    }

    /// Rename the button. The local name wins over the button's copy.
    pub fn set_name(&mut self, store: &mut dyn DeviceStore, name: &str, now_utc_ms: u64) {
        if self.record.unpaired {
            return;
        }
        let name = truncate_name(name);
        self.record.name = name.to_string();
        self.record.name_timestamp_utc_ms = now_utc_ms;
        if let Err(e) = store.update_name(&self.record) {
            log::warn!("store name: {e}");
        }
        self.with_session(store, |s, ctx| s.send_name(ctx));
    }

    /// Seconds of inactivity after which the button drops the link; 511 means never.
    /// Values are clamped to 40..=511.
    pub fn set_auto_disconnect_time(&mut self, seconds: u16) {
        if self.record.unpaired {
            return;
        }
        self.record.auto_disconnect_time =
            seconds.clamp(MIN_AUTO_DISCONNECT_TIME, AUTO_DISCONNECT_NEVER);
        if let Some(session) = self.session.as_mut() {
            session.send_auto_disconnect_time(self.record.auto_disconnect_time);
        }
    }

    /// Stop wanting the button, drop its session and remove it from the store.
    pub fn forget(&mut self, store: &mut dyn DeviceStore) -> Option<Session<H>> {
        self.want_connected = false;
        let session = self.on_disconnected();
        if let Err(e) = store.delete(self.record.key()) {
            log::warn!("store delete: {e}");
        }
        session
    }
}
