//! Listener registration and fan-out.
//!
//! Dispatch tolerates listeners being added or removed from inside a callback: a removed
//! listener gets no further calls and one added mid-dispatch is called for the current event.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{BatteryReading, DeviceRecord};
use crate::error::Failure;

/// Delivery details shared by every button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// The event happened while disconnected and was replayed from the button's queue.
    pub was_queued: bool,
    /// Last of the replayed events.
    pub last_queued: bool,
    /// Button clock in ms.
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Single,
    Double,
    Hold,
}

/// One decoded button event. A single press produces several of these, one per view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    UpOrDown { up: bool },
    ClickOrHold { hold: bool },
    SingleOrDoubleClick { double: bool },
    SingleOrDoubleClickOrHold(ClickKind),
}

/// Callbacks for one button. Every method defaults to doing nothing.
pub trait ButtonListener: Send + Sync {
    fn on_connect(&self, _button: &DeviceRecord) {}

    /// The session is established and queued events have been requested.
    fn on_ready(&self, _button: &DeviceRecord, _timestamp_ms: u64) {}

    fn on_disconnect(&self, _button: &DeviceRecord) {}

    /// The button no longer accepts our pairing credential.
    fn on_unpaired(&self, _button: &DeviceRecord) {}

    fn on_failure(&self, _button: &DeviceRecord, _failure: Failure) {}

    fn on_name_updated(&self, _button: &DeviceRecord, _name: &str) {}

    fn on_firmware_version_updated(&self, _button: &DeviceRecord, _version: u32) {}

    fn on_battery_level_updated(&self, _button: &DeviceRecord, _battery: BatteryReading) {}

    /// Every view of a press arrives here, one call per view:
    /// - [`ButtonEvent::UpOrDown`]: each press and release;
    /// - [`ButtonEvent::ClickOrHold`]: a click on release, or a hold while still pressed;
    /// - [`ButtonEvent::SingleOrDoubleClick`]: decided once the double-click window closes;
    /// - [`ButtonEvent::SingleOrDoubleClickOrHold`]: the three-way variant of the above.
    fn on_button_event(&self, _button: &DeviceRecord, _event: ButtonEvent, _meta: EventMeta) {}
}

type Entry = (u64, Arc<dyn ButtonListener>);

/// Ordered listener set, safe to mutate during dispatch.
#[derive(Default)]
pub struct ListenerSet {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: Vec<Entry>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a listener; adding the same `Arc` twice is a no-op.
    pub fn add(&self, listener: Arc<dyn ButtonListener>) {
        let mut inner = self.lock();
        if inner.entries.iter().any(|(_, l)| Arc::ptr_eq(l, &listener)) {
            return;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, listener));
    }

    pub fn remove(&self, listener: &Arc<dyn ButtonListener>) {
        self.lock().entries.retain(|(_, l)| !Arc::ptr_eq(l, listener));
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on each listener, in registration order. The lock is not held during calls.
    pub fn for_each(&self, mut f: impl FnMut(&dyn ButtonListener)) {
        let mut last: Option<u64> = None;
        loop {
            let next = {
                let inner = self.lock();
                inner
                    .entries
                    .iter()
                    .find(|(id, _)| last.map_or(true, |l| *id > l))
                    .cloned()
            };
            let Some((id, listener)) = next else {
                break;
            };
            last = Some(id);
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}
