//! Button notification decoding: per-item event counters and the semantic events each item maps to.
//!
//! The button counts every press-state change. Modulo 4 the counter phases are
//! 1: down, 2: hold, 3: up, 0: single-click timeout. A batch carries the counter of its last
//! item only; the others are reconstructed backwards from the phase table.

use crate::listener::{ButtonEvent, ClickKind, EventMeta};
use crate::protocol::rx::{ButtonEventItem, ButtonNotification};

const TYPE_UP: u8 = 0;
const TYPE_DOWN: u8 = 1;
const TYPE_SINGLE_CLICK_TIMEOUT: u8 = 2;
const TYPE_HOLD: u8 = 3;

fn item_type(encoded: u8) -> u8 {
    if encoded >> 3 != 0 {
        TYPE_UP
    } else {
        encoded & 3
    }
}

/// Event counter of each item, given the counter of the last one.
pub fn backfill_counters(event_counter: u32, items: &[ButtonEventItem]) -> Vec<u32> {
    let mut out = vec![0u32; items.len()];
    let Some(last) = out.last_mut() else {
        return out;
    };
    *last = event_counter;
    let mut ec = event_counter;
    for i in (0..items.len().saturating_sub(1)).rev() {
        let ty = item_type(items[i].encoded);
        let step = match ec % 4 {
            0 | 2 => 1,
            // Previous was a down: a single-click timeout sits between, otherwise an up.
            1 if ty == TYPE_SINGLE_CLICK_TIMEOUT => 1,
            1 => 2,
            // Previous was an up: a hold sits between, otherwise a down.
            _ if ty == TYPE_HOLD => 1,
            _ => 2,
        };
        ec = ec.wrapping_sub(step);
        out[i] = ec;
    }
    out
}

/// One item of a batch, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedItem {
    pub event_count: u32,
    pub meta: EventMeta,
    pub events: Vec<ButtonEvent>,
    /// Completed clicks must be acknowledged so the button can drop them from its queue.
    pub needs_ack: bool,
}

/// Semantic events for one item, in delivery order.
pub fn decode_item(item: &ButtonEventItem) -> (Vec<ButtonEvent>, bool) {
    let enc = item.encoded;
    let ty = item_type(enc);
    let mut was_hold = false;
    let mut single = false;
    let mut double = false;
    let mut next_up_is_double = false;
    if enc >> 3 != 0 {
        was_hold = enc & 4 != 0;
        single = enc & 2 != 0 && enc & 1 == 0;
        double = enc & 2 != 0 && enc & 1 != 0;
    } else if enc == 7 {
        next_up_is_double = true;
    }

    let mut events = Vec::new();
    match ty {
        TYPE_UP => {
            events.push(ButtonEvent::UpOrDown { up: true });
            if !was_hold {
                events.push(ButtonEvent::ClickOrHold { hold: false });
                if single {
                    events.push(ButtonEvent::SingleOrDoubleClickOrHold(ClickKind::Single));
                }
            }
            if single {
                events.push(ButtonEvent::SingleOrDoubleClick { double: false });
            }
            if double {
                events.push(ButtonEvent::SingleOrDoubleClick { double: true });
                events.push(ButtonEvent::SingleOrDoubleClickOrHold(ClickKind::Double));
            }
        }
        TYPE_DOWN => events.push(ButtonEvent::UpOrDown { up: false }),
        TYPE_SINGLE_CLICK_TIMEOUT => {
            events.push(ButtonEvent::SingleOrDoubleClick { double: false });
            events.push(ButtonEvent::SingleOrDoubleClickOrHold(ClickKind::Single));
        }
        _ => {
            events.push(ButtonEvent::ClickOrHold { hold: true });
            if !next_up_is_double {
                events.push(ButtonEvent::SingleOrDoubleClickOrHold(ClickKind::Hold));
            }
        }
    }
    let needs_ack = (ty == TYPE_UP && (single || double)) || ty == TYPE_SINGLE_CLICK_TIMEOUT;
    (events, needs_ack)
}

/// Decode a whole notification.
pub fn decode_notification(notification: &ButtonNotification) -> Vec<DecodedItem> {
    let counters = backfill_counters(notification.event_counter, &notification.items);
    notification
        .items
        .iter()
        .zip(counters)
        .map(|(item, event_count)| {
            let (events, needs_ack) = decode_item(item);
            DecodedItem {
                event_count,
                meta: EventMeta {
                    was_queued: item.was_queued,
                    last_queued: item.was_queued_last,
                    timestamp_ms: item.timestamp_ms(),
                },
                events,
                needs_ack,
            }
        })
        .collect()
}
