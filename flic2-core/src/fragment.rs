//! Fragmentation layer: splits outgoing packets to the link MTU, reassembles incoming
//! fragments and serializes writes so that only one is outstanding at a time.

use std::collections::VecDeque;

/// MTU of the attribute-write transport before any negotiation.
pub const GATT_MTU: usize = 23;

const CONN_ID_MASK: u8 = 0x1f;
const NEWLY_ASSIGNED: u8 = 0x20;
const MORE_FRAGMENTS: u8 = 0x80;
// ATT write overhead plus our header byte.
const OVERHEAD: usize = 4;

/// How packets travel over the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Attribute writes/notifications, each carrying a one-byte fragment header.
    Fragmented { mtu: usize },
    /// Streaming socket; every read and write is one whole packet.
    Stream,
}

/// A complete logical packet (opcode first) and the connection id it arrived on.
///
/// `conn_id` is `None` on a streaming link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub packet: Vec<u8>,
    pub conn_id: Option<u8>,
}

/// Split `packet` into fragments of at most `mtu - 4` payload bytes.
///
/// All but the last fragment carry the more-fragments flag.
pub fn split(packet: &[u8], conn_id: u8, mtu: usize) -> Vec<Vec<u8>> {
    let header = conn_id & CONN_ID_MASK;
    if mtu >= OVERHEAD + packet.len() {
        let mut p = Vec::with_capacity(1 + packet.len());
        p.push(header);
        p.extend_from_slice(packet);
        return vec![p];
    }
    let step = mtu.saturating_sub(OVERHEAD).max(1);
    let mut out = Vec::with_capacity(packet.len().div_ceil(step));
    let mut chunks = packet.chunks(step).peekable();
    while let Some(chunk) = chunks.next() {
        let more = if chunks.peek().is_some() { MORE_FRAGMENTS } else { 0 };
        let mut p = Vec::with_capacity(1 + chunk.len());
        p.push(header | more);
        p.extend_from_slice(chunk);
        out.push(p);
    }
    out
}

/// Per-session link state: logical connection id, partial rx packet, tx write queue.
#[derive(Debug)]
pub struct Link {
    mode: LinkMode,
    conn_id: u8,
    pending_rx: Option<Vec<u8>>,
    tx_in_progress: bool,
    tx_queue: VecDeque<Vec<u8>>,
}

impl Link {
    pub fn new(mode: LinkMode) -> Self {
        Self {
            mode,
            conn_id: 0,
            pending_rx: None,
            tx_in_progress: false,
            tx_queue: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn conn_id(&self) -> u8 {
        self.conn_id
    }

    /// Adopt the id the button assigned to this app. Streaming links have no id.
    pub fn adopt_conn_id(&mut self, conn_id: Option<u8>) {
        if let Some(id) = conn_id {
            self.conn_id = id & CONN_ID_MASK;
        }
    }

    /// Feed one fragment (or one whole packet on a streaming link).
    ///
    /// Returns a packet when the last fragment arrives. Fragments addressed to another
    /// logical connection are dropped.
    pub fn receive(&mut self, data: &[u8]) -> Option<Inbound> {
        match self.mode {
            LinkMode::Stream => {
                if data.is_empty() {
                    return None;
                }
                Some(Inbound {
                    packet: data.to_vec(),
                    conn_id: None,
                })
            }
            LinkMode::Fragmented { .. } => {
                if data.len() < 2 {
                    return None;
                }
                let (&header, payload) = data.split_first()?;
                let packet_conn_id = header & CONN_ID_MASK;
                let newly_assigned = header & NEWLY_ASSIGNED != 0;
                let last = header & MORE_FRAGMENTS == 0;
                if (packet_conn_id != 0 && packet_conn_id != self.conn_id && !newly_assigned)
                    || (newly_assigned && self.conn_id != 0)
                {
                    log::trace!("dropping fragment for connection {packet_conn_id}");
                    return None;
                }
                self.pending_rx
                    .get_or_insert_with(Vec::new)
                    .extend_from_slice(payload);
                if !last {
                    return None;
                }
                let packet = self.pending_rx.take().unwrap_or_default();
                Some(Inbound {
                    packet,
                    conn_id: Some(packet_conn_id),
                })
            }
        }
    }

    /// Queue a logical packet for sending. Returns the write to issue now, if the link is idle.
    pub fn send(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        let blobs = match self.mode {
            LinkMode::Stream => vec![packet.to_vec()],
            LinkMode::Fragmented { mtu } => split(packet, self.conn_id, mtu),
        };
        let mut now = None;
        for blob in blobs {
            if !self.tx_in_progress {
                self.tx_in_progress = true;
                now = Some(blob);
            } else {
                self.tx_queue.push_back(blob);
            }
        }
        now
    }

    /// The previous write completed. Returns the next queued write, if any.
    pub fn write_done(&mut self) -> Option<Vec<u8>> {
        let next = self.tx_queue.pop_front();
        if next.is_none() {
            self.tx_in_progress = false;
        }
        next
    }

    pub fn queued_writes(&self) -> usize {
        self.tx_queue.len()
    }
}
