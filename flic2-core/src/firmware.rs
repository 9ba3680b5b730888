//! Firmware update sub-protocol: version query, image fetch, start, windowed data stream.
//!
//! Positions and lengths are counted in 32-bit words.

use crate::protocol::tx::{FirmwareUpdateDataInd, StartFirmwareUpdateRequest};

/// Images shorter than this are treated as "no update".
pub const MIN_IMAGE_LEN: usize = 1000;
const IV_LEN: usize = 8;
const MAX_CHUNK_WORDS: u32 = 30;
const MAX_UNACKED_WORDS: u32 = 512;
const STATUS_INTERVAL: u16 = 60;

pub const RETRY_NO_UPDATE_MINUTES: u32 = 24 * 60;
pub const RETRY_START_REJECTED_MINUTES: u32 = 10;
/// Next check after the button accepted a full image.
pub const RETRY_AFTER_UPDATE_MINUTES: u32 = 1;
pub const RETRY_SIGNATURE_REJECTED_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareState {
    #[default]
    Idle,
    GettingVersion,
    Downloading,
    Starting,
    Performing,
    Done,
}

/// Result of a firmware check: an image (`iv ‖ payload`) or none, and when to check again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareCheck {
    pub image: Option<Vec<u8>>,
    pub retry_minutes: u32,
}

/// What the session does after a fetch completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Back to idle; check again after this many minutes.
    Retry(u32),
    Start(StartFirmwareUpdateRequest),
}

/// What the session does after a start response or position notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Send(Vec<FirmwareUpdateDataInd>),
    /// Back to idle; check again after this many minutes.
    Aborted(u32),
    /// Every word acknowledged; the button installs the image on disconnect.
    Complete,
}

#[derive(Debug, Default)]
pub struct FirmwareUpdate {
    state: FirmwareState,
    data: Vec<u8>,
    sent_pos: u32,
    ack_pos: u32,
}

impl FirmwareUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FirmwareState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == FirmwareState::Idle
    }

    pub fn begin_version_query(&mut self) {
        self.state = FirmwareState::GettingVersion;
    }

    pub fn begin_download(&mut self) {
        self.state = FirmwareState::Downloading;
    }

    fn words(&self) -> u32 {
        (self.data.len() / 4) as u32
    }

    pub fn on_fetched(&mut self, check: FirmwareCheck) -> FetchOutcome {
        let (image, retry_minutes) = match check.image {
            Some(image) if image.len() < MIN_IMAGE_LEN => {
                log::debug!("firmware image too short ({} bytes)", image.len());
                (None, RETRY_NO_UPDATE_MINUTES)
            }
            other => (other, check.retry_minutes),
        };
        let Some(image) = image else {
            self.state = FirmwareState::Idle;
            return FetchOutcome::Retry(retry_minutes);
        };
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&image[..IV_LEN]);
        self.data = image[IV_LEN..].to_vec();
        self.sent_pos = 0;
        self.ack_pos = 0;
        self.state = FirmwareState::Starting;
        FetchOutcome::Start(StartFirmwareUpdateRequest {
            len: self.words() as u16,
            iv,
            status_interval: STATUS_INTERVAL,
        })
    }

    pub fn on_start_response(&mut self, start_pos: i32) -> Progress {
        if start_pos < 0 {
            // -1 invalid parameters, -2 busy
            log::info!("firmware update not started ({start_pos})");
            self.reset();
            return Progress::Aborted(RETRY_START_REJECTED_MINUTES);
        }
        self.sent_pos = start_pos as u32;
        self.ack_pos = start_pos as u32;
        self.state = FirmwareState::Performing;
        Progress::Send(self.next_chunks())
    }

    pub fn on_notification(&mut self, pos: u32) -> Progress {
        self.ack_pos = pos;
        if pos == self.words() {
            self.state = FirmwareState::Done;
            self.data = Vec::new();
            Progress::Complete
        } else if pos == 0 {
            log::warn!("firmware image rejected by button");
            self.reset();
            Progress::Aborted(RETRY_SIGNATURE_REJECTED_MINUTES)
        } else {
            Progress::Send(self.next_chunks())
        }
    }

    /// Data chunks that fit in the unacknowledged window.
    fn next_chunks(&mut self) -> Vec<FirmwareUpdateDataInd> {
        let words = self.words();
        let mut out = Vec::new();
        while self.sent_pos < words && self.sent_pos.wrapping_sub(self.ack_pos) < MAX_UNACKED_WORDS
        {
            let len = (words - self.sent_pos)
                .min(MAX_CHUNK_WORDS)
                .min(MAX_UNACKED_WORDS - self.sent_pos.wrapping_sub(self.ack_pos));
            let start = self.sent_pos as usize * 4;
            let end = (self.sent_pos + len) as usize * 4;
            out.push(FirmwareUpdateDataInd {
                chunk: self.data[start..end].to_vec(),
            });
            self.sent_pos += len;
        }
        out
    }

    fn reset(&mut self) {
        self.state = FirmwareState::Idle;
        self.data = Vec::new();
        self.sent_pos = 0;
        self.ack_pos = 0;
    }
}
