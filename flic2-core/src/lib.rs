//! Flic 2 button protocol core.
//! Host-driven: no I/O; the host feeds bytes, write completions and timer expiries in and
//! receives transmissions and requests through [`SessionHost`].

pub mod button;
pub mod buttons;
pub mod chaskey;
pub mod codec;
pub mod config;
pub mod curve25519;
pub mod device;
pub mod ed25519;
pub mod error;
pub mod field;
pub mod firmware;
pub mod fragment;
pub mod handshake;
pub mod listener;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod wire;

pub use button::{Button, ConnectionState};
pub use config::SessionConfig;
pub use device::{
    AddressType, BatteryReading, BdAddr, DeviceKey, DeviceRecord, DeviceStore, MemoryStore,
    PairingCredential, StoreError,
};
pub use error::{DecodeError, Failure, GenuineCheck};
pub use firmware::FirmwareCheck;
pub use fragment::{Link, LinkMode};
pub use listener::{ButtonEvent, ButtonListener, ClickKind, EventMeta, ListenerSet};
pub use session::{DeviceContext, Session, SessionHost, SessionState, Timer};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
