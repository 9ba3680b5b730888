//! Decode errors and the caller-visible failure codes.

/// Packet decode error. A decode error never escapes the session; the packet is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of packet")]
    UnexpectedEnd,
    #[error("button notification without events")]
    EmptyBatch,
}

/// Sub-reason of [`Failure::GenuineCheckFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenuineCheck {
    UnexpectedAddress = 0,
    InvalidCertificate = 1,
    InvalidVerifier = 2,
    InvalidCalculatedSignature = 3,
}

/// Why a session (or the connection attempt under it) was given up.
///
/// Reported to listeners together with its numeric `(code, subcode)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("app credentials not matching, denied by button")]
    AppCredentialsDeniedByButton,
    #[error("app credentials not matching, denied by app")]
    AppCredentialsDeniedByApp,
    #[error("genuine check failed: {0:?}")]
    GenuineCheckFailed(GenuineCheck),
    #[error("quick verify signature mismatch")]
    QuickVerifySignatureMismatch,
    #[error("packet signature mismatch")]
    PacketSignatureMismatch,
    #[error("too many apps connected")]
    TooManyAppsConnected,
    #[error("unexpected service layout")]
    ServiceDiscoveryUnexpectedLayout,
    #[error("transport connect error {0}")]
    TransportConnect(u32),
    #[error("full verify failed with unknown reason {0}")]
    FullVerifyFailedUnknownReason(u8),
    #[error("button not in pairable mode")]
    NotInPairableMode,
}

impl Failure {
    pub fn code(&self) -> u32 {
        match self {
            Failure::AppCredentialsDeniedByButton => 10,
            Failure::AppCredentialsDeniedByApp => 11,
            Failure::GenuineCheckFailed(_) => 12,
            Failure::QuickVerifySignatureMismatch => 13,
            Failure::PacketSignatureMismatch => 14,
            Failure::TooManyAppsConnected => 15,
            Failure::ServiceDiscoveryUnexpectedLayout => 16,
            Failure::TransportConnect(_) => 17,
            Failure::FullVerifyFailedUnknownReason(_) => 18,
            Failure::NotInPairableMode => 50,
        }
    }

    pub fn subcode(&self) -> u32 {
        match self {
            Failure::GenuineCheckFailed(sub) => *sub as u32,
            Failure::TransportConnect(status) => *status,
            Failure::FullVerifyFailedUnknownReason(reason) => *reason as u32,
            _ => 0,
        }
    }
}
