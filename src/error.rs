use thiserror::Error;

use crate::sdk::SdkError;

/// Everything that can go wrong between the device and the downstream pin.
///
/// The loops lean on [`CaptureError::is_transient`] to decide between a short
/// backoff-and-retry and tearing the worker down.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No enumerated channel exposed an HDMI input.
    #[error("no HDMI-capable capture channel found")]
    NoDevice,
    /// A channel matching the configured target path was not found.
    #[error("no capture channel at {0}")]
    NoSuchDevice(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("no delivery buffer available")]
    BufferUnavailable,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("downstream still holds buffers")]
    BuffersOutstanding,
    #[error("signal lost")]
    SignalLost,
    #[error("input format changed")]
    FormatChanged,
    #[error("no channels present in the audio signal")]
    NoChannels,
    #[error("invalid bit depth {0}")]
    InvalidBitDepth(u8),
    #[error("failed to deliver sample downstream")]
    DeliverFailed,
    #[error("downstream rejected the proposed media type")]
    RenegotiateFailed,
    #[error("failed to open channel at {0}")]
    OpenFailed(String),
    #[error("failed to register device notifications")]
    NotifyRegisterFailed,
    #[error("failed to start {0} capture")]
    StartCaptureFailed(&'static str),
    #[error("device call failed: {0}")]
    Sdk(#[from] SdkError),
}

impl CaptureError {
    /// Transient errors are retried after a short backoff without leaving
    /// the capture loop.
    pub fn is_transient(&self) -> bool {
        match self {
            CaptureError::DeviceBusy
            | CaptureError::BufferUnavailable
            | CaptureError::Timeout(_)
            | CaptureError::BuffersOutstanding => true,
            _ => false,
        }
    }

    /// Recoverable format errors suppress the current frame and re-probe.
    pub fn is_recoverable_format(&self) -> bool {
        match self {
            CaptureError::FormatChanged
            | CaptureError::SignalLost
            | CaptureError::NoChannels
            | CaptureError::InvalidBitDepth(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_split_is_disjoint() {
        let transient = CaptureError::Timeout("frame");
        assert!(transient.is_transient());
        assert!(!transient.is_recoverable_format());

        let fatal = CaptureError::DeliverFailed;
        assert!(!fatal.is_transient());
        assert!(!fatal.is_recoverable_format());

        assert!(CaptureError::SignalLost.is_recoverable_format());
    }
}
