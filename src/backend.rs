//! Per-family capture transports.
//!
//! The Pro family buffers frames on the card and raises notifications; the
//! engine pulls each frame into caller memory. The USB family pushes filled
//! frames through an SDK callback; the engine copies them out of a staging
//! buffer. Each pin picks its backend once at thread start and never
//! branches on the family again.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::audio_format::AudioFormat;
use crate::bitstream::MAX_FRAME_BYTES;
use crate::device::DeviceFamily;
use crate::error::CaptureError;
use crate::event::Event;
use crate::sdk::{
    CaptureChannel, FrameCaptureRequest, NotifyBits, NotifyHandle, UsbAudioConfig,
    UsbCaptureToken, UsbVideoConfig, FRAME_ID_NEWEST_BUFFERING,
};
use crate::video_format::VideoFormat;

/// What the device reported alongside a frame notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame is buffered and ready to pull.
    Ready,
    /// The input signal changed; re-probe before pulling frames.
    SignalChange,
    /// The input source changed; re-probe before pulling frames.
    InputSourceChange,
    /// The notification fired for something else.
    NotReady,
}

/// Video transport chosen per pin at thread start.
pub trait VideoBackend: Send {
    fn start(&mut self, format: &VideoFormat) -> Result<(), CaptureError>;
    fn stop(&mut self);
    /// Blocks until the device signals a frame or the timeout passes.
    fn wait_frame(&mut self, timeout: Duration) -> bool;
    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError>;
    /// Applies a renegotiated format to the transport.
    fn reconfigure(&mut self, format: &VideoFormat) -> Result<(), CaptureError>;
    /// Pulls the current frame into `dst`. Returns false when no frame
    /// could be completed (timeout or abort).
    fn fill(
        &mut self,
        format: &VideoFormat,
        has_signal: bool,
        dst: &mut [u8],
        abort: &dyn Fn() -> bool,
    ) -> Result<bool, CaptureError>;
}

/// Audio transport chosen per pin at thread start.
pub trait AudioBackend: Send {
    fn start(&mut self, format: &AudioFormat) -> Result<(), CaptureError>;
    fn stop(&mut self);
    fn wait_frame(&mut self, timeout: Duration) -> bool;
    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError>;
    /// Copies one raw hardware frame into `dst`.
    fn capture_frame(&mut self, dst: &mut [u8]) -> Result<(), CaptureError>;
    fn reconfigure(&mut self, format: &AudioFormat) -> Result<(), CaptureError>;
}

pub fn video_backend_for(
    family: DeviceFamily,
    channel: Arc<dyn CaptureChannel>,
    prefix: &str,
) -> Box<dyn VideoBackend> {
    match family {
        DeviceFamily::Pro => Box::new(ProVideoBackend::new(channel, prefix)),
        DeviceFamily::Usb => Box::new(UsbVideoBackend::new(channel, prefix)),
    }
}

pub fn audio_backend_for(
    family: DeviceFamily,
    channel: Arc<dyn CaptureChannel>,
    prefix: &str,
) -> Box<dyn AudioBackend> {
    match family {
        DeviceFamily::Pro => Box::new(ProAudioBackend::new(channel, prefix)),
        DeviceFamily::Usb => Box::new(UsbAudioBackend::new(channel, prefix)),
    }
}

/// Staging buffer filled by the USB delivery callback.
#[derive(Default)]
struct CapturedFrame {
    data: Vec<u8>,
    len: usize,
    ts: u64,
}

struct ProVideoBackend {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
    notify_event: Arc<Event>,
    capture_event: Arc<Event>,
    notify: Option<NotifyHandle>,
}

impl ProVideoBackend {
    fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        ProVideoBackend {
            channel,
            prefix: prefix.to_string(),
            notify_event: Arc::new(Event::new()),
            capture_event: Arc::new(Event::new()),
            notify: None,
        }
    }

    fn fill_pinned(
        &mut self,
        format: &VideoFormat,
        has_signal: bool,
        dst: &mut [u8],
        abort: &dyn Fn() -> bool,
    ) -> Result<bool, CaptureError> {
        let frame = if has_signal {
            match self.channel.newest_buffered_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    trace!("[{}] can't resolve buffered frame: {}", self.prefix, e);
                    return Ok(false);
                }
            }
        } else {
            FRAME_ID_NEWEST_BUFFERING
        };

        let request = FrameCaptureRequest {
            frame,
            fourcc: format.pixel_structure,
            cx: format.cx,
            cy: format.cy,
            line_length: format.line_length,
            image_size: format.image_size,
            aspect_x: format.aspect_x,
            aspect_y: format.aspect_y,
            colour_format: format.colour_format,
            quant_range: format.quantisation,
            sat_range: format.saturation,
        };
        if let Err(e) = self.channel.capture_frame_to(&request, dst) {
            warn!(
                "[{}] unexpected failure capturing frame to memory: {}",
                self.prefix, e
            );
            return Ok(false);
        }

        loop {
            if !self.capture_event.wait_timeout(Duration::from_millis(1000)) {
                trace!("[{}] wait for frame completion timed out", self.prefix);
                return Ok(false);
            }
            if abort() {
                return Ok(false);
            }
            match self.channel.frame_completed() {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) => {
                    trace!("[{}] capture status unreadable: {}", self.prefix, e);
                    return Ok(false);
                }
            }
        }
    }
}

impl VideoBackend for ProVideoBackend {
    fn start(&mut self, _format: &VideoFormat) -> Result<(), CaptureError> {
        self.channel
            .start_video_capture(self.capture_event.clone())
            .map_err(|e| {
                warn!("[{}] unable to start video capture: {}", self.prefix, e);
                CaptureError::StartCaptureFailed("video")
            })?;
        let bits = NotifyBits::VIDEO_SIGNAL_CHANGE
            | NotifyBits::VIDEO_FRAME_BUFFERING
            | NotifyBits::VIDEO_INPUT_SOURCE_CHANGE;
        let handle = self
            .channel
            .register_notify(bits, self.notify_event.clone())
            .map_err(|e| {
                warn!("[{}] unable to register notifications: {}", self.prefix, e);
                CaptureError::NotifyRegisterFailed
            })?;
        self.notify = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.notify.take() {
            self.channel.unregister_notify(handle);
        }
        self.channel.stop_video_capture();
    }

    fn wait_frame(&mut self, timeout: Duration) -> bool {
        self.notify_event.wait_timeout(timeout)
    }

    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError> {
        let handle = match self.notify {
            Some(handle) => handle,
            None => return Err(CaptureError::NotifyRegisterFailed),
        };
        let bits = self.channel.notify_status(handle)?;
        if bits.contains(NotifyBits::VIDEO_SIGNAL_CHANGE) {
            return Ok(FrameStatus::SignalChange);
        }
        if bits.contains(NotifyBits::VIDEO_INPUT_SOURCE_CHANGE) {
            return Ok(FrameStatus::InputSourceChange);
        }
        if bits.contains(NotifyBits::VIDEO_FRAME_BUFFERING) {
            return Ok(FrameStatus::Ready);
        }
        Ok(FrameStatus::NotReady)
    }

    fn reconfigure(&mut self, _format: &VideoFormat) -> Result<(), CaptureError> {
        // the card scales/converts per capture request, nothing to rebuild
        Ok(())
    }

    fn fill(
        &mut self,
        format: &VideoFormat,
        has_signal: bool,
        dst: &mut [u8],
        abort: &dyn Fn() -> bool,
    ) -> Result<bool, CaptureError> {
        trace!("[{}] pinning {} bytes", self.prefix, dst.len());
        self.channel.pin_video_buffer(dst).map_err(CaptureError::Sdk)?;
        let result = self.fill_pinned(format, has_signal, dst, abort);
        self.channel.unpin_video_buffer(dst);
        result
    }
}

struct UsbVideoBackend {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
    event: Arc<Event>,
    staging: Arc<Mutex<CapturedFrame>>,
    token: Option<UsbCaptureToken>,
}

impl UsbVideoBackend {
    fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        UsbVideoBackend {
            channel,
            prefix: prefix.to_string(),
            event: Arc::new(Event::new()),
            staging: Arc::new(Mutex::new(CapturedFrame::default())),
            token: None,
        }
    }

    fn create_capture(&mut self, format: &VideoFormat) -> Result<(), CaptureError> {
        {
            let mut staging = self.staging.lock();
            if staging.data.len() < format.image_size as usize {
                staging.data.resize(format.image_size as usize, 0);
            }
        }
        let staging = self.staging.clone();
        let event = self.event.clone();
        let config = UsbVideoConfig {
            cx: format.cx,
            cy: format.cy,
            fourcc: format.pixel_structure,
            frame_interval: format.frame_interval,
        };
        let token = self
            .channel
            .create_usb_video_capture(
                &config,
                Arc::new(move |bytes: &[u8], ts: u64| {
                    let mut frame = staging.lock();
                    let n = bytes.len().min(frame.data.len());
                    frame.data[..n].copy_from_slice(&bytes[..n]);
                    frame.len = n;
                    frame.ts = ts;
                    event.signal();
                }),
            )
            .map_err(|e| {
                warn!(
                    "[{}] unable to create video capture {}x{} {}: {}",
                    self.prefix, format.cx, format.cy, format.pixel_structure, e
                );
                CaptureError::StartCaptureFailed("video")
            })?;
        self.token = Some(token);
        Ok(())
    }
}

impl VideoBackend for UsbVideoBackend {
    fn start(&mut self, format: &VideoFormat) -> Result<(), CaptureError> {
        self.create_capture(format)
    }

    fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.channel.destroy_usb_capture(token);
        }
    }

    fn wait_frame(&mut self, timeout: Duration) -> bool {
        self.event.wait_timeout(timeout)
    }

    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError> {
        // a filled staging buffer is the only notification this family has
        Ok(FrameStatus::Ready)
    }

    fn reconfigure(&mut self, format: &VideoFormat) -> Result<(), CaptureError> {
        debug!(
            "[{}] rebuilding capture for {}x{} {}",
            self.prefix, format.cx, format.cy, format.pixel_structure
        );
        self.stop();
        self.create_capture(format)
    }

    fn fill(
        &mut self,
        _format: &VideoFormat,
        _has_signal: bool,
        dst: &mut [u8],
        _abort: &dyn Fn() -> bool,
    ) -> Result<bool, CaptureError> {
        let staging = self.staging.lock();
        let n = staging.len.min(dst.len());
        dst[..n].copy_from_slice(&staging.data[..n]);
        trace!(
            "[{}] copied {} staged bytes, device ts {}",
            self.prefix,
            n,
            staging.ts
        );
        Ok(true)
    }
}

struct ProAudioBackend {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
    notify_event: Arc<Event>,
    notify: Option<NotifyHandle>,
}

impl ProAudioBackend {
    fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        ProAudioBackend {
            channel,
            prefix: prefix.to_string(),
            notify_event: Arc::new(Event::new()),
            notify: None,
        }
    }
}

impl AudioBackend for ProAudioBackend {
    fn start(&mut self, _format: &AudioFormat) -> Result<(), CaptureError> {
        self.channel.start_audio_capture().map_err(|e| {
            warn!("[{}] unable to start audio capture: {}", self.prefix, e);
            CaptureError::StartCaptureFailed("audio")
        })?;
        let bits = NotifyBits::AUDIO_SIGNAL_CHANGE
            | NotifyBits::AUDIO_INPUT_SOURCE_CHANGE
            | NotifyBits::AUDIO_FRAME_BUFFERED;
        let handle = self
            .channel
            .register_notify(bits, self.notify_event.clone())
            .map_err(|e| {
                warn!("[{}] unable to register notifications: {}", self.prefix, e);
                CaptureError::NotifyRegisterFailed
            })?;
        self.notify = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.notify.take() {
            self.channel.unregister_notify(handle);
        }
        self.channel.stop_audio_capture();
    }

    fn wait_frame(&mut self, timeout: Duration) -> bool {
        self.notify_event.wait_timeout(timeout)
    }

    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError> {
        let handle = match self.notify {
            Some(handle) => handle,
            None => return Err(CaptureError::NotifyRegisterFailed),
        };
        let bits = self.channel.notify_status(handle)?;
        if bits.contains(NotifyBits::AUDIO_SIGNAL_CHANGE) {
            return Ok(FrameStatus::SignalChange);
        }
        if bits.contains(NotifyBits::AUDIO_INPUT_SOURCE_CHANGE) {
            return Ok(FrameStatus::InputSourceChange);
        }
        if bits.contains(NotifyBits::AUDIO_FRAME_BUFFERED) {
            return Ok(FrameStatus::Ready);
        }
        Ok(FrameStatus::NotReady)
    }

    fn capture_frame(&mut self, dst: &mut [u8]) -> Result<(), CaptureError> {
        self.channel.capture_audio_frame(dst).map_err(CaptureError::Sdk)
    }

    fn reconfigure(&mut self, _format: &AudioFormat) -> Result<(), CaptureError> {
        Ok(())
    }
}

struct UsbAudioBackend {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
    event: Arc<Event>,
    staging: Arc<Mutex<CapturedFrame>>,
    token: Option<UsbCaptureToken>,
}

impl UsbAudioBackend {
    fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        UsbAudioBackend {
            channel,
            prefix: prefix.to_string(),
            event: Arc::new(Event::new()),
            staging: Arc::new(Mutex::new(CapturedFrame {
                data: vec![0; MAX_FRAME_BYTES],
                len: 0,
                ts: 0,
            })),
            token: None,
        }
    }

    fn create_capture(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        let staging = self.staging.clone();
        let event = self.event.clone();
        let config = UsbAudioConfig {
            sample_rate: format.fs,
            bit_depth: format.bit_depth,
            channels: format.input_channel_count,
        };
        let token = self
            .channel
            .create_usb_audio_capture(
                &config,
                Arc::new(move |bytes: &[u8], ts: u64| {
                    let mut frame = staging.lock();
                    let n = bytes.len().min(frame.data.len());
                    frame.data[..n].copy_from_slice(&bytes[..n]);
                    frame.len = n;
                    frame.ts = ts;
                    event.signal();
                }),
            )
            .map_err(|e| {
                warn!(
                    "[{}] unable to create audio capture {} Hz {} bits {} channels: {}",
                    self.prefix, format.fs, format.bit_depth, format.input_channel_count, e
                );
                CaptureError::StartCaptureFailed("audio")
            })?;
        self.token = Some(token);
        Ok(())
    }
}

impl AudioBackend for UsbAudioBackend {
    fn start(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.create_capture(format)
    }

    fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.channel.destroy_usb_capture(token);
        }
    }

    fn wait_frame(&mut self, timeout: Duration) -> bool {
        self.event.wait_timeout(timeout)
    }

    fn frame_status(&mut self) -> Result<FrameStatus, CaptureError> {
        Ok(FrameStatus::Ready)
    }

    fn capture_frame(&mut self, dst: &mut [u8]) -> Result<(), CaptureError> {
        let staging = self.staging.lock();
        let n = staging.len.min(dst.len());
        dst[..n].copy_from_slice(&staging.data[..n]);
        trace!(
            "[{}] copied {} staged bytes, device ts {}",
            self.prefix,
            n,
            staging.ts
        );
        Ok(())
    }

    fn reconfigure(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.stop();
        self.create_capture(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::test_support::MockChannel;

    #[test]
    fn usb_video_round_trips_through_the_staging_buffer() {
        let channel = Arc::new(MockChannel::default());
        let mut backend = UsbVideoBackend::new(channel.clone(), "t");
        let mut format = VideoFormat::default();
        format.cx = 4;
        format.cy = 2;
        format.image_size = 8;
        backend.start(&format).unwrap();

        assert!(!backend.wait_frame(Duration::from_millis(1)));
        channel.push_video_frame(&[1, 2, 3, 4, 5, 6, 7, 8], 42);
        assert!(backend.wait_frame(Duration::from_millis(100)));

        let mut dst = [0u8; 8];
        assert!(backend
            .fill(&format, true, &mut dst, &|| false)
            .unwrap());
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn pro_video_maps_notify_bits() {
        let channel = Arc::new(MockChannel::default());
        let mut backend = ProVideoBackend::new(channel.clone(), "t");
        backend.start(&VideoFormat::default()).unwrap();

        channel.state.lock().notify_bits = NotifyBits::VIDEO_SIGNAL_CHANGE;
        assert_eq!(backend.frame_status().unwrap(), FrameStatus::SignalChange);

        channel.state.lock().notify_bits = NotifyBits::VIDEO_FRAME_BUFFERING;
        assert_eq!(backend.frame_status().unwrap(), FrameStatus::Ready);

        channel.state.lock().notify_bits = NotifyBits::empty();
        assert_eq!(backend.frame_status().unwrap(), FrameStatus::NotReady);
    }

    #[test]
    fn pro_video_fill_completes_with_the_capture_event() {
        let channel = Arc::new(MockChannel::default());
        channel.state.lock().video_frame = vec![9u8; 16];
        let mut backend = ProVideoBackend::new(channel.clone(), "t");
        let mut format = VideoFormat::default();
        format.image_size = 16;
        backend.start(&format).unwrap();

        let mut dst = [0u8; 16];
        let filled = backend.fill(&format, true, &mut dst, &|| false).unwrap();
        assert!(filled);
        assert_eq!(dst, [9u8; 16]);
    }

    #[test]
    fn pro_audio_pulls_frames_on_notification() {
        let channel = Arc::new(MockChannel::default());
        channel.state.lock().audio_frame = vec![7u8; 64];
        let mut backend = ProAudioBackend::new(channel.clone(), "t");
        backend.start(&AudioFormat::default()).unwrap();

        // the device raises the registered event
        let event = channel.state.lock().notify_event.clone().unwrap();
        event.signal();
        assert!(backend.wait_frame(Duration::from_millis(100)));

        let mut dst = [0u8; 64];
        backend.capture_frame(&mut dst).unwrap();
        assert_eq!(dst, [7u8; 64]);
    }
}
