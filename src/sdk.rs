//! The slice of the vendor capture SDK the engine consumes.
//!
//! The real SDK glue lives outside this crate; the engine only sees these
//! traits and plain data carriers. Tests drive the engine through mock
//! implementations of the same traits.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::event::Event;
use crate::fourcc::FourCc;
use crate::signal::{ColourFormat, PixelEncoding, QuantRange, SatRange, SignalState};

/// A failed SDK call, by operation name and device status code.
#[derive(Debug, Clone, Error)]
#[error("{op} returned {code}")]
pub struct SdkError {
    pub op: &'static str,
    pub code: i32,
}

impl SdkError {
    pub fn new(op: &'static str, code: i32) -> Self {
        SdkError { op, code }
    }

    /// An operation the device family does not implement.
    pub fn unsupported(op: &'static str) -> Self {
        SdkError { op, code: -1 }
    }
}

bitflags! {
    /// Notification status bits reported by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NotifyBits: u64 {
        const VIDEO_SIGNAL_CHANGE = 0x0001;
        const VIDEO_INPUT_SOURCE_CHANGE = 0x0002;
        const VIDEO_FRAME_BUFFERING = 0x0004;
        const AUDIO_SIGNAL_CHANGE = 0x0010;
        const AUDIO_INPUT_SOURCE_CHANGE = 0x0020;
        const AUDIO_FRAME_BUFFERED = 0x0040;
    }
}

bitflags! {
    /// Which HDMI InfoFrame packets currently carry valid data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InfoFrameMask: u32 {
        const AVI = 0x01;
        const AUDIO = 0x02;
        const HDR = 0x04;
    }
}

/// Registration token for a notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyHandle(pub u64);

/// Token for a callback-driven USB capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbCaptureToken(pub u64);

/// Identifies one buffered frame on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub i32);

/// Capture the newest frame still being buffered, used when the signal is
/// not locked and no frame id can be resolved.
pub const FRAME_ID_NEWEST_BUFFERING: FrameId = FrameId(-1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoInputType {
    Hdmi,
    Sdi,
    Component,
    Composite,
}

/// HDR-related capability bits of a channel. Four independent flags; the
/// device reports each on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct HdrCapabilities {
    pub hdr10: bool,
    pub hlg: bool,
    pub colourspace: bool,
    pub dynamic_range: bool,
}

/// Summary returned while enumerating channels.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub family_name: String,
    pub serial_no: String,
    pub device_path: String,
    pub hdr_caps: HdrCapabilities,
}

/// Raw video signal status as the device reports it.
#[derive(Debug, Clone, Copy)]
pub struct RawVideoSignalStatus {
    pub state: SignalState,
    pub cx: u16,
    pub cy: u16,
    pub aspect_x: u16,
    pub aspect_y: u16,
    /// Reference-time ticks per frame (10^7 / fps).
    pub frame_duration: u32,
    pub colour_format: ColourFormat,
    pub quant_range: QuantRange,
    pub sat_range: SatRange,
    pub interlaced: bool,
}

impl Default for RawVideoSignalStatus {
    fn default() -> Self {
        RawVideoSignalStatus {
            state: SignalState::NoSignal,
            cx: 0,
            cy: 0,
            aspect_x: 0,
            aspect_y: 0,
            frame_duration: 0,
            colour_format: ColourFormat::Unknown,
            quant_range: QuantRange::Unknown,
            sat_range: SatRange::Unknown,
            interlaced: false,
        }
    }
}

/// HDMI-specific part of the input status.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawHdmiStatus {
    pub bit_depth: u8,
    pub pixel_encoding: PixelEncoding,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawInputStatus {
    pub valid: bool,
    pub input_type: Option<VideoInputType>,
    pub hdmi: RawHdmiStatus,
}

/// Raw audio signal status as the device reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawAudioSignalStatus {
    pub channel_status_valid: bool,
    pub lpcm: bool,
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    /// Bits 0..3 flag which input channel pairs carry data.
    pub channel_valid: u16,
}

/// HDR InfoFrame payload, byte-for-byte as carried on the wire. All 16-bit
/// fields are split LSB/MSB; reassembly happens in the HDR decoder.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrInfoFramePayload {
    pub eotf: u8,
    pub metadata_descriptor_id: u8,
    pub display_primaries_lsb_x0: u8,
    pub display_primaries_msb_x0: u8,
    pub display_primaries_lsb_y0: u8,
    pub display_primaries_msb_y0: u8,
    pub display_primaries_lsb_x1: u8,
    pub display_primaries_msb_x1: u8,
    pub display_primaries_lsb_y1: u8,
    pub display_primaries_msb_y1: u8,
    pub display_primaries_lsb_x2: u8,
    pub display_primaries_msb_x2: u8,
    pub display_primaries_lsb_y2: u8,
    pub display_primaries_msb_y2: u8,
    pub white_point_lsb_x: u8,
    pub white_point_msb_x: u8,
    pub white_point_lsb_y: u8,
    pub white_point_msb_y: u8,
    pub max_display_mastering_lsb_luminance: u8,
    pub max_display_mastering_msb_luminance: u8,
    pub min_display_mastering_lsb_luminance: u8,
    pub min_display_mastering_msb_luminance: u8,
    pub maximum_content_light_level_lsb: u8,
    pub maximum_content_light_level_msb: u8,
    pub maximum_frame_average_light_level_lsb: u8,
    pub maximum_frame_average_light_level_msb: u8,
}

/// AVI InfoFrame payload. The engine only forwards it; the raw bytes stay
/// opaque apart from the video identification code.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AviInfoFramePayload {
    pub vic: u8,
    pub bytes: [u8; 13],
}

/// Audio InfoFrame fields consumed by the channel-allocation decoder.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioInfoFramePayload {
    pub channel_allocation: u8,
    /// CEA-861-E Table 31; 0x2 means the LFE channel plays 10 dB hot.
    pub lfe_playback_level: u8,
}

/// Advertised output constraints of a USB-family device. The natural format
/// derivation is pruned against these lists.
#[derive(Debug, Clone, Default)]
pub struct UsbCaptureFormats {
    pub fourccs: Vec<FourCc>,
    pub default_fourcc: usize,
    pub frame_intervals: Vec<i64>,
    pub default_frame_interval: usize,
    pub frame_sizes: Vec<(u16, u16)>,
    pub default_frame_size: usize,
}

/// Everything a hardware fill needs to know about the agreed format.
#[derive(Debug, Clone)]
pub struct FrameCaptureRequest {
    pub frame: FrameId,
    pub fourcc: FourCc,
    pub cx: u16,
    pub cy: u16,
    pub line_length: u32,
    pub image_size: u32,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub colour_format: ColourFormat,
    pub quant_range: QuantRange,
    pub sat_range: SatRange,
}

/// Configuration for a callback-driven USB video capture.
#[derive(Debug, Clone)]
pub struct UsbVideoConfig {
    pub cx: u16,
    pub cy: u16,
    pub fourcc: FourCc,
    pub frame_interval: i64,
}

/// Configuration for a callback-driven USB audio capture.
#[derive(Debug, Clone)]
pub struct UsbAudioConfig {
    pub sample_rate: u32,
    pub bit_depth: u8,
    pub channels: u16,
}

/// Delivery callback for USB captures: filled frame bytes plus the device
/// timestamp. Runs on an SDK-internal thread.
pub type FrameCallback = Arc<dyn Fn(&[u8], u64) + Send + Sync>;

/// Entry point for enumeration, implemented by the SDK glue.
pub trait DeviceProvider: Send + Sync {
    fn channel_count(&self) -> usize;
    fn channel_info(&self, index: usize) -> Result<ChannelInfo, SdkError>;
    fn open_channel(&self, device_path: &str) -> Result<Arc<dyn CaptureChannel>, SdkError>;
}

/// One open capture channel. Handles are ref-counted and read-only; the SDK
/// glue closes the underlying device when the last clone drops.
pub trait CaptureChannel: Send + Sync {
    fn device_path(&self) -> &str;

    fn video_input_types(&self) -> Result<Vec<VideoInputType>, SdkError>;

    fn video_signal_status(&self) -> Result<RawVideoSignalStatus, SdkError>;
    fn audio_signal_status(&self) -> Result<RawAudioSignalStatus, SdkError>;
    fn input_status(&self) -> Result<RawInputStatus, SdkError>;

    fn infoframe_valid_mask(&self) -> Result<InfoFrameMask, SdkError>;
    fn hdr_infoframe(&self) -> Result<HdrInfoFramePayload, SdkError>;
    fn avi_infoframe(&self) -> Result<AviInfoFramePayload, SdkError>;
    fn audio_infoframe(&self) -> Result<AudioInfoFramePayload, SdkError>;

    /// Hardware time in 100 ns ticks. Pro family only.
    fn device_time(&self) -> Result<i64, SdkError> {
        Err(SdkError::unsupported("device_time"))
    }

    fn register_notify(&self, bits: NotifyBits, event: Arc<Event>)
        -> Result<NotifyHandle, SdkError>;
    fn unregister_notify(&self, handle: NotifyHandle);
    fn notify_status(&self, handle: NotifyHandle) -> Result<NotifyBits, SdkError>;

    // Pro family: DMA-assisted capture into caller memory.
    fn start_video_capture(&self, complete: Arc<Event>) -> Result<(), SdkError> {
        let _ = complete;
        Err(SdkError::unsupported("start_video_capture"))
    }
    fn stop_video_capture(&self) {}
    fn newest_buffered_frame(&self) -> Result<FrameId, SdkError> {
        Err(SdkError::unsupported("newest_buffered_frame"))
    }
    fn capture_frame_to(&self, req: &FrameCaptureRequest, dst: &mut [u8]) -> Result<(), SdkError> {
        let _ = (req, dst);
        Err(SdkError::unsupported("capture_frame_to"))
    }
    fn frame_completed(&self) -> Result<bool, SdkError> {
        Err(SdkError::unsupported("frame_completed"))
    }
    fn pin_video_buffer(&self, buf: &[u8]) -> Result<(), SdkError> {
        let _ = buf;
        Ok(())
    }
    fn unpin_video_buffer(&self, buf: &[u8]) {
        let _ = buf;
    }

    fn start_audio_capture(&self) -> Result<(), SdkError> {
        Err(SdkError::unsupported("start_audio_capture"))
    }
    fn stop_audio_capture(&self) {}
    /// Fills one contiguous 8 ch x 4 byte x 1024 sample block.
    fn capture_audio_frame(&self, dst: &mut [u8]) -> Result<(), SdkError> {
        let _ = dst;
        Err(SdkError::unsupported("capture_audio_frame"))
    }

    // USB family: callback-driven capture sessions.
    fn usb_capture_formats(&self) -> Result<UsbCaptureFormats, SdkError> {
        Err(SdkError::unsupported("usb_capture_formats"))
    }
    fn create_usb_video_capture(
        &self,
        config: &UsbVideoConfig,
        deliver: FrameCallback,
    ) -> Result<UsbCaptureToken, SdkError> {
        let _ = (config, deliver);
        Err(SdkError::unsupported("create_usb_video_capture"))
    }
    fn create_usb_audio_capture(
        &self,
        config: &UsbAudioConfig,
        deliver: FrameCallback,
    ) -> Result<UsbCaptureToken, SdkError> {
        let _ = (config, deliver);
        Err(SdkError::unsupported("create_usb_audio_capture"))
    }
    fn destroy_usb_capture(&self, token: UsbCaptureToken) {
        let _ = token;
    }
}

impl fmt::Debug for dyn CaptureChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CaptureChannel({})", self.device_path())
    }
}

/// In-memory channel used by the test-suite.
#[doc(hidden)]
pub mod test_support {
    use super::*;
    use crate::signal::{ColourFormat, PixelEncoding, QuantRange, SatRange, SignalState};
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct MockState {
        pub input_types: Vec<VideoInputType>,
        pub video_status: RawVideoSignalStatus,
        pub input_status: RawInputStatus,
        pub audio_status: RawAudioSignalStatus,
        pub infoframe_mask: InfoFrameMask,
        pub hdr_infoframe: HdrInfoFramePayload,
        pub avi_infoframe: AviInfoFramePayload,
        pub audio_infoframe: AudioInfoFramePayload,
        pub device_time: i64,
        pub notify_bits: NotifyBits,
        pub notify_event: Option<Arc<Event>>,
        pub capture_event: Option<Arc<Event>>,
        pub usb_formats: UsbCaptureFormats,
        pub video_frame: Vec<u8>,
        pub audio_frame: Vec<u8>,
        pub video_callbacks: Vec<(UsbCaptureToken, FrameCallback)>,
        pub audio_callbacks: Vec<(UsbCaptureToken, FrameCallback)>,
        pub next_token: u64,
        pub fail_video_status: bool,
        pub fail_audio_status: bool,
    }

    pub struct MockChannel {
        pub path: String,
        pub state: Mutex<MockState>,
    }

    impl Default for MockChannel {
        fn default() -> Self {
            MockChannel {
                path: "mock://0".to_string(),
                state: Mutex::new(MockState {
                    input_types: vec![VideoInputType::Hdmi],
                    ..Default::default()
                }),
            }
        }
    }

    impl MockChannel {
        /// A channel with a locked HDMI input at the given geometry.
        pub fn locked_hdmi(cx: u16, cy: u16) -> Self {
            let channel = MockChannel::default();
            {
                let mut state = channel.state.lock();
                state.video_status = RawVideoSignalStatus {
                    state: SignalState::Locked,
                    cx,
                    cy,
                    aspect_x: 16,
                    aspect_y: 9,
                    frame_duration: 200_000,
                    colour_format: ColourFormat::Yuv709,
                    quant_range: QuantRange::Limited,
                    sat_range: SatRange::Limited,
                    interlaced: false,
                };
                state.input_status = RawInputStatus {
                    valid: true,
                    input_type: Some(VideoInputType::Hdmi),
                    hdmi: RawHdmiStatus {
                        bit_depth: 8,
                        pixel_encoding: PixelEncoding::Yuv420,
                    },
                };
            }
            channel
        }

        /// Simulates the SDK delivering one USB video frame.
        pub fn push_video_frame(&self, bytes: &[u8], ts: u64) {
            let callbacks: Vec<FrameCallback> = {
                let state = self.state.lock();
                state.video_callbacks.iter().map(|(_, cb)| cb.clone()).collect()
            };
            for cb in callbacks {
                cb(bytes, ts);
            }
        }

        /// Simulates the SDK delivering one USB audio frame.
        pub fn push_audio_frame(&self, bytes: &[u8], ts: u64) {
            let callbacks: Vec<FrameCallback> = {
                let state = self.state.lock();
                state.audio_callbacks.iter().map(|(_, cb)| cb.clone()).collect()
            };
            for cb in callbacks {
                cb(bytes, ts);
            }
        }
    }

    impl CaptureChannel for MockChannel {
        fn device_path(&self) -> &str {
            &self.path
        }

        fn video_input_types(&self) -> Result<Vec<VideoInputType>, SdkError> {
            Ok(self.state.lock().input_types.clone())
        }

        fn video_signal_status(&self) -> Result<RawVideoSignalStatus, SdkError> {
            let state = self.state.lock();
            if state.fail_video_status {
                return Err(SdkError::new("video_signal_status", -5));
            }
            Ok(state.video_status)
        }

        fn audio_signal_status(&self) -> Result<RawAudioSignalStatus, SdkError> {
            let state = self.state.lock();
            if state.fail_audio_status {
                return Err(SdkError::new("audio_signal_status", -5));
            }
            Ok(state.audio_status)
        }

        fn input_status(&self) -> Result<RawInputStatus, SdkError> {
            Ok(self.state.lock().input_status)
        }

        fn infoframe_valid_mask(&self) -> Result<InfoFrameMask, SdkError> {
            Ok(self.state.lock().infoframe_mask)
        }

        fn hdr_infoframe(&self) -> Result<HdrInfoFramePayload, SdkError> {
            Ok(self.state.lock().hdr_infoframe)
        }

        fn avi_infoframe(&self) -> Result<AviInfoFramePayload, SdkError> {
            Ok(self.state.lock().avi_infoframe)
        }

        fn audio_infoframe(&self) -> Result<AudioInfoFramePayload, SdkError> {
            Ok(self.state.lock().audio_infoframe)
        }

        fn device_time(&self) -> Result<i64, SdkError> {
            Ok(self.state.lock().device_time)
        }

        fn register_notify(
            &self,
            _bits: NotifyBits,
            event: Arc<Event>,
        ) -> Result<NotifyHandle, SdkError> {
            self.state.lock().notify_event = Some(event);
            Ok(NotifyHandle(1))
        }

        fn unregister_notify(&self, _handle: NotifyHandle) {
            self.state.lock().notify_event = None;
        }

        fn notify_status(&self, _handle: NotifyHandle) -> Result<NotifyBits, SdkError> {
            Ok(self.state.lock().notify_bits)
        }

        fn start_video_capture(&self, complete: Arc<Event>) -> Result<(), SdkError> {
            self.state.lock().capture_event = Some(complete);
            Ok(())
        }

        fn stop_video_capture(&self) {
            self.state.lock().capture_event = None;
        }

        fn newest_buffered_frame(&self) -> Result<FrameId, SdkError> {
            Ok(FrameId(0))
        }

        fn capture_frame_to(
            &self,
            _req: &FrameCaptureRequest,
            dst: &mut [u8],
        ) -> Result<(), SdkError> {
            let state = self.state.lock();
            let n = state.video_frame.len().min(dst.len());
            dst[..n].copy_from_slice(&state.video_frame[..n]);
            if let Some(ev) = &state.capture_event {
                ev.signal();
            }
            Ok(())
        }

        fn frame_completed(&self) -> Result<bool, SdkError> {
            Ok(true)
        }

        fn start_audio_capture(&self) -> Result<(), SdkError> {
            Ok(())
        }

        fn capture_audio_frame(&self, dst: &mut [u8]) -> Result<(), SdkError> {
            let state = self.state.lock();
            let n = state.audio_frame.len().min(dst.len());
            dst[..n].copy_from_slice(&state.audio_frame[..n]);
            Ok(())
        }

        fn usb_capture_formats(&self) -> Result<UsbCaptureFormats, SdkError> {
            Ok(self.state.lock().usb_formats.clone())
        }

        fn create_usb_video_capture(
            &self,
            _config: &UsbVideoConfig,
            deliver: FrameCallback,
        ) -> Result<UsbCaptureToken, SdkError> {
            let mut state = self.state.lock();
            state.next_token += 1;
            let token = UsbCaptureToken(state.next_token);
            state.video_callbacks.push((token, deliver));
            Ok(token)
        }

        fn create_usb_audio_capture(
            &self,
            _config: &UsbAudioConfig,
            deliver: FrameCallback,
        ) -> Result<UsbCaptureToken, SdkError> {
            let mut state = self.state.lock();
            state.next_token += 1;
            let token = UsbCaptureToken(state.next_token);
            state.audio_callbacks.push((token, deliver));
            Ok(token)
        }

        fn destroy_usb_capture(&self, token: UsbCaptureToken) {
            let mut state = self.state.lock();
            state.video_callbacks.retain(|(t, _)| *t != token);
            state.audio_callbacks.retain(|(t, _)| *t != token);
        }
    }

    /// Provider exposing a fixed list of mock channels.
    pub struct MockProvider {
        pub channels: Vec<(ChannelInfo, Arc<MockChannel>)>,
    }

    impl MockProvider {
        pub fn single(family_name: &str, channel: Arc<MockChannel>) -> Self {
            let info = ChannelInfo {
                family_name: family_name.to_string(),
                serial_no: "A0001".to_string(),
                device_path: channel.path.clone(),
                hdr_caps: HdrCapabilities::default(),
            };
            MockProvider {
                channels: vec![(info, channel)],
            }
        }
    }

    impl DeviceProvider for MockProvider {
        fn channel_count(&self) -> usize {
            self.channels.len()
        }

        fn channel_info(&self, index: usize) -> Result<ChannelInfo, SdkError> {
            self.channels
                .get(index)
                .map(|(info, _)| info.clone())
                .ok_or_else(|| SdkError::new("channel_info", -2))
        }

        fn open_channel(&self, device_path: &str) -> Result<Arc<dyn CaptureChannel>, SdkError> {
            for (info, channel) in &self.channels {
                if info.device_path == device_path {
                    return Ok(channel.clone() as Arc<dyn CaptureChannel>);
                }
            }
            Err(SdkError::new("open_channel", -3))
        }
    }
}
