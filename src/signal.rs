//! Signal probing: read-only snapshots of what the device sees on its input.

use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::error::CaptureError;
use crate::sdk::{
    AviInfoFramePayload, CaptureChannel, HdrInfoFramePayload, InfoFrameMask,
    VideoInputType,
};

/// Lock state of the incoming video signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    NoSignal,
    Unsupported,
    Locking,
    Locked,
}

impl SignalState {
    pub fn display_name(self) -> &'static str {
        match self {
            SignalState::NoSignal => "No Signal",
            SignalState::Unsupported => "Unsupported Signal",
            SignalState::Locking => "Locking",
            SignalState::Locked => "Locked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourFormat {
    /// Unknown colour format.
    Unknown,
    Rgb,
    Yuv601,
    Yuv709,
    Yuv2020,
    /// Constant-luminance BT.2020.
    Yuv2020c,
}

impl ColourFormat {
    pub fn display_name(self) -> &'static str {
        match self {
            ColourFormat::Unknown => "?",
            ColourFormat::Rgb => "RGB",
            ColourFormat::Yuv601 => "YUV601",
            ColourFormat::Yuv709 => "YUV709",
            ColourFormat::Yuv2020 => "YUV2020",
            ColourFormat::Yuv2020c => "YUV2020C",
        }
    }
}

/// Quantisation range of the incoming signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantRange {
    Unknown,
    /// Full range, 0-255/1023/4095/65535.
    Full,
    /// Limited range, 16-235 and the bit-depth equivalents.
    Limited,
}

impl QuantRange {
    pub fn display_name(self) -> &'static str {
        match self {
            QuantRange::Unknown => "?",
            QuantRange::Full => "Full",
            QuantRange::Limited => "Limited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatRange {
    Unknown,
    Full,
    Limited,
    /// Extended range, 1-254 and the bit-depth equivalents.
    ExtendedGamut,
}

impl SatRange {
    pub fn display_name(self) -> &'static str {
        match self {
            SatRange::Unknown => "?",
            SatRange::Full => "Full",
            SatRange::Limited => "Limited",
            SatRange::ExtendedGamut => "Extended",
        }
    }
}

/// Chroma subsampling layout on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Rgb444 = 0,
    Yuv422 = 1,
    Yuv444 = 2,
    Yuv420 = 3,
}

impl PixelEncoding {
    pub fn display_name(self) -> &'static str {
        match self {
            PixelEncoding::Rgb444 => "RGB 4:4:4",
            PixelEncoding::Yuv422 => "YUV 4:2:2",
            PixelEncoding::Yuv444 => "YUV 4:4:4",
            PixelEncoding::Yuv420 => "YUV 4:2:0",
        }
    }

    /// Column index into the fourcc derivation table.
    pub(crate) fn table_index(self) -> usize {
        self as usize
    }
}

impl Default for PixelEncoding {
    fn default() -> Self {
        PixelEncoding::Rgb444
    }
}

/// Snapshot of the video input, reloaded once per pin iteration.
#[derive(Debug, Clone, Copy)]
pub struct VideoSignal {
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
    pub bit_depth: u8,
    pub pixel_encoding: PixelEncoding,
    pub input_valid: bool,
    pub hdr: Option<HdrInfoFramePayload>,
    pub avi: Option<AviInfoFramePayload>,
}

impl VideoSignal {
    pub fn locked(&self) -> bool {
        self.state == SignalState::Locked
    }

    pub fn fps(&self) -> f64 {
        if self.frame_duration > 0 {
            10_000_000.0 / f64::from(self.frame_duration)
        } else {
            0.0
        }
    }
}

impl Default for VideoSignal {
    fn default() -> Self {
        VideoSignal {
            state: SignalState::NoSignal,
            cx: 0,
            cy: 0,
            aspect_x: 0,
            aspect_y: 0,
            frame_duration: 0,
            colour_format: ColourFormat::Unknown,
            quant_range: QuantRange::Unknown,
            sat_range: SatRange::Unknown,
            bit_depth: 8,
            pixel_encoding: PixelEncoding::Rgb444,
            input_valid: false,
            hdr: None,
            avi: None,
        }
    }
}

/// Snapshot of the audio input, reloaded once per pin iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioSignal {
    pub lpcm: bool,
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    /// Bits 0..3 flag which input channel pairs carry data.
    pub channel_valid_mask: u16,
    /// CEA-861-E Table 28 code.
    pub channel_allocation: u8,
    /// CEA-861-E Table 31 code; 0x2 plays the LFE channel 10 dB hot.
    pub lfe_playback_level: u8,
}

/// Probes the video side of a channel. Tracks HDR InfoFrame presence so the
/// transitions show up in the log exactly once.
pub struct VideoSignalProbe {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
    has_hdr_infoframe: bool,
}

impl VideoSignalProbe {
    pub fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        VideoSignalProbe {
            channel,
            prefix: prefix.to_string(),
            has_hdr_infoframe: false,
        }
    }

    /// Loads a fresh snapshot. Returns the snapshot plus whether the probe
    /// considers the input usable; an unusable input substitutes the 8-bit
    /// RGB fallback fields and zeroed infoframes.
    pub fn probe(&mut self) -> (VideoSignal, bool) {
        let mut signal = VideoSignal::default();
        let mut usable = true;

        match self.channel.video_signal_status() {
            Ok(status) => {
                signal.state = status.state;
                signal.cx = status.cx;
                signal.cy = status.cy;
                signal.aspect_x = status.aspect_x;
                signal.aspect_y = status.aspect_y;
                signal.frame_duration = status.frame_duration;
                signal.colour_format = status.colour_format;
                signal.quant_range = status.quant_range;
                signal.sat_range = status.sat_range;
            }
            Err(e) => {
                warn!("[{}] failed to read video signal status: {}", self.prefix, e);
                signal.state = SignalState::NoSignal;
                usable = false;
            }
        }

        match self.channel.input_status() {
            Ok(status) => {
                signal.input_valid = status.valid;
                signal.bit_depth = status.hdmi.bit_depth;
                signal.pixel_encoding = status.hdmi.pixel_encoding;
                if !status.valid {
                    usable = false;
                }
            }
            Err(e) => {
                error!("[{}] failed to read input status: {}", self.prefix, e);
                signal.input_valid = false;
                usable = false;
            }
        }

        if !usable {
            // the pin will fall back to the no/unsupported signal image
            signal.bit_depth = 8;
            signal.pixel_encoding = PixelEncoding::Rgb444;
            signal.hdr = None;
            signal.avi = None;
            self.has_hdr_infoframe = true;
            return (signal, false);
        }

        let mask = self
            .channel
            .infoframe_valid_mask()
            .unwrap_or_else(|_| InfoFrameMask::empty());

        if mask.contains(InfoFrameMask::HDR) {
            if let Ok(payload) = self.channel.hdr_infoframe() {
                if !self.has_hdr_infoframe {
                    debug!(
                        "[{}] HDR InfoFrame is present, eotf {}",
                        self.prefix, payload.eotf
                    );
                    self.has_hdr_infoframe = true;
                }
                signal.hdr = Some(payload);
            }
        }
        if signal.hdr.is_none() && self.has_hdr_infoframe {
            debug!("[{}] HDR InfoFrame no longer present", self.prefix);
            self.has_hdr_infoframe = false;
        }

        if mask.contains(InfoFrameMask::AVI) {
            if let Ok(payload) = self.channel.avi_infoframe() {
                signal.avi = Some(payload);
            }
        }

        (signal, true)
    }
}

/// Probes the audio side of a channel.
pub struct AudioSignalProbe {
    channel: Arc<dyn CaptureChannel>,
    prefix: String,
}

impl AudioSignalProbe {
    pub fn new(channel: Arc<dyn CaptureChannel>, prefix: &str) -> Self {
        AudioSignalProbe {
            channel,
            prefix: prefix.to_string(),
        }
    }

    /// Loads a fresh snapshot, failing with `SignalLost` when the device
    /// cannot describe its input or the input is not HDMI.
    pub fn probe(&mut self) -> Result<AudioSignal, CaptureError> {
        let status = self.channel.audio_signal_status().map_err(|e| {
            error!("[{}] failed to read audio signal status: {}", self.prefix, e);
            CaptureError::SignalLost
        })?;

        let input = self.channel.input_status().map_err(|e| {
            error!("[{}] failed to read input status: {}", self.prefix, e);
            CaptureError::SignalLost
        })?;
        if !input.valid {
            trace!("[{}] input status is invalid", self.prefix);
            return Err(CaptureError::SignalLost);
        }
        if input.input_type != Some(VideoInputType::Hdmi) {
            warn!("[{}] input is not HDMI, no audio will flow", self.prefix);
            return Err(CaptureError::SignalLost);
        }

        let mut signal = AudioSignal {
            lpcm: status.lpcm,
            sample_rate: status.sample_rate,
            bits_per_sample: status.bits_per_sample,
            channel_valid_mask: status.channel_valid,
            channel_allocation: 0,
            lfe_playback_level: 0,
        };

        let mask = self
            .channel
            .infoframe_valid_mask()
            .unwrap_or_else(|_| InfoFrameMask::empty());
        if mask.contains(InfoFrameMask::AUDIO) {
            if let Ok(payload) = self.channel.audio_infoframe() {
                signal.channel_allocation = payload.channel_allocation;
                signal.lfe_playback_level = payload.lfe_playback_level;
            }
        }

        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::test_support::MockChannel;
    use crate::sdk::RawVideoSignalStatus;

    #[test]
    fn invalid_input_substitutes_the_fallback_fields() {
        let channel = Arc::new(MockChannel::default());
        {
            let mut state = channel.state.lock();
            state.video_status = RawVideoSignalStatus {
                state: SignalState::Locked,
                cx: 3840,
                cy: 2160,
                ..Default::default()
            };
            state.input_status.valid = false;
        }
        let mut probe = VideoSignalProbe::new(channel, "test");
        let (signal, usable) = probe.probe();
        assert!(!usable);
        assert_eq!(signal.bit_depth, 8);
        assert_eq!(signal.pixel_encoding, PixelEncoding::Rgb444);
        assert!(signal.hdr.is_none());
        assert!(signal.avi.is_none());
    }

    #[test]
    fn hdr_infoframe_is_read_only_when_flagged_valid() {
        let channel = Arc::new(MockChannel::locked_hdmi(1920, 1080));
        {
            let mut state = channel.state.lock();
            state.hdr_infoframe.eotf = 2;
            state.infoframe_mask = InfoFrameMask::empty();
        }
        let mut probe = VideoSignalProbe::new(channel.clone(), "test");
        let (signal, usable) = probe.probe();
        assert!(usable);
        assert!(signal.hdr.is_none());

        channel.state.lock().infoframe_mask = InfoFrameMask::HDR;
        let (signal, _) = probe.probe();
        assert_eq!(signal.hdr.map(|h| h.eotf), Some(2));
    }

    #[test]
    fn audio_probe_reads_the_audio_infoframe() {
        let channel = Arc::new(MockChannel::locked_hdmi(1920, 1080));
        {
            let mut state = channel.state.lock();
            state.audio_status.lpcm = true;
            state.audio_status.sample_rate = 48_000;
            state.audio_status.bits_per_sample = 24;
            state.audio_status.channel_valid = 0x7;
            state.infoframe_mask = InfoFrameMask::AUDIO;
            state.audio_infoframe.channel_allocation = 0x0b;
            state.audio_infoframe.lfe_playback_level = 0x2;
        }
        let mut probe = AudioSignalProbe::new(channel, "test");
        let signal = probe.probe().unwrap();
        assert_eq!(signal.channel_allocation, 0x0b);
        assert_eq!(signal.lfe_playback_level, 0x2);
        assert_eq!(signal.sample_rate, 48_000);
    }
}
