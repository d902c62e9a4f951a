//! Derives the deliverable audio format from the probed signal.

use log::info;

use crate::channel_map::{self, NOT_PRESENT};
use crate::device::DeviceFamily;
use crate::signal::AudioSignal;

/// What the audio pin is delivering, or about to deliver, downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Pcm,
    Ac3,
    Dts,
    DtsHd,
    Eac3,
    TrueHd,
    /// Non-PCM flagged by the device but not yet classified.
    Bitstream,
    /// IEC 61937 pause or null burst, never delivered.
    PauseOrNull,
}

impl Codec {
    pub fn display_name(self) -> &'static str {
        match self {
            Codec::Pcm => "PCM",
            Codec::Ac3 => "AC3",
            Codec::Dts => "DTS",
            Codec::DtsHd => "DTSHD",
            Codec::Eac3 => "EAC3",
            Codec::TrueHd => "TrueHD",
            Codec::Bitstream => "Unidentified",
            Codec::PauseOrNull => "PAUSE_OR_NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub codec: Codec,
    pub fs: u32,
    /// 100 ns ticks per sample.
    pub sample_interval: f64,
    pub bit_depth: u8,
    pub bit_depth_bytes: u8,
    pub channel_allocation: u8,
    pub channel_valid_mask: u16,
    /// Slots coming from hardware, always even.
    pub input_channel_count: u16,
    /// Channels exposed downstream.
    pub output_channel_count: u16,
    pub channel_offsets: [i16; 8],
    pub channel_mask: u32,
    pub channel_layout: &'static str,
    pub lfe_channel_index: i16,
    pub lfe_level_adjustment: f64,
    /// Payload bytes of one complete burst; non-PCM only.
    pub data_burst_size: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat {
            codec: Codec::Pcm,
            fs: 48_000,
            sample_interval: 10_000_000.0 / 48_000.0,
            bit_depth: 16,
            bit_depth_bytes: 2,
            channel_allocation: 0,
            channel_valid_mask: 0,
            input_channel_count: 2,
            output_channel_count: 2,
            channel_offsets: [
                0,
                0,
                NOT_PRESENT,
                NOT_PRESENT,
                NOT_PRESENT,
                NOT_PRESENT,
                NOT_PRESENT,
                NOT_PRESENT,
            ],
            channel_mask: channel_map::speaker::STEREO,
            channel_layout: "FL FR",
            lfe_channel_index: NOT_PRESENT,
            lfe_level_adjustment: 1.0,
            data_burst_size: 0,
        }
    }
}

impl AudioFormat {
    /// Derives the format for the probed signal, starting from the current
    /// format. The channel layout is only re-derived when the allocation
    /// code or valid mask moved, so repeated probes of the same signal are
    /// stable.
    ///
    /// USB devices resample everything to 48 kHz in hardware, whatever the
    /// source clock runs at.
    pub fn from_signal(current: &AudioFormat, signal: &AudioSignal, family: DeviceFamily) -> Self {
        let mut format = current.clone();

        format.fs = match family {
            DeviceFamily::Usb => 48_000,
            DeviceFamily::Pro => signal.sample_rate,
        };
        format.bit_depth = signal.bits_per_sample;
        format.bit_depth_bytes = signal.bits_per_sample / 8;
        format.codec = if signal.lpcm {
            Codec::Pcm
        } else {
            Codec::Bitstream
        };
        format.sample_interval = 10_000_000.0 / f64::from(format.fs);
        format.channel_allocation = signal.channel_allocation;
        format.channel_valid_mask = signal.channel_valid_mask;

        let layout_unchanged = format.channel_allocation == current.channel_allocation
            && format.channel_valid_mask == current.channel_valid_mask;
        if !layout_unchanged {
            let layout = channel_map::decode(signal.channel_valid_mask, signal.channel_allocation);
            format.input_channel_count = layout.input_channels;
            format.output_channel_count = layout.output_channels;
            format.channel_mask = layout.speaker_mask;
            format.channel_offsets = layout.offsets;
            format.lfe_channel_index = layout.lfe_index;
            format.channel_layout = layout.layout;
            format.lfe_level_adjustment =
                channel_map::lfe_level_adjustment(signal.lfe_playback_level);
        }

        format
    }

    /// Bytes in one hardware frame after the layout transform.
    pub fn pcm_frame_bytes(&self) -> usize {
        crate::bitstream::SAMPLES_PER_FRAME
            * usize::from(self.bit_depth_bytes)
            * usize::from(self.output_channel_count)
    }

    /// True when the downstream media type has to be renegotiated before
    /// the next frame can be delivered.
    pub fn should_change(&self, new: &AudioFormat, prefix: &str) -> bool {
        let mut reconnect = false;
        if self.input_channel_count != new.input_channel_count {
            reconnect = true;
            info!(
                "[{}] input channel count change {} to {}",
                prefix, self.input_channel_count, new.input_channel_count
            );
        }
        if self.output_channel_count != new.output_channel_count {
            reconnect = true;
            info!(
                "[{}] output channel count change {} to {}",
                prefix, self.output_channel_count, new.output_channel_count
            );
        }
        if self.bit_depth_bytes != new.bit_depth_bytes {
            reconnect = true;
            info!(
                "[{}] bit depth change {} to {}",
                prefix, self.bit_depth, new.bit_depth
            );
        }
        if self.fs != new.fs {
            reconnect = true;
            info!("[{}] sample rate change {} to {}", prefix, self.fs, new.fs);
        }
        if self.codec != new.codec {
            reconnect = true;
            info!(
                "[{}] codec change {} to {}",
                prefix,
                self.codec.display_name(),
                new.codec.display_name()
            );
        }
        if self.channel_allocation != new.channel_allocation {
            reconnect = true;
            info!(
                "[{}] channel allocation change {:#04x} to {:#04x}",
                prefix, self.channel_allocation, new.channel_allocation
            );
        }
        if self.codec != Codec::Pcm
            && new.codec != Codec::Pcm
            && self.data_burst_size != new.data_burst_size
        {
            reconnect = true;
            info!(
                "[{}] bitstream databurst change {} to {}",
                prefix, self.data_burst_size, new.data_burst_size
            );
        }
        reconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_signal() -> AudioSignal {
        AudioSignal {
            lpcm: true,
            sample_rate: 48_000,
            bits_per_sample: 24,
            channel_valid_mask: 0x0f,
            channel_allocation: 0x13,
            lfe_playback_level: 0,
        }
    }

    #[test]
    fn derives_7_1_from_allocation_0x13() {
        let current = AudioFormat::default();
        let format = AudioFormat::from_signal(&current, &pcm_signal(), DeviceFamily::Pro);
        assert_eq!(format.input_channel_count, 8);
        assert_eq!(format.output_channel_count, 8);
        assert_eq!(
            format.channel_mask,
            channel_map::speaker::SEVEN_POINT_ONE_SURROUND
        );
        assert_eq!(format.channel_offsets, [0, 0, 1, -1, 2, 2, -2, -2]);
        assert_eq!(format.lfe_channel_index, 2);
        assert_eq!(format.channel_layout, "FL FR FC LFE BL BR SL SR");
        assert_eq!(format.bit_depth_bytes, 3);
    }

    #[test]
    fn usb_family_pins_the_sample_rate() {
        let mut signal = pcm_signal();
        signal.sample_rate = 96_000;
        let format =
            AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Usb);
        assert_eq!(format.fs, 48_000);
        let format = AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Pro);
        assert_eq!(format.fs, 96_000);
    }

    #[test]
    fn unchanged_allocation_keeps_the_layout_fields() {
        let first = AudioFormat::from_signal(&AudioFormat::default(), &pcm_signal(), DeviceFamily::Pro);
        let second = AudioFormat::from_signal(&first, &pcm_signal(), DeviceFamily::Pro);
        assert_eq!(first, second);
        assert!(!first.should_change(&second, "t"));
    }

    #[test]
    fn lfe_level_applies_only_on_layout_change() {
        let mut signal = pcm_signal();
        signal.lfe_playback_level = 0x2;
        let format = AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Pro);
        assert!((format.lfe_level_adjustment - channel_map::MINUS_10DB).abs() < 1e-12);
    }

    #[test]
    fn burst_size_only_matters_for_bitstream() {
        let mut current = AudioFormat::default();
        let mut next = current.clone();
        next.data_burst_size = 6144;
        assert!(!current.should_change(&next, "t"));

        current.codec = Codec::Eac3;
        next.codec = Codec::Eac3;
        assert!(current.should_change(&next, "t"));
    }

    #[test]
    fn silent_signal_has_no_channels() {
        let mut signal = pcm_signal();
        signal.channel_valid_mask = 0;
        let format = AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Pro);
        assert_eq!(format.output_channel_count, 0);
        assert_eq!(format.channel_offsets, [NOT_PRESENT; 8]);
    }

    #[test]
    fn silent_then_valid_rederives() {
        let mut signal = pcm_signal();
        signal.channel_valid_mask = 0;
        let silent = AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Pro);
        let restored = AudioFormat::from_signal(&silent, &pcm_signal(), DeviceFamily::Pro);
        assert_eq!(restored.output_channel_count, 8);
    }
}
