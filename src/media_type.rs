//! Media types proposed to and agreed with the downstream sink.

use crate::audio_format::{AudioFormat, Codec};
use crate::channel_map::speaker;
use crate::fourcc::FourCc;
use crate::signal::{ColourFormat, PixelEncoding, QuantRange};
use crate::video_format::VideoFormat;

/// One negotiated stream format.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaType {
    Video(VideoMediaType),
    Audio(AudioMediaType),
}

impl MediaType {
    /// Bytes one sample of this type needs at most.
    pub fn sample_size(&self) -> usize {
        match self {
            MediaType::Video(v) => v.image_size as usize,
            MediaType::Audio(a) => a.sample_size as usize,
        }
    }
}

/// Colour info block carried alongside the video format, DXVA-style codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourInfo {
    /// 1 = REC.709, 4 = BT.2020.
    pub transfer_matrix: u8,
    /// 1 = REC.709, 9 = BT.2020.
    pub primaries: u8,
    /// 4 = REC.709, 15 = SMPTE ST 2084 (PQ), 0 = unknown.
    pub transfer_function: u8,
    /// 0 = unknown, 1 = 0-255, 2 = 16-235.
    pub nominal_range: u8,
}

/// `(Video, VideoInfoHeader2, subtype = FourCC)` equivalent.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMediaType {
    pub subtype: FourCc,
    pub width: i32,
    /// Negative for RGB subtypes: top-down rows.
    pub height: i32,
    pub bit_count: u8,
    pub image_size: u32,
    pub bit_rate: u64,
    /// 100 ns ticks per frame.
    pub avg_time_per_frame: i64,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub interlaced: bool,
    pub colour: ColourInfo,
}

impl VideoMediaType {
    pub fn from_format(format: &VideoFormat) -> Self {
        let is_rgb = format.pixel_encoding == PixelEncoding::Rgb444;
        let height = i32::from(format.cy);
        VideoMediaType {
            subtype: format.pixel_structure,
            width: i32::from(format.cx),
            // RGB frame rows run top-down
            height: if is_rgb { -height } else { height },
            bit_count: format.bit_count,
            image_size: format.image_size,
            bit_rate: (f64::from(format.bit_depth)
                * f64::from(format.image_size)
                * 8.0
                * format.fps) as u64,
            avg_time_per_frame: format.frame_interval,
            aspect_x: format.aspect_x,
            aspect_y: format.aspect_y,
            interlaced: false,
            colour: ColourInfo {
                transfer_matrix: if format.colour_format == ColourFormat::Yuv2020 {
                    4
                } else {
                    1
                },
                primaries: if format.colour_format == ColourFormat::Yuv2020 {
                    9
                } else {
                    1
                },
                transfer_function: format.hdr_meta.transfer_function,
                nominal_range: nominal_range(format.quantisation),
            },
        }
    }
}

fn nominal_range(quant: QuantRange) -> u8 {
    match quant {
        QuantRange::Unknown => 0,
        QuantRange::Full => 1,
        QuantRange::Limited => 2,
    }
}

/// PCM and IEC 61937 subtypes understood downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSubtype {
    /// Big-endian 24-bit PCM.
    PcmIn24,
    /// Big-endian 32-bit PCM.
    PcmIn32,
    /// Byte-order-preserving PCM for 16 bit and under.
    PcmSowt,
    DolbyAc3,
    DolbyDigitalPlus,
    Dts,
    DtsHd,
    DolbyTrueHd,
}

/// Extensible descriptor fields, present for wide/deep/high-rate PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensibleInfo {
    pub channel_mask: u32,
    pub valid_bits_per_sample: u16,
}

/// IEC 61937 transmission descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iec61937Info {
    pub encoded_channel_count: u16,
    pub encoded_samples_per_sec: u32,
}

/// `(Audio, WaveFormatEx...)` equivalent.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMediaType {
    pub subtype: AudioSubtype,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub avg_bytes_per_sec: u32,
    pub sample_size: u32,
    pub extensible: Option<ExtensibleInfo>,
    pub iec61937: Option<Iec61937Info>,
}

impl AudioMediaType {
    pub fn from_format(format: &AudioFormat) -> Self {
        match format.codec {
            Codec::Pcm => Self::pcm(format),
            _ => Self::iec61937(format),
        }
    }

    /// Big-endian PCM, wrapped in an extensible descriptor when more than
    /// stereo, deeper than 16 bits or faster than 48 kHz.
    fn pcm(format: &AudioFormat) -> Self {
        let subtype = match format.bit_depth_bytes {
            3 => AudioSubtype::PcmIn24,
            4 => AudioSubtype::PcmIn32,
            _ => AudioSubtype::PcmSowt,
        };
        let channels = format.output_channel_count;
        let bits = u16::from(format.bit_depth);
        let block_align = channels * bits / 8;
        let extensible = if channels > 2 || bits > 16 || format.fs > 48_000 {
            Some(ExtensibleInfo {
                channel_mask: format.channel_mask,
                valid_bits_per_sample: bits,
            })
        } else {
            None
        };
        AudioMediaType {
            subtype,
            channels,
            samples_per_sec: format.fs,
            bits_per_sample: bits,
            block_align,
            avg_bytes_per_sec: format.fs * u32::from(block_align),
            sample_size: u32::from(block_align),
            extensible,
            iec61937: None,
        }
    }

    /// IEC 61937 transmission format for the compressed codecs: 16-bit
    /// frames over one or four 60958 lines at a fixed line rate.
    fn iec61937(format: &AudioFormat) -> Self {
        let (subtype, channels, channel_mask, encoded_channels, fs) = match format.codec {
            Codec::Ac3 => (AudioSubtype::DolbyAc3, 2, speaker::FIVE_POINT_ONE, 6, 48_000),
            Codec::Eac3 => (
                AudioSubtype::DolbyDigitalPlus,
                2,
                speaker::FIVE_POINT_ONE,
                6,
                192_000,
            ),
            Codec::Dts => (AudioSubtype::Dts, 2, speaker::FIVE_POINT_ONE, 6, 48_000),
            Codec::DtsHd => (AudioSubtype::DtsHd, 8, speaker::SEVEN_POINT_ONE, 8, 192_000),
            Codec::TrueHd => (
                AudioSubtype::DolbyTrueHd,
                8,
                speaker::SEVEN_POINT_ONE,
                8,
                192_000,
            ),
            // unreachable for deliverable formats; fall back to the
            // narrowest transmission shape
            _ => (AudioSubtype::DolbyAc3, 2, speaker::FIVE_POINT_ONE, 6, 48_000),
        };
        let block_align: u16 = 16 / 8 * channels;
        AudioMediaType {
            subtype,
            channels,
            samples_per_sec: fs,
            bits_per_sample: 16,
            block_align,
            avg_bytes_per_sec: fs * u32::from(block_align),
            sample_size: u32::from(block_align),
            extensible: Some(ExtensibleInfo {
                channel_mask,
                valid_bits_per_sample: 16,
            }),
            iec61937: Some(Iec61937Info {
                encoded_channel_count: encoded_channels,
                encoded_samples_per_sec: 48_000,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_format::AudioFormat;
    use crate::device::DeviceFamily;
    use crate::fourcc;
    use crate::sdk::HdrInfoFramePayload;
    use crate::signal::{AudioSignal, SatRange, SignalState, VideoSignal};

    fn uhd_hdr_format() -> VideoFormat {
        let signal = VideoSignal {
            state: SignalState::Locked,
            cx: 3840,
            cy: 2160,
            aspect_x: 16,
            aspect_y: 9,
            frame_duration: 416_667,
            colour_format: ColourFormat::Yuv2020,
            quant_range: QuantRange::Limited,
            sat_range: SatRange::Limited,
            bit_depth: 10,
            pixel_encoding: PixelEncoding::Yuv420,
            input_valid: true,
            hdr: Some(HdrInfoFramePayload {
                eotf: 0x02,
                max_display_mastering_lsb_luminance: 0x9f,
                max_display_mastering_msb_luminance: 0x0f,
                ..Default::default()
            }),
            avi: None,
        };
        VideoFormat::from_signal(&signal, None)
    }

    #[test]
    fn uhd_hdr_video_type() {
        let mt = VideoMediaType::from_format(&uhd_hdr_format());
        assert_eq!(mt.subtype, fourcc::P010);
        assert_eq!(mt.width, 3840);
        assert_eq!(mt.height, 2160);
        assert_eq!(mt.colour.transfer_matrix, 4);
        assert_eq!(mt.colour.primaries, 9);
        assert_eq!(mt.colour.transfer_function, 15);
        assert_eq!(mt.colour.nominal_range, 2);
    }

    #[test]
    fn rgb_video_is_top_down() {
        let mt = VideoMediaType::from_format(&VideoFormat::from_signal(
            &VideoSignal::default(),
            None,
        ));
        assert_eq!(mt.subtype, fourcc::BGR24);
        assert_eq!(mt.height, -480);
        assert_eq!(mt.colour.nominal_range, 1);
    }

    #[test]
    fn stereo_16bit_pcm_is_plain_sowt() {
        let format = AudioFormat::default();
        let mt = AudioMediaType::from_format(&format);
        assert_eq!(mt.subtype, AudioSubtype::PcmSowt);
        assert_eq!(mt.channels, 2);
        assert_eq!(mt.block_align, 4);
        assert!(mt.extensible.is_none());
        assert!(mt.iec61937.is_none());
    }

    #[test]
    fn wide_pcm_gets_the_extensible_descriptor() {
        let signal = AudioSignal {
            lpcm: true,
            sample_rate: 48_000,
            bits_per_sample: 24,
            channel_valid_mask: 0x0f,
            channel_allocation: 0x13,
            lfe_playback_level: 0,
        };
        let format = AudioFormat::from_signal(&AudioFormat::default(), &signal, DeviceFamily::Pro);
        let mt = AudioMediaType::from_format(&format);
        assert_eq!(mt.subtype, AudioSubtype::PcmIn24);
        assert_eq!(mt.channels, 8);
        let ext = mt.extensible.expect("extensible");
        assert_eq!(ext.channel_mask, speaker::SEVEN_POINT_ONE_SURROUND);
        assert_eq!(ext.valid_bits_per_sample, 24);
    }

    #[test]
    fn eac3_rides_a_192k_line() {
        let mut format = AudioFormat::default();
        format.codec = Codec::Eac3;
        format.data_burst_size = 6144;
        let mt = AudioMediaType::from_format(&format);
        assert_eq!(mt.subtype, AudioSubtype::DolbyDigitalPlus);
        assert_eq!(mt.samples_per_sec, 192_000);
        assert_eq!(mt.channels, 2);
        let iec = mt.iec61937.expect("iec descriptor");
        assert_eq!(iec.encoded_channel_count, 6);
        assert_eq!(iec.encoded_samples_per_sec, 48_000);
    }

    #[test]
    fn truehd_uses_four_lines() {
        let mut format = AudioFormat::default();
        format.codec = Codec::TrueHd;
        let mt = AudioMediaType::from_format(&format);
        assert_eq!(mt.channels, 8);
        assert_eq!(mt.samples_per_sec, 192_000);
        assert_eq!(mt.iec61937.map(|i| i.encoded_channel_count), Some(8));
    }
}
