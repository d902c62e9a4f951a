//! Derives the deliverable video format from the probed signal.

use log::info;

use crate::fourcc::{self, FourCc};
use crate::hdr::{decode_hdr_infoframe, HdrMeta};
use crate::sdk::UsbCaptureFormats;
use crate::signal::{ColourFormat, PixelEncoding, QuantRange, SatRange, VideoSignal};

/// Two consecutive frame intervals within 100 ticks (10 us) are the same
/// rate as far as renegotiation is concerned.
pub const FRAME_INTERVAL_TOLERANCE: i64 = 100;

// bit depth bucket -> pixel encoding -> fourcc
const FOURCC_TABLE: [[FourCc; 4]; 3] = [
    // RGB444, YUV422, YUV444, YUV420
    [fourcc::BGR24, fourcc::NV16, fourcc::AYUV, fourcc::NV12], // 8  bit
    [fourcc::BGR10, fourcc::P210, fourcc::AYUV, fourcc::P010], // 10 bit
    [fourcc::BGR10, fourcc::P210, fourcc::AYUV, fourcc::P010], // 12 bit
];
const FOURCC_NAMES: [[&str; 4]; 3] = [
    ["BGR24", "NV16", "AYUV", "NV12"],
    ["BGR10", "P210", "AYUV", "P010"],
    ["BGR10", "P210", "AYUV", "P010"],
];

/// The format the downstream pin has agreed to, with every derived field
/// the media type and the hardware fill need.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub colour_format: ColourFormat,
    pub pixel_encoding: PixelEncoding,
    pub bit_depth: u8,
    pub cx: u16,
    pub cy: u16,
    pub fps: f64,
    /// 100 ns ticks per frame.
    pub frame_interval: i64,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub quantisation: QuantRange,
    pub saturation: SatRange,
    pub hdr_meta: HdrMeta,
    // derived from the above
    pub bit_count: u8,
    pub pixel_structure: FourCc,
    pub pixel_structure_name: String,
    pub colour_format_name: &'static str,
    pub line_length: u32,
    pub image_size: u32,
}

impl Default for VideoFormat {
    fn default() -> Self {
        let mut format = VideoFormat {
            colour_format: ColourFormat::Yuv709,
            pixel_encoding: PixelEncoding::Yuv420,
            bit_depth: 8,
            cx: 3840,
            cy: 2160,
            fps: 50.0,
            frame_interval: 200_000,
            aspect_x: 16,
            aspect_y: 9,
            quantisation: QuantRange::Limited,
            saturation: SatRange::Limited,
            hdr_meta: HdrMeta::default(),
            bit_count: 0,
            pixel_structure: fourcc::NV12,
            pixel_structure_name: String::new(),
            colour_format_name: "",
            line_length: 0,
            image_size: 0,
        };
        format.refresh_derived();
        format
    }
}

impl VideoFormat {
    /// Derives the natural format for the probed signal. An unlocked signal
    /// substitutes the 720x480 RGB 4:4:4 full-range default so the pin is
    /// always in a deliverable state. For the USB family the result is then
    /// pruned against the device's advertised formats.
    pub fn from_signal(signal: &VideoSignal, usb: Option<&UsbCaptureFormats>) -> VideoFormat {
        let mut format = VideoFormat::default();

        if signal.locked() {
            format.cx = signal.cx;
            format.cy = signal.cy;
            format.aspect_x = signal.aspect_x;
            format.aspect_y = signal.aspect_y;
            format.quantisation = signal.quant_range;
            format.saturation = signal.sat_range;
            format.fps = signal.fps();
            format.frame_interval = i64::from(signal.frame_duration);
            format.bit_depth = signal.bit_depth;
            format.colour_format = signal.colour_format;
            format.pixel_encoding = signal.pixel_encoding;
            if let Some(hdr) = &signal.hdr {
                format.hdr_meta = decode_hdr_infoframe(hdr);
            }
        } else {
            // no/invalid signal is delivered as a 720x480 RGB 4:4:4 image
            format.cx = 720;
            format.cy = 480;
            format.bit_depth = 8;
            format.quantisation = QuantRange::Full;
            format.saturation = SatRange::Full;
            format.colour_format = ColourFormat::Rgb;
            format.pixel_encoding = PixelEncoding::Rgb444;
        }

        let bucket = match format.bit_depth {
            8 => 0,
            10 => 1,
            _ => 2,
        };
        let column = format.pixel_encoding.table_index();
        format.pixel_structure = FOURCC_TABLE[bucket][column];
        format.pixel_structure_name = FOURCC_NAMES[bucket][column].to_string();
        format.colour_format_name = match format.colour_format {
            ColourFormat::Yuv709 => "YUV709",
            ColourFormat::Yuv2020 => "YUV2020",
            ColourFormat::Rgb => "RGB",
            _ => "UNK",
        };

        if let Some(formats) = usb {
            format.prune_to_device(formats);
        }

        format.refresh_derived();
        format
    }

    /// Coerces the derived format onto what a USB device can actually emit,
    /// substituting the device default at each unsupported dimension.
    fn prune_to_device(&mut self, formats: &UsbCaptureFormats) {
        if !formats.fourccs.is_empty() && !formats.fourccs.contains(&self.pixel_structure) {
            self.pixel_structure = formats.fourccs[formats.default_fourcc];
            self.pixel_structure_name = self.pixel_structure.to_string();
        }

        if !formats.frame_intervals.is_empty() {
            let supported = formats
                .frame_intervals
                .iter()
                .any(|fi| (fi - self.frame_interval).abs() < FRAME_INTERVAL_TOLERANCE);
            if !supported {
                self.frame_interval = formats.frame_intervals[formats.default_frame_interval];
                self.fps = 10_000_000.0 / self.frame_interval as f64;
            }
        }

        if !formats.frame_sizes.is_empty() {
            let supported = formats
                .frame_sizes
                .iter()
                .any(|&(cx, cy)| cx == self.cx && cy == self.cy);
            if !supported {
                let (cx, cy) = formats.frame_sizes[formats.default_frame_size];
                self.cx = cx;
                self.cy = cy;
            }
        }
    }

    /// Recomputes bit count, stride and image size from the fourcc.
    pub fn refresh_derived(&mut self) {
        self.bit_count = self.pixel_structure.bits_per_pixel();
        self.line_length = self.pixel_structure.min_stride(u32::from(self.cx), 2);
        self.image_size =
            self.pixel_structure
                .image_size(u32::from(self.cx), u32::from(self.cy), self.line_length);
    }

    /// True when the downstream media type has to be renegotiated before
    /// the next frame can be delivered.
    pub fn should_change(&self, new: &VideoFormat, prefix: &str) -> bool {
        let mut reconnect = false;
        if new.cx != self.cx || new.cy != self.cy {
            reconnect = true;
            info!(
                "[{}] video dimension change {}x{} to {}x{}",
                prefix, self.cx, self.cy, new.cx, new.cy
            );
        }
        if new.aspect_x != self.aspect_x || new.aspect_y != self.aspect_y {
            reconnect = true;
            info!(
                "[{}] video AR change {}:{} to {}:{}",
                prefix, self.aspect_x, self.aspect_y, new.aspect_x, new.aspect_y
            );
        }
        if (new.frame_interval - self.frame_interval).abs() >= FRAME_INTERVAL_TOLERANCE {
            reconnect = true;
            info!(
                "[{}] video FPS change {:.3} to {:.3}",
                prefix, self.fps, new.fps
            );
        }
        if self.bit_depth != new.bit_depth {
            reconnect = true;
            info!(
                "[{}] video bit depth change {} to {}",
                prefix, self.bit_depth, new.bit_depth
            );
        }
        if self.pixel_encoding != new.pixel_encoding {
            reconnect = true;
            info!(
                "[{}] video pixel encoding change {} to {}",
                prefix,
                self.pixel_encoding.display_name(),
                new.pixel_encoding.display_name()
            );
        }
        if self.colour_format != new.colour_format {
            reconnect = true;
            info!(
                "[{}] video colour format change {} to {}",
                prefix, self.colour_format_name, new.colour_format_name
            );
        }
        if self.quantisation != new.quantisation || self.saturation != new.saturation {
            reconnect = true;
            info!(
                "[{}] video colorimetry change quant {} to {} sat {} to {}",
                prefix,
                self.quantisation.display_name(),
                new.quantisation.display_name(),
                self.saturation.display_name(),
                new.saturation.display_name()
            );
        }
        if self.hdr_meta.transfer_function != new.hdr_meta.transfer_function {
            reconnect = true;
            info!(
                "[{}] video transfer function change {} to {}",
                prefix,
                transfer_function_name(self.hdr_meta.transfer_function),
                transfer_function_name(new.hdr_meta.transfer_function)
            );
        }
        reconnect
    }
}

pub(crate) fn transfer_function_name(tf: u8) -> &'static str {
    match tf {
        4 => "REC.709",
        15 => "SMPTE ST 2084 (PQ)",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::HdrInfoFramePayload;
    use crate::signal::SignalState;

    fn locked_signal() -> VideoSignal {
        VideoSignal {
            state: SignalState::Locked,
            cx: 3840,
            cy: 2160,
            aspect_x: 16,
            aspect_y: 9,
            frame_duration: 416_667, // 24 Hz
            colour_format: ColourFormat::Yuv2020,
            quant_range: QuantRange::Limited,
            sat_range: SatRange::Limited,
            bit_depth: 10,
            pixel_encoding: PixelEncoding::Yuv420,
            input_valid: true,
            hdr: None,
            avi: None,
        }
    }

    #[test]
    fn hdr_uhd_signal_derives_p010() {
        let mut signal = locked_signal();
        signal.hdr = Some(HdrInfoFramePayload {
            eotf: 0x02,
            max_display_mastering_lsb_luminance: 0x9f,
            max_display_mastering_msb_luminance: 0x0f,
            ..Default::default()
        });

        let format = VideoFormat::from_signal(&signal, None);
        assert_eq!(format.pixel_structure, fourcc::P010);
        assert_eq!(format.pixel_structure_name, "P010");
        assert_eq!(format.bit_count, 24);
        assert_eq!(format.line_length, 7680);
        assert_eq!(format.image_size, 7680 * 2160 * 3 / 2);
        assert_eq!(format.hdr_meta.transfer_function, 15);
        assert!(format.hdr_meta.exists);
    }

    #[test]
    fn unlocked_signal_falls_back_to_sd_rgb() {
        let signal = VideoSignal::default();
        let format = VideoFormat::from_signal(&signal, None);
        assert_eq!((format.cx, format.cy), (720, 480));
        assert_eq!(format.colour_format, ColourFormat::Rgb);
        assert_eq!(format.pixel_encoding, PixelEncoding::Rgb444);
        assert_eq!(format.quantisation, QuantRange::Full);
        assert_eq!(format.pixel_structure, fourcc::BGR24);
        assert_eq!(format.bit_depth, 8);
        assert_eq!(format.image_size, format.line_length * 480);
    }

    #[test]
    fn image_size_matches_stride_for_packed_formats() {
        let mut signal = locked_signal();
        signal.bit_depth = 8;
        signal.pixel_encoding = PixelEncoding::Yuv444;
        let format = VideoFormat::from_signal(&signal, None);
        assert_eq!(format.pixel_structure, fourcc::AYUV);
        assert_eq!(format.image_size, format.line_length * u32::from(format.cy));
    }

    #[test]
    fn usb_device_prunes_to_its_defaults() {
        let signal = VideoSignal {
            bit_depth: 8,
            pixel_encoding: PixelEncoding::Yuv444,
            ..locked_signal()
        };
        let formats = UsbCaptureFormats {
            fourccs: vec![fourcc::NV12],
            default_fourcc: 0,
            frame_intervals: vec![166_667],
            default_frame_interval: 0,
            frame_sizes: vec![(1920, 1080)],
            default_frame_size: 0,
        };

        let format = VideoFormat::from_signal(&signal, Some(&formats));
        assert_eq!(format.pixel_structure, fourcc::NV12);
        assert_eq!((format.cx, format.cy), (1920, 1080));
        assert_eq!(format.frame_interval, 166_667);
        assert_eq!(format.image_size, 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn usb_matching_interval_is_kept_within_tolerance() {
        let mut signal = locked_signal();
        signal.frame_duration = 166_700;
        let formats = UsbCaptureFormats {
            fourccs: vec![fourcc::P010],
            default_fourcc: 0,
            frame_intervals: vec![166_667, 200_000],
            default_frame_interval: 1,
            frame_sizes: vec![(3840, 2160)],
            default_frame_size: 0,
        };
        let format = VideoFormat::from_signal(&signal, Some(&formats));
        assert_eq!(format.frame_interval, 166_700);
    }

    #[test]
    fn should_change_is_idempotent() {
        let signal = locked_signal();
        let current = VideoFormat::from_signal(&signal, None);
        let fresh = VideoFormat::from_signal(&signal, None);
        assert_eq!(
            current.should_change(&fresh, "t"),
            current.should_change(&fresh, "t")
        );
        assert!(!current.should_change(&fresh, "t"));

        let mut changed = locked_signal();
        changed.bit_depth = 8;
        let next = VideoFormat::from_signal(&changed, None);
        assert!(current.should_change(&next, "t"));
        // applying the change and re-probing settles
        assert!(!next.should_change(&VideoFormat::from_signal(&changed, None), "t"));
    }

    #[test]
    fn small_interval_jitter_does_not_reconnect() {
        let signal = locked_signal();
        let current = VideoFormat::from_signal(&signal, None);
        let mut jittered = locked_signal();
        jittered.frame_duration = 416_667 + 99;
        assert!(!current.should_change(&VideoFormat::from_signal(&jittered, None), "t"));
        jittered.frame_duration = 416_667 + 100;
        assert!(current.should_change(&VideoFormat::from_signal(&jittered, None), "t"));
    }
}
