//! Snapshot structs pushed to the status observer. Latest wins; the hub
//! keeps the most recent copy of each so a late observer can be brought up
//! to date with `reload`.

use parking_lot::{Mutex, RwLock};

use crate::audio_format::AudioFormat;
use crate::channel_map::NOT_PRESENT;
use crate::hdr::{ContentLightLevel, HdrSideData};
use crate::signal::{AudioSignal, VideoSignal};
use crate::video_format::{transfer_function_name, VideoFormat};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInputStatus {
    pub cx: u16,
    pub cy: u16,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub fps: f64,
    pub signal_status: &'static str,
    pub colour_format: &'static str,
    pub quantisation: &'static str,
    pub saturation: &'static str,
    pub bit_depth: u8,
    pub pixel_layout: &'static str,
    pub valid_signal: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOutputStatus {
    pub cx: u16,
    pub cy: u16,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub fps: f64,
    pub colour_format: &'static str,
    pub quantisation: &'static str,
    pub saturation: &'static str,
    pub bit_depth: u8,
    pub pixel_layout: &'static str,
    pub pixel_structure: String,
    pub transfer_function: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioInputStatus {
    pub has_signal: bool,
    pub is_pcm: bool,
    pub bit_depth: u8,
    pub sample_rate: u32,
    pub channel_pair_mask: u16,
    pub channel_allocation: u8,
    pub lfe_level: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioOutputStatus {
    pub channel_layout: &'static str,
    pub bit_depth: u8,
    pub codec: &'static str,
    pub sample_rate: u32,
    /// 0 or -10 dB.
    pub lfe_offset: i16,
    /// Output slot of the LFE channel, -1 when absent.
    pub lfe_channel_index: i32,
    pub channel_count: u16,
    pub data_burst_size: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HdrStatus {
    pub hdr_on: bool,
    pub primary_r: (f64, f64),
    pub primary_g: (f64, f64),
    pub primary_b: (f64, f64),
    pub white_point: (f64, f64),
    pub min_dml: f64,
    pub max_dml: f64,
    pub max_cll: f64,
    pub max_fall: f64,
}

/// Receives status pushes. Implementations must tolerate calls from any
/// pin worker thread.
pub trait StatusObserver: Send + Sync {
    fn device_status(&self, status: &DeviceStatus);
    fn video_input_status(&self, status: &VideoInputStatus);
    fn video_output_status(&self, status: &VideoOutputStatus);
    fn audio_input_status(&self, status: &AudioInputStatus);
    fn audio_output_status(&self, status: &AudioOutputStatus);
    fn hdr_status(&self, status: &HdrStatus);
}

#[derive(Default)]
struct Latest {
    device: DeviceStatus,
    video_in: VideoInputStatus,
    video_out: VideoOutputStatus,
    audio_in: AudioInputStatus,
    audio_out: AudioOutputStatus,
    hdr: HdrStatus,
}

/// Fans status snapshots out to the registered observer and remembers the
/// latest of each kind.
#[derive(Default)]
pub struct StatusHub {
    observer: RwLock<Option<Box<dyn StatusObserver>>>,
    latest: Mutex<Latest>,
}

impl StatusHub {
    pub fn new() -> Self {
        StatusHub::default()
    }

    pub fn set_observer(&self, observer: Option<Box<dyn StatusObserver>>) {
        *self.observer.write() = observer;
    }

    /// Pushes every snapshot kind again, for an observer that just arrived.
    pub fn reload(&self) {
        let observer = self.observer.read();
        if let Some(observer) = observer.as_ref() {
            let latest = self.latest.lock();
            observer.device_status(&latest.device);
            observer.video_input_status(&latest.video_in);
            observer.video_output_status(&latest.video_out);
            observer.audio_input_status(&latest.audio_in);
            observer.audio_output_status(&latest.audio_out);
            observer.hdr_status(&latest.hdr);
        }
    }

    pub fn device_selected(&self, description: String) {
        let status = DeviceStatus { description };
        self.latest.lock().device = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.device_status(&status);
        }
    }

    pub fn video_signal_loaded(&self, signal: &VideoSignal) {
        let status = VideoInputStatus {
            cx: signal.cx,
            cy: signal.cy,
            aspect_x: signal.aspect_x,
            aspect_y: signal.aspect_y,
            fps: signal.fps(),
            signal_status: signal.state.display_name(),
            colour_format: signal.colour_format.display_name(),
            quantisation: signal.quant_range.display_name(),
            saturation: signal.sat_range.display_name(),
            bit_depth: signal.bit_depth,
            pixel_layout: signal.pixel_encoding.display_name(),
            valid_signal: signal.input_valid,
        };
        self.latest.lock().video_in = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.video_input_status(&status);
        }
    }

    pub fn video_format_loaded(&self, format: &VideoFormat) {
        let status = VideoOutputStatus {
            cx: format.cx,
            cy: format.cy,
            aspect_x: format.aspect_x,
            aspect_y: format.aspect_y,
            fps: format.fps,
            colour_format: format.colour_format.display_name(),
            quantisation: format.quantisation.display_name(),
            saturation: format.saturation.display_name(),
            bit_depth: format.bit_depth,
            pixel_layout: format.pixel_encoding.display_name(),
            pixel_structure: format.pixel_structure_name.clone(),
            transfer_function: transfer_function_name(format.hdr_meta.transfer_function),
        };
        self.latest.lock().video_out = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.video_output_status(&status);
        }
    }

    pub fn audio_signal_loaded(&self, signal: &AudioSignal) {
        let status = AudioInputStatus {
            has_signal: signal.bits_per_sample > 0,
            is_pcm: signal.lpcm,
            bit_depth: signal.bits_per_sample,
            sample_rate: signal.sample_rate,
            channel_pair_mask: signal.channel_valid_mask,
            channel_allocation: signal.channel_allocation,
            lfe_level: signal.lfe_playback_level,
        };
        self.latest.lock().audio_in = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.audio_input_status(&status);
        }
    }

    pub fn audio_format_loaded(&self, format: &AudioFormat) {
        let lfe_channel_index = if format.lfe_channel_index == NOT_PRESENT {
            -1
        } else {
            let idx = format.lfe_channel_index;
            i32::from(idx + format.channel_offsets[idx as usize])
        };
        let status = AudioOutputStatus {
            channel_layout: format.channel_layout,
            bit_depth: format.bit_depth,
            codec: format.codec.display_name(),
            sample_rate: format.fs,
            lfe_offset: if (format.lfe_level_adjustment - 1.0).abs() < 1e-6 {
                0
            } else {
                -10
            },
            lfe_channel_index,
            channel_count: format.output_channel_count,
            data_burst_size: format.data_burst_size,
        };
        self.latest.lock().audio_out = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.audio_output_status(&status);
        }
    }

    /// `None` signals "HDR cleared".
    pub fn hdr_updated(&self, hdr: Option<(&HdrSideData, &ContentLightLevel)>) {
        let status = match hdr {
            None => HdrStatus::default(),
            Some((side, light)) => HdrStatus {
                hdr_on: true,
                primary_r: (side.display_primaries_x[2], side.display_primaries_y[2]),
                primary_g: (side.display_primaries_x[0], side.display_primaries_y[0]),
                primary_b: (side.display_primaries_x[1], side.display_primaries_y[1]),
                white_point: (side.white_point_x, side.white_point_y),
                min_dml: side.min_display_mastering_luminance,
                max_dml: side.max_display_mastering_luminance,
                max_cll: f64::from(light.max_cll),
                max_fall: f64::from(light.max_fall),
            },
        };
        self.latest.lock().hdr = status.clone();
        if let Some(observer) = self.observer.read().as_ref() {
            observer.hdr_status(&status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingObserver {
        pushes: AtomicUsize,
        last_layout: Mutex<&'static str>,
    }

    impl StatusObserver for Arc<CountingObserver> {
        fn device_status(&self, _: &DeviceStatus) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        fn video_input_status(&self, _: &VideoInputStatus) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        fn video_output_status(&self, _: &VideoOutputStatus) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        fn audio_input_status(&self, _: &AudioInputStatus) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        fn audio_output_status(&self, status: &AudioOutputStatus) {
            *self.last_layout.lock() = status.channel_layout;
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
        fn hdr_status(&self, _: &HdrStatus) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn reload_pushes_all_six_kinds() {
        let hub = StatusHub::new();
        let observer = Arc::new(CountingObserver::default());
        hub.set_observer(Some(Box::new(observer.clone())));
        hub.reload();
        assert_eq!(observer.pushes.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn audio_output_reports_the_moved_lfe_slot() {
        let hub = StatusHub::new();
        let observer = Arc::new(CountingObserver::default());
        hub.set_observer(Some(Box::new(observer.clone())));

        let mut format = AudioFormat::default();
        format.channel_offsets = [0, 0, 1, -1, 0, 0, 0, 0];
        format.lfe_channel_index = 2;
        format.channel_layout = "FL FR FC LFE BL BR SL SR";
        hub.audio_format_loaded(&format);

        assert_eq!(*observer.last_layout.lock(), "FL FR FC LFE BL BR SL SR");
        // LFE sits at input slot 2, moved down by its +1 offset
        assert_eq!(hub.latest.lock().audio_out.lfe_channel_index, 3);
    }

    #[test]
    fn pushes_without_an_observer_are_kept_for_later() {
        let hub = StatusHub::new();
        hub.device_selected("Pro Capture [X1]".to_string());

        let observer = Arc::new(CountingObserver::default());
        hub.set_observer(Some(Box::new(observer.clone())));
        hub.reload();
        assert_eq!(hub.latest.lock().device.description, "Pro Capture [X1]");
        assert_eq!(observer.pushes.load(Ordering::SeqCst), 6);
    }
}
