//! The video pin: waits on frame notifications, reconciles format changes
//! and hands timestamped frames (plus HDR side data) downstream.

use std::sync::Arc;
use std::thread;

use log::{debug, error, info, trace, warn};
use pix::rgb::SRgb8;
use pix::Raster;

use crate::backend::{video_backend_for, FrameStatus, VideoBackend};
use crate::clock::{ReferenceClock, ONE_SECOND};
use crate::device::DeviceFamily;
use crate::error::CaptureError;
use crate::fourcc;
use crate::media_type::{MediaType, VideoMediaType};
use crate::sdk::{CaptureChannel, UsbCaptureFormats};
use crate::signal::{VideoSignal, VideoSignalProbe};
use crate::sink::{MediaSample, MediaSink};
use crate::status::StatusHub;
use crate::video_format::VideoFormat;

use super::{
    AcquireFailure, FillAction, Pin, PinCore, StreamControl, BACKOFF, DEFAULT_BUFFER_COUNT,
    FRAME_WAIT, SHORT_BACKOFF,
};

pub struct VideoPin {
    core: PinCore,
    backend: Box<dyn VideoBackend>,
    probe: VideoSignalProbe,
    signal: VideoSignal,
    format: VideoFormat,
    usb_formats: Option<UsbCaptureFormats>,
    /// Next fill synthesizes the no-signal image instead of pulling from
    /// the device.
    deliver_blank: bool,
}

impl VideoPin {
    pub fn new(
        family: DeviceFamily,
        channel: Arc<dyn CaptureChannel>,
        preview: bool,
        clock: Arc<ReferenceClock>,
        control: Arc<StreamControl>,
        status: Arc<StatusHub>,
        sink: Box<dyn MediaSink>,
    ) -> Self {
        let prefix: &'static str = if preview {
            "VideoPreview"
        } else {
            "VideoCapture"
        };

        let usb_formats = match family {
            DeviceFamily::Usb => match channel.usb_capture_formats() {
                Ok(formats) => Some(formats),
                Err(e) => {
                    warn!("[{}] unable to load device capture formats: {}", prefix, e);
                    None
                }
            },
            DeviceFamily::Pro => None,
        };

        let mut probe = VideoSignalProbe::new(channel.clone(), prefix);
        let (signal, _) = probe.probe();
        let format = VideoFormat::from_signal(&signal, usb_formats.as_ref());
        let media_type = MediaType::Video(VideoMediaType::from_format(&format));

        let core = PinCore::new(
            prefix,
            preview,
            clock,
            control,
            status,
            sink,
            media_type,
            format.image_size as usize,
        );

        VideoPin {
            core,
            backend: video_backend_for(family, channel, prefix),
            probe,
            signal,
            format,
            usb_formats,
            deliver_blank: false,
        }
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn do_change_media_type(&mut self, new_format: &VideoFormat) -> Result<(), CaptureError> {
        info!(
            "[{}] proposing {} x {} ({}:{}) @ {:.3} Hz in {} bits ({} {} tf {}) size {} bytes",
            self.core.prefix,
            new_format.cx,
            new_format.cy,
            new_format.aspect_x,
            new_format.aspect_y,
            new_format.fps,
            new_format.bit_depth,
            new_format.pixel_structure_name,
            new_format.colour_format_name,
            new_format.hdr_meta.transfer_function,
            new_format.image_size
        );

        let proposed = MediaType::Video(VideoMediaType::from_format(new_format));
        let resize = new_format.image_size != self.format.image_size;
        self.core
            .renegotiate_media_type(&proposed, new_format.image_size as usize, resize)?;
        self.backend.reconfigure(new_format)?;
        self.format = new_format.clone();
        Ok(())
    }

    fn log_hdr_meta_changes(&self, new_format: &VideoFormat) {
        let new_meta = &new_format.hdr_meta;
        let old_meta = &self.format.hdr_meta;

        if self.signal.hdr.is_some() {
            if new_meta.exists {
                if !old_meta.exists {
                    info!("[{}] HDR metadata is now present", self.core.prefix);
                }
                let log_primaries = !old_meta.exists
                    || new_meta.r_primary_x != old_meta.r_primary_x
                    || new_meta.r_primary_y != old_meta.r_primary_y
                    || new_meta.g_primary_x != old_meta.g_primary_x
                    || new_meta.g_primary_y != old_meta.g_primary_y
                    || new_meta.b_primary_x != old_meta.b_primary_x
                    || new_meta.b_primary_y != old_meta.b_primary_y;
                let log_wp = !old_meta.exists
                    || new_meta.whitepoint_x != old_meta.whitepoint_x
                    || new_meta.whitepoint_y != old_meta.whitepoint_y;
                let log_light = !old_meta.exists
                    || new_meta.max_cll != old_meta.max_cll
                    || new_meta.min_dml != old_meta.min_dml
                    || new_meta.max_dml != old_meta.max_dml
                    || new_meta.max_fall != old_meta.max_fall;
                if log_primaries {
                    info!(
                        "[{}] primaries R {} x {} G {} x {} B {} x {}",
                        self.core.prefix,
                        new_meta.r_primary_x,
                        new_meta.r_primary_y,
                        new_meta.g_primary_x,
                        new_meta.g_primary_y,
                        new_meta.b_primary_x,
                        new_meta.b_primary_y
                    );
                }
                if log_wp {
                    info!(
                        "[{}] whitepoint {} x {}",
                        self.core.prefix, new_meta.whitepoint_x, new_meta.whitepoint_y
                    );
                }
                if log_light {
                    info!(
                        "[{}] DML {} / {} MaxCLL {} MaxFALL {}",
                        self.core.prefix,
                        new_meta.min_dml,
                        new_meta.max_dml,
                        new_meta.max_cll,
                        new_meta.max_fall
                    );
                }
            } else {
                warn!(
                    "[{}] HDR InfoFrame values present but no metadata parsed",
                    self.core.prefix
                );
            }
        }
        if !new_meta.exists && old_meta.exists {
            debug!("[{}] HDR metadata has been removed", self.core.prefix);
        }
    }

    /// Black frame delivered once per wait timeout while there is no
    /// signal. Only ever built for the BGR24 fallback format.
    fn write_blank_frame(&self, dst: &mut [u8]) -> usize {
        let image_size = self.format.image_size as usize;
        if self.format.pixel_structure != fourcc::BGR24 {
            for b in dst[..image_size].iter_mut() {
                *b = 0;
            }
            return image_size;
        }

        let raster: Raster<SRgb8> =
            Raster::with_clear(u32::from(self.format.cx), u32::from(self.format.cy));
        let src = raster.as_u8_slice();
        let width = usize::from(self.format.cx);
        let stride = self.format.line_length as usize;
        for y in 0..usize::from(self.format.cy) {
            let row = &src[y * width * 3..(y + 1) * width * 3];
            let out = &mut dst[y * stride..y * stride + width * 3];
            for x in 0..width {
                out[x * 3] = row[x * 3 + 2];
                out[x * 3 + 1] = row[x * 3 + 1];
                out[x * 3 + 2] = row[x * 3];
            }
        }
        image_size
    }

    fn append_hdr_side_data(&mut self, sample: &mut MediaSample, end_time: i64) {
        // update downstream at most once per second
        if end_time <= self.core.last_sent_hdr_meta_at + ONE_SECOND {
            return;
        }
        self.core.last_sent_hdr_meta_at = end_time;
        if self.format.hdr_meta.exists {
            let (side, light) = self.format.hdr_meta.to_side_data();
            trace!(
                "[{}] HDR side data in frame {}: R {:.4} {:.4} G {:.4} {:.4} B {:.4} {:.4} W {:.4} {:.4} DML {} {} CLL/FALL {} {}",
                self.core.prefix,
                self.core.frame_counter,
                side.display_primaries_x[2],
                side.display_primaries_y[2],
                side.display_primaries_x[0],
                side.display_primaries_y[0],
                side.display_primaries_x[1],
                side.display_primaries_y[1],
                side.white_point_x,
                side.white_point_y,
                side.min_display_mastering_luminance,
                side.max_display_mastering_luminance,
                light.max_cll,
                light.max_fall
            );
            sample.hdr = Some((side, light));
            self.core.status.hdr_updated(Some((&side, &light)));
        } else {
            self.core.status.hdr_updated(None);
        }
    }
}

impl Pin for VideoPin {
    fn media_type(&self) -> MediaType {
        MediaType::Video(VideoMediaType::from_format(&self.format))
    }

    fn propose_buffers(&self) -> (usize, usize) {
        (self.format.image_size as usize, DEFAULT_BUFFER_COUNT)
    }

    fn on_thread_create(&mut self) -> Result<(), CaptureError> {
        info!("[{}] video pin thread starting", self.core.prefix);
        let (signal, usable) = self.probe.probe();
        self.signal = signal;
        self.core.has_signal = usable && self.signal.locked();
        self.core.status.video_signal_loaded(&self.signal);
        self.backend.start(&self.format)
    }

    fn on_thread_destroy(&mut self) {
        info!("[{}] video pin thread stopping", self.core.prefix);
        self.backend.stop();
    }

    fn acquire_sample(&mut self) -> Result<MediaSample, AcquireFailure> {
        loop {
            if self.core.control.exit_requested() {
                return Err(AcquireFailure::Exit);
            }
            if self.core.control.discarding() {
                trace!("[{}] stream is discarding", self.core.prefix);
                return Err(AcquireFailure::Retry);
            }
            if self.core.stream_start_time() == 0 {
                trace!(
                    "[{}] stream has not started, retry after backoff",
                    self.core.prefix
                );
                thread::sleep(BACKOFF);
                continue;
            }

            let (signal, usable) = self.probe.probe();
            let had_signal = self.core.has_signal;
            self.signal = signal;
            let mut has_signal = usable;
            if !self.signal.locked() {
                trace!(
                    "[{}] signal is not locked ({})",
                    self.core.prefix,
                    self.signal.state.display_name()
                );
                has_signal = false;
            }
            if self.signal.bit_depth == 0 {
                warn!("[{}] reported bit depth is 0", self.core.prefix);
                has_signal = false;
            }
            self.core.has_signal = has_signal;

            let new_format = VideoFormat::from_signal(&self.signal, self.usb_formats.as_ref());
            self.log_hdr_meta_changes(&new_format);

            if self.format.should_change(&new_format, self.core.prefix) {
                warn!(
                    "[{}] video format changed, attempting to reconnect",
                    self.core.prefix
                );
                let result = self.do_change_media_type(&new_format);
                self.core.status.video_signal_loaded(&self.signal);
                match result {
                    Ok(()) => self.core.status.video_format_loaded(&self.format),
                    Err(e) => {
                        error!(
                            "[{}] format changed but unable to reconnect ({}), retry after backoff",
                            self.core.prefix, e
                        );
                        thread::sleep(BACKOFF);
                        continue;
                    }
                }
            }

            if had_signal && !self.core.has_signal {
                self.core.status.video_signal_loaded(&self.signal);
            }

            if !self.backend.wait_frame(FRAME_WAIT) {
                if !self.core.has_signal {
                    trace!(
                        "[{}] timeout with no signal, delivering the no-signal image",
                        self.core.prefix
                    );
                    match self.core.pool.acquire() {
                        Ok(buffer) => {
                            self.deliver_blank = true;
                            return Ok(MediaSample::new(buffer));
                        }
                        Err(_) => {
                            warn!(
                                "[{}] unable to get delivery buffer, retry after backoff",
                                self.core.prefix
                            );
                            thread::sleep(SHORT_BACKOFF);
                            continue;
                        }
                    }
                }
                trace!("[{}] wait for frame timed out", self.core.prefix);
                continue;
            }

            match self.backend.frame_status() {
                Ok(FrameStatus::Ready) => {}
                Ok(FrameStatus::SignalChange) => {
                    trace!(
                        "[{}] video signal change, retry after backoff",
                        self.core.prefix
                    );
                    thread::sleep(BACKOFF);
                    continue;
                }
                Ok(FrameStatus::InputSourceChange) => {
                    trace!(
                        "[{}] video input source change, retry after backoff",
                        self.core.prefix
                    );
                    thread::sleep(BACKOFF);
                    continue;
                }
                Ok(FrameStatus::NotReady) => {
                    if self.core.has_signal {
                        thread::sleep(SHORT_BACKOFF);
                        continue;
                    }
                    trace!("[{}] no signal, the device image will be shown", self.core.prefix);
                }
                Err(e) => {
                    trace!("[{}] notify status unreadable: {}", self.core.prefix, e);
                    thread::sleep(BACKOFF);
                    continue;
                }
            }

            self.deliver_blank = false;
            match self.core.pool.acquire() {
                Ok(buffer) => return Ok(MediaSample::new(buffer)),
                Err(_) => {
                    warn!(
                        "[{}] frame buffered but no delivery buffer, retry after backoff",
                        self.core.prefix
                    );
                    thread::sleep(SHORT_BACKOFF);
                    continue;
                }
            }
        }
    }

    fn fill_buffer(&mut self, sample: &mut MediaSample) -> Result<FillAction, CaptureError> {
        let image_size = self.format.image_size as usize;

        if self.deliver_blank {
            sample.len = self.write_blank_frame(&mut sample.data);
        } else {
            let control = self.core.control.clone();
            let abort = move || control.discarding();
            let filled = self.backend.fill(
                &self.format,
                self.core.has_signal,
                &mut sample.data,
                &abort,
            )?;
            if !filled {
                trace!("[{}] no frame loaded", self.core.prefix);
                return Ok(FillAction::Skip);
            }
            sample.len = image_size;
        }

        self.core.frame_end_time = self.core.clock.now();
        let end_time = self.core.frame_end_time - self.core.stream_start_time();
        sample.start_time = end_time - self.format.frame_interval;
        sample.end_time = end_time;
        sample.sync_point = true;
        self.core.frame_counter += 1;

        if self.format.pixel_structure == fourcc::AYUV {
            // device delivers AYUV with reversed endianness
            sample.data[..image_size].reverse();
        }

        trace!(
            "[{}] captured video frame {} at {}",
            self.core.prefix,
            self.core.frame_counter,
            end_time
        );

        self.core.attach_media_type_if_pending(sample);
        self.append_hdr_side_data(sample, end_time);

        if !self.core.handle_stream_state_change(sample) {
            return Ok(FillAction::Skip);
        }
        Ok(FillAction::Deliver)
    }

    fn core_mut(&mut self) -> &mut PinCore {
        &mut self.core
    }
}
