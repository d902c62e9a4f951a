//! The audio pin: pulls hardware frames, reshapes PCM to the negotiated
//! channel layout, and demultiplexes IEC 61937 bitstreams into data bursts.

use std::sync::Arc;
use std::thread;

use log::{debug, error, trace, warn};

use crate::audio_format::{AudioFormat, Codec};
use crate::backend::{audio_backend_for, AudioBackend, FrameStatus};
use crate::bitstream::{
    pack_for_probe, BitstreamParser, ParseOutcome, MAX_BIT_DEPTH_BYTES, MAX_CHANNEL_SLOTS,
    MAX_FRAME_BYTES, SAMPLES_PER_FRAME,
};
use crate::channel_map::NOT_PRESENT;
use crate::clock::ReferenceClock;
use crate::device::DeviceFamily;
use crate::error::CaptureError;
use crate::media_type::{AudioMediaType, MediaType};
use crate::sdk::CaptureChannel;
use crate::signal::{AudioSignal, AudioSignalProbe};
use crate::sink::{MediaSample, MediaSink};
use crate::status::StatusHub;

use super::{
    AcquireFailure, FillAction, Pin, PinCore, StreamControl, BACKOFF, DEFAULT_BUFFER_COUNT,
    FRAME_WAIT, SHORT_BACKOFF,
};

/// How much stream time one detection pass covers.
const DETECTION_WINDOW_SECS: f64 = 0.075;
/// After a PCM verdict, how many windows pass before probing again.
const DETECTION_RETRY_AFTER: f64 = 1.0 / DETECTION_WINDOW_SECS;

pub struct AudioPin {
    core: PinCore,
    backend: Box<dyn AudioBackend>,
    probe: AudioSignalProbe,
    family: DeviceFamily,
    signal: AudioSignal,
    format: AudioFormat,
    frame_buffer: Box<[u8]>,
    compressed: Box<[u8]>,
    parser: BitstreamParser,
    detection_window: u32,
    since_last: u32,
    probe_on_timer: bool,
    detected_codec: Codec,
    since_codec_change: u64,
    burst_frame_count: u32,
}

impl AudioPin {
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
            "AudioPreview"
        } else {
            "AudioCapture"
        };

        let mut probe = AudioSignalProbe::new(channel.clone(), prefix);
        let (signal, format) = match probe.probe() {
            Ok(signal) => {
                let format = AudioFormat::from_signal(&AudioFormat::default(), &signal, family);
                (signal, format)
            }
            Err(_) => {
                warn!("[{}] unable to load audio signal", prefix);
                (AudioSignal::default(), AudioFormat::default())
            }
        };

        debug!(
            "[{}] audio status fs {} bits {} channels {} codec {}",
            prefix,
            format.fs,
            format.bit_depth,
            format.output_channel_count,
            format.codec.display_name()
        );

        let media_type = MediaType::Audio(AudioMediaType::from_format(&format));
        let buffer_size = match format.pcm_frame_bytes() {
            0 => AudioFormat::default().pcm_frame_bytes(),
            n => n,
        };
        let core = PinCore::new(
            prefix,
            preview,
            clock,
            control,
            status,
            sink,
            media_type,
            buffer_size,
        );

        AudioPin {
            core,
            backend: audio_backend_for(family, channel, prefix),
            probe,
            family,
            signal,
            format,
            frame_buffer: vec![0u8; MAX_FRAME_BYTES].into_boxed_slice(),
            compressed: vec![0u8; MAX_FRAME_BYTES].into_boxed_slice(),
            parser: BitstreamParser::new(prefix),
            detection_window: 0,
            since_last: 0,
            probe_on_timer: false,
            detected_codec: Codec::Pcm,
            since_codec_change: 0,
            burst_frame_count: 0,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn publish_signal_on_change(&self) {
        if self.since_codec_change > 0 {
            self.core.status.audio_signal_loaded(&self.signal);
        }
    }

    fn do_change_media_type(&mut self, new_format: &AudioFormat) -> Result<(), CaptureError> {
        debug!(
            "[{}] proposing {} Hz {} bits {} channels {} (burst {})",
            self.core.prefix,
            new_format.fs,
            new_format.bit_depth,
            new_format.output_channel_count,
            new_format.codec.display_name(),
            new_format.data_burst_size
        );
        let proposed = MediaType::Audio(AudioMediaType::from_format(new_format));
        let new_size = if new_format.codec == Codec::Pcm {
            new_format.pcm_frame_bytes()
        } else {
            usize::from(new_format.data_burst_size)
        }
        .max(1);
        self.core.renegotiate_media_type(&proposed, new_size, true)?;
        self.backend.reconfigure(new_format)?;
        self.format = new_format.clone();
        Ok(())
    }

    /// Reformats the raw hardware frame into interleaved PCM at the
    /// negotiated layout.
    ///
    /// Hardware delivers `L0 L1 L2 L3 R0 R1 R2 R3` per sample block, each
    /// slot left-zero-padded to 4 bytes; the output interleaves the present
    /// channels per sample, moving each by its layout offset. Bytes keep
    /// their big-endian order. Returns the bytes written.
    fn transform_pcm(&self, dst: &mut [u8]) -> usize {
        let format = &self.format;
        let depth = usize::from(format.bit_depth_bytes);
        let out_channels = usize::from(format.output_channel_count);
        let capacity = dst.len();
        let must_rescale = (format.lfe_level_adjustment - 1.0).abs() > 1e-9;

        let mut bytes_captured = 0usize;
        let mut next_output = -1i32;

        for pair in 0..usize::from(format.input_channel_count) / 2 {
            let channel_l = pair * 2;
            let channel_r = channel_l + 1;
            let offset_l = format.channel_offsets[channel_l];
            let offset_r = format.channel_offsets[channel_r];

            let slot_l = if offset_l != NOT_PRESENT {
                next_output += 1;
                Some((next_output + i32::from(offset_l)) as usize)
            } else {
                None
            };
            let slot_r = if offset_r != NOT_PRESENT {
                next_output += 1;
                Some((next_output + i32::from(offset_r)) as usize)
            } else {
                None
            };
            if slot_l.is_none() && slot_r.is_none() {
                continue;
            }

            for sample_idx in 0..SAMPLES_PER_FRAME {
                // skip past the zero padding to the valuable bytes
                let in_l = (sample_idx * MAX_CHANNEL_SLOTS + pair) * MAX_BIT_DEPTH_BYTES
                    + (MAX_BIT_DEPTH_BYTES - depth);
                let in_r = (sample_idx * MAX_CHANNEL_SLOTS + pair + MAX_CHANNEL_SLOTS / 2)
                    * MAX_BIT_DEPTH_BYTES
                    + (MAX_BIT_DEPTH_BYTES - depth);

                for &(slot, input_start, channel) in
                    [(slot_l, in_l, channel_l), (slot_r, in_r, channel_r)].iter()
                {
                    let out_slot = match slot {
                        Some(out_slot) => out_slot,
                        None => continue,
                    };
                    let out_start = (sample_idx * out_channels + out_slot) * depth;
                    bytes_captured += depth;
                    if out_start + depth > capacity {
                        error!(
                            "[{}] skipping byte {} of a {} byte sample",
                            self.core.prefix,
                            out_start + depth,
                            capacity
                        );
                        continue;
                    }
                    let src = &self.frame_buffer[input_start..input_start + depth];
                    let out = &mut dst[out_start..out_start + depth];
                    if must_rescale && i32::from(format.lfe_channel_index) == channel as i32 {
                        scale_sample(src, format.lfe_level_adjustment, out);
                    } else {
                        out.copy_from_slice(src);
                    }
                }
            }
        }
        bytes_captured
    }
}

/// Applies a gain to one big-endian signed PCM sample, writing the result
/// back at the same width.
fn scale_sample(src: &[u8], gain: f64, out: &mut [u8]) {
    let mut value = i64::from(src[0] as i8);
    for b in &src[1..] {
        value = (value << 8) | i64::from(*b);
    }
    let scaled = (value as f64 * gain).round() as i64;
    for (i, byte) in out.iter_mut().enumerate() {
        let shift = 8 * (src.len() - 1 - i);
        *byte = ((scaled >> shift) & 0xff) as u8;
    }
}

impl Pin for AudioPin {
    fn media_type(&self) -> MediaType {
        MediaType::Audio(AudioMediaType::from_format(&self.format))
    }

    fn propose_buffers(&self) -> (usize, usize) {
        let size = if self.format.codec == Codec::Pcm {
            self.format.pcm_frame_bytes()
        } else {
            self.parser.burst.len()
        };
        (size.max(1), DEFAULT_BUFFER_COUNT)
    }

    fn on_thread_create(&mut self) -> Result<(), CaptureError> {
        debug!("[{}] audio pin thread starting", self.core.prefix);
        if let Ok(signal) = self.probe.probe() {
            self.signal = signal;
        }
        self.core.status.audio_signal_loaded(&self.signal);
        self.backend.start(&self.format)
    }

    fn on_thread_destroy(&mut self) {
        debug!("[{}] audio pin thread stopping", self.core.prefix);
        self.backend.stop();
    }

    fn acquire_sample(&mut self) -> Result<MediaSample, AcquireFailure> {
        loop {
            if self.core.control.exit_requested() {
                return Err(AcquireFailure::Exit);
            }
            if self.core.control.discarding() {
                trace!("[{}] stream is discarding", self.core.prefix);
                self.since_codec_change = 0;
                return Err(AcquireFailure::Retry);
            }
            if self.core.stream_start_time() == 0 {
                trace!(
                    "[{}] stream has not started, retry after backoff",
                    self.core.prefix
                );
                self.since_codec_change = 0;
                thread::sleep(BACKOFF);
                continue;
            }

            match self.probe.probe() {
                Ok(signal) => self.signal = signal,
                Err(_) => {
                    trace!(
                        "[{}] unable to load signal, retry after backoff",
                        self.core.prefix
                    );
                    self.publish_signal_on_change();
                    self.since_codec_change = 0;
                    thread::sleep(BACKOFF);
                    continue;
                }
            }
            if self.signal.bits_per_sample == 0 {
                warn!(
                    "[{}] reported bit depth is 0, retry after backoff",
                    self.core.prefix
                );
                self.publish_signal_on_change();
                self.since_codec_change = 0;
                thread::sleep(BACKOFF);
                continue;
            }
            if self.signal.channel_allocation > 0x31 {
                warn!(
                    "[{}] reported channel allocation is {:#04x}, retry after backoff",
                    self.core.prefix, self.signal.channel_allocation
                );
                self.publish_signal_on_change();
                self.since_codec_change = 0;
                thread::sleep(BACKOFF);
                continue;
            }

            let mut new_format = AudioFormat::from_signal(&self.format, &self.signal, self.family);
            if new_format.output_channel_count == 0 {
                trace!(
                    "[{}] no output channels in signal, retry after backoff",
                    self.core.prefix
                );
                self.publish_signal_on_change();
                self.since_codec_change = 0;
                thread::sleep(BACKOFF);
                continue;
            }

            if !self.backend.wait_frame(FRAME_WAIT) {
                thread::sleep(SHORT_BACKOFF);
                continue;
            }

            self.detection_window = (DETECTION_WINDOW_SECS
                / (SAMPLES_PER_FRAME as f64 / f64::from(new_format.fs)))
            .ceil() as u32;
            if self.detected_codec != Codec::Pcm {
                new_format.codec = self.detected_codec;
            }

            let mut frame_copied = false;
            match self.backend.frame_status() {
                Ok(FrameStatus::SignalChange) => {
                    trace!(
                        "[{}] audio signal change, retry after backoff",
                        self.core.prefix
                    );
                    self.publish_signal_on_change();
                    self.since_last = 0;
                    self.since_codec_change = 0;
                    thread::sleep(BACKOFF);
                    continue;
                }
                Ok(FrameStatus::InputSourceChange) => {
                    trace!(
                        "[{}] audio input source change, retry after backoff",
                        self.core.prefix
                    );
                    self.publish_signal_on_change();
                    self.since_last = 0;
                    self.since_codec_change = 0;
                    thread::sleep(BACKOFF);
                    continue;
                }
                Ok(FrameStatus::Ready) => {
                    match self.backend.capture_frame(&mut self.frame_buffer) {
                        Ok(()) => {
                            trace!("[{}] audio frame buffered and captured", self.core.prefix);
                            frame_copied = true;
                        }
                        Err(e) => {
                            if self.parser.burst_size() > 0 {
                                warn!(
                                    "[{}] capture failed mid-burst ({}), possible packet corruption",
                                    self.core.prefix, e
                                );
                            } else {
                                warn!("[{}] capture failed ({}), retrying", self.core.prefix, e);
                            }
                            continue;
                        }
                    }
                }
                Ok(FrameStatus::NotReady) => {}
                Err(e) => {
                    trace!("[{}] notify status unreadable: {}", self.core.prefix, e);
                    thread::sleep(BACKOFF);
                    continue;
                }
            }

            if !frame_copied {
                thread::sleep(SHORT_BACKOFF);
                continue;
            }

            self.core.frame_counter += 1;
            trace!(
                "[{}] reading frame {}",
                self.core.prefix,
                self.core.frame_counter
            );

            let might_be_bitstream =
                new_format.fs >= 48_000 && self.since_last < self.detection_window;
            let examine_bitstream = new_format.codec != Codec::Pcm
                || might_be_bitstream
                || self.parser.burst_size() > 0;
            if examine_bitstream {
                if !self.probe_on_timer && new_format.codec == Codec::Pcm {
                    trace!(
                        "[{}] bitstream probe in frame {} ({} Hz, since {} window {} burst {})",
                        self.core.prefix,
                        self.core.frame_counter,
                        new_format.fs,
                        self.since_last,
                        self.detection_window,
                        self.parser.burst_size()
                    );
                }

                pack_for_probe(&self.frame_buffer, &self.format, &mut self.compressed);
                let probe_len = usize::from(self.format.bit_depth_bytes)
                    * SAMPLES_PER_FRAME
                    * usize::from(self.format.input_channel_count);
                let mut detected = new_format.codec;
                let outcome = self
                    .parser
                    .parse(&self.compressed[..probe_len.min(MAX_FRAME_BYTES)], &mut detected);

                match outcome {
                    ParseOutcome::Consumed | ParseOutcome::PartialBurst => {
                        self.probe_on_timer = false;
                        if self.detected_codec == detected {
                            if self.parser.payload_size > 0 {
                                self.since_codec_change += 1;
                            }
                        } else {
                            debug!(
                                "[{}] detected bitstream {} in frame {}",
                                self.core.prefix,
                                detected.display_name(),
                                self.core.frame_counter
                            );
                            self.since_codec_change = 0;
                            self.detected_codec = detected;
                        }
                        self.since_last = 0;
                        if self.parser.payload_size > 0 {
                            trace!(
                                "[{}] data burst complete, {} bytes over {} frames",
                                self.core.prefix,
                                self.parser.payload_size,
                                self.burst_frame_count + 1
                            );
                            new_format.data_burst_size = self.parser.payload_size;
                            self.burst_frame_count = 0;
                        } else {
                            if outcome == ParseOutcome::PartialBurst {
                                self.burst_frame_count += 1;
                            }
                            continue;
                        }
                    }
                    _ => {
                        self.since_last += 1;
                        if self.since_last < self.detection_window {
                            // mid-probe frames are not published downstream
                            if !self.probe_on_timer {
                                continue;
                            }
                        } else {
                            if self.since_last == self.detection_window {
                                debug!(
                                    "[{}] probe complete after {} frames, not bitstream (timer {})",
                                    self.core.prefix, self.since_last, self.probe_on_timer
                                );
                            }
                            self.probe_on_timer = false;
                            self.detected_codec = Codec::Pcm;
                            self.parser.bytes_since_pa_pb = 0;
                        }
                    }
                }
            } else {
                self.since_last += 1;
            }

            let probe_trigger =
                (f64::from(self.detection_window) * DETECTION_RETRY_AFTER).round() as u32;
            if self.since_last >= probe_trigger {
                debug!(
                    "[{}] triggering bitstream probe after {} frames",
                    self.core.prefix, self.since_last
                );
                self.probe_on_timer = true;
                self.since_last = 0;
                self.parser.bytes_since_pa_pb = 0;
            }

            // pause and null bursts are never published downstream
            if self.detected_codec == Codec::PauseOrNull {
                self.since_codec_change = 0;
                continue;
            }
            new_format.codec = self.detected_codec;

            if self.format.should_change(&new_format, self.core.prefix) {
                warn!(
                    "[{}] audio format changed, attempting to reconnect",
                    self.core.prefix
                );
                match self.do_change_media_type(&new_format) {
                    Ok(()) => {
                        self.core.status.audio_signal_loaded(&self.signal);
                        self.core.status.audio_format_loaded(&self.format);
                    }
                    Err(e) => {
                        warn!(
                            "[{}] format changed but unable to reconnect ({}), retry after backoff",
                            self.core.prefix, e
                        );
                        thread::sleep(BACKOFF);
                        continue;
                    }
                }
            }

            if new_format.codec == Codec::Pcm || self.parser.payload_size > 0 {
                match self.core.pool.acquire() {
                    Ok(buffer) => return Ok(MediaSample::new(buffer)),
                    Err(_) => {
                        self.since_codec_change = 0;
                        warn!(
                            "[{}] audio frame buffered but no delivery buffer, retry after backoff",
                            self.core.prefix
                        );
                        thread::sleep(SHORT_BACKOFF);
                        continue;
                    }
                }
            }
            thread::sleep(SHORT_BACKOFF);
        }
    }

    fn fill_buffer(&mut self, sample: &mut MediaSample) -> Result<FillAction, CaptureError> {
        if self.core.control.discarding() {
            trace!("[{}] stream is discarding", self.core.prefix);
            self.core.last_sample_discarded = true;
            return Ok(FillAction::Skip);
        }

        let capacity = sample.data.len();
        let bytes_captured;
        if self.format.codec != Codec::Pcm {
            let n = usize::from(self.parser.payload_size).min(capacity);
            trace!(
                "[{}] sending {} {} bytes",
                self.core.prefix,
                n,
                self.format.codec.display_name()
            );
            sample.data[..n].copy_from_slice(&self.parser.burst[..n]);
            sample.len = n;
            bytes_captured = n;
            self.parser.payload_size = 0;
        } else {
            bytes_captured = self.transform_pcm(&mut sample.data);
            sample.len = self.format.pcm_frame_bytes().min(capacity);
        }

        let last_end = self.core.frame_end_time - self.core.stream_start_time();
        self.core.frame_end_time = self.core.clock.now();
        let end_time = self.core.frame_end_time - self.core.stream_start_time();
        let start_time =
            end_time - (self.format.sample_interval * SAMPLES_PER_FRAME as f64) as i64;

        if bytes_captured != capacity {
            debug!(
                "[{}] audio frame {}: time {} delta {} {} bytes into a {} byte buffer ({}, change {})",
                self.core.prefix,
                self.core.frame_counter,
                end_time,
                end_time - last_end,
                bytes_captured,
                capacity,
                self.format.codec.display_name(),
                self.since_codec_change
            );
        } else {
            trace!(
                "[{}] audio frame {}: time {} delta {} {} bytes",
                self.core.prefix,
                self.core.frame_counter,
                end_time,
                end_time - last_end,
                bytes_captured
            );
        }

        sample.start_time = start_time;
        sample.end_time = end_time;
        sample.sync_point = self.format.codec == Codec::Pcm;
        sample.discontinuity =
            self.format.codec != Codec::Pcm && self.since_codec_change < 2;
        self.core.attach_media_type_if_pending(sample);

        if !self.core.handle_stream_state_change(sample) {
            return Ok(FillAction::Skip);
        }
        Ok(FillAction::Deliver)
    }

    fn core_mut(&mut self) -> &mut PinCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::StreamState;
    use crate::sdk::test_support::MockChannel;
    use crate::sdk::{InfoFrameMask, NotifyBits};
    use crate::sink::test_support::CollectingSink;
    use crate::media_type::AudioSubtype;

    fn pro_channel(fs: u32, bits: u8, valid: u16, alloc: u8) -> Arc<MockChannel> {
        let channel = Arc::new(MockChannel::locked_hdmi(1920, 1080));
        {
            let mut state = channel.state.lock();
            state.audio_status.lpcm = true;
            state.audio_status.sample_rate = fs;
            state.audio_status.bits_per_sample = bits;
            state.audio_status.channel_valid = valid;
            state.infoframe_mask = InfoFrameMask::AUDIO;
            state.audio_infoframe.channel_allocation = alloc;
            state.notify_bits = NotifyBits::AUDIO_FRAME_BUFFERED;
        }
        channel
    }

    fn pro_pin(channel: Arc<MockChannel>, sink: CollectingSink) -> AudioPin {
        let control = Arc::new(StreamControl::new());
        let pin = AudioPin::new(
            DeviceFamily::Pro,
            channel,
            false,
            Arc::new(ReferenceClock::from_host()),
            control,
            Arc::new(StatusHub::new()),
            Box::new(sink),
        );
        pin.core.control.set_state(StreamState::Flowing);
        pin.core.control.set_start_time(1);
        pin
    }

    fn notify(channel: &MockChannel) {
        let event = channel.state.lock().notify_event.clone().unwrap();
        event.signal();
    }

    /// Writes one 16-bit sample into the raw hardware layout.
    fn put_sample(frame: &mut [u8], sample_idx: usize, slot: usize, hi: u8, lo: u8) {
        let base = (sample_idx * MAX_CHANNEL_SLOTS + slot) * MAX_BIT_DEPTH_BYTES;
        frame[base + 2] = hi;
        frame[base + 3] = lo;
    }

    #[test]
    fn stereo_pcm_interleaves_and_keeps_byte_order() {
        // 44.1 kHz keeps the bitstream probe out of the way
        let channel = pro_channel(44_100, 16, 0x1, 0x00);
        let mut frame = vec![0u8; MAX_FRAME_BYTES];
        put_sample(&mut frame, 0, 0, 0xaa, 0xbb); // L0
        put_sample(&mut frame, 0, 4, 0xcc, 0xdd); // R0
        put_sample(&mut frame, 1, 0, 0x11, 0x22); // L1
        put_sample(&mut frame, 1, 4, 0x33, 0x44); // R1
        channel.state.lock().audio_frame = frame;

        let sink = CollectingSink::new();
        let mut pin = pro_pin(channel.clone(), sink);
        pin.on_thread_create().unwrap();
        assert_eq!(pin.format().fs, 44_100);
        assert_eq!(pin.format().output_channel_count, 2);

        notify(&channel);
        let mut sample = pin.acquire_sample().expect("pcm sample");
        assert_eq!(pin.fill_buffer(&mut sample).unwrap(), FillAction::Deliver);
        assert!(sample.sync_point);
        assert_eq!(sample.len, 1024 * 2 * 2);
        assert_eq!(&sample.payload()[..8], &[0xaa, 0xbb, 0xcc, 0xdd, 0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn surround_pcm_applies_the_fc_lfe_swap() {
        let channel = pro_channel(44_100, 16, 0x0f, 0x13);
        let mut frame = vec![0u8; MAX_FRAME_BYTES];
        // hardware block layout is L0 L1 L2 L3 R0 R1 R2 R3, so input
        // channel c sits at hardware slot c/2 (left) or c/2 + 4 (right)
        for slot in 0..8 {
            put_sample(&mut frame, 0, slot, 0x10 + slot as u8, 0);
        }
        channel.state.lock().audio_frame = frame;

        let sink = CollectingSink::new();
        let mut pin = pro_pin(channel.clone(), sink);
        pin.on_thread_create().unwrap();
        assert_eq!(pin.format().output_channel_count, 8);

        notify(&channel);
        let mut sample = pin.acquire_sample().expect("pcm sample");
        pin.fill_buffer(&mut sample).unwrap();

        // offsets [0,0,1,-1,2,2,-2,-2] reorder the input channels
        // 0 1 2 3 4 5 6 7 into output slots 0 1 3 2 6 7 4 5; mapped back
        // through the hardware slots that is:
        let first: Vec<u8> = (0..8).map(|slot| sample.payload()[slot * 2]).collect();
        assert_eq!(first, vec![0x10, 0x14, 0x15, 0x11, 0x13, 0x17, 0x12, 0x16]);
    }

    #[test]
    fn ac3_bitstream_is_detected_and_delivered_as_a_burst() {
        let channel = pro_channel(48_000, 16, 0x1, 0x00);

        // desired probe bytes: sync + Pc/Pd (AC3, 2048 bits) + payload
        let mut stream = vec![0xf8, 0x72, 0x4e, 0x1f, 0x01, 0x01, 0x08, 0x00];
        let payload: Vec<u8> = (0..256u32).map(|i| (i % 239) as u8 + 1).collect();
        stream.extend_from_slice(&payload);
        while stream.len() % 4 != 0 {
            stream.push(0);
        }

        // invert the probe repack: the stream bytes live byte-swapped in
        // the padded hardware slots
        let mut frame = vec![0u8; MAX_FRAME_BYTES];
        for (word, chunk) in stream.chunks(4).enumerate() {
            put_sample(&mut frame, word, 0, chunk[1], chunk[0]);
            put_sample(&mut frame, word, 4, chunk[3], chunk[2]);
        }
        channel.state.lock().audio_frame = frame;

        let sink = CollectingSink::new();
        let mut pin = pro_pin(channel.clone(), sink.clone());
        pin.on_thread_create().unwrap();

        notify(&channel);
        let mut sample = pin.acquire_sample().expect("burst sample");
        assert_eq!(pin.format().codec, Codec::Ac3);
        assert_eq!(pin.format().data_burst_size, 256);

        assert_eq!(pin.fill_buffer(&mut sample).unwrap(), FillAction::Deliver);
        assert_eq!(sample.len, 256);
        assert_eq!(sample.payload(), payload.as_slice());
        assert!(!sample.sync_point);
        assert!(sample.discontinuity);
        match sample.media_type.as_ref() {
            Some(MediaType::Audio(mt)) => assert_eq!(mt.subtype, AudioSubtype::DolbyAc3),
            other => panic!("expected an audio media type, got {:?}", other),
        }
    }

    #[test]
    fn pcm_probe_window_swallows_the_first_frames() {
        let channel = pro_channel(48_000, 16, 0x1, 0x00);
        channel.state.lock().audio_frame = vec![0u8; MAX_FRAME_BYTES];
        let sink = CollectingSink::new();
        let mut pin = pro_pin(channel.clone(), sink);
        pin.on_thread_create().unwrap();

        // the notify event coalesces, so feed frames from a pump thread
        // while the pin works through its probe window
        let pump_channel = channel.clone();
        let pump = thread::spawn(move || {
            for _ in 0..50 {
                if let Some(event) = pump_channel.state.lock().notify_event.clone() {
                    event.signal();
                }
                thread::sleep(std::time::Duration::from_millis(2));
            }
        });

        // window at 48 kHz is ceil(0.075 / (1024/48000)) = 4 frames; the
        // first three probes are inconclusive and withheld
        let sample = pin.acquire_sample().expect("pcm after probe");
        assert_eq!(pin.since_last, 4);
        assert_eq!(pin.detected_codec, Codec::Pcm);
        drop(sample);
        pump.join().unwrap();
    }

    #[test]
    fn lfe_rescale_attenuates_the_lfe_channel() {
        let channel = pro_channel(44_100, 16, 0x3, 0x03);
        channel.state.lock().audio_infoframe.lfe_playback_level = 0x2;
        let mut frame = vec![0u8; MAX_FRAME_BYTES];
        put_sample(&mut frame, 0, 1, 0x10, 0x00); // LFE: input channel 2, pair 1 left
        put_sample(&mut frame, 0, 5, 0x10, 0x00); // FC: input channel 3, pair 1 right
        channel.state.lock().audio_frame = frame;

        let sink = CollectingSink::new();
        let mut pin = pro_pin(channel.clone(), sink);
        pin.on_thread_create().unwrap();
        assert!((pin.format().lfe_level_adjustment - 0.31622776601).abs() < 1e-9);

        notify(&channel);
        let mut sample = pin.acquire_sample().expect("pcm sample");
        pin.fill_buffer(&mut sample).unwrap();

        // LFE (input slot 2, offset +1) lands at output slot 3 attenuated;
        // FC (input slot 3, offset -1) lands at output slot 2 untouched
        let fc = i16::from_be_bytes([sample.payload()[4], sample.payload()[5]]);
        let lfe = i16::from_be_bytes([sample.payload()[6], sample.payload()[7]]);
        assert_eq!(fc, 0x1000);
        let expected = (0x1000 as f64 * 0.316227766016838).round() as i16;
        assert_eq!(lfe, expected);
    }

    #[test]
    fn scale_sample_round_trips_small_gains() {
        let mut out = [0u8; 2];
        scale_sample(&[0x7f, 0xff], 0.5, &mut out);
        assert_eq!(i16::from_be_bytes(out), 0x4000);

        // negative values keep their sign
        let mut out = [0u8; 2];
        scale_sample(&[0x80, 0x00], 0.5, &mut out);
        assert_eq!(i16::from_be_bytes(out), -0x4000);
    }
}
