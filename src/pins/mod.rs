//! A pin is one stream of audio or video flowing from the capture device
//! to a downstream sink, pulled by a dedicated worker thread.

pub mod audio;
pub mod video;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::{RefTime, ReferenceClock};
use crate::error::CaptureError;
use crate::media_type::MediaType;
use crate::sink::{BufferPool, MediaSample, MediaSink, SinkError};
use crate::status::StatusHub;

pub(crate) const BACKOFF: Duration = Duration::from_millis(20);
pub(crate) const SHORT_BACKOFF: Duration = Duration::from_millis(1);
/// How long one wait for a frame notification may take.
pub(crate) const FRAME_WAIT: Duration = Duration::from_millis(1000);

/// Buffer count used when the sink expresses no preference.
pub(crate) const DEFAULT_BUFFER_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped = 0,
    Flowing = 1,
    /// Samples are produced but thrown away; acquisition aborts early.
    Discarding = 2,
}

/// Stream state shared between the filter and its pins.
pub struct StreamControl {
    state: AtomicU8,
    start_time: AtomicI64,
    exit: AtomicBool,
}

impl StreamControl {
    pub fn new() -> Self {
        StreamControl {
            state: AtomicU8::new(StreamState::Stopped as u8),
            start_time: AtomicI64::new(0),
            exit: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> StreamState {
        match self.state.load(Ordering::Acquire) {
            1 => StreamState::Flowing,
            2 => StreamState::Discarding,
            _ => StreamState::Stopped,
        }
    }

    pub fn discarding(&self) -> bool {
        self.state() != StreamState::Flowing
    }

    pub fn set_start_time(&self, t: RefTime) {
        self.start_time.store(t, Ordering::Release);
    }

    pub fn start_time(&self) -> RefTime {
        self.start_time.load(Ordering::Acquire)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        StreamControl::new()
    }
}

/// Why sample acquisition came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireFailure {
    /// Transient; retry after a short backoff.
    Retry,
    /// The worker should leave its loop.
    Exit,
}

/// What to do with a filled sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAction {
    Deliver,
    /// Drop it (stream is discarding or the frame is stale).
    Skip,
}

/// State and plumbing shared by both pin flavours.
pub struct PinCore {
    pub prefix: &'static str,
    pub clock: Arc<ReferenceClock>,
    pub control: Arc<StreamControl>,
    pub status: Arc<StatusHub>,
    pub sink: Box<dyn MediaSink>,
    pub pool: BufferPool,
    /// The media type the downstream connection has agreed to.
    pub media_type: MediaType,
    pub frame_counter: u64,
    pub preview: bool,
    /// Attach the media type to the next delivered sample.
    pub send_media_type: bool,
    pub last_sample_discarded: bool,
    pub has_signal: bool,
    pub last_sent_hdr_meta_at: RefTime,
    pub frame_end_time: RefTime,
}

impl PinCore {
    pub fn new(
        prefix: &'static str,
        preview: bool,
        clock: Arc<ReferenceClock>,
        control: Arc<StreamControl>,
        status: Arc<StatusHub>,
        sink: Box<dyn MediaSink>,
        media_type: MediaType,
        buffer_size: usize,
    ) -> Self {
        let count = sink.buffer_count_hint().unwrap_or(DEFAULT_BUFFER_COUNT);
        let pool = BufferPool::new(buffer_size, count);
        pool.commit();
        PinCore {
            prefix,
            clock,
            control,
            status,
            sink,
            pool,
            media_type,
            frame_counter: 0,
            preview,
            send_media_type: false,
            last_sample_discarded: false,
            has_signal: false,
            last_sent_hdr_meta_at: 0,
            frame_end_time: 0,
        }
    }

    pub fn stream_start_time(&self) -> RefTime {
        self.control.start_time()
    }

    /// Proposes a new media type downstream; §renegotiation protocol.
    ///
    /// On success the agreed type is swapped and the next sample carries
    /// it; on failure the previous type stays in force so the pin remains
    /// consistent.
    pub fn renegotiate_media_type(
        &mut self,
        proposed: &MediaType,
        new_buffer_size: usize,
        resize_buffers: bool,
    ) -> Result<(), CaptureError> {
        let accepted_qa = self.sink.query_accept(proposed);

        let mut timeout_ms: i32 = 100;
        let connected = loop {
            match self.sink.receive_connection(proposed) {
                Ok(()) => break true,
                Err(SinkError::BuffersOutstanding) if timeout_ms != -1 => {
                    if timeout_ms > 0 {
                        debug!(
                            "[{}] buffers outstanding, retrying in 10ms",
                            self.prefix
                        );
                        thread::sleep(Duration::from_millis(10));
                        timeout_ms -= 10;
                    } else {
                        debug!(
                            "[{}] buffers outstanding, timeout reached, flushing",
                            self.prefix
                        );
                        self.sink.begin_flush();
                        self.sink.end_flush();
                        timeout_ms = -1;
                    }
                }
                Err(e) => {
                    debug!(
                        "[{}] receive connection failed ({}), query accept {}",
                        self.prefix, e, accepted_qa
                    );
                    break false;
                }
            }
        };

        let mut renegotiated = false;
        if connected {
            debug!("[{}] receive connection accepted", self.prefix);
            renegotiated = true;
        } else if accepted_qa {
            if !resize_buffers {
                debug!("[{}] query accept accepted, no buffer change", self.prefix);
                renegotiated = true;
            } else {
                let (_, count) = self.pool.properties();
                self.pool.decommit();
                let (size, count) = self.pool.set_properties(new_buffer_size, count);
                self.pool.commit();
                let (actual_size, actual_count) = self.pool.properties();
                if actual_size == size && actual_count == count {
                    debug!(
                        "[{}] updated allocator to {} bytes x {} buffers",
                        self.prefix, size, count
                    );
                    renegotiated = true;
                } else {
                    warn!(
                        "[{}] allocator accepted {} bytes x {} buffers but holds {} x {}",
                        self.prefix, size, count, actual_size, actual_count
                    );
                }
            }
        }

        if renegotiated {
            self.media_type = proposed.clone();
            self.send_media_type = true;
            Ok(())
        } else {
            debug!("[{}] media type renegotiation failed", self.prefix);
            Err(CaptureError::RenegotiateFailed)
        }
    }

    /// Applies discard-state bookkeeping to a filled sample. Returns false
    /// when the sample must be dropped.
    pub fn handle_stream_state_change(&mut self, sample: &mut MediaSample) -> bool {
        if self.control.discarding() {
            debug!("[{}] entering stream discard", self.prefix);
            self.last_sample_discarded = true;
            false
        } else {
            if self.last_sample_discarded {
                debug!(
                    "[{}] recovery after sample discard, setting discontinuity",
                    self.prefix
                );
                sample.discontinuity = true;
                self.last_sample_discarded = false;
            }
            true
        }
    }

    /// Stamps the sample with the agreed media type when a renegotiation
    /// just completed.
    pub fn attach_media_type_if_pending(&mut self, sample: &mut MediaSample) {
        if self.send_media_type {
            sample.media_type = Some(self.media_type.clone());
            self.send_media_type = false;
        }
    }
}

/// The capability set every pin flavour implements; the filter owns pins
/// only through this trait.
pub trait Pin: Send {
    fn media_type(&self) -> MediaType;
    /// (buffer size, buffer count) this pin wants from its pool.
    fn propose_buffers(&self) -> (usize, usize);
    fn on_thread_create(&mut self) -> Result<(), CaptureError>;
    fn on_thread_destroy(&mut self);
    /// Blocks until a frame is ready and a delivery buffer is acquired.
    fn acquire_sample(&mut self) -> Result<MediaSample, AcquireFailure>;
    fn fill_buffer(&mut self, sample: &mut MediaSample) -> Result<FillAction, CaptureError>;
    fn core_mut(&mut self) -> &mut PinCore;
}

/// The worker loop every pin thread runs: acquire, fill, deliver, until
/// asked to exit or downstream disconnects.
pub(crate) fn run_pin(pin: &mut dyn Pin) -> Result<(), CaptureError> {
    info!(
        "[{}] entering buffer processing loop",
        pin.core_mut().prefix
    );

    loop {
        if pin.core_mut().control.exit_requested() {
            break;
        }

        let mut sample = match pin.acquire_sample() {
            Ok(sample) => sample,
            Err(AcquireFailure::Exit) => break,
            Err(AcquireFailure::Retry) => {
                thread::sleep(SHORT_BACKOFF);
                continue;
            }
        };

        match pin.fill_buffer(&mut sample) {
            Ok(FillAction::Deliver) => {
                let core = pin.core_mut();
                if let Err(e) = core.sink.deliver(sample) {
                    warn!(
                        "[{}] failed to deliver sample downstream ({}), loop will exit",
                        core.prefix, e
                    );
                    return Ok(());
                }
            }
            Ok(FillAction::Skip) => {
                // buffer returns to the pool with the dropped sample
            }
            Err(e) => {
                error!("[{}] fill failed ({}), aborting stream", pin.core_mut().prefix, e);
                return Err(e);
            }
        }
    }

    info!("[{}] exiting buffer processing loop", pin.core_mut().prefix);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_type::{AudioMediaType, MediaType};
    use crate::sink::test_support::CollectingSink;

    fn test_core(sink: CollectingSink) -> PinCore {
        let media_type =
            MediaType::Audio(AudioMediaType::from_format(&Default::default()));
        PinCore::new(
            "test",
            false,
            Arc::new(ReferenceClock::from_host()),
            Arc::new(StreamControl::new()),
            Arc::new(StatusHub::new()),
            Box::new(sink),
            media_type,
            64,
        )
    }

    fn proposed() -> MediaType {
        let mut format = crate::audio_format::AudioFormat::default();
        format.bit_depth = 24;
        format.bit_depth_bytes = 3;
        MediaType::Audio(AudioMediaType::from_format(&format))
    }

    #[test]
    fn renegotiation_swaps_the_agreed_type() {
        let sink = CollectingSink::new();
        let mut core = test_core(sink.clone());

        core.renegotiate_media_type(&proposed(), 128, true).unwrap();
        assert!(core.send_media_type);
        assert_eq!(core.media_type, proposed());
        assert_eq!(sink.state.lock().connected_type, Some(proposed()));
        // connection path leaves the allocator alone
        assert_eq!(core.pool.properties().0, 64);
    }

    #[test]
    fn buffers_outstanding_resolves_after_retries() {
        let sink = CollectingSink::new();
        sink.state.lock().buffers_outstanding = 3;
        let mut core = test_core(sink.clone());
        core.renegotiate_media_type(&proposed(), 64, false).unwrap();
        assert_eq!(sink.state.lock().buffers_outstanding, 0);
    }

    #[test]
    fn rejection_keeps_the_previous_type() {
        let sink = CollectingSink::new();
        sink.state.lock().reject_types = true;
        let mut core = test_core(sink.clone());
        let before = core.media_type.clone();

        let result = core.renegotiate_media_type(&proposed(), 128, true);
        assert!(matches!(result, Err(CaptureError::RenegotiateFailed)));
        assert_eq!(core.media_type, before);
        assert!(!core.send_media_type);
    }

    #[test]
    fn discard_state_sets_discontinuity_on_recovery() {
        let sink = CollectingSink::new();
        let mut core = test_core(sink);
        core.control.set_state(StreamState::Discarding);

        let mut sample = MediaSample::new(core.pool.acquire().unwrap());
        assert!(!core.handle_stream_state_change(&mut sample));

        core.control.set_state(StreamState::Flowing);
        let mut sample = MediaSample::new(core.pool.acquire().unwrap());
        assert!(core.handle_stream_state_change(&mut sample));
        assert!(sample.discontinuity);
    }
}
