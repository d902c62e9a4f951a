//! The downstream side of a pin: delivery buffers and the sink that
//! receives filled samples. Both are narrow stand-ins for the host media
//! framework's allocator and connected input pin.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

use crate::clock::RefTime;
use crate::error::CaptureError;
use crate::hdr::{ContentLightLevel, HdrSideData};
use crate::media_type::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Downstream still owns delivery buffers; retry shortly.
    #[error("buffers outstanding")]
    BuffersOutstanding,
    #[error("media type rejected")]
    TypeRejected,
    /// Downstream is gone; the pin loop exits cleanly.
    #[error("disconnected")]
    Disconnected,
}

/// A filled delivery buffer on its way downstream.
pub struct MediaSample {
    pub data: PooledBuffer,
    /// Valid bytes at the front of `data`.
    pub len: usize,
    pub start_time: RefTime,
    pub end_time: RefTime,
    pub sync_point: bool,
    pub discontinuity: bool,
    /// Set when the media type changed since the last delivered sample.
    pub media_type: Option<MediaType>,
    /// HDR side data, attached at most once per second.
    pub hdr: Option<(HdrSideData, ContentLightLevel)>,
}

impl MediaSample {
    pub fn new(data: PooledBuffer) -> Self {
        MediaSample {
            data,
            len: 0,
            start_time: 0,
            end_time: 0,
            sync_point: false,
            discontinuity: false,
            media_type: None,
            hdr: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// The connected downstream input pin.
///
/// `deliver` transfers buffer ownership; a sink that holds the sample keeps
/// the pool buffer out of circulation until it drops it.
pub trait MediaSink: Send {
    fn query_accept(&self, media_type: &MediaType) -> bool;
    fn receive_connection(&mut self, media_type: &MediaType) -> Result<(), SinkError>;
    fn deliver(&mut self, sample: MediaSample) -> Result<(), SinkError>;
    fn begin_flush(&mut self) {}
    fn end_flush(&mut self) {}
    /// Buffer count the sink wants the pool to hold, if it cares.
    fn buffer_count_hint(&self) -> Option<usize> {
        None
    }
}

struct PoolState {
    committed: bool,
    buffer_size: usize,
    buffer_count: usize,
    free: Vec<Vec<u8>>,
}

/// Fixed-size delivery buffer pool with commit/decommit semantics.
pub struct BufferPool {
    inner: Arc<Mutex<PoolState>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, buffer_count: usize) -> Self {
        BufferPool {
            inner: Arc::new(Mutex::new(PoolState {
                committed: false,
                buffer_size,
                buffer_count,
                free: Vec::new(),
            })),
        }
    }

    /// (buffer size, buffer count) currently configured.
    pub fn properties(&self) -> (usize, usize) {
        let state = self.inner.lock();
        (state.buffer_size, state.buffer_count)
    }

    /// Reconfigures the pool. Only allowed while decommitted; returns the
    /// actual accepted properties.
    pub fn set_properties(&self, buffer_size: usize, buffer_count: usize) -> (usize, usize) {
        let mut state = self.inner.lock();
        if !state.committed {
            state.buffer_size = buffer_size;
            state.buffer_count = buffer_count.max(1);
        }
        (state.buffer_size, state.buffer_count)
    }

    /// Allocates the configured buffers and starts handing them out.
    pub fn commit(&self) {
        let mut state = self.inner.lock();
        if !state.committed {
            state.committed = true;
            let size = state.buffer_size;
            let count = state.buffer_count;
            state.free = (0..count).map(|_| vec![0u8; size]).collect();
        }
    }

    /// Stops handing out buffers and drops the free list. Outstanding
    /// buffers are reclaimed lazily as they come back.
    pub fn decommit(&self) {
        let mut state = self.inner.lock();
        state.committed = false;
        state.free.clear();
    }

    /// Takes one free buffer. Fails with `BufferUnavailable` when every
    /// buffer is downstream or the pool is decommitted.
    pub fn acquire(&self) -> Result<PooledBuffer, CaptureError> {
        let mut state = self.inner.lock();
        if !state.committed {
            return Err(CaptureError::BufferUnavailable);
        }
        match state.free.pop() {
            Some(data) => Ok(PooledBuffer {
                data,
                pool: Arc::downgrade(&self.inner),
            }),
            None => Err(CaptureError::BufferUnavailable),
        }
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        BufferPool {
            inner: self.inner.clone(),
        }
    }
}

/// One delivery buffer, returned to its pool on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<Mutex<PoolState>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut state = pool.lock();
            // a buffer from a previous configuration is not reusable
            if state.committed && self.data.len() == state.buffer_size {
                let data = std::mem::replace(&mut self.data, Vec::new());
                state.free.push(data);
            }
        }
    }
}

/// Sinks used by the test-suite.
#[doc(hidden)]
pub mod test_support {
    use super::*;

    /// Metadata of one delivered sample, payload included.
    pub struct DeliveredSample {
        pub payload: Vec<u8>,
        pub start_time: RefTime,
        pub end_time: RefTime,
        pub sync_point: bool,
        pub discontinuity: bool,
        pub media_type: Option<MediaType>,
        pub hdr: Option<(HdrSideData, ContentLightLevel)>,
    }

    #[derive(Default)]
    pub struct SinkState {
        pub connected_type: Option<MediaType>,
        pub delivered: Vec<DeliveredSample>,
        pub reject_types: bool,
        pub buffers_outstanding: u32,
        pub fail_delivery: bool,
        pub flushes: u32,
    }

    /// Accepts everything and records it.
    #[derive(Clone)]
    pub struct CollectingSink {
        pub state: Arc<Mutex<SinkState>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            CollectingSink {
                state: Arc::new(Mutex::new(SinkState::default())),
            }
        }

        pub fn delivered_count(&self) -> usize {
            self.state.lock().delivered.len()
        }
    }

    impl MediaSink for CollectingSink {
        fn query_accept(&self, _media_type: &MediaType) -> bool {
            !self.state.lock().reject_types
        }

        fn receive_connection(&mut self, media_type: &MediaType) -> Result<(), SinkError> {
            let mut state = self.state.lock();
            if state.reject_types {
                return Err(SinkError::TypeRejected);
            }
            if state.buffers_outstanding > 0 {
                state.buffers_outstanding -= 1;
                return Err(SinkError::BuffersOutstanding);
            }
            state.connected_type = Some(media_type.clone());
            Ok(())
        }

        fn deliver(&mut self, sample: MediaSample) -> Result<(), SinkError> {
            let mut state = self.state.lock();
            if state.fail_delivery {
                return Err(SinkError::Disconnected);
            }
            state.delivered.push(DeliveredSample {
                payload: sample.payload().to_vec(),
                start_time: sample.start_time,
                end_time: sample.end_time,
                sync_point: sample.sync_point,
                discontinuity: sample.discontinuity,
                media_type: sample.media_type.clone(),
                hdr: sample.hdr,
            });
            Ok(())
        }

        fn begin_flush(&mut self) {
            self.state.lock().flushes += 1;
        }
    }
}
