//! Core capture engine for HDMI capture devices.
//!
//! Turns a capture channel (a PCIe "Pro" card with kernel-assisted DMA and
//! notifications, or a USB device with callback delivery) into two
//! disciplined streams of timestamped video and audio frames, each able to
//! carry side-band metadata: HDR mastering metadata on video, IEC 61937
//! compressed-audio framing on audio.
//!
//! The engine talks to the hardware only through the narrow traits in
//! [`sdk`]; the host media framework is likewise represented by the sink
//! and allocator traits in [`sink`]. Everything in between - discovery,
//! signal tracking, format derivation, channel-allocation decoding, the
//! per-pin capture loops, the bitstream demultiplexer and the reference
//! clock - lives here and is exercised the same way against real SDK glue
//! or the in-memory mocks.

pub mod audio_format;
pub mod backend;
pub mod bitstream;
pub mod channel_map;
pub mod clock;
pub mod device;
pub mod error;
pub mod event;
pub mod filter;
pub mod fourcc;
pub mod hdr;
pub mod media_type;
pub mod pins;
pub mod sdk;
pub mod signal;
pub mod sink;
pub mod status;
pub mod video_format;

pub use crate::audio_format::{AudioFormat, Codec};
pub use crate::clock::{RefTime, ReferenceClock};
pub use crate::device::{DeviceFamily, SelectedDevice};
pub use crate::error::CaptureError;
pub use crate::filter::{CaptureFilter, PinKind};
pub use crate::hdr::HdrMeta;
pub use crate::media_type::MediaType;
pub use crate::signal::{AudioSignal, VideoSignal};
pub use crate::sink::{BufferPool, MediaSample, MediaSink};
pub use crate::status::StatusObserver;
pub use crate::video_format::VideoFormat;
