//! The capture filter: owns the channel, the reference clock, the status
//! hub and the four pins, and runs one worker thread per pin.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::clock::ReferenceClock;
use crate::device::{select_device, DeviceFamily, SelectedDevice};
use crate::error::CaptureError;
use crate::pins::audio::AudioPin;
use crate::pins::video::VideoPin;
use crate::pins::{run_pin, Pin, StreamControl, StreamState};
use crate::sdk::DeviceProvider;
use crate::sink::MediaSink;
use crate::status::{StatusHub, StatusObserver};

/// The four output pins every filter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    VideoCapture,
    VideoPreview,
    AudioCapture,
    AudioPreview,
}

impl PinKind {
    pub const ALL: [PinKind; 4] = [
        PinKind::VideoCapture,
        PinKind::VideoPreview,
        PinKind::AudioCapture,
        PinKind::AudioPreview,
    ];

    fn thread_name(self) -> &'static str {
        match self {
            PinKind::VideoCapture => "video-capture",
            PinKind::VideoPreview => "video-preview",
            PinKind::AudioCapture => "audio-capture",
            PinKind::AudioPreview => "audio-preview",
        }
    }
}

struct PinWorker {
    kind: PinKind,
    pin: Option<Box<dyn Pin>>,
    thread: Option<JoinHandle<Result<(), CaptureError>>>,
}

/// Owns the selected channel and drives the capture pins.
///
/// `run` starts the stream clock and the worker threads, `pause` puts the
/// pins into discard mode, `stop` winds the workers down. The channel
/// handle closes when the filter (and any straggling pin references) drop.
pub struct CaptureFilter {
    device: SelectedDevice,
    clock: Arc<ReferenceClock>,
    status: Arc<StatusHub>,
    control: Arc<StreamControl>,
    workers: Vec<PinWorker>,
}

impl CaptureFilter {
    /// Discovers and opens a device, then builds the four pins, asking
    /// `sink_for` for the downstream connection of each.
    pub fn new(
        provider: &dyn DeviceProvider,
        target_path: Option<&str>,
        mut sink_for: impl FnMut(PinKind) -> Box<dyn MediaSink>,
    ) -> Result<Self, CaptureError> {
        let device = select_device(provider, target_path)?;

        let clock = Arc::new(match device.family {
            DeviceFamily::Pro => ReferenceClock::from_device(device.channel.clone()),
            DeviceFamily::Usb => ReferenceClock::from_host(),
        });
        let status = Arc::new(StatusHub::new());
        status.device_selected(device.description());
        let control = Arc::new(StreamControl::new());

        let mut workers = Vec::with_capacity(PinKind::ALL.len());
        for &kind in PinKind::ALL.iter() {
            let sink = sink_for(kind);
            let pin: Box<dyn Pin> = match kind {
                PinKind::VideoCapture | PinKind::VideoPreview => Box::new(VideoPin::new(
                    device.family,
                    device.channel.clone(),
                    kind == PinKind::VideoPreview,
                    clock.clone(),
                    control.clone(),
                    status.clone(),
                    sink,
                )),
                PinKind::AudioCapture | PinKind::AudioPreview => Box::new(AudioPin::new(
                    device.family,
                    device.channel.clone(),
                    kind == PinKind::AudioPreview,
                    clock.clone(),
                    control.clone(),
                    status.clone(),
                    sink,
                )),
            };
            workers.push(PinWorker {
                kind,
                pin: Some(pin),
                thread: None,
            });
        }

        Ok(CaptureFilter {
            device,
            clock,
            status,
            control,
            workers,
        })
    }

    pub fn device(&self) -> &SelectedDevice {
        &self.device
    }

    pub fn clock(&self) -> &Arc<ReferenceClock> {
        &self.clock
    }

    pub fn set_observer(&self, observer: Option<Box<dyn StatusObserver>>) {
        self.status.set_observer(observer);
    }

    /// Re-pushes the latest snapshot of every status kind.
    pub fn reload_status(&self) {
        self.status.reload();
    }

    /// Starts (or resumes) streaming. The stream start time is taken from
    /// the shared clock so every pin stamps against the same epoch.
    pub fn run(&mut self) -> Result<(), CaptureError> {
        // 0 doubles as the "not started" sentinel in the pins
        let start = self.clock.now().max(1);
        self.control.set_start_time(start);
        self.control.set_state(StreamState::Flowing);
        info!("filter running at {}", start);

        for worker in self.workers.iter_mut() {
            if worker.thread.is_some() {
                continue;
            }
            let mut pin = match worker.pin.take() {
                Some(pin) => pin,
                None => continue,
            };
            let name = worker.kind.thread_name();
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    if let Err(e) = pin.on_thread_create() {
                        error!("[{}] pin start failed: {}", name, e);
                        return Err(e);
                    }
                    let result = run_pin(pin.as_mut());
                    pin.on_thread_destroy();
                    result
                })
                .map_err(|e| {
                    error!("unable to spawn {} worker: {}", name, e);
                    CaptureError::StartCaptureFailed("worker")
                })?;
            worker.thread = Some(handle);
        }
        Ok(())
    }

    /// Keeps the workers alive but makes them discard everything.
    pub fn pause(&self) {
        info!("filter pausing");
        self.control.set_state(StreamState::Discarding);
    }

    /// Stops streaming and joins the worker threads.
    pub fn stop(&mut self) {
        info!("filter stopping");
        self.control.set_state(StreamState::Discarding);
        self.control.request_exit();
        for worker in self.workers.iter_mut() {
            if let Some(handle) = worker.thread.take() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        "{} worker exited with {}",
                        worker.kind.thread_name(),
                        e
                    ),
                    Err(_) => error!("{} worker panicked", worker.kind.thread_name()),
                }
            }
        }
        self.control.set_state(StreamState::Stopped);
    }
}

impl Drop for CaptureFilter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::test_support::{MockChannel, MockProvider};
    use crate::sink::test_support::CollectingSink;

    #[test]
    fn empty_provider_yields_no_device() {
        let provider = MockProvider { channels: vec![] };
        let result = CaptureFilter::new(&provider, None, |_| Box::new(CollectingSink::new()));
        assert!(matches!(result, Err(CaptureError::NoDevice)));
    }

    #[test]
    fn filter_builds_four_pins_and_publishes_the_device() {
        let channel = Arc::new(MockChannel::locked_hdmi(1920, 1080));
        let provider = MockProvider::single("USB Capture", channel);

        let mut kinds = Vec::new();
        let filter = CaptureFilter::new(&provider, None, |kind| {
            kinds.push(kind);
            Box::new(CollectingSink::new())
        })
        .unwrap();

        assert_eq!(kinds, PinKind::ALL.to_vec());
        assert_eq!(filter.device().family, DeviceFamily::Usb);
        assert_eq!(filter.device().description(), "USB Capture [A0001]");
    }

    #[test]
    fn stop_without_run_is_clean() {
        let channel = Arc::new(MockChannel::locked_hdmi(1280, 720));
        let provider = MockProvider::single("Pro Capture", channel);
        let mut filter =
            CaptureFilter::new(&provider, None, |_| Box::new(CollectingSink::new())).unwrap();
        filter.pause();
        filter.stop();
    }
}
