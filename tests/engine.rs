//! End-to-end run of the capture engine against the in-memory SDK: a USB
//! device feeding all four pins, checked for delivery and timestamp
//! discipline.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hdmi_capture::fourcc;
use hdmi_capture::sdk::test_support::{MockChannel, MockProvider};
use hdmi_capture::sink::test_support::CollectingSink;
use hdmi_capture::{CaptureFilter, DeviceFamily, MediaType, PinKind};

const FRAME_INTERVAL: i64 = 100_000; // 100 Hz keeps the test fast

fn streaming_channel() -> Arc<MockChannel> {
    let channel = Arc::new(MockChannel::locked_hdmi(96, 54));
    {
        let mut state = channel.state.lock();
        state.video_status.frame_duration = FRAME_INTERVAL as u32;
        // 8-bit 4:2:0 derives NV12; the device advertises exactly that
        state.usb_formats.fourccs = vec![fourcc::NV12];
        state.usb_formats.frame_intervals = vec![FRAME_INTERVAL];
        state.usb_formats.frame_sizes = vec![(96, 54)];

        state.audio_status.lpcm = true;
        state.audio_status.sample_rate = 48_000;
        state.audio_status.bits_per_sample = 16;
        state.audio_status.channel_valid = 0x1;
    }
    channel
}

struct Harness {
    channel: Arc<MockChannel>,
    filter: CaptureFilter,
    sinks: HashMap<&'static str, CollectingSink>,
}

fn start_engine() -> Harness {
    let channel = streaming_channel();
    let provider = MockProvider::single("USB Capture", channel.clone());

    let mut sinks = HashMap::new();
    let filter = {
        let sinks = &mut sinks;
        CaptureFilter::new(&provider, None, |kind| {
            let sink = CollectingSink::new();
            let name = match kind {
                PinKind::VideoCapture => "video-capture",
                PinKind::VideoPreview => "video-preview",
                PinKind::AudioCapture => "audio-capture",
                PinKind::AudioPreview => "audio-preview",
            };
            sinks.insert(name, sink.clone());
            Box::new(sink)
        })
        .expect("filter")
    };

    let mut harness = Harness {
        channel,
        filter,
        sinks,
    };
    harness.filter.run().expect("run");
    harness
}

#[test]
fn usb_engine_streams_video_and_audio() {
    let mut harness = start_engine();
    assert_eq!(harness.filter.device().family, DeviceFamily::Usb);

    let image_size = 96 * 54 * 3 / 2;
    let video_frame = vec![0x42u8; image_size];
    let audio_frame = vec![0u8; 1024 * 8 * 4];

    // pace pushes slower than the frame interval so consecutive samples
    // cannot overlap
    for _ in 0..10 {
        harness.channel.push_video_frame(&video_frame, 0);
        harness.channel.push_audio_frame(&audio_frame, 0);
        thread::sleep(Duration::from_millis(40));
    }
    harness.filter.stop();

    for name in ["video-capture", "video-preview"].iter() {
        let sink = &harness.sinks[name];
        let state = sink.state.lock();
        assert!(
            state.delivered.len() >= 2,
            "{} delivered {} samples",
            name,
            state.delivered.len()
        );
        for sample in &state.delivered {
            assert_eq!(sample.payload.len(), image_size, "{}", name);
            assert!(sample.payload.iter().all(|&b| b == 0x42), "{}", name);
            assert!(sample.sync_point, "{}", name);
            assert_eq!(sample.end_time - sample.start_time, FRAME_INTERVAL);
        }
        for pair in state.delivered.windows(2) {
            assert!(
                pair[1].end_time > pair[0].end_time,
                "{}: end times must strictly increase",
                name
            );
            assert!(
                pair[1].start_time >= pair[0].end_time,
                "{}: samples must not overlap",
                name
            );
        }
    }

    // the audio pin spends its detection window probing for bitstream
    // before committing to PCM, so it delivers fewer frames than it saw
    let audio = &harness.sinks["audio-capture"];
    let state = audio.state.lock();
    assert!(
        !state.delivered.is_empty(),
        "audio delivered {} samples",
        state.delivered.len()
    );
    for sample in &state.delivered {
        // USB devices resample to 48 kHz; stereo 16-bit frames
        assert_eq!(sample.payload.len(), 1024 * 2 * 2);
        assert!(sample.sync_point);
        assert!(sample.payload.iter().all(|&b| b == 0));
    }
    for pair in state.delivered.windows(2) {
        assert!(pair[1].end_time > pair[0].end_time);
        assert!(pair[1].start_time >= pair[0].end_time);
    }
}

#[test]
fn pause_discards_until_resumed() {
    let mut harness = start_engine();
    let image_size = 96 * 54 * 3 / 2;
    let video_frame = vec![0x37u8; image_size];

    for _ in 0..3 {
        harness.channel.push_video_frame(&video_frame, 0);
        thread::sleep(Duration::from_millis(40));
    }

    harness.filter.pause();
    // let any in-flight sample drain before snapshotting the count
    thread::sleep(Duration::from_millis(100));
    let before_pause = harness.sinks["video-capture"].delivered_count();
    assert!(before_pause >= 1);

    for _ in 0..3 {
        harness.channel.push_video_frame(&video_frame, 0);
        thread::sleep(Duration::from_millis(40));
    }
    let during_pause = harness.sinks["video-capture"].delivered_count();
    assert_eq!(before_pause, during_pause, "paused pins must not deliver");

    harness.filter.run().expect("resume");
    for _ in 0..3 {
        harness.channel.push_video_frame(&video_frame, 0);
        thread::sleep(Duration::from_millis(40));
    }
    harness.filter.stop();

    let state = harness.sinks["video-capture"].state.lock();
    assert!(state.delivered.len() > during_pause);
}

#[test]
fn media_type_accompanies_the_first_format_change() {
    let mut harness = start_engine();
    let image_size = 96 * 54 * 3 / 2;

    for _ in 0..3 {
        harness
            .channel
            .push_video_frame(&vec![1u8; image_size], 0);
        thread::sleep(Duration::from_millis(40));
    }

    // the source drops to SD; the device only does NV12, so the derived
    // format is pruned back onto the advertised list
    {
        let mut state = harness.channel.state.lock();
        state.video_status.cx = 48;
        state.video_status.cy = 26;
        state.usb_formats.frame_sizes = vec![(96, 54), (48, 26)];
    }
    for _ in 0..5 {
        harness.channel.push_video_frame(&vec![2u8; image_size], 0);
        thread::sleep(Duration::from_millis(40));
    }
    harness.filter.stop();

    let state = harness.sinks["video-preview"].state.lock();
    let with_type: Vec<_> = state
        .delivered
        .iter()
        .filter_map(|s| s.media_type.as_ref())
        .collect();
    assert!(
        !with_type.is_empty(),
        "a renegotiated sample must carry the new media type"
    );
    match with_type.last().unwrap() {
        MediaType::Video(v) => {
            assert_eq!((v.width, v.height), (48, 26));
            assert_eq!(v.subtype, fourcc::NV12);
        }
        other => panic!("unexpected media type {:?}", other),
    }
}
