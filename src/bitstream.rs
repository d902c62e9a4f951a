//! IEC 61937 demultiplexing: finds Pa/Pb/Pc/Pd preambles in the audio
//! stream and reassembles the compressed data bursts they announce.

use log::{debug, trace, warn};

use crate::audio_format::{AudioFormat, Codec};

/// Samples in one hardware audio frame.
pub const SAMPLES_PER_FRAME: usize = 1024;
/// Channel slots a hardware frame always carries, present or not.
pub const MAX_CHANNEL_SLOTS: usize = 8;
/// Every slot sample is left-zero-padded to this width.
pub const MAX_BIT_DEPTH_BYTES: usize = 4;
/// Bytes in one raw hardware audio frame.
pub const MAX_FRAME_BYTES: usize = SAMPLES_PER_FRAME * MAX_CHANNEL_SLOTS * MAX_BIT_DEPTH_BYTES;

/// Starting burst buffer capacity; large enough for AC3/DTS bursts without
/// being wasteful, grown on demand for the HD codecs.
const BURST_RESERVE: usize = 6144;

/// Pa Pb sync word, in stream byte order after the probe repack.
const PA_PB: [u8; 4] = [0xf8, 0x72, 0x4e, 0x1f];

/// What one pass over a frame's worth of probe bytes produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// At least one interesting byte was consumed.
    Consumed,
    /// A data burst is still being assembled across frames.
    PartialBurst,
    /// 1-3 bytes of a possible Pa match at the end of the frame.
    PossibleBitstream,
    /// Nothing that looks like a bitstream.
    Nothing,
}

/// Repacks one hardware frame for probing: zero padding stripped and each
/// sample's bytes swapped, restoring the big-endian order compressed audio
/// is transported in. Returns the number of probe bytes written.
pub fn pack_for_probe(frame: &[u8], format: &AudioFormat, out: &mut [u8]) -> usize {
    let depth = usize::from(format.bit_depth_bytes);
    let channels = usize::from(format.input_channel_count);
    let pairs = channels / 2;
    let mut copied = 0;
    for pair in 0..pairs {
        for sample in 0..SAMPLES_PER_FRAME {
            let in_l = (sample * MAX_CHANNEL_SLOTS + pair) * MAX_BIT_DEPTH_BYTES;
            let in_r =
                (sample * MAX_CHANNEL_SLOTS + pair + MAX_CHANNEL_SLOTS / 2) * MAX_BIT_DEPTH_BYTES;
            let out_l = (sample * channels + pair * 2) * depth;
            let out_r = out_l + depth;
            for k in 0..depth {
                out[out_l + k] = frame[in_l + MAX_BIT_DEPTH_BYTES - k - 1];
                out[out_r + k] = frame[in_r + MAX_BIT_DEPTH_BYTES - k - 1];
            }
            copied += depth * 2;
        }
    }
    copied
}

/// Incremental IEC 61937 parser. State survives across hardware frames so
/// preambles and bursts can straddle frame boundaries.
pub struct BitstreamParser {
    prefix: String,
    pa_pb_matched: u8,
    pc_pd: [u8; 4],
    pc_pd_read: u8,
    burst_size: u16,
    burst_read: u16,
    /// Assembled burst payload; valid up to `payload_size` once a burst
    /// completes.
    pub burst: Vec<u8>,
    /// Size of the last completed burst; cleared by the caller once the
    /// payload has been delivered.
    pub payload_size: u16,
    /// Bytes consumed since the last completed sync, for diagnostics only.
    pub bytes_since_pa_pb: u32,
    in_pause: bool,
}

impl BitstreamParser {
    pub fn new(prefix: &str) -> Self {
        BitstreamParser {
            prefix: prefix.to_string(),
            pa_pb_matched: 0,
            pc_pd: [0; 4],
            pc_pd_read: 0,
            burst_size: 0,
            burst_read: 0,
            burst: vec![0; BURST_RESERVE],
            payload_size: 0,
            bytes_since_pa_pb: 0,
            in_pause: false,
        }
    }

    /// Drops all sync state, e.g. after a signal or codec change.
    pub fn reset(&mut self) {
        self.pa_pb_matched = 0;
        self.pc_pd_read = 0;
        self.burst_size = 0;
        self.burst_read = 0;
        self.payload_size = 0;
        self.bytes_since_pa_pb = 0;
        self.in_pause = false;
    }

    /// Current burst size announced by the last Pc/Pd, 0 when idle.
    pub fn burst_size(&self) -> u16 {
        self.burst_size
    }

    /// Single pass over one frame's worth of probe bytes.
    ///
    /// `codec` is updated whenever a Pc/Pd preamble classifies the stream.
    /// A completed burst is signalled through `payload_size`.
    pub fn parse(&mut self, buf: &[u8], codec: &mut Codec) -> ParseOutcome {
        let buf_size = buf.len();
        let mut bytes_read = 0usize;
        let mut copied = false;
        let mut partial = false;
        let mut maybe = false;

        while bytes_read < buf_size {
            // continue an in-flight burst first
            let remaining_in_burst = usize::from(self.burst_size.saturating_sub(self.burst_read));
            if remaining_in_burst > 0 {
                let to_copy = remaining_in_burst.min(buf_size - bytes_read);
                trace!(
                    "[{}] copying {} burst bytes from {} to {}",
                    self.prefix,
                    to_copy,
                    bytes_read,
                    self.burst_read
                );
                let dst = usize::from(self.burst_read);
                self.burst[dst..dst + to_copy]
                    .copy_from_slice(&buf[bytes_read..bytes_read + to_copy]);
                bytes_read += to_copy;
                self.burst_read += to_copy as u16;
                self.bytes_since_pa_pb += to_copy as u32;
                copied = true;

                if self.burst_read < self.burst_size {
                    partial = true;
                    continue;
                }
                self.payload_size = self.burst_size;
                trace!(
                    "[{}] data burst complete, {} bytes",
                    self.prefix,
                    self.payload_size
                );
            }

            // burst finished, clear the counters for the next one
            self.burst_size = 0;
            self.burst_read = 0;

            // search for the Pa/Pb sync F8 72 4E 1F
            while bytes_read < buf_size && self.pa_pb_matched != 4 {
                if buf[bytes_read] == PA_PB[usize::from(self.pa_pb_matched)] {
                    self.pa_pb_matched += 1;
                    if self.pa_pb_matched == 4 {
                        bytes_read += 1;
                        if !self.in_pause {
                            debug!(
                                "[{}] found PaPb ending at {} ({} since last)",
                                self.prefix, bytes_read, self.bytes_since_pa_pb
                            );
                        }
                        self.bytes_since_pa_pb = 4;
                        maybe = false;
                        break;
                    }
                } else {
                    self.pa_pb_matched = 0;
                }
                bytes_read += 1;
                self.bytes_since_pa_pb += 1;
            }

            if self.pa_pb_matched >= 1 && self.pa_pb_matched <= 3 {
                if !self.in_pause {
                    trace!(
                        "[{}] {} bytes of PaPb at frame end",
                        self.prefix,
                        self.pa_pb_matched
                    );
                }
                maybe = true;
                continue;
            }
            if self.pa_pb_matched != 4 {
                continue;
            }

            // read the Pc/Pd preamble words, possibly across frames
            let to_copy = (buf_size - bytes_read).min(4 - usize::from(self.pc_pd_read));
            if to_copy > 0 {
                let dst = usize::from(self.pc_pd_read);
                self.pc_pd[dst..dst + to_copy]
                    .copy_from_slice(&buf[bytes_read..bytes_read + to_copy]);
                self.pc_pd_read += to_copy as u8;
                bytes_read += to_copy;
                self.bytes_since_pa_pb += to_copy as u32;
                copied = true;
            }
            if self.pc_pd_read != 4 {
                continue;
            }

            let mut burst_size = (u16::from(self.pc_pd[2]) << 8) | u16::from(self.pc_pd[3]);
            let data_type = self.pc_pd[1] & 0x7f;
            *codec = classify(data_type, &mut burst_size, &self.prefix);
            self.burst_size = burst_size;

            // pause and null bursts reset the state machine and keep skipping
            if *codec == Codec::PauseOrNull {
                if !self.in_pause {
                    debug!(
                        "[{}] found PAUSE_OR_NULL ({}) with burst size {}, skipping",
                        self.prefix, data_type, self.burst_size
                    );
                    self.in_pause = true;
                }
                self.pa_pb_matched = 0;
                self.pc_pd_read = 0;
                self.burst_size = 0;
                self.burst_read = 0;
                self.payload_size = 0;
                continue;
            }
            if self.in_pause {
                debug!("[{}] exiting PAUSE_OR_NULL skip mode", self.prefix);
                self.in_pause = false;
            }

            let size = usize::from(self.burst_size);
            if self.burst.len() != size {
                self.burst.resize(size, 0);
            }
            self.pa_pb_matched = 0;
            self.pc_pd_read = 0;
            debug!(
                "[{}] found {} with burst size {}",
                self.prefix,
                codec.display_name(),
                self.burst_size
            );
        }

        if partial {
            ParseOutcome::PartialBurst
        } else if maybe {
            ParseOutcome::PossibleBitstream
        } else if copied {
            ParseOutcome::Consumed
        } else {
            ParseOutcome::Nothing
        }
    }
}

/// IEC 61937-2 Table 2: burst-info data type to codec, adjusting the burst
/// length for codecs that announce it in bits.
fn classify(data_type: u8, burst_size: &mut u16, prefix: &str) -> Codec {
    match data_type {
        0x01 => {
            *burst_size /= 8; // bits
            Codec::Ac3
        }
        0x0b | 0x0c | 0x0d => {
            *burst_size /= 8; // bits
            Codec::Dts
        }
        0x11 => Codec::DtsHd,
        0x15 => Codec::Eac3,
        0x16 => Codec::TrueHd,
        0x00 | 0x03 => Codec::PauseOrNull,
        other => {
            warn!(
                "[{}] unknown IEC 61937 data type {} treated as PAUSE",
                prefix, other
            );
            Codec::PauseOrNull
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut BitstreamParser, buf: &[u8]) -> (ParseOutcome, Codec) {
        let mut codec = Codec::Pcm;
        let outcome = parser.parse(buf, &mut codec);
        (outcome, codec)
    }

    #[test]
    fn ac3_burst_round_trips() {
        let mut parser = BitstreamParser::new("t");

        let mut stream = vec![0u8; 16];
        stream.extend_from_slice(&[0xf8, 0x72, 0x4e, 0x1f]);
        // AC3, burst length 2048 bits = 256 bytes
        stream.extend_from_slice(&[0x01, 0x01, 0x08, 0x00]);
        let payload: Vec<u8> = (0..256u32).map(|i| (i % 251) as u8).collect();
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(&[0u8; 32]);

        let (outcome, codec) = parse_all(&mut parser, &stream);
        assert_eq!(outcome, ParseOutcome::Consumed);
        assert_eq!(codec, Codec::Ac3);
        assert_eq!(parser.payload_size, 256);
        assert_eq!(&parser.burst[..256], payload.as_slice());
    }

    #[test]
    fn burst_reassembles_across_frames() {
        let mut parser = BitstreamParser::new("t");
        let mut codec = Codec::Pcm;

        let mut first = vec![0xf8, 0x72, 0x4e, 0x1f, 0x01, 0x01, 0x08, 0x00];
        first.extend_from_slice(&vec![0xaa; 100]);
        assert_eq!(parser.parse(&first, &mut codec), ParseOutcome::PartialBurst);
        assert_eq!(parser.payload_size, 0);

        let second = vec![0xbb; 156];
        assert_eq!(parser.parse(&second, &mut codec), ParseOutcome::Consumed);
        assert_eq!(parser.payload_size, 256);
        assert_eq!(parser.burst[99], 0xaa);
        assert_eq!(parser.burst[100], 0xbb);
    }

    #[test]
    fn preamble_split_across_frames_is_inconclusive() {
        let mut parser = BitstreamParser::new("t");
        let mut codec = Codec::Pcm;

        let first = [0x00, 0x00, 0xf8, 0x72];
        assert_eq!(
            parser.parse(&first, &mut codec),
            ParseOutcome::PossibleBitstream
        );

        let second = [0x4e, 0x1f, 0x01, 0x01, 0x00, 0x40];
        assert_eq!(parser.parse(&second, &mut codec), ParseOutcome::Consumed);
        assert_eq!(codec, Codec::Ac3);
        assert_eq!(parser.burst_size(), 8); // 64 bits
    }

    #[test]
    fn pause_burst_resets_and_keeps_skipping() {
        let mut parser = BitstreamParser::new("t");
        let mut codec = Codec::Pcm;

        let mut stream = vec![0xf8, 0x72, 0x4e, 0x1f, 0x00, 0x00, 0x00, 0x40];
        stream.extend_from_slice(&[0u8; 64]);
        let outcome = parser.parse(&stream, &mut codec);

        assert_eq!(codec, Codec::PauseOrNull);
        assert_eq!(parser.payload_size, 0);
        assert_eq!(parser.burst_size(), 0);
        // the pass consumed the preamble bytes
        assert_eq!(outcome, ParseOutcome::Consumed);

        // a real burst afterwards still parses
        let mut stream = vec![0xf8, 0x72, 0x4e, 0x1f, 0x01, 0x01, 0x00, 0x40];
        stream.extend_from_slice(&[0x42; 8]);
        parser.parse(&stream, &mut codec);
        assert_eq!(codec, Codec::Ac3);
        assert_eq!(parser.payload_size, 8);
    }

    #[test]
    fn unknown_data_type_is_treated_as_pause() {
        let mut parser = BitstreamParser::new("t");
        let mut codec = Codec::Pcm;
        let stream = [0xf8, 0x72, 0x4e, 0x1f, 0x00, 0x29, 0x00, 0x40];
        parser.parse(&stream, &mut codec);
        assert_eq!(codec, Codec::PauseOrNull);
    }

    #[test]
    fn silence_is_nothing() {
        let mut parser = BitstreamParser::new("t");
        let (outcome, _) = parse_all(&mut parser, &[0u8; 4096]);
        assert_eq!(outcome, ParseOutcome::Nothing);
    }

    #[test]
    fn probe_repack_swaps_and_strips() {
        let mut format = AudioFormat::default();
        format.bit_depth = 16;
        format.bit_depth_bytes = 2;
        format.input_channel_count = 2;

        let mut frame = vec![0u8; MAX_FRAME_BYTES];
        // sample 0: L0 = 00 00 F8 72 (padded big-endian), R0 = 00 00 4E 1F
        frame[0..4].copy_from_slice(&[0x00, 0x00, 0xf8, 0x72]);
        frame[16..20].copy_from_slice(&[0x00, 0x00, 0x4e, 0x1f]);

        let mut out = vec![0u8; MAX_FRAME_BYTES];
        let copied = pack_for_probe(&frame, &format, &mut out);
        assert_eq!(copied, SAMPLES_PER_FRAME * 2 * 2);
        // byte swap restores stream order per 16-bit word
        assert_eq!(&out[0..4], &[0x72, 0xf8, 0x1f, 0x4e]);
    }
}
