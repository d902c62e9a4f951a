//! CEA-861-E channel allocation decoding.
//!
//! HDMI embedded audio arrives as up to four channel pairs whose speaker
//! assignment is named by a 6-bit allocation code (Table 28). This module
//! turns the pair-valid mask plus that code into the downstream layout:
//! output channel count, speaker mask, per-slot remap offsets and the LFE
//! slot. Offsets move a channel from its compacted input position to its
//! output position, so FC and LFE can swap without copying twice.

/// Sentinel marking an input slot that carries no output channel.
pub const NOT_PRESENT: i16 = 1024;

/// LFE gain applied when the infoframe asks for -10 dB playback.
pub const MINUS_10DB: f64 = 0.316227766016838; // 10^(-10/20)

/// Windows/KS-style speaker position bits.
pub mod speaker {
    pub const FRONT_LEFT: u32 = 0x1;
    pub const FRONT_RIGHT: u32 = 0x2;
    pub const FRONT_CENTER: u32 = 0x4;
    pub const LOW_FREQUENCY: u32 = 0x8;
    pub const BACK_LEFT: u32 = 0x10;
    pub const BACK_RIGHT: u32 = 0x20;
    pub const FRONT_LEFT_OF_CENTER: u32 = 0x40;
    pub const FRONT_RIGHT_OF_CENTER: u32 = 0x80;
    pub const BACK_CENTER: u32 = 0x100;
    pub const SIDE_LEFT: u32 = 0x200;
    pub const SIDE_RIGHT: u32 = 0x400;
    pub const TOP_CENTER: u32 = 0x800;
    pub const TOP_FRONT_LEFT: u32 = 0x1000;
    pub const TOP_FRONT_CENTER: u32 = 0x2000;
    pub const TOP_FRONT_RIGHT: u32 = 0x4000;

    pub const STEREO: u32 = FRONT_LEFT | FRONT_RIGHT;
    pub const TWO_POINT_ONE: u32 = STEREO | LOW_FREQUENCY;
    pub const THREE_POINT_ZERO: u32 = STEREO | FRONT_CENTER;
    pub const THREE_POINT_ONE: u32 = THREE_POINT_ZERO | LOW_FREQUENCY;
    pub const FIVE_POINT_ONE: u32 = THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT;
    pub const SEVEN_POINT_ONE: u32 =
        FIVE_POINT_ONE | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER;
    pub const SEVEN_POINT_ONE_SURROUND: u32 = FIVE_POINT_ONE | SIDE_LEFT | SIDE_RIGHT;
}

/// The decoded layout for one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Hardware slots carrying this allocation, always 0, 2, 4, 6 or 8.
    pub input_channels: u16,
    /// Channels exposed downstream after dropping absent slots.
    pub output_channels: u16,
    pub speaker_mask: u32,
    /// Addend applied per input slot to find its output slot;
    /// `NOT_PRESENT` drops the slot entirely.
    pub offsets: [i16; 8],
    /// Input slot of the LFE channel, or `NOT_PRESENT`.
    pub lfe_index: i16,
    pub layout: &'static str,
}

impl ChannelLayout {
    const fn silent() -> Self {
        ChannelLayout {
            input_channels: 0,
            output_channels: 0,
            speaker_mask: 0,
            offsets: [NOT_PRESENT; 8],
            lfe_index: NOT_PRESENT,
            layout: "",
        }
    }
}

struct Allocation {
    layout: &'static str,
    mask: u32,
    input: u16,
    output: u16,
    offsets: [i16; 8],
    lfe: i16,
}

use self::speaker::*;

const X: i16 = NOT_PRESENT;

// CEA-861-E Table 28, codes 0x01..=0x31. Code 0x00 only renames the
// baseline layout and is handled separately. The slot comments give the
// HDMI channel order; WIDE speakers have no KS bit and are discarded, TOP
// speakers map to their KS equivalents.
#[rustfmt::skip]
static ALLOCATIONS: [Allocation; 0x31] = [
    // 0x01: FL FR LFE --
    Allocation { layout: "FL FR LFE", mask: TWO_POINT_ONE, input: 4, output: 3, offsets: [0, 0, 0, X, X, X, X, X], lfe: 2 },
    // 0x02: FL FR -- FC
    Allocation { layout: "FL FR FC", mask: THREE_POINT_ZERO, input: 4, output: 3, offsets: [0, 0, X, 0, X, X, X, X], lfe: X },
    // 0x03: FL FR LFE FC
    Allocation { layout: "FL FR FC LFE", mask: THREE_POINT_ONE, input: 4, output: 4, offsets: [0, 0, 1, -1, X, X, X, X], lfe: 2 },
    // 0x04: FL FR -- -- RC --
    Allocation { layout: "FL FR RC", mask: STEREO | BACK_CENTER, input: 6, output: 3, offsets: [0, 0, X, X, 0, X, X, X], lfe: X },
    // 0x05: FL FR LFE -- RC --
    Allocation { layout: "FL FR LFE RC", mask: TWO_POINT_ONE | BACK_CENTER, input: 6, output: 4, offsets: [0, 0, 0, X, 0, X, X, X], lfe: 2 },
    // 0x06: FL FR -- FC RC --
    Allocation { layout: "FL FR FC RC", mask: THREE_POINT_ZERO | BACK_CENTER, input: 6, output: 4, offsets: [0, 0, X, 0, 0, X, X, X], lfe: X },
    // 0x07: FL FR LFE FC RC --
    Allocation { layout: "FL FR LFE FC RC", mask: THREE_POINT_ONE | BACK_CENTER, input: 6, output: 5, offsets: [0, 0, 1, -1, 0, X, X, X], lfe: 2 },
    // 0x08: FL FR -- -- RL RR
    Allocation { layout: "FL FR RL RR", mask: STEREO | BACK_LEFT | BACK_RIGHT, input: 6, output: 4, offsets: [0, 0, X, X, 0, 0, X, X], lfe: X },
    // 0x09: FL FR LFE -- RL RR
    Allocation { layout: "FL FR LFE RL RR", mask: TWO_POINT_ONE | BACK_LEFT | BACK_RIGHT, input: 6, output: 5, offsets: [0, 0, 0, X, 0, 0, X, X], lfe: 2 },
    // 0x0A: FL FR -- FC RL RR
    Allocation { layout: "FL FR FC RL RR", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT, input: 6, output: 5, offsets: [0, 0, X, 0, 0, 0, X, X], lfe: X },
    // 0x0B: FL FR LFE FC RL RR
    Allocation { layout: "FL FR FC LFE BL BR", mask: FIVE_POINT_ONE, input: 6, output: 6, offsets: [0, 0, 1, -1, 0, 0, X, X], lfe: 2 },
    // 0x0C: FL FR -- -- RL RR RC --
    Allocation { layout: "FL FR BL BR BC", mask: STEREO | BACK_LEFT | BACK_RIGHT | BACK_CENTER, input: 8, output: 5, offsets: [0, 0, X, X, 0, 0, 0, X], lfe: X },
    // 0x0D: FL FR LFE -- RL RR RC --
    Allocation { layout: "FL FR LFE BL BR BC", mask: TWO_POINT_ONE | BACK_LEFT | BACK_RIGHT | BACK_CENTER, input: 8, output: 6, offsets: [0, 0, 0, X, 0, 0, 0, X], lfe: 2 },
    // 0x0E: FL FR -- FC RL RR RC --
    Allocation { layout: "FL FR FC BL BR BC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | BACK_CENTER, input: 8, output: 6, offsets: [0, 0, X, 0, 0, 0, 0, X], lfe: X },
    // 0x0F: FL FR LFE FC RL RR RC --
    Allocation { layout: "FL FR FC LFE BL BR BC", mask: FIVE_POINT_ONE | BACK_CENTER, input: 8, output: 7, offsets: [0, 0, 1, -1, 0, 0, 0, X], lfe: 2 },
    // 0x10: FL FR -- -- RL RR RLC RRC (RL/RR ride the side slots)
    Allocation { layout: "FL FR BL BR SL SR", mask: STEREO | SIDE_LEFT | SIDE_RIGHT | BACK_LEFT | BACK_RIGHT, input: 8, output: 6, offsets: [0, 0, X, X, 2, 2, -2, -2], lfe: X },
    // 0x11: FL FR LFE -- RL RR RLC RRC
    Allocation { layout: "FL FR LFE BL BR SL SR", mask: TWO_POINT_ONE | SIDE_LEFT | SIDE_RIGHT | BACK_LEFT | BACK_RIGHT, input: 8, output: 7, offsets: [0, 0, 0, X, 2, 2, -2, -2], lfe: 2 },
    // 0x12: FL FR -- FC RL RR RLC RRC
    Allocation { layout: "FL FR FC BL BR SL SR", mask: THREE_POINT_ZERO | SIDE_LEFT | SIDE_RIGHT | BACK_LEFT | BACK_RIGHT, input: 8, output: 7, offsets: [0, 0, X, 0, 2, 2, -2, -2], lfe: X },
    // 0x13: FL FR LFE FC RL RR RLC RRC
    Allocation { layout: "FL FR FC LFE BL BR SL SR", mask: SEVEN_POINT_ONE_SURROUND, input: 8, output: 8, offsets: [0, 0, 1, -1, 2, 2, -2, -2], lfe: 2 },
    // 0x14: FL FR -- -- -- -- FLC FRC
    Allocation { layout: "FL FR FLC FRC", mask: STEREO | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 4, offsets: [0, 0, X, X, X, X, 0, 0], lfe: X },
    // 0x15: FL FR LFE -- -- -- FLC FRC
    Allocation { layout: "FL FR LFE FLC FRC", mask: TWO_POINT_ONE | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 5, offsets: [0, 0, 0, X, X, X, 0, 0], lfe: 2 },
    // 0x16: FL FR -- FC -- -- FLC FRC
    Allocation { layout: "FL FR FC FLC FRC", mask: THREE_POINT_ZERO | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 5, offsets: [0, 0, X, 0, X, X, 0, 0], lfe: X },
    // 0x17: FL FR LFE FC -- -- FLC FRC
    Allocation { layout: "FL FR FC LFE FLC FRC", mask: THREE_POINT_ONE | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 6, offsets: [0, 0, 1, -1, X, X, 0, 0], lfe: 2 },
    // 0x18: FL FR -- -- RC -- FLC FRC
    Allocation { layout: "FL FR RC FLC FRC", mask: STEREO | BACK_CENTER | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 5, offsets: [0, 0, X, X, 2, X, -1, -1], lfe: X },
    // 0x19: FL FR LFE -- RC -- FLC FRC
    Allocation { layout: "FL FR LFE RC FLC FRC", mask: TWO_POINT_ONE | BACK_CENTER | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 6, offsets: [0, 0, 0, X, 2, X, -1, -1], lfe: 2 },
    // 0x1A: FL FR -- FC RC -- FLC FRC
    Allocation { layout: "FL FR FC RC FLC FRC", mask: THREE_POINT_ZERO | BACK_CENTER | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 6, offsets: [0, 0, X, 0, 2, X, -1, -1], lfe: X },
    // 0x1B: FL FR LFE FC RC -- FLC FRC
    Allocation { layout: "FL FR FC LFE RC FLC FRC", mask: THREE_POINT_ONE | BACK_CENTER | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 7, offsets: [0, 0, 1, -1, 2, X, -1, -1], lfe: 2 },
    // 0x1C: FL FR -- -- RL RR FLC FRC
    Allocation { layout: "FL FR BL BR FLC FRC", mask: STEREO | BACK_LEFT | BACK_RIGHT | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 6, offsets: [0, 0, X, X, 0, 0, 0, 0], lfe: X },
    // 0x1D: FL FR LFE -- RL RR FLC FRC
    Allocation { layout: "FL FR LFE BL BR FLC FRC", mask: TWO_POINT_ONE | BACK_LEFT | BACK_RIGHT | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 7, offsets: [0, 0, 0, X, 0, 0, 0, 0], lfe: 2 },
    // 0x1E: FL FR -- FC RL RR FLC FRC
    Allocation { layout: "FL FR FC BL BR FLC FRC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER, input: 8, output: 7, offsets: [0, 0, X, 0, 0, 0, 0, 0], lfe: X },
    // 0x1F: FL FR LFE FC RL RR FLC FRC
    Allocation { layout: "FL FR LFE FC BL BR FLC FRC", mask: SEVEN_POINT_ONE, input: 8, output: 8, offsets: [0, 0, 1, -1, 0, 0, 0, 0], lfe: 2 },
    // 0x20: FL FR -- FC RL RR FCH --
    Allocation { layout: "FL FR FC BL BR TFC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | TOP_FRONT_CENTER, input: 8, output: 6, offsets: [0, 0, X, 0, 0, 0, 0, X], lfe: X },
    // 0x21: FL FR LFE FC RL RR FCH --
    Allocation { layout: "FL FR FC LFE BL BR TFC", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | TOP_FRONT_CENTER, input: 8, output: 7, offsets: [0, 0, 1, -1, 0, 0, 0, X], lfe: 2 },
    // 0x22: FL FR -- FC RL RR -- TC
    Allocation { layout: "FL FR FC BL BR TC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | TOP_CENTER, input: 8, output: 6, offsets: [0, 0, X, 0, 0, 0, X, 0], lfe: X },
    // 0x23: FL FR LFE FC RL RR -- TC
    Allocation { layout: "FL FR FC LFE BL BR TC", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | TOP_CENTER, input: 8, output: 7, offsets: [0, 0, 1, -1, 0, 0, X, 0], lfe: 2 },
    // 0x24: FL FR -- -- RL RR FLH FRH
    Allocation { layout: "FL FR BL BR TFL TFR", mask: STEREO | BACK_LEFT | BACK_RIGHT | TOP_FRONT_LEFT | TOP_FRONT_RIGHT, input: 8, output: 6, offsets: [0, 0, X, X, 0, 0, 0, 0], lfe: X },
    // 0x25: FL FR LFE -- RL RR FLH FRH
    Allocation { layout: "FL FR LFE BL BR TFL TFR", mask: TWO_POINT_ONE | BACK_LEFT | BACK_RIGHT | TOP_FRONT_LEFT | TOP_FRONT_RIGHT, input: 8, output: 7, offsets: [0, 0, 0, X, 0, 0, 0, 0], lfe: 2 },
    // 0x26: FL FR -- -- RL RR FLW FRW (WIDE discarded)
    Allocation { layout: "FL FR BL BR", mask: STEREO | BACK_LEFT | BACK_RIGHT, input: 8, output: 4, offsets: [0, 0, X, X, 0, 0, X, X], lfe: X },
    // 0x27: FL FR LFE -- RL RR FLW FRW (WIDE discarded)
    Allocation { layout: "FL FR LFE BL BR", mask: TWO_POINT_ONE | BACK_LEFT | BACK_RIGHT, input: 8, output: 5, offsets: [0, 0, 0, X, 0, 0, X, X], lfe: 2 },
    // 0x28: FL FR -- FC RL RR RC TC
    Allocation { layout: "FL FR FC BL BR BC TC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | BACK_CENTER | TOP_CENTER, input: 8, output: 7, offsets: [0, 0, X, 0, 0, 0, 0, 0], lfe: X },
    // 0x29: FL FR LFE FC RL RR RC TC
    Allocation { layout: "FL FR FC LFE BL BR BC TC", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | BACK_CENTER | TOP_CENTER, input: 8, output: 8, offsets: [0, 0, 1, -1, 0, 0, 0, 0], lfe: 2 },
    // 0x2A: FL FR -- FC RL RR RC FCH
    Allocation { layout: "FL FR FC BL BR BC TFC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | BACK_CENTER | TOP_FRONT_CENTER, input: 8, output: 7, offsets: [0, 0, X, 0, 0, 0, 0, 0], lfe: X },
    // 0x2B: FL FR LFE FC RL RR RC FCH
    Allocation { layout: "FL FR FC LFE BL BR BC TFC", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | BACK_CENTER | TOP_FRONT_CENTER, input: 8, output: 8, offsets: [0, 0, 1, -1, 0, 0, 0, 0], lfe: 2 },
    // 0x2C: FL FR -- FC RL RR FCH TC
    Allocation { layout: "FL FR FC BL BR TFC TC", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | TOP_FRONT_CENTER | TOP_CENTER, input: 8, output: 7, offsets: [0, 0, X, 0, 0, 0, 1, -1], lfe: X },
    // 0x2D: FL FR LFE FC RL RR FCH TC
    Allocation { layout: "FL FR FC LFE BL BR TFC TC", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | TOP_FRONT_CENTER | TOP_CENTER, input: 8, output: 8, offsets: [0, 0, 1, -1, 0, 0, 1, -1], lfe: 2 },
    // 0x2E: FL FR -- FC RL RR FLH FRH
    Allocation { layout: "FL FR FC BL BR TFL TFR", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT | TOP_FRONT_LEFT | TOP_FRONT_RIGHT, input: 8, output: 7, offsets: [0, 0, X, 0, 0, 0, 0, 0], lfe: X },
    // 0x2F: FL FR LFE FC RL RR FLH FRH
    Allocation { layout: "FL FR FC LFE BL BR TFL TFR", mask: THREE_POINT_ONE | BACK_LEFT | BACK_RIGHT | TOP_FRONT_LEFT | TOP_FRONT_RIGHT, input: 8, output: 8, offsets: [0, 0, 1, -1, 0, 0, 0, 0], lfe: 2 },
    // 0x30: FL FR -- FC RL RR FLW FRW (WIDE discarded)
    Allocation { layout: "FL FR FC BL BR", mask: THREE_POINT_ZERO | BACK_LEFT | BACK_RIGHT, input: 8, output: 5, offsets: [0, 0, X, 0, 0, 0, X, X], lfe: X },
    // 0x31: FL FR LFE FC RL RR FLW FRW (WIDE discarded)
    Allocation { layout: "FL FR FC LFE BL BR", mask: FIVE_POINT_ONE, input: 8, output: 6, offsets: [0, 0, 1, -1, 0, 0, X, X], lfe: 2 },
];

/// Decodes the pair-valid mask and allocation code into a layout.
///
/// The valid mask first picks a stereo/3.1/5.1/7.1 baseline with the
/// canonical FC/LFE swap, then the allocation code overrides it. A zero
/// valid mask yields the silent layout.
pub fn decode(channel_valid_mask: u16, channel_allocation: u8) -> ChannelLayout {
    if channel_valid_mask & 0x01 == 0 {
        return ChannelLayout::silent();
    }

    let mut layout = baseline(channel_valid_mask);

    match channel_allocation {
        0x00 => {
            // FL FR: stereo content, whatever the device buffers carry
            layout.layout = "FL FR";
        }
        code if (code as usize) <= ALLOCATIONS.len() => {
            let entry = &ALLOCATIONS[code as usize - 1];
            layout.layout = entry.layout;
            layout.speaker_mask = entry.mask;
            layout.input_channels = entry.input;
            layout.output_channels = entry.output;
            layout.offsets = entry.offsets;
            layout.lfe_index = entry.lfe;
        }
        _ => {
            // out-of-table codes keep the baseline
        }
    }

    layout
}

fn baseline(channel_valid_mask: u16) -> ChannelLayout {
    let pair = |idx: u16| channel_valid_mask & (0x01 << idx) != 0;

    if pair(1) {
        if pair(2) {
            if pair(3) {
                ChannelLayout {
                    input_channels: 8,
                    output_channels: 8,
                    speaker_mask: speaker::SEVEN_POINT_ONE_SURROUND,
                    // swap LFE and FC
                    offsets: [0, 0, 1, -1, 0, 0, 0, 0],
                    lfe_index: 2,
                    layout: "FL FR FC LFE BL BR SL SR",
                }
            } else {
                ChannelLayout {
                    input_channels: 6,
                    output_channels: 6,
                    speaker_mask: speaker::FIVE_POINT_ONE,
                    offsets: [0, 0, 1, -1, 0, 0, X, X],
                    lfe_index: 2,
                    layout: "FL FR FC LFE BL BR",
                }
            }
        } else {
            ChannelLayout {
                input_channels: 4,
                output_channels: 4,
                speaker_mask: speaker::THREE_POINT_ONE,
                offsets: [0, 0, 1, -1, X, X, X, X],
                lfe_index: 2,
                layout: "FL FR FC LFE",
            }
        }
    } else {
        ChannelLayout {
            input_channels: 2,
            output_channels: 2,
            speaker_mask: speaker::STEREO,
            offsets: [0, 0, X, X, X, X, X, X],
            lfe_index: NOT_PRESENT,
            layout: "FL FR",
        }
    }
}

/// LFE gain for a CEA-861-E Table 31 playback level code.
pub fn lfe_level_adjustment(lfe_playback_level: u8) -> f64 {
    if lfe_playback_level == 0x2 {
        MINUS_10DB
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Output slot for each present input slot: compacted position plus the
    /// slot's offset, mirroring the PCM copy loop.
    fn output_slots(layout: &ChannelLayout) -> Vec<(usize, i16)> {
        let mut slots = Vec::new();
        let mut compacted: i16 = -1;
        for input_slot in 0..layout.input_channels as usize {
            let offset = layout.offsets[input_slot];
            if offset == NOT_PRESENT {
                continue;
            }
            compacted += 1;
            slots.push((input_slot, compacted + offset));
        }
        slots
    }

    #[test]
    fn every_allocation_code_is_internally_consistent() {
        for code in 0x00..=0x31u8 {
            let layout = decode(0x0f, code);
            let dropped = layout.offsets[..layout.input_channels as usize]
                .iter()
                .filter(|&&o| o == NOT_PRESENT)
                .count() as u16;

            assert_eq!(
                dropped + layout.output_channels,
                layout.input_channels,
                "code {:#04x}: dropped {} + out {} != in {}",
                code,
                dropped,
                layout.output_channels,
                layout.input_channels
            );

            let slots = output_slots(&layout);
            let mut seen: Vec<i16> = slots.iter().map(|&(_, out)| out).collect();
            seen.sort_unstable();
            for (idx, out) in seen.iter().enumerate() {
                assert_eq!(
                    *out, idx as i16,
                    "code {:#04x}: output slots not a dense unique range: {:?}",
                    code, slots
                );
            }

            let speakers = layout.speaker_mask.count_ones() as u16;
            assert_eq!(
                speakers, layout.output_channels,
                "code {:#04x}: mask width {} != output count {}",
                code, speakers, layout.output_channels
            );
        }
    }

    #[test]
    fn surround_7_1_swaps_fc_and_lfe_and_sides() {
        let layout = decode(0x0f, 0x13);
        assert_eq!(layout.input_channels, 8);
        assert_eq!(layout.output_channels, 8);
        assert_eq!(layout.speaker_mask, speaker::SEVEN_POINT_ONE_SURROUND);
        assert_eq!(layout.offsets, [0, 0, 1, -1, 2, 2, -2, -2]);
        assert_eq!(layout.lfe_index, 2);
        assert_eq!(layout.layout, "FL FR FC LFE BL BR SL SR");
    }

    #[test]
    fn two_point_one_drops_the_fc_slot() {
        let layout = decode(0x03, 0x01);
        assert_eq!(layout.input_channels, 4);
        assert_eq!(layout.output_channels, 3);
        assert_eq!(layout.speaker_mask, speaker::TWO_POINT_ONE);
        assert_eq!(layout.offsets, [0, 0, 0, X, X, X, X, X]);
        assert_eq!(layout.lfe_index, 2);
    }

    #[test]
    fn zero_valid_mask_is_silent() {
        let layout = decode(0x00, 0x13);
        assert_eq!(layout.input_channels, 0);
        assert_eq!(layout.output_channels, 0);
        assert_eq!(layout.offsets, [X; 8]);
        assert_eq!(layout.lfe_index, NOT_PRESENT);
    }

    #[test]
    fn code_zero_keeps_the_baseline_channels() {
        let layout = decode(0x0f, 0x00);
        assert_eq!(layout.layout, "FL FR");
        assert_eq!(layout.input_channels, 8);
        assert_eq!(layout.output_channels, 8);
    }

    #[test]
    fn wide_speakers_are_discarded() {
        let layout = decode(0x0f, 0x26);
        assert_eq!(layout.output_channels, 4);
        assert_eq!(layout.offsets[6], X);
        assert_eq!(layout.offsets[7], X);
        assert_eq!(
            layout.speaker_mask,
            speaker::STEREO | speaker::BACK_LEFT | speaker::BACK_RIGHT
        );
    }

    #[test]
    fn lfe_playback_level_maps_to_gain() {
        assert_eq!(lfe_level_adjustment(0x0), 1.0);
        assert_eq!(lfe_level_adjustment(0x1), 1.0);
        assert!((lfe_level_adjustment(0x2) - 0.31622776601).abs() < 1e-9);
    }
}
