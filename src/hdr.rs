//! HDR static metadata: InfoFrame payload decoding and side-data scaling.

use crate::sdk::HdrInfoFramePayload;

/// Chromaticity fields are carried in 0.00002 units.
pub const CHROMATICITY_SCALE: f64 = 0.00002;
/// Max display mastering luminance is carried in 1 cd/m2 units.
pub const HIGH_LUMINANCE_SCALE: f64 = 1.0;
/// Min display mastering luminance is carried in 0.0001 cd/m2 units.
pub const LOW_LUMINANCE_SCALE: f64 = 0.0001;

/// Decoded HDR mastering metadata. All values are kept in the raw integer
/// units of the InfoFrame; scaling to floats happens only when the side
/// data block is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrMeta {
    pub exists: bool,
    pub r_primary_x: i32,
    pub r_primary_y: i32,
    pub g_primary_x: i32,
    pub g_primary_y: i32,
    pub b_primary_x: i32,
    pub b_primary_y: i32,
    pub whitepoint_x: i32,
    pub whitepoint_y: i32,
    pub min_dml: i32,
    pub max_dml: i32,
    pub max_cll: i32,
    pub max_fall: i32,
    /// 4 = REC.709, 15 = SMPTE ST 2084 (PQ).
    pub transfer_function: u8,
}

impl HdrMeta {
    fn structurally_present(&self) -> bool {
        self.r_primary_x != 0
            || self.r_primary_y != 0
            || self.g_primary_x != 0
            || self.g_primary_y != 0
            || self.b_primary_x != 0
            || self.b_primary_y != 0
            || self.whitepoint_x != 0
            || self.whitepoint_y != 0
            || self.min_dml != 0
            || self.max_dml != 0
            || self.max_cll != 0
            || self.max_fall != 0
    }

    /// Builds the per-sample side data blocks, scaled to display units.
    pub fn to_side_data(&self) -> (HdrSideData, ContentLightLevel) {
        let hdr = HdrSideData {
            // downstream expects primaries indexed G, B, R
            display_primaries_x: [
                f64::from(self.g_primary_x) * CHROMATICITY_SCALE,
                f64::from(self.b_primary_x) * CHROMATICITY_SCALE,
                f64::from(self.r_primary_x) * CHROMATICITY_SCALE,
            ],
            display_primaries_y: [
                f64::from(self.g_primary_y) * CHROMATICITY_SCALE,
                f64::from(self.b_primary_y) * CHROMATICITY_SCALE,
                f64::from(self.r_primary_y) * CHROMATICITY_SCALE,
            ],
            white_point_x: f64::from(self.whitepoint_x) * CHROMATICITY_SCALE,
            white_point_y: f64::from(self.whitepoint_y) * CHROMATICITY_SCALE,
            max_display_mastering_luminance: f64::from(self.max_dml) * HIGH_LUMINANCE_SCALE,
            min_display_mastering_luminance: f64::from(self.min_dml) * LOW_LUMINANCE_SCALE,
        };
        let light = ContentLightLevel {
            max_cll: self.max_cll as u32,
            max_fall: self.max_fall as u32,
        };
        (hdr, light)
    }
}

/// Mastering display side data attached to delivered video samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HdrSideData {
    pub display_primaries_x: [f64; 3],
    pub display_primaries_y: [f64; 3],
    pub white_point_x: f64,
    pub white_point_y: f64,
    pub max_display_mastering_luminance: f64,
    pub min_display_mastering_luminance: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_cll: u32,
    pub max_fall: u32,
}

/// Reassembles the 16-bit little-endian InfoFrame fields and identifies
/// which primary slot holds red, green and blue.
///
/// The InfoFrame does not label its three primaries; by convention the slot
/// with the largest x is red and the slot with the largest y is green, with
/// blue the remainder. Degenerate payloads where those collide leave the
/// primaries zeroed.
pub fn decode_hdr_infoframe(frame: &HdrInfoFramePayload) -> HdrMeta {
    let mut meta = HdrMeta::default();

    let primaries_x = [
        i32::from(frame.display_primaries_lsb_x0) + (i32::from(frame.display_primaries_msb_x0) << 8),
        i32::from(frame.display_primaries_lsb_x1) + (i32::from(frame.display_primaries_msb_x1) << 8),
        i32::from(frame.display_primaries_lsb_x2) + (i32::from(frame.display_primaries_msb_x2) << 8),
    ];
    let primaries_y = [
        i32::from(frame.display_primaries_lsb_y0) + (i32::from(frame.display_primaries_msb_y0) << 8),
        i32::from(frame.display_primaries_lsb_y1) + (i32::from(frame.display_primaries_msb_y1) << 8),
        i32::from(frame.display_primaries_lsb_y2) + (i32::from(frame.display_primaries_msb_y2) << 8),
    ];

    let mut r_idx = 0;
    for i in 1..3 {
        if primaries_x[i] > primaries_x[r_idx] {
            r_idx = i;
        }
    }
    let mut g_idx = 0;
    for i in 1..3 {
        if primaries_y[i] > primaries_y[g_idx] {
            g_idx = i;
        }
    }

    if g_idx != r_idx {
        let b_idx = 3 - g_idx - r_idx;
        if b_idx != g_idx && b_idx != r_idx {
            meta.r_primary_x = primaries_x[r_idx];
            meta.r_primary_y = primaries_y[r_idx];
            meta.g_primary_x = primaries_x[g_idx];
            meta.g_primary_y = primaries_y[g_idx];
            meta.b_primary_x = primaries_x[b_idx];
            meta.b_primary_y = primaries_y[b_idx];
        }
    }

    meta.whitepoint_x =
        i32::from(frame.white_point_lsb_x) + (i32::from(frame.white_point_msb_x) << 8);
    meta.whitepoint_y =
        i32::from(frame.white_point_lsb_y) + (i32::from(frame.white_point_msb_y) << 8);

    meta.max_dml = i32::from(frame.max_display_mastering_lsb_luminance)
        + (i32::from(frame.max_display_mastering_msb_luminance) << 8);
    meta.min_dml = i32::from(frame.min_display_mastering_lsb_luminance)
        + (i32::from(frame.min_display_mastering_msb_luminance) << 8);

    meta.max_cll = i32::from(frame.maximum_content_light_level_lsb)
        + (i32::from(frame.maximum_content_light_level_msb) << 8);
    meta.max_fall = i32::from(frame.maximum_frame_average_light_level_lsb)
        + (i32::from(frame.maximum_frame_average_light_level_msb) << 8);

    meta.transfer_function = if frame.eotf == 0x2 { 15 } else { 4 };
    meta.exists = meta.structurally_present();
    meta
}
