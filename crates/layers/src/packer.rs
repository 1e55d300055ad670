//! Clip committed features to the view and serialize them into the marker
//! vertex buffer.
//!
//! Layout: 6 vertices per visible feature (two triangles covering the unit
//! quad), 4 32-bit slots per vertex:
//!
//! | slot | type | content                                              |
//! |------|------|------------------------------------------------------|
//! | 0    | f32  | `x - origin.x`                                       |
//! | 1    | f32  | `y - origin.y`                                       |
//! | 2    | u32  | atlas word for the feature type                      |
//! | 3    | u32  | `corner_x | corner_y<<8 | heading<<16 | fourth<<24`  |

use std::f64::consts::PI;

use bytemuck::{Pod, Zeroable};
use foundation::math::LocalOrigin;
use foundation::{Extent, pack_8888};
use serde::{Deserialize, Serialize};
use streaming::Feature;

use crate::atlas::Atlas;

pub const SLOTS_PER_VERTEX: usize = 4;
pub const VERTICES_PER_MARKER: usize = 6;
pub const SLOTS_PER_MARKER: usize = SLOTS_PER_VERTEX * VERTICES_PER_MARKER;

/// Unit-quad corner of each of the 6 vertices.
pub const QUAD_CORNERS: [(i64, i64); VERTICES_PER_MARKER] =
    [(0, 0), (1, 0), (0, 1), (1, 0), (1, 1), (0, 1)];

const RAD_TO_BYTE: f64 = 128.0 / PI;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MarkerVertex {
    pub position: [f32; 2],
    pub atlas: u32,
    pub offset_heading: u32,
}

/// What goes into the high byte of the per-vertex word.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FourthByte {
    #[default]
    None,
    /// The feature's `ACTIVE` flag (0 when absent).
    Active,
}

impl FourthByte {
    fn value(self, feature: &Feature) -> i64 {
        match self {
            FourthByte::None => 0,
            FourthByte::Active => i64::from(feature.active.unwrap_or(0)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackOptions {
    /// Scale applied to the visible extent before clipping.
    #[serde(default = "default_margin")]
    pub margin: f64,
    #[serde(default)]
    pub fourth_byte: FourthByte,
    /// Copy down to a right-sized buffer when fewer than this fraction of the
    /// worst-case vertices survive clipping.
    #[serde(default = "default_shrink_ratio")]
    pub shrink_ratio: f64,
}

fn default_margin() -> f64 {
    1.15
}

fn default_shrink_ratio() -> f64 {
    0.5
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            margin: default_margin(),
            fourth_byte: FourthByte::None,
            shrink_ratio: default_shrink_ratio(),
        }
    }
}

/// Where the consumer is looking.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewState {
    /// Packed positions are offsets from this point.
    pub origin: LocalOrigin,
    pub visible_extent: Extent,
}

impl ViewState {
    pub fn new(origin_x: f64, origin_y: f64, visible_extent: Extent) -> Self {
        Self {
            origin: LocalOrigin::new(origin_x, origin_y),
            visible_extent,
        }
    }

    /// Viewpoint at the centre of the visible extent.
    pub fn centered(visible_extent: Extent) -> Self {
        let (x, y) = visible_extent.center();
        Self::new(x, y, visible_extent)
    }
}

/// Quantize radians to the byte the renderer expects.
///
/// Truncates toward zero and does not wrap; the packing step masks the result
/// to 8 bits, so `-π/2` lands on 192 and `2π` on 0.
pub fn heading_byte(heading: f64) -> i64 {
    (heading * RAD_TO_BYTE) as i64
}

/// Immutable output of one pack. Replaced wholesale on every pack.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBuffer {
    data: Box<[MarkerVertex]>,
    vertex_count: usize,
    local_origin: LocalOrigin,
}

impl PackedBuffer {
    /// Written vertices.
    pub fn vertices(&self) -> &[MarkerVertex] {
        &self.data[..self.vertex_count]
    }

    /// The whole allocation as raw bytes, including any unused tail.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Written length in 32-bit slots; always a multiple of 24.
    pub fn buffer_length(&self) -> usize {
        self.vertex_count * SLOTS_PER_VERTEX
    }

    /// Allocated length in 32-bit slots.
    pub fn capacity(&self) -> usize {
        self.data.len() * SLOTS_PER_VERTEX
    }

    pub fn feature_count(&self) -> usize {
        self.vertex_count / VERTICES_PER_MARKER
    }

    pub fn local_origin(&self) -> LocalOrigin {
        self.local_origin
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// Clip and serialize `features` for `view`.
pub fn pack<'a, I>(features: I, view: &ViewState, atlas: &Atlas, options: &PackOptions) -> PackedBuffer
where
    I: IntoIterator<Item = &'a Feature>,
    I::IntoIter: ExactSizeIterator,
{
    let features = features.into_iter();
    let clip = view.visible_extent.expand(options.margin);

    let worst_case = features.len() * VERTICES_PER_MARKER;
    let mut data = vec![MarkerVertex::zeroed(); worst_case];
    let mut written = 0;

    for feature in features {
        let (x, y) = (feature.geometry.x, feature.geometry.y);
        if !clip.contains(x, y) {
            continue;
        }

        let position = view.origin.to_f32(x, y);
        let atlas_word = atlas.word(feature.feature_type);
        let heading = heading_byte(feature.heading);
        let fourth = options.fourth_byte.value(feature);

        let quad = &mut data[written..written + VERTICES_PER_MARKER];
        for (vertex, (cx, cy)) in quad.iter_mut().zip(QUAD_CORNERS) {
            *vertex = MarkerVertex {
                position,
                atlas: atlas_word,
                offset_heading: pack_8888(cx, cy, heading, fourth),
            };
        }
        written += VERTICES_PER_MARKER;
    }

    if (written as f64) < options.shrink_ratio * worst_case as f64 {
        data.truncate(written);
    }

    PackedBuffer {
        data: data.into_boxed_slice(),
        vertex_count: written,
        local_origin: view.origin,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FourthByte, MarkerVertex, PackOptions, SLOTS_PER_MARKER, ViewState, heading_byte, pack,
    };
    use crate::atlas::{Atlas, AtlasRect};
    use foundation::{Extent, unpack_8888};
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;
    use streaming::Feature;

    fn atlas() -> Atlas {
        let mut atlas = Atlas::default();
        atlas
            .insert(
                1,
                AtlasRect {
                    xmin: 10,
                    ymin: 20,
                    xmax: 40,
                    ymax: 80,
                },
            )
            .unwrap();
        atlas
    }

    fn view() -> ViewState {
        ViewState::new(50.0, 50.0, Extent::new(0.0, 0.0, 100.0, 100.0))
    }

    #[test]
    fn clips_to_the_expanded_extent() {
        let features = vec![
            Feature::new(1, 50.0, 50.0),
            // Outside the view but within the 7.5% margin.
            Feature::new(2, 105.0, 50.0),
            Feature::new(3, 50.0, -7.0),
            // Outside the margin.
            Feature::new(4, 110.0, 50.0),
            Feature::new(5, 50.0, -8.0),
        ];
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());

        assert_eq!(packed.feature_count(), 3);
        assert_eq!(packed.buffer_length(), 3 * SLOTS_PER_MARKER);
        assert_eq!(packed.buffer_length() % 24, 0);

        let xs: Vec<f32> = packed
            .vertices()
            .chunks(6)
            .map(|quad| quad[0].position[0])
            .collect();
        assert_eq!(xs, vec![0.0, 55.0, 0.0]);
    }

    #[test]
    fn encodes_six_corner_vertices_per_feature() {
        let features = vec![
            Feature::new(9, 60.0, 30.0)
                .with_type(1)
                .with_heading(PI / 2.0)
                .with_active(true),
        ];
        let options = PackOptions {
            fourth_byte: FourthByte::Active,
            ..PackOptions::default()
        };
        let packed = pack(&features, &view(), &atlas(), &options);

        let words: Vec<[u8; 4]> = packed
            .vertices()
            .iter()
            .map(|v| unpack_8888(v.offset_heading))
            .collect();
        assert_eq!(
            words,
            vec![
                [0, 0, 64, 1],
                [1, 0, 64, 1],
                [0, 1, 64, 1],
                [1, 0, 64, 1],
                [1, 1, 64, 1],
                [0, 1, 64, 1],
            ]
        );
        for v in packed.vertices() {
            assert_eq!(v.position, [10.0, -20.0]);
            assert_eq!(unpack_8888(v.atlas), [10, 20, 30, 60]);
        }
        assert_eq!(packed.local_origin().x(), 50.0);
    }

    #[test]
    fn fourth_byte_defaults_to_zero() {
        let features = vec![Feature::new(1, 50.0, 50.0).with_active(true)];
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        assert_eq!(unpack_8888(packed.vertices()[0].offset_heading)[3], 0);
    }

    #[test]
    fn unknown_type_gets_an_empty_atlas_word() {
        let features = vec![Feature::new(1, 50.0, 50.0).with_type(42)];
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        assert_eq!(packed.vertices()[0].atlas, 0);
    }

    #[test]
    fn heading_quantization_truncates_and_masks() {
        assert_eq!(heading_byte(PI), 128);
        assert_eq!(heading_byte(0.999 * PI / 128.0), 0);
        assert_eq!(heading_byte(-PI / 2.0), -64);

        let features = vec![
            Feature::new(1, 50.0, 50.0).with_heading(-PI / 2.0),
            Feature::new(2, 50.0, 50.0).with_heading(2.0 * PI),
        ];
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        let bytes: Vec<u8> = packed
            .vertices()
            .chunks(6)
            .map(|quad| unpack_8888(quad[0].offset_heading)[2])
            .collect();
        assert_eq!(bytes, vec![192, 0]);
        // The corner bytes are untouched by an out-of-range heading.
        assert_eq!(unpack_8888(packed.vertices()[4].offset_heading), [1, 1, 192, 0]);
    }

    #[test]
    fn shrinks_when_most_features_are_clipped() {
        let mut features: Vec<Feature> = (0..10).map(|i| Feature::new(i, 500.0, 0.0)).collect();
        for f in features.iter_mut().take(4) {
            f.geometry.x = 10.0;
        }
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        assert_eq!(packed.feature_count(), 4);
        assert_eq!(packed.capacity(), packed.buffer_length());
    }

    #[test]
    fn keeps_the_worst_case_allocation_when_few_are_clipped() {
        let mut features: Vec<Feature> = (0..10).map(|i| Feature::new(i, 10.0, 10.0)).collect();
        for f in features.iter_mut().take(4) {
            f.geometry.x = 500.0;
        }
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        assert_eq!(packed.feature_count(), 6);
        assert_eq!(packed.capacity(), 10 * SLOTS_PER_MARKER);
        assert_eq!(
            packed.as_bytes().len(),
            10 * 6 * std::mem::size_of::<MarkerVertex>()
        );
    }

    #[test]
    fn byte_view_is_little_endian_slots() {
        let features = vec![Feature::new(1, 51.5, 48.0).with_type(1)];
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        let bytes = packed.as_bytes();
        assert_eq!(bytes.len(), 6 * 16);
        assert_eq!(&bytes[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.0f32).to_le_bytes());
        assert_eq!(&bytes[8..12], &[10, 20, 30, 60]);
    }

    #[test]
    fn empty_store_packs_to_an_empty_buffer() {
        let features: Vec<Feature> = Vec::new();
        let packed = pack(&features, &view(), &atlas(), &PackOptions::default());
        assert!(packed.is_empty());
        assert_eq!(packed.capacity(), 0);
    }
}
