//! Colour coding for UINT ID channels.
//!
//! IDs are reduced to 15 bits and the bits are dealt out round-robin to red, green and
//! blue, giving 32 levels per component. Neighbouring IDs land on distinct colours.

use std::sync::OnceLock;

pub const PALETTE_SIZE: usize = 1 << 15;

static PALETTE: OnceLock<Vec<[f32; 3]>> = OnceLock::new();

fn build_palette() -> Vec<[f32; 3]> {
    (0..PALETTE_SIZE)
        .map(|i| {
            let mut rgb = [0u32; 3];
            for bit in 0..15 {
                if i & (1 << bit) != 0 {
                    rgb[bit % 3] |= 1 << (bit / 3);
                }
            }
            rgb.map(|c| c as f32 / 31.0)
        })
        .collect()
}

pub fn palette() -> &'static [[f32; 3]] {
    PALETTE.get_or_init(build_palette)
}

pub fn id_color(id: u32) -> [f32; 3] {
    palette()[id as usize % PALETTE_SIZE]
}
