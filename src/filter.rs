//! Reading-mode filters applied to rasterized output.
//!
//! Filters are pure per-pixel transforms; the mode is part of the render
//! key, so each mode caches its own artifact. Sepia runs on a fixed-point
//! SIMD kernel with a scalar remainder loop; large artifacts fan out over
//! rows with rayon.

use rayon::prelude::*;
use wide::u16x8;

use crate::artifact::{PixelFormat, RasterArtifact};
use crate::key::ReadMode;

// Sepia matrix coefficients scaled by 128. The 128 scale (not 256) keeps
// the worst-case accumulator 255 * 172 within u16.
const SEP_RR: u16 = 50; // 0.393
const SEP_RG: u16 = 98; // 0.769
const SEP_RB: u16 = 24; // 0.189
const SEP_GR: u16 = 45; // 0.349
const SEP_GG: u16 = 88; // 0.686
const SEP_GB: u16 = 22; // 0.168
const SEP_BR: u16 = 35; // 0.272
const SEP_BG: u16 = 68; // 0.534
const SEP_BB: u16 = 17; // 0.131

const PARALLEL_PIXEL_THRESHOLD: u64 = 200_000;

/// Apply `mode` to the pixel buffer. Runs on the worker, between
/// rasterization and cache insertion.
pub fn apply_in_place(mode: ReadMode, artifact: &mut RasterArtifact) {
    match mode {
        ReadMode::Default => {}
        ReadMode::Dark => for_each_row(artifact, invert_row),
        ReadMode::Sepia => for_each_row(artifact, sepia_row),
    }
}

fn for_each_row(artifact: &mut RasterArtifact, f: fn(&mut [u8], PixelFormat)) {
    let format = artifact.format;
    let stride = artifact.stride.max(1);
    let row_bytes = artifact.row_bytes();

    let parallel =
        artifact.pixel_count() >= PARALLEL_PIXEL_THRESHOLD && artifact.height >= 4;

    if parallel {
        artifact.pixels.par_chunks_mut(stride).for_each(|row| {
            let end = row_bytes.min(row.len());
            f(&mut row[..end], format);
        });
    } else {
        for row in artifact.pixels.chunks_mut(stride) {
            let end = row_bytes.min(row.len());
            f(&mut row[..end], format);
        }
    }
}

fn invert_row(row: &mut [u8], format: PixelFormat) {
    match format {
        PixelFormat::Rgb8 => {
            for b in row.iter_mut() {
                *b = !*b;
            }
        }
        PixelFormat::Rgba8 => {
            // Alpha passes through untouched.
            for px in row.chunks_exact_mut(4) {
                px[0] = !px[0];
                px[1] = !px[1];
                px[2] = !px[2];
            }
        }
    }
}

fn sepia_row(row: &mut [u8], format: PixelFormat) {
    let bpp = format.bytes_per_pixel();
    let chunk_bytes = bpp * 8;
    let simd_end = (row.len() / chunk_bytes) * chunk_bytes;
    let (simd_part, remainder) = row.split_at_mut(simd_end);

    for chunk in simd_part.chunks_exact_mut(chunk_bytes) {
        sepia_8_pixels(chunk, bpp);
    }
    for px in remainder.chunks_exact_mut(bpp) {
        sepia_px(px);
    }
}

fn sepia_8_pixels(chunk: &mut [u8], bpp: usize) {
    debug_assert!(chunk.len() == bpp * 8);

    let lane = |offset: usize| {
        let mut v = [0u16; 8];
        for (i, slot) in v.iter_mut().enumerate() {
            *slot = u16::from(chunk[i * bpp + offset]);
        }
        u16x8::new(v)
    };
    let r = lane(0);
    let g = lane(1);
    let b = lane(2);

    let cap = u16x8::splat(255);
    let nr = ((r * u16x8::splat(SEP_RR) + g * u16x8::splat(SEP_RG) + b * u16x8::splat(SEP_RB))
        >> 7u32)
        .min(cap)
        .to_array();
    let ng = ((r * u16x8::splat(SEP_GR) + g * u16x8::splat(SEP_GG) + b * u16x8::splat(SEP_GB))
        >> 7u32)
        .min(cap)
        .to_array();
    let nb = ((r * u16x8::splat(SEP_BR) + g * u16x8::splat(SEP_BG) + b * u16x8::splat(SEP_BB))
        >> 7u32)
        .min(cap)
        .to_array();

    for i in 0..8 {
        chunk[i * bpp] = nr[i] as u8;
        chunk[i * bpp + 1] = ng[i] as u8;
        chunk[i * bpp + 2] = nb[i] as u8;
    }
}

#[inline]
fn sepia_px(px: &mut [u8]) {
    let r = u16::from(px[0]);
    let g = u16::from(px[1]);
    let b = u16::from(px[2]);

    px[0] = (((r * SEP_RR + g * SEP_RG + b * SEP_RB) >> 7).min(255)) as u8;
    px[1] = (((r * SEP_GR + g * SEP_GG + b * SEP_GB) >> 7).min(255)) as u8;
    px[2] = (((r * SEP_BR + g * SEP_BG + b * SEP_BB) >> 7).min(255)) as u8;
}
