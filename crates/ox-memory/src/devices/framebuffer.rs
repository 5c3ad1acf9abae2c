//! Tiled framebuffer device
//!
//! The backing store holds `width x height` 32-bit ARGB pixels in the GPU's
//! tiled layout: 32x32 macro-tiles, with the pixel inside a tile addressed by
//! a 10-bit Morton (Z-order) index whose even bits come from Y and odd bits
//! from X. Bus word writes land directly in the tiled store (`tiled[offset/4]`);
//! `resolve` produces the linear view a display consumer wants.

use crate::device::Device;
use parking_lot::RwLock;

const TILE_SIZE: u32 = 32;
const PIXELS_PER_TILE: u32 = TILE_SIZE * TILE_SIZE;

pub struct FrameBuffer {
    width: u32,
    height: u32,
    tiled: RwLock<Vec<u32>>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tiled: RwLock::new(vec![0; (width * height) as usize]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 10-bit Morton interleave: even bits = Y, odd bits = X.
    fn morton(x: u32, y: u32) -> u32 {
        let mut m = 0;
        for i in 0..5 {
            m |= ((y >> i) & 1) << (2 * i);
            m |= ((x >> i) & 1) << (2 * i + 1);
        }
        m
    }

    fn tiles_per_row(&self) -> u32 {
        (self.width + TILE_SIZE - 1) / TILE_SIZE
    }

    /// Index of pixel (x, y) in the tiled store
    pub fn tiled_index(&self, x: u32, y: u32) -> u32 {
        let macro_index =
            ((y / TILE_SIZE) * self.tiles_per_row() + x / TILE_SIZE) * PIXELS_PER_TILE;
        macro_index + Self::morton(x % TILE_SIZE, y % TILE_SIZE)
    }

    pub fn set_pixel(&self, x: u32, y: u32, argb: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = self.tiled_index(x, y) as usize;
        let mut tiled = self.tiled.write();
        if index < tiled.len() {
            tiled[index] = argb;
        }
    }

    pub fn clear(&self, argb: u32) {
        self.tiled.write().fill(argb);
    }

    /// Untile into a linear `width x height` snapshot. Pixels whose tiled
    /// source index falls outside the store come out black.
    pub fn resolve(&self) -> Vec<u32> {
        let tiled = self.tiled.read();
        let mut linear = vec![0u32; (self.width * self.height) as usize];
        for y in 0..self.height {
            for x in 0..self.width {
                let src = self.tiled_index(x, y) as usize;
                if src < tiled.len() {
                    linear[(y * self.width + x) as usize] = tiled[src];
                }
            }
        }
        linear
    }
}

impl Device for FrameBuffer {
    fn contains(&self, offset: u64) -> bool {
        offset < (self.width as u64) * (self.height as u64) * 4
    }

    fn read8(&self, offset: u64) -> u8 {
        let word = self.read_word(offset & !3);
        (word >> (24 - 8 * (offset & 3))) as u8
    }

    fn write8(&self, offset: u64, value: u8) {
        let shift = 24 - 8 * (offset & 3) as u32;
        let index = (offset / 4) as usize;
        let mut tiled = self.tiled.write();
        if index < tiled.len() {
            tiled[index] = (tiled[index] & !(0xFF << shift)) | ((value as u32) << shift);
        }
    }

    fn read_word(&self, offset: u64) -> u32 {
        let tiled = self.tiled.read();
        tiled.get((offset / 4) as usize).copied().unwrap_or(0)
    }

    fn write_word(&self, offset: u64, value: u32) {
        let index = (offset / 4) as usize;
        let mut tiled = self.tiled.write();
        if index < tiled.len() {
            tiled[index] = value;
        }
    }
}
