//! Monochrome display buffer.
use std::fmt::{self, Write};

use crate::constants::*;

/// Row-major pixel grid, `true` is a lit pixel.
pub type DisplayBuffer = [bool; DISPLAY_BUFFER_SIZE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    pixels: Box<DisplayBuffer>,
    /// Set when the pixels changed since the last time they were published.
    dirty: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self {
            pixels: Box::new([false; DISPLAY_BUFFER_SIZE]),
            dirty: false,
        }
    }
}

impl Display {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn buffer(&self) -> &DisplayBuffer {
        &self.pixels
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        x < DISPLAY_WIDTH && y < DISPLAY_HEIGHT && self.pixels[x + y * DISPLAY_WIDTH]
    }

    pub fn clear(&mut self) {
        self.pixels.fill(false);
        self.dirty = true;
    }

    /// Draw a sprite with its top-left corner at the given coordinate.
    ///
    /// The start coordinate wraps around the screen, but the sprite itself
    /// is clipped at the right and bottom edges. Each sprite byte is one row,
    /// most significant bit on the left. Pixels are XOR-ed onto the screen.
    ///
    /// Returns `true` when a lit pixel was erased.
    pub fn draw_sprite(&mut self, x: u8, y: u8, sprite: &[u8]) -> bool {
        let x0 = x as usize % DISPLAY_WIDTH;
        let y0 = y as usize % DISPLAY_HEIGHT;
        let mut collision = false;

        for (r, row) in sprite.iter().enumerate() {
            let py = y0 + r;
            if py >= DISPLAY_HEIGHT {
                break;
            }

            for c in 0..SPRITE_WIDTH {
                let px = x0 + c;
                if px >= DISPLAY_WIDTH {
                    break;
                }

                if (row >> (7 - c)) & 1 == 0 {
                    continue;
                }

                let d = px + py * DISPLAY_WIDTH;
                collision |= self.pixels[d];
                self.pixels[d] ^= true;
            }
        }

        self.dirty = true;
        collision
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, returning its previous value.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Overwrite every pixel without touching the dirty flag.
    ///
    /// Caller has to ensure the slice is exactly [`DISPLAY_BUFFER_SIZE`] long.
    pub(crate) fn copy_from(&mut self, pixels: &[bool]) {
        self.pixels.copy_from_slice(pixels);
    }

    /// Render the display as text, `#` for lit pixels.
    pub fn dump(&self) -> Result<String, fmt::Error> {
        let mut buf = String::with_capacity((DISPLAY_WIDTH + 1) * DISPLAY_HEIGHT);

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.pixels[x + y * DISPLAY_WIDTH] {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }
}
