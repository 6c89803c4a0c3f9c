// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Frame storage and the producer/consumer lock around it.
//!
//! The engine never renders anything itself; it consumes frames produced
//! elsewhere. A [`Frame`] is a plain RGBA buffer, a [`LockableFrame`] wraps
//! it in the mutex that arbitrates a producer redrawing pixels against the
//! encoder serializing them. The lock must be held for the whole of either
//! operation so a client never sees a torn frame.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Bytes per pixel of the in-memory representation (RGBA, alpha unused).
pub const FRAME_BYTES_PER_PIXEL: usize = 4;

/// An in-memory image: tightly packed RGBA bytes, row-major from the top-left.
///
/// The alpha byte is carried for alignment and ignored by the encoder.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

impl Frame {
    /// Creates a black frame of the given dimensions.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        let len = usize::from(width) * usize::from(height) * FRAME_BYTES_PER_PIXEL;
        Self {
            width,
            height,
            pixels: vec![0; len],
        }
    }

    /// The frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// The frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The raw RGBA pixel data.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable access to the raw RGBA pixel data, for producers redrawing
    /// the frame. Callers must hold the surrounding [`LockableFrame`] lock.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Writes one RGB pixel. Out-of-bounds coordinates are ignored.
    pub fn put_rgb(&mut self, x: u16, y: u16, r: u8, g: u8, b: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset =
            (usize::from(y) * usize::from(self.width) + usize::from(x)) * FRAME_BYTES_PER_PIXEL;
        self.pixels[offset] = r;
        self.pixels[offset + 1] = g;
        self.pixels[offset + 2] = b;
    }
}

/// A [`Frame`] together with the lock that guards its pixel contents.
///
/// Producers hold the lock while redrawing; the encoder holds it for the
/// full duration of serializing the frame onto the wire.
#[derive(Debug)]
pub struct LockableFrame {
    inner: Mutex<Frame>,
}

impl LockableFrame {
    /// Wraps a frame in its pixel lock.
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            inner: Mutex::new(frame),
        }
    }

    /// Acquires the pixel lock.
    pub async fn lock(&self) -> MutexGuard<'_, Frame> {
        self.inner.lock().await
    }
}

/// A frame shared between its producer and any number of connections.
pub type SharedFrame = Arc<LockableFrame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_is_black_and_sized() {
        let frame = Frame::new(4, 3);
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.pixels().len(), 4 * 3 * FRAME_BYTES_PER_PIXEL);
        assert!(frame.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn put_rgb_writes_in_row_major_order() {
        let mut frame = Frame::new(4, 3);
        frame.put_rgb(1, 2, 10, 20, 30);
        let offset = (2 * 4 + 1) * FRAME_BYTES_PER_PIXEL;
        assert_eq!(&frame.pixels()[offset..offset + 3], &[10, 20, 30]);
    }

    #[test]
    fn put_rgb_ignores_out_of_bounds() {
        let mut frame = Frame::new(2, 2);
        frame.put_rgb(2, 0, 255, 255, 255);
        frame.put_rgb(0, 2, 255, 255, 255);
        assert!(frame.pixels().iter().all(|&b| b == 0));
    }
}
