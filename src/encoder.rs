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

//! Raw-encoding pixel serialization.
//!
//! Turns a locked frame into the wire bytes the negotiated [`PixelFormat`]
//! requires: a 12-byte rectangle header followed by exactly
//! `width * height * bytes_per_pixel` packed pixels, row-major, top to
//! bottom, no row padding.
//!
//! Two paths produce that payload. The fast path handles the 5-5-5
//! "thousands of colours" format viewers most commonly request and packs
//! two bytes per pixel straight out of the RGBA buffer. The generic path
//! covers every other supported format by reducing each widened channel to
//! the format's bit width and shifting it into place; it only knows how to
//! reduce to 5-bit channels, and anything else is reported as an
//! unsupported configuration rather than silently mis-encoded.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RfbError};
use crate::frame::{Frame, FRAME_BYTES_PER_PIXEL};
use crate::protocol::{PixelFormat, Rectangle, ENCODING_RAW};

/// Serializes `frame` as one full-coverage raw rectangle into `out`.
///
/// `out` is appended to, not cleared; the caller owns the scratch buffer and
/// reuses it across frames to avoid per-frame allocation.
///
/// # Errors
///
/// [`RfbError::Encoding`] when the negotiated format is beyond what the raw
/// encoder supports (color-mapped pixels, non-5-bit channel maxima, a bit
/// width other than 8/16/32), or when the frame buffer does not match its
/// declared dimensions.
pub(crate) fn encode_rect(frame: &Frame, format: &PixelFormat, out: &mut BytesMut) -> Result<()> {
    let width = frame.width();
    let height = frame.height();
    let expected = usize::from(width) * usize::from(height) * FRAME_BYTES_PER_PIXEL;
    if frame.pixels().len() != expected {
        return Err(RfbError::Encoding(format!(
            "frame buffer is {} bytes, {width}x{height} needs {expected}",
            frame.pixels().len()
        )));
    }
    if format.true_colour_flag == 0 {
        return Err(RfbError::Encoding(
            "only true-colour clients are supported".into(),
        ));
    }

    Rectangle {
        x: 0,
        y: 0,
        width,
        height,
        encoding: ENCODING_RAW,
    }
    .write_header(out);

    if format.is_thousands() {
        encode_thousands(frame.pixels(), format.big_endian_flag != 0, out);
        Ok(())
    } else {
        encode_generic(frame.pixels(), format, out)
    }
}

/// Fast path: pack RGBA straight into 5-5-5 pixels at shifts 10/5/0.
///
/// Keeping the top five bits of each 8-bit channel is exactly the reduction
/// the generic path performs for a 5-bit maximum, so both paths produce
/// identical bytes for this format.
fn encode_thousands(pixels: &[u8], big_endian: bool, out: &mut BytesMut) {
    out.reserve(pixels.len() / FRAME_BYTES_PER_PIXEL * 2);
    for px in pixels.chunks_exact(FRAME_BYTES_PER_PIXEL) {
        let packed = (u16::from(px[0] & 0xf8) << 7) // red lands at shift 10
            | (u16::from(px[1] & 0xf8) << 2) // green at shift 5
            | u16::from(px[2] >> 3); // blue at shift 0
        if big_endian {
            out.put_u16(packed);
        } else {
            out.put_u16_le(packed);
        }
    }
}

/// Generic path: per-channel reduce, shift, pack, honoring the format's
/// declared endianness.
fn encode_generic(pixels: &[u8], format: &PixelFormat, out: &mut BytesMut) -> Result<()> {
    for max in [format.red_max, format.green_max, format.blue_max] {
        if max != 0x1f {
            return Err(RfbError::Encoding(format!(
                "unsupported channel max {max}, only 5-bit channels are implemented"
            )));
        }
    }
    let bytes_per_pixel = match format.bits_per_pixel {
        8 => 1,
        16 => 2,
        32 => 4,
        other => {
            return Err(RfbError::Encoding(format!(
                "unsupported bits-per-pixel {other}"
            )))
        }
    };
    let big_endian = format.big_endian_flag != 0;

    out.reserve(pixels.len() / FRAME_BYTES_PER_PIXEL * bytes_per_pixel);
    for px in pixels.chunks_exact(FRAME_BYTES_PER_PIXEL) {
        let r = reduce_5bit(widen(px[0]));
        let g = reduce_5bit(widen(px[1]));
        let b = reduce_5bit(widen(px[2]));
        let packed = (r << format.red_shift) | (g << format.green_shift) | (b << format.blue_shift);

        #[allow(clippy::cast_possible_truncation)]
        // 5-bit channels shifted into an 8- or 16-bit format fit by construction
        match bytes_per_pixel {
            1 => out.put_u8(packed as u8),
            2 => {
                if big_endian {
                    out.put_u16(packed as u16);
                } else {
                    out.put_u16_le(packed as u16);
                }
            }
            _ => {
                if big_endian {
                    out.put_u32(packed);
                } else {
                    out.put_u32_le(packed);
                }
            }
        }
    }
    Ok(())
}

/// Widens an 8-bit channel to the 16-bit range (`0xab` -> `0xabab`).
fn widen(channel: u8) -> u16 {
    u16::from(channel) * 0x101
}

/// Reduces a 16-bit channel value to 5 bits.
fn reduce_5bit(value: u16) -> u32 {
    u32::from(value >> 11)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECT_HEADER_LEN: usize = 12;

    fn test_frame(width: u16, height: u16) -> Frame {
        let mut frame = Frame::new(width, height);
        for y in 0..height {
            for x in 0..width {
                #[allow(clippy::cast_possible_truncation)]
                frame.put_rgb(x, y, (x * 37) as u8, (y * 91) as u8, (x + y) as u8);
            }
        }
        frame
    }

    fn payload(buf: &BytesMut) -> &[u8] {
        &buf[RECT_HEADER_LEN..]
    }

    #[test]
    fn rect_header_covers_full_frame_with_raw_encoding() {
        let frame = test_frame(5, 3);
        let mut buf = BytesMut::new();
        encode_rect(&frame, &PixelFormat::thousands(), &mut buf).unwrap();
        assert_eq!(&buf[..RECT_HEADER_LEN], &[0, 0, 0, 0, 0, 5, 0, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn thousands_payload_is_two_bytes_per_pixel() {
        let frame = test_frame(7, 4);
        let mut buf = BytesMut::new();
        encode_rect(&frame, &PixelFormat::thousands(), &mut buf).unwrap();
        assert_eq!(payload(&buf).len(), 7 * 4 * 2);
    }

    #[test]
    fn fast_and_generic_paths_agree() {
        let frame = test_frame(9, 5);
        for big_endian_flag in [0, 1] {
            let mut format = PixelFormat::thousands();
            format.big_endian_flag = big_endian_flag;

            let mut fast = BytesMut::new();
            encode_thousands(frame.pixels(), big_endian_flag != 0, &mut fast);

            let mut generic = BytesMut::new();
            encode_generic(frame.pixels(), &format, &mut generic).unwrap();

            assert_eq!(fast, generic, "big_endian_flag={big_endian_flag}");
        }
    }

    #[test]
    fn encode_rect_takes_the_fast_path_output() {
        let frame = test_frame(6, 6);
        let format = PixelFormat::thousands();

        let mut via_rect = BytesMut::new();
        encode_rect(&frame, &format, &mut via_rect).unwrap();

        let mut direct = BytesMut::new();
        encode_thousands(frame.pixels(), false, &mut direct);

        assert_eq!(payload(&via_rect), &direct[..]);
    }

    #[test]
    fn solid_color_round_trips_with_3bit_truncation() {
        let mut frame = Frame::new(4, 2);
        for y in 0..2 {
            for x in 0..4 {
                frame.put_rgb(x, y, 200, 100, 50);
            }
        }
        let mut buf = BytesMut::new();
        encode_rect(&frame, &PixelFormat::thousands(), &mut buf).unwrap();

        for px in payload(&buf).chunks_exact(2) {
            let value = u16::from_le_bytes([px[0], px[1]]);
            let r = ((value >> 10) & 0x1f) as u8;
            let g = ((value >> 5) & 0x1f) as u8;
            let b = (value & 0x1f) as u8;
            // The low three bits of each channel are lost, deterministically.
            assert_eq!(r << 3, 200 & 0xf8);
            assert_eq!(g << 3, 100 & 0xf8);
            assert_eq!(b << 3, 50 & 0xf8);
        }
    }

    #[test]
    fn endianness_flips_payload_byte_order() {
        let frame = test_frame(3, 3);
        let mut le = BytesMut::new();
        encode_rect(&frame, &PixelFormat::thousands(), &mut le).unwrap();

        let mut be_format = PixelFormat::thousands();
        be_format.big_endian_flag = 1;
        let mut be = BytesMut::new();
        encode_rect(&frame, &be_format, &mut be).unwrap();

        for (l, b) in payload(&le).chunks_exact(2).zip(payload(&be).chunks_exact(2)) {
            assert_eq!(l[0], b[1]);
            assert_eq!(l[1], b[0]);
        }
    }

    #[test]
    fn generic_path_packs_32bpp() {
        let mut frame = Frame::new(1, 1);
        frame.put_rgb(0, 0, 0xff, 0, 0x08);

        let mut format = PixelFormat::thousands();
        format.bits_per_pixel = 32;
        format.depth = 24;
        format.big_endian_flag = 1;

        let mut buf = BytesMut::new();
        encode_rect(&frame, &format, &mut buf).unwrap();
        let value = u32::from_be_bytes(payload(&buf).try_into().unwrap());
        // red 0x1f at shift 10, blue reduced to 1 at shift 0
        assert_eq!(value, (0x1f << 10) | 1);
    }

    #[test]
    fn unsupported_channel_max_is_an_explicit_error() {
        let frame = test_frame(2, 2);
        let mut format = PixelFormat::thousands();
        format.green_max = 63; // RGB565: not implemented

        let mut buf = BytesMut::new();
        let err = encode_rect(&frame, &format, &mut buf).unwrap_err();
        assert!(matches!(err, RfbError::Encoding(_)));
    }

    #[test]
    fn default_server_format_is_rejected_not_miscomputed() {
        // 24bpp with 8-bit maxima: both the channel reduction and the pixel
        // width are outside the raw encoder.
        let frame = test_frame(2, 2);
        let mut buf = BytesMut::new();
        let err = encode_rect(&frame, &PixelFormat::rgb888(), &mut buf).unwrap_err();
        assert!(matches!(err, RfbError::Encoding(_)));
    }

    #[test]
    fn colormapped_format_is_rejected() {
        let frame = test_frame(2, 2);
        let mut format = PixelFormat::thousands();
        format.true_colour_flag = 0;

        let mut buf = BytesMut::new();
        let err = encode_rect(&frame, &format, &mut buf).unwrap_err();
        assert!(matches!(err, RfbError::Encoding(_)));
    }

    #[test]
    fn scratch_buffer_is_appended_not_clobbered() {
        let frame = test_frame(2, 1);
        let mut buf = BytesMut::new();
        buf.put_u8(0xaa);
        encode_rect(&frame, &PixelFormat::thousands(), &mut buf).unwrap();
        assert_eq!(buf[0], 0xaa);
        assert_eq!(buf.len(), 1 + RECT_HEADER_LEN + 2 * 2);
    }
}
