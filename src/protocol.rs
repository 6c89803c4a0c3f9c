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

//! RFB (Remote Framebuffer) protocol constants and wire structures.
//!
//! This module provides the building blocks shared by the handshake
//! negotiator, the message dispatcher and the pixel encoder: protocol
//! version handling, message type constants, security codes, and the
//! fixed-layout structures (`PixelFormat`, `ServerInit`, `Rectangle`,
//! `UpdateRequest`) with their serialization.
//!
//! # Protocol Overview
//!
//! An RFB connection moves through the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection and execution
//! 3. **Initialization** - Exchange of framebuffer parameters and capabilities
//! 4. **Normal Operation** - Ongoing message exchange for input events and screen updates

use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// The protocol version line for RFB 3.3.
pub const VERSION_3_3: &str = "RFB 003.003\n";

/// The protocol version line for RFB 3.7.
pub const VERSION_3_7: &str = "RFB 003.007\n";

/// The protocol version line for RFB 3.8, the highest version this server speaks.
pub const VERSION_3_8: &str = "RFB 003.008\n";

/// A negotiated RFB protocol version.
///
/// The version is agreed once during the handshake and is immutable for the
/// rest of the connection. It decides which handshake sub-steps run: 3.3 has
/// no security-type list, and only 3.8 gets a `SecurityResult` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// RFB 3.3 - the server picks the security type unilaterally.
    V3_3,
    /// RFB 3.7 - security-type list, no `SecurityResult` for type None.
    V3_7,
    /// RFB 3.8 - security-type list plus a `SecurityResult` status message.
    V3_8,
}

impl ProtocolVersion {
    /// Parses a client-supplied 12-byte version line.
    #[must_use]
    pub fn from_line(line: &[u8]) -> Option<Self> {
        match line {
            b if b == VERSION_3_3.as_bytes() => Some(Self::V3_3),
            b if b == VERSION_3_7.as_bytes() => Some(Self::V3_7),
            b if b == VERSION_3_8.as_bytes() => Some(Self::V3_8),
            _ => None,
        }
    }

    /// The exact wire form of this version, newline included.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V3_3 => VERSION_3_3,
            Self::V3_7 => VERSION_3_7,
            Self::V3_8 => VERSION_3_8,
        }
    }

    /// Whether the security handshake uses the 3.7+ type-list round trip.
    ///
    /// 3.3 clients instead receive a single 4-byte security code chosen by
    /// the server, with no round trip.
    #[must_use]
    pub const fn negotiates_security(self) -> bool {
        !matches!(self, Self::V3_3)
    }

    /// Whether the server must follow authentication with a `SecurityResult`.
    #[must_use]
    pub const fn sends_security_result(self) -> bool {
        matches!(self, Self::V3_8)
    }
}

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: Client specifies supported encodings, most-preferred first.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: Client requests a framebuffer update.
///
/// The client can request either an incremental update (changes only) or
/// a full refresh of a specified rectangular region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: Client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: Client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: Client sends cut text (clipboard data).
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
///
/// Contains one or more rectangles of pixel data representing screen changes.
/// This is the only server-to-client message this engine emits after the
/// handshake.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

// Encoding Types

/// Encoding type: Raw pixel data.
///
/// Pixel data written verbatim, row-major, in the negotiated pixel format.
/// High bandwidth but universally supported.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: Copy Rectangle.
///
/// Instructs the client to copy a rectangular region from one location to
/// another on its own screen. Used here as a zero-change acknowledgment for
/// incremental update requests (a rectangle copied onto itself).
pub const ENCODING_COPYRECT: i32 = 1;

// Security Types

/// Security type: None (no authentication).
///
/// No authentication is required. The connection proceeds directly
/// to the initialization phase. This is the only type the server offers.
pub const SECURITY_TYPE_NONE: u8 = 1;

// Security Results

/// Security result: Authentication successful.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: Authentication failed.
///
/// Defined by the protocol; with only the None security type on offer this
/// server never emits it.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Represents the pixel format of the framebuffer on the wire.
///
/// This struct defines how pixel data is interpreted, including color depth,
/// endianness, and RGB component details. The connection owns exactly one of
/// these: the default set during the handshake, replaced wholesale whenever
/// the client sends `SetPixelFormat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel.
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// Flag indicating if the pixel data is big-endian (1) or little-endian (0).
    pub big_endian_flag: u8,
    /// Flag indicating if the pixel format is true-colour (1) or colormapped (0).
    pub true_colour_flag: u8,
    /// Maximum red color value, `2^bits - 1`.
    pub red_max: u16,
    /// Maximum green color value, `2^bits - 1`.
    pub green_max: u16,
    /// Maximum blue color value, `2^bits - 1`.
    pub blue_max: u16,
    /// Bit position of the red component within the packed pixel.
    pub red_shift: u8,
    /// Bit position of the green component within the packed pixel.
    pub green_shift: u8,
    /// Bit position of the blue component within the packed pixel.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The format advertised in `ServerInit`: packed 24-bit big-endian RGB.
    #[must_use]
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 24,
            depth: 24,
            big_endian_flag: 1,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Creates the 16-bit 5-5-5 "thousands of colours" format.
    ///
    /// This is the format macOS "Screens"-style viewers request for their
    /// thousands-of-colours mode and the one the encoder has a fast path for.
    #[must_use]
    pub fn thousands() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 31,   // 5 bits
            green_max: 31, // 5 bits
            blue_max: 31,  // 5 bits
            red_shift: 10,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// Checks whether this format triggers the encoder's 5-5-5 fast path.
    ///
    /// Endianness is deliberately not part of the check; both byte orders
    /// share the fast path.
    #[must_use]
    pub fn is_thousands(&self) -> bool {
        self.bits_per_pixel == 16
            && self.depth == 16
            && self.true_colour_flag != 0
            && self.red_max == 0x1f
            && self.green_max == 0x1f
            && self.blue_max == 0x1f
            && self.red_shift == 10
            && self.green_shift == 5
            && self.blue_shift == 0
    }

    /// Validates that this pixel format is structurally sound.
    ///
    /// Checks that the format uses valid bits-per-pixel values and is either
    /// true-color or a supported color-mapped format. A format can pass this
    /// check and still be rejected by the encoder as an unsupported
    /// configuration (for example non-5-bit channel maxima).
    ///
    /// # Returns
    ///
    /// `true` if the format is valid, `false` otherwise.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        // Check bits per pixel is valid
        if self.bits_per_pixel != 8
            && self.bits_per_pixel != 16
            && self.bits_per_pixel != 24
            && self.bits_per_pixel != 32
        {
            return false;
        }

        // Check depth is reasonable
        if self.depth == 0 || self.depth > 32 {
            return false;
        }

        // For non-truecolor (color-mapped), only 8bpp is supported
        if self.true_colour_flag == 0 && self.bits_per_pixel != 8 {
            return false;
        }

        // For truecolor, validate color component ranges
        if self.true_colour_flag != 0 {
            #[allow(clippy::cast_possible_truncation)]
            // leading_zeros() returns max 32, result always fits in u8
            let bits_needed = |max: u16| -> u8 {
                if max == 0 {
                    0
                } else {
                    (16 - max.leading_zeros()) as u8
                }
            };

            let red_bits = bits_needed(self.red_max);
            let green_bits = bits_needed(self.green_max);
            let blue_bits = bits_needed(self.blue_max);

            // Total bits should not exceed depth
            if red_bits + green_bits + blue_bits > self.depth {
                return false;
            }

            // Shifts should not cause overlap or exceed bit depth
            if self.red_shift >= 32 || self.green_shift >= 32 || self.blue_shift >= 32 {
                return false;
            }
        }

        true
    }

    /// Bytes each packed pixel occupies on the wire.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    /// Writes the pixel format into a buffer in RFB wire layout.
    ///
    /// Emits the 13 data bytes followed by the structure's 3 padding bytes
    /// (16 bytes total).
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to write into.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Parses a `PixelFormat` from its 16-byte RFB wire layout.
    ///
    /// # Errors
    ///
    /// Returns `Err(io::Error)` if fewer than 16 bytes are available.
    pub fn from_wire(mut buf: &[u8]) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for PixelFormat",
            ));
        }

        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        buf.advance(3);
        Ok(pf)
    }
}

/// Represents the `ServerInit` message sent at the end of the handshake.
///
/// It provides the client with framebuffer dimensions, the server's default
/// pixel format, and the desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// The width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// The height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format used by the framebuffer until the client overrides it.
    pub pixel_format: PixelFormat,
    /// The name of the desktop.
    pub name: String,
}

impl ServerInit {
    /// Serializes the `ServerInit` message into a byte buffer.
    ///
    /// The format follows the RFB protocol specification:
    /// - 2 bytes: framebuffer width
    /// - 2 bytes: framebuffer height
    /// - 16 bytes: pixel format (3 trailing padding bytes included)
    /// - 4 bytes: name length (signed, big-endian)
    /// - N bytes: name string
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the serialized message into.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);
        crate::wire::put_string(buf, &self.name);
    }
}

/// A client `FramebufferUpdateRequest`.
///
/// Transient: consumed by the update arbitrator, never retained past one
/// arbitration cycle. The region fields are accepted but the server always
/// covers the full frame in the non-incremental case.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest {
    /// Whether the client will settle for changes since its last update.
    pub incremental: bool,
    /// X coordinate of the requested region.
    pub x: u16,
    /// Y coordinate of the requested region.
    pub y: u16,
    /// Width of the requested region.
    pub width: u16,
    /// Height of the requested region.
    pub height: u16,
}

/// Represents a rectangle header in a framebuffer update message.
///
/// Each framebuffer update can contain multiple rectangles, each with its own
/// encoding type. The rectangle header specifies the position, dimensions,
/// and encoding of the pixel data that follows.
#[derive(Debug)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding type used for this rectangle's pixel data.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the rectangle header to a byte buffer.
    ///
    /// The header format is:
    /// - 2 bytes: x position
    /// - 2 bytes: y position
    /// - 2 bytes: width
    /// - 2 bytes: height
    /// - 4 bytes: encoding type (signed 32-bit integer)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the header into.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_lines_round_trip() {
        for v in [
            ProtocolVersion::V3_3,
            ProtocolVersion::V3_7,
            ProtocolVersion::V3_8,
        ] {
            assert_eq!(ProtocolVersion::from_line(v.as_str().as_bytes()), Some(v));
        }
        assert_eq!(ProtocolVersion::from_line(b"RFB 003.005\n"), None);
        assert_eq!(ProtocolVersion::from_line(b"HTTP/1.1 200\n"), None);
    }

    #[test]
    fn version_gates_handshake_steps() {
        assert!(!ProtocolVersion::V3_3.negotiates_security());
        assert!(ProtocolVersion::V3_7.negotiates_security());
        assert!(ProtocolVersion::V3_8.negotiates_security());

        assert!(!ProtocolVersion::V3_3.sends_security_result());
        assert!(!ProtocolVersion::V3_7.sends_security_result());
        assert!(ProtocolVersion::V3_8.sends_security_result());
    }

    #[test]
    fn pixel_format_wire_round_trip() {
        let format = PixelFormat::thousands();
        let mut buf = BytesMut::new();
        format.write_to(&mut buf);
        assert_eq!(buf.len(), 16);

        let parsed = PixelFormat::from_wire(&buf).unwrap();
        assert_eq!(parsed, format);
    }

    #[test]
    fn pixel_format_from_short_buffer_fails() {
        assert!(PixelFormat::from_wire(&[0u8; 15]).is_err());
    }

    #[test]
    fn thousands_detection() {
        assert!(PixelFormat::thousands().is_thousands());

        let mut big_endian = PixelFormat::thousands();
        big_endian.big_endian_flag = 1;
        assert!(big_endian.is_thousands(), "endianness must not matter");

        let mut rgb565 = PixelFormat::thousands();
        rgb565.green_max = 63;
        rgb565.red_shift = 11;
        assert!(!rgb565.is_thousands());

        assert!(!PixelFormat::rgb888().is_thousands());
    }

    #[test]
    fn default_format_matches_server_init_contract() {
        let format = PixelFormat::rgb888();
        assert_eq!(format.bits_per_pixel, 24);
        assert_eq!(format.depth, 24);
        assert_eq!(format.big_endian_flag, 1);
        assert_eq!(
            (format.red_shift, format.green_shift, format.blue_shift),
            (16, 8, 0)
        );
        assert!(format.is_valid());
    }

    #[test]
    fn is_valid_rejects_malformed_formats() {
        let mut format = PixelFormat::thousands();
        format.bits_per_pixel = 12;
        assert!(!format.is_valid());

        let mut format = PixelFormat::thousands();
        format.depth = 0;
        assert!(!format.is_valid());

        // Color-mapped only allowed at 8bpp
        let mut format = PixelFormat::thousands();
        format.true_colour_flag = 0;
        assert!(!format.is_valid());

        // Channel widths exceeding the depth
        let mut format = PixelFormat::thousands();
        format.red_max = 255;
        format.green_max = 255;
        format.blue_max = 255;
        assert!(!format.is_valid());
    }

    #[test]
    fn rectangle_header_layout() {
        let mut buf = BytesMut::new();
        Rectangle {
            x: 1,
            y: 2,
            width: 0x1234,
            height: 4,
            encoding: ENCODING_COPYRECT,
        }
        .write_header(&mut buf);
        assert_eq!(&buf[..], &[0, 1, 0, 2, 0x12, 0x34, 0, 4, 0, 0, 0, 1][..]);
    }
}
