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

//! Stream-level wire helpers.
//!
//! Fixed-width big-endian integers come straight from
//! `tokio::io::AsyncReadExt`/`AsyncWriteExt` on buffered streams; this
//! module adds the remaining RFB primitives: padding consumption,
//! length-prefixed strings, and the write-then-flush that ends every
//! server message. A short read anywhere is fatal to the connection, so
//! everything here either completes fully or errors.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest padding run any RFB message carries.
const MAX_PADDING: usize = 3;

/// Consumes and discards `n` padding bytes from the stream.
pub(crate) async fn skip_padding<R>(reader: &mut R, n: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    debug_assert!(n <= MAX_PADDING);
    let mut pad = [0u8; MAX_PADDING];
    reader.read_exact(&mut pad[..n]).await?;
    Ok(())
}

/// Appends a length-prefixed string: 4-byte signed big-endian length, then
/// the raw bytes.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
// String lengths on this protocol are bounded far below i32::MAX
pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Writes a fully assembled message and flushes it to the peer.
///
/// The protocol has no message framing beyond field order, so partial
/// writes of one message must never interleave with another; callers
/// assemble the whole message first and hand it over in one piece.
pub(crate) async fn write_message<W>(writer: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_string_is_length_prefixed() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "rfbserver");
        assert_eq!(&buf[..4], &[0, 0, 0, 9]);
        assert_eq!(&buf[4..], b"rfbserver");
    }

    #[test]
    fn put_string_empty() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "");
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn skip_padding_consumes_exactly_n() {
        let data: &[u8] = &[0, 0, 0, 42];
        let mut reader = io::Cursor::new(data);
        skip_padding(&mut reader, 3).await.unwrap();
        assert_eq!(reader.read_u8().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn skip_padding_fails_on_short_stream() {
        let data: &[u8] = &[0];
        let mut reader = io::Cursor::new(data);
        let err = skip_padding(&mut reader, 3).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn write_message_flushes() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_message(&mut a, &[1, 2, 3]).await.unwrap();
        let mut out = [0u8; 3];
        b.read_exact(&mut out).await.unwrap();
        assert_eq!(out, [1, 2, 3]);
    }
}
