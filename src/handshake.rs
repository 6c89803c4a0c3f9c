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

//! The RFB handshake state machine.
//!
//! Strictly sequential, terminal on the first failure:
//! version exchange, security negotiation, security result (3.8 only),
//! ClientInit, ServerInit. The steps that run depend on the version the
//! client picks: 3.3 clients get a unilateral 4-byte security code instead
//! of the type list, and only 3.8 clients receive a `SecurityResult`.

use bytes::{BufMut, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{Result, RfbError};
use crate::protocol::{
    PixelFormat, ProtocolVersion, ServerInit, SECURITY_RESULT_OK, SECURITY_TYPE_NONE, VERSION_3_8,
};
use crate::wire;

/// Runs the full handshake against a freshly accepted client.
///
/// On success the stream is positioned at the start of the steady-state
/// message flow and the negotiated version is returned. Any malformed or
/// disallowed client input ends the handshake, and the connection with it,
/// before a `ServerInit` is ever sent.
///
/// # Errors
///
/// [`RfbError::Protocol`] for an unrecognized version line or a security
/// type other than None; [`RfbError::Io`] for any stream failure.
pub(crate) async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    width: u16,
    height: u16,
    format: &PixelFormat,
    name: &str,
) -> Result<ProtocolVersion>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // 1. ProtocolVersion exchange: always advertise the highest version,
    // let the client answer with the one it wants to speak.
    wire::write_message(writer, VERSION_3_8.as_bytes()).await?;

    let mut line = [0u8; 12];
    reader.read_exact(&mut line).await?;
    let version = ProtocolVersion::from_line(&line).ok_or_else(|| {
        RfbError::Protocol(format!(
            "unrecognized protocol version {:?}",
            String::from_utf8_lossy(&line)
        ))
    })?;
    debug!("client chose protocol version {:?}", version);

    // 2. Security negotiation. Only the None type is on offer.
    if version.negotiates_security() {
        wire::write_message(writer, &[1, SECURITY_TYPE_NONE]).await?;
        let chosen = reader.read_u8().await?;
        if chosen != SECURITY_TYPE_NONE {
            return Err(RfbError::Protocol(format!(
                "client requested security type {chosen}, only None is offered"
            )));
        }
    } else {
        // 3.3 has no list; the server just states the security type.
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(u32::from(SECURITY_TYPE_NONE));
        wire::write_message(writer, &buf).await?;
    }

    // 3. SecurityResult, 3.8 only. With no real authentication this is
    // always OK.
    if version.sends_security_result() {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(SECURITY_RESULT_OK);
        wire::write_message(writer, &buf).await?;
    }

    // 4. ClientInit: the shared flag is read and accepted, but exclusive
    // sessions are not implemented so it changes nothing.
    let shared = reader.read_u8().await?;
    debug!("client shared flag: {shared}");

    // 5. ServerInit: fixed screen geometry, the default pixel format, and
    // the desktop name.
    let server_init = ServerInit {
        framebuffer_width: width,
        framebuffer_height: height,
        pixel_format: format.clone(),
        name: name.to_owned(),
    };
    let mut buf = BytesMut::new();
    server_init.write_to(&mut buf);
    wire::write_message(writer, &buf).await?;

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{VERSION_3_3, VERSION_3_7};
    use tokio::io::AsyncWriteExt;

    const WIDTH: u16 = 640;
    const HEIGHT: u16 = 480;
    const NAME: &str = "testdesk";

    /// Spawns the negotiator on the server end of a duplex pair and hands
    /// the client end back to the test.
    fn start_server() -> (
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<Result<ProtocolVersion>>,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            negotiate(
                &mut reader,
                &mut writer,
                WIDTH,
                HEIGHT,
                &PixelFormat::rgb888(),
                NAME,
            )
            .await
        });
        (client, task)
    }

    async fn read_server_version(client: &mut tokio::io::DuplexStream) {
        let mut version = [0u8; 12];
        client.read_exact(&mut version).await.unwrap();
        assert_eq!(&version, VERSION_3_8.as_bytes());
    }

    async fn read_server_init(client: &mut tokio::io::DuplexStream) {
        let mut head = [0u8; 20]; // width + height + 16-byte pixel format
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(u16::from_be_bytes([head[0], head[1]]), WIDTH);
        assert_eq!(u16::from_be_bytes([head[2], head[3]]), HEIGHT);
        let format = PixelFormat::from_wire(&head[4..]).unwrap();
        assert_eq!(format, PixelFormat::rgb888());

        let mut len = [0u8; 4];
        client.read_exact(&mut len).await.unwrap();
        let len = i32::from_be_bytes(len) as usize;
        assert_eq!(len, NAME.len());
        let mut name = vec![0u8; len];
        client.read_exact(&mut name).await.unwrap();
        assert_eq!(name, NAME.as_bytes());
    }

    #[tokio::test]
    async fn v38_handshake_has_type_list_and_result() {
        let (mut client, task) = start_server();

        read_server_version(&mut client).await;
        client.write_all(VERSION_3_8.as_bytes()).await.unwrap();

        let mut list = [0u8; 2];
        client.read_exact(&mut list).await.unwrap();
        assert_eq!(list, [1, SECURITY_TYPE_NONE]);
        client.write_all(&[SECURITY_TYPE_NONE]).await.unwrap();

        let mut result = [0u8; 4];
        client.read_exact(&mut result).await.unwrap();
        assert_eq!(u32::from_be_bytes(result), SECURITY_RESULT_OK);

        client.write_all(&[0]).await.unwrap(); // shared flag
        read_server_init(&mut client).await;

        assert_eq!(task.await.unwrap().unwrap(), ProtocolVersion::V3_8);
    }

    #[tokio::test]
    async fn v37_handshake_skips_security_result() {
        let (mut client, task) = start_server();

        read_server_version(&mut client).await;
        client.write_all(VERSION_3_7.as_bytes()).await.unwrap();

        let mut list = [0u8; 2];
        client.read_exact(&mut list).await.unwrap();
        assert_eq!(list, [1, SECURITY_TYPE_NONE]);
        client.write_all(&[SECURITY_TYPE_NONE]).await.unwrap();

        // No SecurityResult for 3.7: next server bytes are ServerInit.
        client.write_all(&[1]).await.unwrap(); // shared flag
        read_server_init(&mut client).await;

        assert_eq!(task.await.unwrap().unwrap(), ProtocolVersion::V3_7);
    }

    #[tokio::test]
    async fn v33_handshake_gets_unilateral_security_code() {
        let (mut client, task) = start_server();

        read_server_version(&mut client).await;
        client.write_all(VERSION_3_3.as_bytes()).await.unwrap();

        // 3.3: no list round trip, just the 4-byte code.
        let mut code = [0u8; 4];
        client.read_exact(&mut code).await.unwrap();
        assert_eq!(u32::from_be_bytes(code), u32::from(SECURITY_TYPE_NONE));

        client.write_all(&[0]).await.unwrap(); // shared flag
        read_server_init(&mut client).await;

        assert_eq!(task.await.unwrap().unwrap(), ProtocolVersion::V3_3);
    }

    #[tokio::test]
    async fn bogus_version_terminates_before_server_init() {
        let (mut client, task) = start_server();

        read_server_version(&mut client).await;
        client.write_all(b"RFB 009.999\n").await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));

        // The server never sent another byte after its version line.
        drop(client);
    }

    #[tokio::test]
    async fn disallowed_security_type_is_rejected() {
        let (mut client, task) = start_server();

        read_server_version(&mut client).await;
        client.write_all(VERSION_3_8.as_bytes()).await.unwrap();

        let mut list = [0u8; 2];
        client.read_exact(&mut list).await.unwrap();
        client.write_all(&[2]).await.unwrap(); // VNC auth: not offered

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }
}
