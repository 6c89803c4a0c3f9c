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

//! The per-connection protocol engine.
//!
//! After the handshake, two activities run concurrently for each client:
//!
//! - the **dispatcher** owns the read half, decodes one client message at a
//!   time and routes it: pixel format and encoding changes land in shared
//!   state, input events go to the application, and update requests are
//!   queued to the pump so a slow writer never stops us reading;
//! - the **update pump** owns the write half and is the only place
//!   framebuffer updates are produced. It fans in two streams - queued
//!   update requests and new-frame notifications from the frame source -
//!   and serializes them into one ordered sequence of update messages, so
//!   partial writes from different triggers can never interleave.
//!
//! Both queues are bounded. A full update-request queue blocks the
//! dispatcher rather than dropping the request; losing one could stall a
//! client that is waiting on it forever. The first I/O error on either
//! half tears the whole connection down: the dispatcher's exit closes the
//! request channel, which the pump treats as its shutdown signal, and a
//! pump failure cancels the dispatcher.

use bytes::BytesMut;
use log::{debug, info};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader, BufWriter};
use tokio::sync::{mpsc, RwLock};

use crate::encoder;
use crate::error::{Result, RfbError};
use crate::events::InputEvent;
use crate::frame::SharedFrame;
use crate::handshake;
use crate::protocol::{
    PixelFormat, Rectangle, UpdateRequest, CLIENT_MSG_CLIENT_CUT_TEXT,
    CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST, CLIENT_MSG_KEY_EVENT, CLIENT_MSG_POINTER_EVENT,
    CLIENT_MSG_SET_ENCODINGS, CLIENT_MSG_SET_PIXEL_FORMAT, ENCODING_COPYRECT, ENCODING_RAW,
    SERVER_MSG_FRAMEBUFFER_UPDATE,
};
use crate::wire;

/// Capacity of the update-request queue between dispatcher and pump.
const REQUEST_QUEUE_DEPTH: usize = 128;

/// Capacity of the frame feed from the frame source.
const FEED_QUEUE_DEPTH: usize = 10;

/// Limit clipboard size to prevent memory exhaustion attacks.
const MAX_CUT_TEXT: usize = 10 * 1024 * 1024; // 10MB limit

/// The application's handle for delivering frames to one connection.
///
/// Sends apply backpressure: when the connection's bounded feed queue is
/// full, `send` waits instead of dropping the frame.
#[derive(Debug, Clone)]
pub struct FrameFeed {
    tx: mpsc::Sender<SharedFrame>,
}

impl FrameFeed {
    /// Queues a frame for delivery to the client.
    ///
    /// # Errors
    ///
    /// [`RfbError::ConnectionClosed`] once the connection has gone away;
    /// producers should stop feeding at that point.
    pub async fn send(&self, frame: SharedFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RfbError::ConnectionClosed)
    }
}

/// A single client connection, generic over its transport.
///
/// [`crate::Server`] builds one of these per accepted TCP stream, but any
/// `AsyncRead`/`AsyncWrite` pair works, which is how the tests drive the
/// engine over in-memory streams.
pub struct Connection<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    width: u16,
    height: u16,
    name: String,
    format: Arc<RwLock<PixelFormat>>,
    encodings: Arc<RwLock<Vec<i32>>>,
    frame_rx: mpsc::Receiver<SharedFrame>,
    event_tx: mpsc::UnboundedSender<InputEvent>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a connection engine over the given transport.
    ///
    /// Returns the engine together with the frame feed the producer pushes
    /// into and the receiver the application drains input events from.
    /// `width` and `height` are fixed for the connection's lifetime.
    pub fn new(
        reader: R,
        writer: W,
        width: u16,
        height: u16,
        name: impl Into<String>,
    ) -> (Self, FrameFeed, mpsc::UnboundedReceiver<InputEvent>) {
        let (frame_tx, frame_rx) = mpsc::channel(FEED_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            width,
            height,
            name: name.into(),
            format: Arc::new(RwLock::new(PixelFormat::rgb888())),
            encodings: Arc::new(RwLock::new(vec![ENCODING_RAW])),
            frame_rx,
            event_tx,
        };
        (conn, FrameFeed { tx: frame_tx }, event_rx)
    }

    /// Serves the connection to completion.
    ///
    /// Runs the handshake, then the dispatcher and the update pump until
    /// the client disconnects or the first failure. This is the
    /// connection's error boundary: whatever happens inside ends here, and
    /// an [`InputEvent::Disconnected`] is always delivered to the
    /// application.
    ///
    /// # Errors
    ///
    /// The first [`RfbError`] raised by any part of the engine. A clean
    /// client disconnect at a message boundary is `Ok(())`.
    pub async fn run(self) -> Result<()> {
        let event_tx = self.event_tx.clone();
        let result = self.drive().await;
        match &result {
            Ok(()) => info!("client disconnected"),
            Err(e) => info!("connection ended: {e}"),
        }
        let _ = event_tx.send(InputEvent::Disconnected);
        result
    }

    async fn drive(mut self) -> Result<()> {
        let default_format = self.format.read().await.clone();
        let version = handshake::negotiate(
            &mut self.reader,
            &mut self.writer,
            self.width,
            self.height,
            &default_format,
            &self.name,
        )
        .await?;
        info!("handshake complete, protocol {}", version.as_str().trim_end());

        let (update_tx, update_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let pump = UpdatePump {
            writer: self.writer,
            format: Arc::clone(&self.format),
            update_rx,
            frame_rx: self.frame_rx,
            current: None,
            sent_full: false,
            scratch: BytesMut::new(),
        };
        let mut pump_task = tokio::spawn(pump.run());

        let dispatch = dispatch_loop(
            &mut self.reader,
            update_tx,
            &self.format,
            &self.encodings,
            &self.event_tx,
        );
        tokio::pin!(dispatch);

        enum Finished {
            Dispatcher(Result<()>),
            Pump(std::result::Result<Result<()>, tokio::task::JoinError>),
        }

        let finished = tokio::select! {
            res = &mut dispatch => Finished::Dispatcher(res),
            res = &mut pump_task => Finished::Pump(res),
        };

        match finished {
            Finished::Dispatcher(res) => {
                // The dispatcher's exit dropped its request sender; the pump
                // drains whatever is queued and stops on the closed channel.
                let pump_res = pump_task.await.unwrap_or(Err(RfbError::ConnectionClosed));
                res.and(pump_res)
            }
            // The write path failed first; dropping the dispatcher future
            // releases the read half with it.
            Finished::Pump(join) => join.unwrap_or(Err(RfbError::ConnectionClosed)),
        }
    }
}

/// The steady-state receive loop: one message type byte, then its body.
///
/// Returns `Ok(())` on a clean client close at a message boundary. A short
/// read inside a message, an unknown message type, or a malformed body is
/// fatal.
async fn dispatch_loop<R>(
    reader: &mut BufReader<R>,
    update_tx: mpsc::Sender<UpdateRequest>,
    format: &RwLock<PixelFormat>,
    encodings: &RwLock<Vec<i32>>,
    event_tx: &mpsc::UnboundedSender<InputEvent>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let msg_type = match reader.read_u8().await {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("client closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match msg_type {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                wire::skip_padding(reader, 3).await?;
                let mut raw = [0u8; 16];
                reader.read_exact(&mut raw).await?;
                let requested = PixelFormat::from_wire(&raw)?;
                if !requested.is_valid() {
                    return Err(RfbError::InvalidPixelFormat);
                }
                debug!(
                    "client set pixel format: {}bpp depth={} bigEndian={} \
                     max={}/{}/{} shift={}/{}/{}",
                    requested.bits_per_pixel,
                    requested.depth,
                    requested.big_endian_flag,
                    requested.red_max,
                    requested.green_max,
                    requested.blue_max,
                    requested.red_shift,
                    requested.green_shift,
                    requested.blue_shift,
                );
                *format.write().await = requested;
            }
            CLIENT_MSG_SET_ENCODINGS => {
                wire::skip_padding(reader, 1).await?;
                let count = reader.read_u16().await?;
                let mut list = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    list.push(reader.read_i32().await?);
                }
                // Stored for diagnostics only; rectangles always go out raw.
                debug!("client encodings: {list:?}");
                *encodings.write().await = list;
            }
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let request = UpdateRequest {
                    incremental: reader.read_u8().await? != 0,
                    x: reader.read_u16().await?,
                    y: reader.read_u16().await?,
                    width: reader.read_u16().await?,
                    height: reader.read_u16().await?,
                };
                // Never handled inline: the pump owns the write half. The
                // bounded send blocks when the pump is behind, which is the
                // backpressure we want instead of dropped requests.
                if update_tx.send(request).await.is_err() {
                    return Err(RfbError::ConnectionClosed);
                }
            }
            CLIENT_MSG_KEY_EVENT => {
                let down = reader.read_u8().await? != 0;
                wire::skip_padding(reader, 2).await?;
                let keysym = reader.read_u32().await?;
                let _ = event_tx.send(InputEvent::Key { down, keysym });
            }
            CLIENT_MSG_POINTER_EVENT => {
                let button_mask = reader.read_u8().await?;
                let x = reader.read_u16().await?;
                let y = reader.read_u16().await?;
                let _ = event_tx.send(InputEvent::Pointer { button_mask, x, y });
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                wire::skip_padding(reader, 3).await?;
                let length = reader.read_u32().await? as usize;
                if length > MAX_CUT_TEXT {
                    return Err(RfbError::Protocol(format!(
                        "cut text of {length} bytes exceeds the {MAX_CUT_TEXT} byte limit"
                    )));
                }
                let mut text = vec![0u8; length];
                reader.read_exact(&mut text).await?;
                let text = String::from_utf8_lossy(&text).into_owned();
                let _ = event_tx.send(InputEvent::CutText { text });
            }
            other => {
                return Err(RfbError::Protocol(format!(
                    "unsupported client message type {other}"
                )));
            }
        }
    }
}

/// The update arbitrator: fans update requests and frame notifications into
/// one serialized stream of framebuffer updates.
struct UpdatePump<W> {
    writer: BufWriter<W>,
    format: Arc<RwLock<PixelFormat>>,
    update_rx: mpsc::Receiver<UpdateRequest>,
    frame_rx: mpsc::Receiver<SharedFrame>,
    /// The most recent frame. Owned by this task; the slot itself needs no
    /// lock, only the frame's pixel mutex does.
    current: Option<SharedFrame>,
    /// Whether at least one full frame has reached the client, making the
    /// zero-change acknowledgment for incremental requests meaningful.
    sent_full: bool,
    /// Reused across frames so steady-state encoding does not allocate.
    scratch: BytesMut,
}

impl<W> UpdatePump<W>
where
    W: AsyncWrite + Unpin,
{
    async fn run(mut self) -> Result<()> {
        let mut feed_open = true;
        loop {
            tokio::select! {
                request = self.update_rx.recv() => match request {
                    Some(request) => self.handle_request(request).await?,
                    // Request channel closed: the dispatcher is gone and the
                    // connection is shutting down.
                    None => return Ok(()),
                },
                frame = self.frame_rx.recv(), if feed_open => match frame {
                    Some(frame) => {
                        self.current = Some(Arc::clone(&frame));
                        self.push_frame(&frame).await?;
                    }
                    // Producer went away; keep answering requests from the
                    // last frame we were given.
                    None => feed_open = false,
                },
            }
        }
    }

    async fn handle_request(&mut self, request: UpdateRequest) -> Result<()> {
        let Some(frame) = self.current.clone() else {
            // No frame produced yet; nothing to send for any request kind.
            return Ok(());
        };
        if request.incremental && self.sent_full {
            // The producer does not track dirty regions, so an incremental
            // request is answered with a zero-change self-copy instead of
            // re-encoding the frame the client already has.
            self.write_copy_ack(&frame).await
        } else {
            self.push_frame(&frame).await
        }
    }

    /// Encodes and sends the full frame under its pixel lock.
    async fn push_frame(&mut self, frame: &SharedFrame) -> Result<()> {
        let format = self.format.read().await.clone();

        // Hold the pixel lock for the whole encode and write: a redraw
        // racing the walk would tear the image on the wire.
        let image = frame.lock().await;
        self.scratch.clear();
        self.scratch.extend_from_slice(&[SERVER_MSG_FRAMEBUFFER_UPDATE, 0, 0, 1]);
        encoder::encode_rect(&image, &format, &mut self.scratch)?;
        wire::write_message(&mut self.writer, &self.scratch).await?;
        drop(image);

        self.sent_full = true;
        Ok(())
    }

    /// Sends the one-rectangle self-copy that acknowledges an incremental
    /// request without resending pixels.
    async fn write_copy_ack(&mut self, frame: &SharedFrame) -> Result<()> {
        let (width, height) = {
            let image = frame.lock().await;
            (image.width(), image.height())
        };

        self.scratch.clear();
        self.scratch.extend_from_slice(&[SERVER_MSG_FRAMEBUFFER_UPDATE, 0, 0, 1]);
        Rectangle {
            x: 0,
            y: 0,
            width,
            height,
            encoding: ENCODING_COPYRECT,
        }
        .write_header(&mut self.scratch);
        self.scratch.extend_from_slice(&[0, 0, 0, 0]); // src-x, src-y
        wire::write_message(&mut self.writer, &self.scratch).await?;
        Ok(())
    }
}
