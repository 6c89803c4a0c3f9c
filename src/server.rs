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

//! The TCP front door: accept loop and application-facing handles.
//!
//! The [`Server`] binds a listener and turns every accepted stream into a
//! [`Connection`](crate::Connection) running on its own task, handing the
//! application a [`ClientConn`] through which it feeds frames and drains
//! input events. One misbehaving client takes down its own task, never its
//! neighbours and never the process.

use log::{error, info};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::conn::{Connection, FrameFeed};
use crate::error::Result;
use crate::events::InputEvent;
use crate::frame::SharedFrame;

/// The application's handle for one accepted client.
///
/// Frames go in through [`ClientConn::feed`], decoded input events come out
/// of [`ClientConn::next_event`]. Dropping the handle does not close the
/// connection; closing the feed merely leaves the client with its last
/// frame.
#[derive(Debug)]
pub struct ClientConn {
    id: usize,
    addr: SocketAddr,
    width: u16,
    height: u16,
    feed: FrameFeed,
    events: mpsc::UnboundedReceiver<InputEvent>,
}

impl ClientConn {
    /// The server-assigned connection id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The client's socket address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The advertised screen dimensions, fixed for the connection's life.
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// A cloneable handle for delivering frames to this client.
    #[must_use]
    pub fn feed(&self) -> FrameFeed {
        self.feed.clone()
    }

    /// Queues a frame for delivery to this client.
    ///
    /// # Errors
    ///
    /// [`crate::RfbError::ConnectionClosed`] once the connection is gone.
    pub async fn feed_frame(&self, frame: SharedFrame) -> Result<()> {
        self.feed.send(frame).await
    }

    /// Receives the next input event, or `None` after
    /// [`InputEvent::Disconnected`] has been delivered and the connection
    /// has ended.
    pub async fn next_event(&mut self) -> Option<InputEvent> {
        self.events.recv().await
    }
}

/// An RFB server: screen geometry, desktop name, and the accept loop.
#[derive(Debug)]
pub struct Server {
    width: u16,
    height: u16,
    name: String,
    conn_tx: mpsc::UnboundedSender<ClientConn>,
}

impl Server {
    /// Creates a server advertising the given screen size.
    ///
    /// Returns the server and the stream of accepted connections. The
    /// application must drain the receiver; each [`ClientConn`] carries the
    /// feed its frames go through.
    #[must_use]
    pub fn new(width: u16, height: u16) -> (Self, mpsc::UnboundedReceiver<ClientConn>) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        (
            Self {
                width,
                height,
                name: "rfbserver".to_string(),
                conn_tx,
            },
            conn_rx,
        )
    }

    /// Overrides the desktop name sent in `ServerInit`.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Binds `addr` and serves connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Only listener-level failures (bind/accept); per-connection errors are
    /// logged and contained in the connection's own task.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {addr}");
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    ///
    /// # Errors
    ///
    /// Only accept-loop failures; per-connection errors never propagate.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut next_id = 0usize;
        loop {
            let (stream, addr) = listener.accept().await?;
            let id = next_id;
            next_id += 1;
            info!("client {id} connected from {addr}");

            // Disable Nagle's algorithm for immediate frame delivery
            if let Err(e) = stream.set_nodelay(true) {
                error!("client {id}: set_nodelay failed: {e}");
            }

            let (reader, writer) = stream.into_split();
            let (conn, feed, events) =
                Connection::new(reader, writer, self.width, self.height, self.name.clone());

            let handle = ClientConn {
                id,
                addr,
                width: self.width,
                height: self.height,
                feed,
                events,
            };
            // The application dropping the receiver is not an accept-loop
            // error; the connection still runs, it just has no frame source.
            let _ = self.conn_tx.send(handle);

            tokio::spawn(async move {
                if let Err(e) = conn.run().await {
                    error!("client {id}: {e}");
                }
            });
        }
    }
}
