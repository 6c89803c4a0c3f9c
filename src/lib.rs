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


//! # rfbserver
//!
//! A pure Rust implementation of the RFB (Remote Framebuffer, a.k.a. VNC)
//! server protocol.
//!
//! The crate is the per-connection protocol engine: it performs the RFB
//! handshake for protocol versions 3.3, 3.7 and 3.8, negotiates pixel
//! formats and encodings, and streams raw-encoded framebuffer updates to
//! the client while forwarding pointer and keyboard input back to the
//! application. What gets displayed is up to you - the engine consumes
//! frames from any producer that redraws an RGBA buffer under a lock and
//! says "new frame ready".
//!
//! ## Features
//!
//! - **Three protocol versions**: 3.3, 3.7 and 3.8, with the correct
//!   security-negotiation shape for each
//! - **Pixel-format aware encoding**: a fast path for the common 16-bit
//!   "thousands of colours" mode and a generic fallback
//! - **Non-blocking update path**: a slow client never stalls input
//!   processing; update requests and new frames are arbitrated on their
//!   own task per connection
//! - **Async I/O**: built on Tokio for efficient concurrent client handling
//! - **Memory safe**: pure Rust, no unsafe code
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfbserver::{Frame, LockableFrame, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a server advertising a 1280x720 screen
//!     let (server, mut conns) = Server::new(1280, 720);
//!
//!     tokio::spawn(async move { server.listen("0.0.0.0:5900").await });
//!
//!     // Feed each connection frames and drain its input events
//!     while let Some(mut conn) = conns.recv().await {
//!         let frame = Arc::new(LockableFrame::new(Frame::new(1280, 720)));
//!         let feed = conn.feed();
//!         tokio::spawn(async move {
//!             // redraw `frame` under its lock, then:
//!             let _ = feed.send(Arc::clone(&frame)).await;
//!         });
//!         tokio::spawn(async move {
//!             while let Some(event) = conn.next_event().await {
//!                 println!("input: {event:?}");
//!             }
//!         });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! accept -> handshake -> dispatcher (reads client messages)
//!                            |
//!                            | bounded request queue
//!                            v
//!          frame source -> update pump -> pixel encoder -> socket
//! ```
//!
//! Per connection, the dispatcher owns the read half and the update pump
//! owns the write half, so exactly one framebuffer update is ever in
//! flight and input handling never waits on pixel pushing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod frame;
pub mod protocol;
pub mod server;

// Internal modules
mod conn;
mod encoder;
mod handshake;
mod wire;

// Re-exports
pub use conn::{Connection, FrameFeed};
pub use error::{Result, RfbError};
pub use events::InputEvent;
pub use frame::{Frame, LockableFrame, SharedFrame};
pub use protocol::{PixelFormat, ProtocolVersion};
pub use server::{ClientConn, Server};

/// The highest RFB protocol version this server advertises.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
