//! Animated demo server.
//!
//! Serves a moving test card so any VNC viewer can be pointed at the
//! engine: a diagonal gradient with colored bars sliding along the edges,
//! redrawn ~30 times a second. Each connection gets its own frame and
//! producer task; input events are just logged.
//!
//! Usage:
//!   cargo run --example animated
//!
//! Then connect with a VNC viewer to localhost:5900.

use rfbserver::{ClientConn, Frame, InputEvent, LockableFrame, Server, SharedFrame};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const WIDTH: u16 = 1280;
const HEIGHT: u16 = 720;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting animated RFB server on port 5900...");
    println!("Connect with: vncviewer localhost:5900");

    let (server, mut conns) = Server::new(WIDTH, HEIGHT);
    tokio::spawn(async move {
        if let Err(e) = server.listen("0.0.0.0:5900").await {
            eprintln!("Server error: {e}");
        }
    });

    while let Some(conn) = conns.recv().await {
        println!("client {} connected from {}", conn.id(), conn.addr());
        tokio::spawn(handle_conn(conn));
    }
    Ok(())
}

async fn handle_conn(mut conn: ClientConn) {
    let frame: SharedFrame = Arc::new(LockableFrame::new(Frame::new(WIDTH, HEIGHT)));

    let feed = conn.feed();
    let producer = tokio::spawn({
        let frame = Arc::clone(&frame);
        async move {
            let mut tick = tokio::time::interval(Duration::from_millis(33)); // ~30 FPS
            let mut slide: u32 = 0;
            loop {
                tick.tick().await;
                slide = slide.wrapping_add(1);
                {
                    let mut image = frame.lock().await;
                    draw(&mut image, slide);
                }
                if feed.send(Arc::clone(&frame)).await.is_err() {
                    // Client gone; stop producing.
                    return;
                }
            }
        }
    });

    while let Some(event) = conn.next_event().await {
        match event {
            InputEvent::Disconnected => break,
            other => log::info!("client {}: {other:?}", conn.id()),
        }
    }
    producer.abort();
    println!("client {} disconnected", conn.id());
}

/// Redraws the test card: a position-based gradient with sliding bars.
#[allow(clippy::cast_possible_truncation)]
fn draw(image: &mut Frame, slide: u32) {
    let bar = (slide % 50) as u16;
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let (r, g, b) = if x < bar {
                (255, 0, 0)
            } else if x > WIDTH - 50 {
                (0, 255, 0)
            } else if y < 50 - bar.min(50) {
                (255, 255, 0)
            } else if y > HEIGHT - 50 {
                (0, 0, 255)
            } else {
                (x as u8, y as u8, (u32::from(x) + u32::from(y) + slide) as u8)
            };
            image.put_rgb(x, y, r, g, b);
        }
    }
}
