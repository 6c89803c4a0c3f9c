//! Input events decoded from the client and forwarded to the application.

/// Events emitted by a connection.
///
/// The engine only decodes and forwards these; what consumes them (driving a
/// scene, logging, a no-op) is up to the application.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Pointer movement or button event.
    Pointer {
        /// Bitmask of currently pressed mouse buttons (bit 0 = left,
        /// bit 1 = middle, bit 2 = right).
        button_mask: u8,
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
    },

    /// Key press or release event.
    Key {
        /// True if pressed, false if released.
        down: bool,
        /// Key symbol (X11 keysym).
        keysym: u32,
    },

    /// Clipboard text received from the client.
    CutText {
        /// Clipboard text content.
        text: String,
    },

    /// The client has disconnected; no further events follow.
    Disconnected,
}
