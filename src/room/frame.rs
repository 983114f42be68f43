// Embedded-game message boundary
// Stands in for the window-message channel between shell and game frame

use tokio::sync::mpsc;

use crate::net::wire::FrameEnvelope;

/// One end of the shell/game boundary. The shell holds one link, the
/// embedded game the other; both just post envelopes at each other.
pub struct FrameLink {
    tx: mpsc::UnboundedSender<FrameEnvelope>,
    rx: mpsc::UnboundedReceiver<FrameEnvelope>,
}

/// Create a connected pair of links: `(shell end, game end)`.
pub fn frame_pair() -> (FrameLink, FrameLink) {
    let (shell_tx, game_rx) = mpsc::unbounded_channel();
    let (game_tx, shell_rx) = mpsc::unbounded_channel();
    (
        FrameLink {
            tx: shell_tx,
            rx: shell_rx,
        },
        FrameLink {
            tx: game_tx,
            rx: game_rx,
        },
    )
}

impl FrameLink {
    /// Post an envelope to the other end. Posting into a torn-down frame
    /// is not an error; the message just goes nowhere.
    pub fn post(&self, envelope: FrameEnvelope) {
        let _ = self.tx.send(envelope);
    }

    /// Receive the next envelope. `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<FrameEnvelope> {
        self.rx.recv().await
    }
}
