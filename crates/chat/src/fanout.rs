//! Stream fanout — tees one generation stream to the client sink and the
//! server-side assembly.

use chatrelay_core::{GenerationEvent, TokenUsage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::assembly::MessageAssembly;

/// A successfully finished generation, ready for persistence.
#[derive(Debug)]
pub struct FinishedGeneration {
    pub parts: Vec<chatrelay_core::MessagePart>,
    pub model_id: String,
    pub usage: Option<TokenUsage>,
}

/// Consumes one event stream and delivers every event, in order, to the
/// client sink and to [`MessageAssembly`].
///
/// The client sink is a bounded channel: a slow client backpressures the
/// backend stream instead of losing events. A *gone* client (receiver
/// dropped) stops client delivery but never the session; assembly runs to
/// the terminal event so persistence stays correct.
pub struct StreamFanout;

impl StreamFanout {
    /// Pump `events` until the terminal event.
    ///
    /// Returns `Some` on `Finish` (with the finalized parts), `None` on
    /// `Error` (the assembly is discarded, nothing to persist).
    pub async fn run(
        mut events: mpsc::Receiver<GenerationEvent>,
        client: mpsc::Sender<GenerationEvent>,
    ) -> Option<FinishedGeneration> {
        let mut assembly = MessageAssembly::new();
        let mut client_gone = false;

        while let Some(event) = events.recv().await {
            assembly.feed(&event);

            let terminal = event.is_terminal();
            if !client_gone && client.send(event.clone()).await.is_err() {
                client_gone = true;
                debug!("Client detached mid-stream; continuing assembly");
            }

            if !terminal {
                continue;
            }

            match event {
                GenerationEvent::Finish {
                    text,
                    reasoning,
                    model_id,
                    usage,
                } => {
                    // Backends that buffer rather than stream put the whole
                    // output on the terminal event only
                    if assembly.is_empty() && !(text.is_empty() && reasoning.is_empty()) {
                        assembly.feed(&GenerationEvent::ReasoningDelta { text: reasoning });
                        assembly.feed(&GenerationEvent::TextDelta { text });
                    }
                    return Some(FinishedGeneration {
                        parts: assembly.finalize(),
                        model_id,
                        usage,
                    });
                }
                GenerationEvent::Error { message } => {
                    warn!(%message, "Generation failed; discarding assembly");
                    assembly.discard();
                    return None;
                }
                _ => unreachable!("is_terminal covers Finish and Error only"),
            }
        }

        // Stream closed without a terminal event (backend task died)
        warn!("Generation stream ended without terminal event; discarding assembly");
        assembly.discard();
        None
    }
}
