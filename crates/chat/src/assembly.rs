//! Message assembly — server-side reconstruction of the streamed reply.

use chatrelay_core::{GenerationEvent, MessagePart};

/// Accumulates delta events into separate reasoning and text buffers.
///
/// Deltas of each kind concatenate in arrival order. Finalizing yields the
/// merged reasoning part (if any) followed by the text part (if any); a
/// generation that produced neither yields no parts, which downstream
/// treats as "nothing to persist" rather than an error.
#[derive(Debug, Default)]
pub struct MessageAssembly {
    text: String,
    reasoning: String,
}

impl MessageAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one event. Non-delta events are ignored.
    pub fn feed(&mut self, event: &GenerationEvent) {
        match event {
            GenerationEvent::TextDelta { text } => self.text.push_str(text),
            GenerationEvent::ReasoningDelta { text } => self.reasoning.push_str(text),
            _ => {}
        }
    }

    /// Whether any content has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reasoning.is_empty()
    }

    /// Produce the final ordered part list. Empty segments are omitted.
    pub fn finalize(self) -> Vec<MessagePart> {
        let mut parts = Vec::with_capacity(2);
        if !self.reasoning.is_empty() {
            parts.push(MessagePart::reasoning(self.reasoning));
        }
        if !self.text.is_empty() {
            parts.push(MessagePart::text(self.text));
        }
        parts
    }

    /// Drop all buffered content. Used after an `Error` terminal event.
    pub fn discard(self) {}
}
