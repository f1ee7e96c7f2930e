//! Scripted backend for pipeline tests.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use chatrelay_core::{BackendError, GenerationEvent, GenerationRequest, TextGenerator};

/// A `TextGenerator` that replays a fixed event script once.
pub struct ScriptedGenerator {
    script: Mutex<Option<Vec<GenerationEvent>>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<GenerationEvent>) -> Self {
        Self {
            script: Mutex::new(Some(script)),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> std::result::Result<mpsc::Receiver<GenerationEvent>, BackendError> {
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .expect("scripted generator already consumed");

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
