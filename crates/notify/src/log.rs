//! Tracing-backed notification emitter
//!
//! Default wiring when no email/WebSocket dispatcher is attached: events are
//! written to the log stream so local development still shows the full
//! notification contract.

use chrono::Utc;

use crate::{EmittedReceipt, NotificationEmitter, NotificationEvent, NotifyError};

/// Emitter that writes every event to `tracing`
#[derive(Debug, Clone, Default)]
pub struct LogEmitter;

impl LogEmitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, event: NotificationEvent) -> Result<EmittedReceipt, NotifyError> {
        tracing::info!(
            kind = event.kind(),
            recipient = event.recipient_email(),
            realtime = event.has_realtime_delivery(),
            "notification event emitted"
        );

        Ok(EmittedReceipt {
            event_kind: event.kind().to_string(),
            emitted_at: Utc::now(),
        })
    }
}
