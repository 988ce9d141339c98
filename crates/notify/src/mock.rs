//! Mock notification emitter
//!
//! Captures emitted events in memory for tests without external
//! dependencies. Test code inspects captured events to validate the
//! notification contract of each membership transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::{EmittedReceipt, NotificationEmitter, NotificationEvent, NotifyError};

/// Event captured by the mock emitter
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub event: NotificationEvent,
    pub captured_at: DateTime<Utc>,
}

/// Mock notification emitter for testing
#[derive(Debug, Clone, Default)]
pub struct MockEmitter {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    events_by_recipient: Arc<Mutex<HashMap<String, Vec<CapturedEvent>>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events
    pub fn all_events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Get events addressed to a specific email
    pub fn events_for_recipient(&self, email: &str) -> Vec<CapturedEvent> {
        self.events_by_recipient
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .unwrap_or_default()
    }

    /// Get captured events of a given kind
    pub fn events_of_kind(&self, kind: &str) -> Vec<CapturedEvent> {
        self.all_events()
            .into_iter()
            .filter(|captured| captured.event.kind() == kind)
            .collect()
    }

    /// Total number of captured events
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Clear captured events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.events_by_recipient.lock().unwrap().clear();
    }

    /// Make the next emit call fail, to exercise fire-and-forget handling
    pub fn fail_next_emit(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl NotificationEmitter for MockEmitter {
    async fn emit(&self, event: NotificationEvent) -> Result<EmittedReceipt, NotifyError> {
        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next {
                *fail_next = false;
                return Err(NotifyError::Delivery(
                    "mock emitter failure injected".to_string(),
                ));
            }
        }

        let captured = CapturedEvent {
            event: event.clone(),
            captured_at: Utc::now(),
        };

        self.events_by_recipient
            .lock()
            .unwrap()
            .entry(event.recipient_email().to_string())
            .or_default()
            .push(captured.clone());
        self.events.lock().unwrap().push(captured);

        Ok(EmittedReceipt {
            event_kind: event.kind().to_string(),
            emitted_at: Utc::now(),
        })
    }
}
