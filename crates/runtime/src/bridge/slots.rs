//! Single-slot queue for user messages injected by rendered UIs.
//!
//! While a conversation has a turn in progress, an injected message waits
//! in that conversation's slot and is handed to the handler once the turn
//! settles. A second message arriving meanwhile replaces the first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

/// A user turn requested from inside a rendered UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUserMessage {
    pub conversation_id: String,
    pub session_id: String,
    pub text: String,
}

/// What `submit` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered,
    Queued,
    NoHandler,
}

type Handler = Arc<dyn Fn(QueuedUserMessage) + Send + Sync>;

#[derive(Default)]
struct SlotState {
    active: usize,
    pending: Option<QueuedUserMessage>,
}

#[derive(Default)]
pub struct TurnSlots {
    slots: Mutex<HashMap<String, SlotState>>,
    handler: RwLock<Option<Handler>>,
}

impl TurnSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the receiver of injected user messages.
    pub fn set_handler(&self, handler: impl Fn(QueuedUserMessage) + Send + Sync + 'static) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn has_handler(&self) -> bool {
        self.handler().is_some()
    }

    /// Mark a turn in progress until the guard drops.
    pub fn begin(self: &Arc<Self>, conversation_id: impl Into<String>) -> TurnGuard {
        let conversation_id = conversation_id.into();
        self.lock()
            .entry(conversation_id.clone())
            .or_default()
            .active += 1;
        TurnGuard {
            slots: Arc::clone(self),
            conversation_id,
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.lock()
            .get(conversation_id)
            .is_some_and(|slot| slot.active > 0)
    }

    /// Deliver now, or park in the slot if a turn is in progress.
    pub fn submit(&self, message: QueuedUserMessage) -> SubmitOutcome {
        let Some(handler) = self.handler() else {
            return SubmitOutcome::NoHandler;
        };
        {
            let mut slots = self.lock();
            if let Some(slot) = slots.get_mut(&message.conversation_id) {
                if slot.active > 0 {
                    let conversation = message.conversation_id.clone();
                    if slot.pending.replace(message).is_some() {
                        debug!(conversation = %conversation, "queued user message replaced");
                    }
                    return SubmitOutcome::Queued;
                }
            }
        }
        handler(message);
        SubmitOutcome::Delivered
    }

    fn settle(&self, conversation_id: &str) {
        let pending = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(conversation_id) else {
                return;
            };
            slot.active = slot.active.saturating_sub(1);
            if slot.active > 0 {
                return;
            }
            slots.remove(conversation_id).and_then(|slot| slot.pending)
        };
        if let Some(message) = pending {
            debug!(conversation = %conversation_id, "flushing queued user message");
            if let Some(handler) = self.handler() {
                handler(message);
            }
        }
    }

    fn handler(&self) -> Option<Handler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SlotState>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a conversation's turn marked in progress. Dropping it flushes any
/// queued message, whether the turn finished, failed, or was abandoned.
pub struct TurnGuard {
    slots: Arc<TurnSlots>,
    conversation_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.slots.settle(&self.conversation_id);
    }
}
