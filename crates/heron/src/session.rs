use tokio_util::sync::CancellationToken;

use crate::models::message::Conversation;

/// One conversational run: the append-only message log plus the
/// cancellation signal for aborting it mid-turn. Created per run and
/// discarded at the end; nothing persists across runs.
pub struct Session {
    conversation: Conversation,
    cancel: CancellationToken,
}

impl Session {
    pub fn new() -> Self {
        Self::with_cancel_token(CancellationToken::new())
    }

    /// Use an externally held token so a caller can abort the session from
    /// outside (e.g. on ctrl-c).
    pub fn with_cancel_token(cancel: CancellationToken) -> Self {
        Session {
            conversation: Conversation::new(),
            cancel,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub(crate) fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
