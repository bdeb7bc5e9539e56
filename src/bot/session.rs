//! Session driver: owns the long-poll loop, the update offset, and the
//! per-conversation state map.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bot::api::{BotApi, Update};
use crate::bot::machine::{ConversationState, Inbound, StateMachine};

/// Pause before retrying a failed or rejected getUpdates call.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(10);

pub struct BotSession<C> {
    client: C,
    machine: StateMachine,
    /// Conversation state per (chat_id, telegram_user_id). Entries default
    /// to Start and live only as long as the process.
    states: HashMap<(i64, i64), ConversationState>,
    /// Smallest update_id not yet consumed.
    offset: i64,
    poll_timeout_secs: u64,
}

impl<C: BotApi> BotSession<C> {
    pub fn new(client: C, machine: StateMachine, poll_timeout_secs: u64) -> Self {
        Self {
            client,
            machine,
            states: HashMap::new(),
            offset: 0,
            poll_timeout_secs,
        }
    }

    /// Poll and dispatch until the process is killed. Fetch failures back
    /// off and retry; nothing here returns.
    pub async fn run(&mut self) {
        info!("Polling for updates (timeout {}s)", self.poll_timeout_secs);

        loop {
            let batch = match self.client.get_updates(self.offset, self.poll_timeout_secs).await {
                Ok(resp) if resp.ok => resp.result,
                Ok(resp) => {
                    warn!(
                        "getUpdates rejected: {}",
                        resp.description.as_deref().unwrap_or("no description")
                    );
                    tokio::time::sleep(FETCH_RETRY_DELAY).await;
                    continue;
                }
                Err(e) => {
                    warn!("getUpdates failed: {e}");
                    tokio::time::sleep(FETCH_RETRY_DELAY).await;
                    continue;
                }
            };

            self.process_batch(batch).await;
        }
    }

    /// Handle one batch in order. The offset moves past every update before
    /// it is dispatched, so a failing update is never re-fetched.
    pub async fn process_batch(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = update.update_id + 1;

            let Some(message) = update.message else {
                continue;
            };
            let Some(sender) = message.from else {
                continue;
            };

            info!(
                "📨 {} ({}) in chat {}: {:?}",
                sender.first_name, sender.id, message.chat.id, message.text
            );

            let key = (message.chat.id, sender.id);
            let state = self.states.get(&key).copied().unwrap_or(ConversationState::Start);
            let inbound = Inbound {
                chat_id: message.chat.id,
                sender_id: sender.id,
                text: &message.text,
            };

            match self.machine.dispatch(state, &inbound) {
                Ok(outcome) => {
                    for reply in &outcome.replies {
                        self.send(inbound.chat_id, reply).await;
                    }
                    self.states.insert(key, outcome.next);
                }
                Err(e) => {
                    // Fatal to this update only; the conversation stays
                    // where it was and the loop moves on.
                    error!("update {} dispatch failed: {e}", update.update_id);
                }
            }
        }
    }

    async fn send(&self, chat_id: i64, text: &str) {
        match self.client.send_message(chat_id, text).await {
            Ok(resp) if !resp.ok => {
                warn!(
                    "sendMessage to chat {chat_id} rejected: {}",
                    resp.description.as_deref().unwrap_or("no description")
                );
            }
            Ok(_) => {}
            Err(e) => warn!("sendMessage to chat {chat_id} failed: {e}"),
        }
    }

    #[cfg(test)]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    #[cfg(test)]
    pub fn conversation_state(&self, chat_id: i64, telegram_user_id: i64) -> ConversationState {
        self.states
            .get(&(chat_id, telegram_user_id))
            .copied()
            .unwrap_or(ConversationState::Start)
    }
}
