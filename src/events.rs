//! The in-process event bus: every mutation that has a mutation-hook or SSE
//! audience publishes one `AwebEvent` here. Grounded on the teacher's
//! `events.rs`/`ChatEvent`, generalized from a single `NewMessage` variant to
//! the full set spec §4.10 names.

use tokio::sync::broadcast;

use crate::models::ChatMessage;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum AwebEvent {
    #[serde(rename = "agent.created")]
    AgentCreated { project_id: String, agent_id: String, alias: String },
    #[serde(rename = "agent.deregistered")]
    AgentDeregistered { project_id: String, agent_id: String },
    #[serde(rename = "message.sent")]
    MessageSent { project_id: String, message_id: String, from_agent_id: String, to_agent_id: String },
    #[serde(rename = "message.acknowledged")]
    MessageAcknowledged { project_id: String, to_agent_id: String },
    #[serde(rename = "chat.message_sent")]
    ChatMessageSent {
        project_id: String,
        session_id: String,
        #[serde(flatten)]
        message: ChatMessage,
    },
    #[serde(rename = "reservation.acquired")]
    ReservationAcquired { project_id: String, resource_key: String, holder_agent_id: String },
    #[serde(rename = "reservation.released")]
    ReservationReleased { project_id: String, resource_key: String },
    #[serde(rename = "chat.read_receipt")]
    ReadReceiptUpdated {
        project_id: String,
        session_id: String,
        agent_id: String,
        reader_alias: String,
        up_to_message_id: String,
        timestamp: String,
        extends_wait_seconds: i64,
    },
}

pub struct EventBus {
    pub sender: broadcast::Sender<AwebEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn publish(&self, event: AwebEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}
