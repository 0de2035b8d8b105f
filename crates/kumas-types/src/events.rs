use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ChatSummary;
use crate::models::{ChatId, Message};

/// Events pushed over the WebSocket gateway. The channel is push-only; the
/// server never reads commands from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Greeting sent as soon as the connection is registered
    Hello {
        connection_id: Uuid,
        message: String,
    },

    /// A message was committed to a chat the receiver is a member of
    MessageCreate { chat_id: ChatId, message: Message },

    /// A pairwise chat was opened with the receiver as a member
    ChatCreate { chat: ChatSummary },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserSummary;

    #[test]
    fn test_event_wire_shape() {
        let event = GatewayEvent::MessageCreate {
            chat_id: 10,
            message: Message {
                id: 100,
                chat_id: 10,
                author: UserSummary { id: 1, name: "heungbu".into() },
                content: Some("hi".into()),
                image: None,
                deleted: false,
                created_at: chrono::Utc::now(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MessageCreate");
        assert_eq!(json["data"]["chat_id"], 10);
        assert_eq!(json["data"]["message"]["content"], "hi");
    }
}
