//! Inbound event model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// The author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    /// Group card (display name inside a group), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
}

impl Sender {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            nickname: String::new(),
            card: None,
        }
    }
}

/// Where a message was posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Scene {
    Private,
    Group {
        group_id: i64,
        #[serde(default)]
        group_name: String,
    },
}

/// One inbound private or group message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub message_id: String,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub self_id: i64,
    pub sender: Sender,
    #[serde(flatten)]
    pub scene: Scene,
    pub message: Message,
    #[serde(default)]
    pub raw_message: String,
}

impl MessageEvent {
    /// Creates a private message event.
    pub fn private(user_id: i64, message: impl Into<Message>) -> Self {
        Self::new(Scene::Private, user_id, message.into())
    }

    /// Creates a group message event.
    pub fn group(group_id: i64, user_id: i64, message: impl Into<Message>) -> Self {
        Self::new(
            Scene::Group {
                group_id,
                group_name: String::new(),
            },
            user_id,
            message.into(),
        )
    }

    fn new(scene: Scene, user_id: i64, message: Message) -> Self {
        Self {
            message_id: String::new(),
            time: 0,
            self_id: 0,
            sender: Sender::new(user_id),
            scene,
            raw_message: message.to_string(),
            message,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.sender.nickname = nickname.into();
        self
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    pub fn with_self_id(mut self, self_id: i64) -> Self {
        self.self_id = self_id;
        self
    }

    pub fn user_id(&self) -> i64 {
        self.sender.user_id
    }

    /// Returns the group id for group messages.
    pub fn group_id(&self) -> Option<i64> {
        match self.scene {
            Scene::Group { group_id, .. } => Some(group_id),
            Scene::Private => None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.scene, Scene::Private)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.scene, Scene::Group { .. })
    }
}

/// Selects which inbound events a route listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    /// Every message, private or group.
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "message.private")]
    PrivateMessage,
    #[serde(rename = "message.group")]
    GroupMessage,
}

impl EventClass {
    /// Returns true if events of this class include `event`.
    pub fn accepts(self, event: &MessageEvent) -> bool {
        match self {
            Self::Message => true,
            Self::PrivateMessage => event.is_private(),
            Self::GroupMessage => event.is_group(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::PrivateMessage => "message.private",
            Self::GroupMessage => "message.group",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Element;
    use serde_json::json;

    #[test]
    fn test_event_class_accepts() {
        let private = MessageEvent::private(1, "hi");
        let group = MessageEvent::group(100, 1, "hi");

        assert!(EventClass::Message.accepts(&private));
        assert!(EventClass::Message.accepts(&group));
        assert!(EventClass::PrivateMessage.accepts(&private));
        assert!(!EventClass::PrivateMessage.accepts(&group));
        assert!(EventClass::GroupMessage.accepts(&group));
        assert!(!EventClass::GroupMessage.accepts(&private));
    }

    #[test]
    fn test_group_id() {
        assert_eq!(MessageEvent::group(100, 1, "x").group_id(), Some(100));
        assert_eq!(MessageEvent::private(1, "x").group_id(), None);
    }

    #[test]
    fn test_deserialize_group_event() {
        let event: MessageEvent = serde_json::from_value(json!({
            "message_id": "m1",
            "time": 1700000000,
            "message_type": "group",
            "group_id": 20002,
            "sender": {"user_id": 10001, "nickname": "alice"},
            "message": [{"type": "text", "data": {"text": "ping"}}]
        }))
        .unwrap();

        assert_eq!(event.group_id(), Some(20002));
        assert_eq!(event.user_id(), 10001);
        assert_eq!(event.message.elements(), &[Element::text("ping")]);
    }

    #[test]
    fn test_raw_message_is_rendered() {
        let event = MessageEvent::private(1, Message::new().with(Element::at(2)));
        assert_eq!(event.raw_message, "@2");
    }
}
