//! The messaging-platform client contract.
//!
//! Cobalt does not implement any chat protocol. The embedding application
//! supplies a [`Client`] that can send messages, and feeds inbound
//! [`MessageEvent`]s to the runtime.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::event::{MessageEvent, Scene};
use crate::message::{Element, Message};

/// Receipt for a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
}

/// Outbound half of a messaging-platform session.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// The account this client is logged in as.
    fn self_id(&self) -> i64;

    /// Display name of the logged-in account.
    fn nickname(&self) -> String {
        String::new()
    }

    async fn send_private_msg(&self, user_id: i64, message: Message) -> ClientResult<SentMessage>;

    async fn send_group_msg(&self, group_id: i64, message: Message) -> ClientResult<SentMessage>;

    /// Replies in the scene `event` was posted in.
    ///
    /// With `quote` set, the reply references the original message.
    async fn reply(
        &self,
        event: &MessageEvent,
        message: Message,
        quote: bool,
    ) -> ClientResult<SentMessage> {
        let mut message = message;
        if quote && !event.message_id.is_empty() {
            message.prepend(Element::reply(event.message_id.clone()));
        }
        match event.scene {
            Scene::Private => self.send_private_msg(event.user_id(), message).await,
            Scene::Group { group_id, .. } => self.send_group_msg(group_id, message).await,
        }
    }
}

/// Shared, type-erased client.
pub type BoxedClient = Arc<dyn Client>;
