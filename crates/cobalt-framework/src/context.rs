//! Per-event contexts.
//!
//! - [`ChainContext`] is what chain steps see: the event and the result bag
//!   of the current execution. Steps never talk to the client.
//! - [`EventContext`] is what handlers see: the event plus the client used
//!   to answer it.

use std::sync::Arc;

use cobalt_core::{BoxedClient, ClientResult, Message, MessageEvent, SentMessage};
use parking_lot::Mutex;

use crate::bag::ResultBag;

/// State of one chain execution.
pub struct ChainContext {
    event: Arc<MessageEvent>,
    bag: Mutex<ResultBag>,
}

impl ChainContext {
    pub fn new(event: Arc<MessageEvent>) -> Self {
        Self {
            event,
            bag: Mutex::new(ResultBag::new()),
        }
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    /// Concatenated, trimmed text of the message.
    pub fn text(&self) -> String {
        self.event.message.plain_text()
    }

    /// Snapshot of the bag as written so far.
    pub fn bag(&self) -> ResultBag {
        self.bag.lock().clone()
    }

    /// Merges a step's extracted values into the bag.
    pub fn merge(&self, delta: ResultBag) {
        self.bag.lock().merge(delta);
    }

    pub fn into_bag(self) -> ResultBag {
        self.bag.into_inner()
    }
}

/// An inbound event together with the client that received it.
#[derive(Clone)]
pub struct EventContext {
    event: Arc<MessageEvent>,
    client: BoxedClient,
    quote: bool,
}

impl EventContext {
    pub fn new(event: impl Into<Arc<MessageEvent>>, client: BoxedClient) -> Self {
        Self {
            event: event.into(),
            client,
            quote: false,
        }
    }

    /// Returns a copy whose replies quote the original message by default.
    pub fn with_quote(&self, quote: bool) -> Self {
        Self {
            quote,
            ..self.clone()
        }
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    pub(crate) fn shared_event(&self) -> Arc<MessageEvent> {
        Arc::clone(&self.event)
    }

    pub fn client(&self) -> &BoxedClient {
        &self.client
    }

    /// Whether replies quote the original message by default.
    pub fn quotes(&self) -> bool {
        self.quote
    }

    /// Replies in the scene the event came from.
    pub async fn reply(&self, message: impl Into<Message>) -> ClientResult<SentMessage> {
        self.client
            .reply(&self.event, message.into(), self.quote)
            .await
    }

    /// Replies, overriding the default quoting.
    pub async fn reply_with(
        &self,
        message: impl Into<Message>,
        quote: bool,
    ) -> ClientResult<SentMessage> {
        self.client.reply(&self.event, message.into(), quote).await
    }
}
