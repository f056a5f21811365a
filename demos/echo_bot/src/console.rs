//! A client that talks to the terminal.
//!
//! Input lines:
//!
//! ```text
//! p <user> <text>            private message from <user>
//! g <group> <user> <text>    group message
//! <text>                     private message from the default user
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cobalt::core::{Client, ClientResult, Message, MessageEvent, SentMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct ConsoleClient {
    self_id: i64,
    next_id: AtomicU64,
}

impl ConsoleClient {
    pub fn new(self_id: i64) -> Self {
        Self {
            self_id,
            next_id: AtomicU64::new(1),
        }
    }

    fn receipt(&self) -> SentMessage {
        SentMessage {
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
        }
    }
}

#[async_trait]
impl Client for ConsoleClient {
    fn self_id(&self) -> i64 {
        self.self_id
    }

    fn nickname(&self) -> String {
        "echo-bot".to_string()
    }

    async fn send_private_msg(&self, user_id: i64, message: Message) -> ClientResult<SentMessage> {
        println!("[-> user {user_id}] {}", message.plain_text());
        Ok(self.receipt())
    }

    async fn send_group_msg(&self, group_id: i64, message: Message) -> ClientResult<SentMessage> {
        println!("[-> group {group_id}] {}", message.plain_text());
        Ok(self.receipt())
    }
}

/// Parses one console line into an event.
pub fn parse_line(line: &str, default_user: i64, self_id: i64) -> Option<MessageEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut words = line.splitn(4, ' ');
    let event = match words.next()? {
        "p" => {
            let user = words.next()?.parse().ok()?;
            let rest: Vec<&str> = words.collect();
            MessageEvent::private(user, rest.join(" "))
        }
        "g" => {
            let group = words.next()?.parse().ok()?;
            let user = words.next()?.parse().ok()?;
            MessageEvent::group(group, user, words.next().unwrap_or_default())
        }
        _ => MessageEvent::private(default_user, line),
    };
    Some(event.with_self_id(self_id))
}

/// Feeds stdin lines into `events` until EOF.
pub async fn read_stdin(events: mpsc::Sender<MessageEvent>, default_user: i64, self_id: i64) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = parse_line(&line, default_user, self_id) else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let event = parse_line("g 500 7 /echo hi there", 1, 99).unwrap();
        assert_eq!(event.group_id(), Some(500));
        assert_eq!(event.user_id(), 7);
        assert_eq!(event.message.plain_text(), "/echo hi there");
        assert_eq!(event.self_id, 99);

        let event = parse_line("p 42 #cobalt -c list", 1, 99).unwrap();
        assert!(event.is_private());
        assert_eq!(event.user_id(), 42);
        assert_eq!(event.message.plain_text(), "#cobalt -c list");

        let event = parse_line("/ping", 1, 99).unwrap();
        assert_eq!(event.user_id(), 1);

        assert!(parse_line("   ", 1, 99).is_none());
        assert!(parse_line("g nope 7 hi", 1, 99).is_none());
    }
}
