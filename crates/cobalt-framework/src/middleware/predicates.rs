//! Built-in predicates and extractors.
//!
//! Identity and presence filters ([`Prefix`], [`Equal`], [`Pattern`],
//! [`Mention`], [`SenderIn`], [`GroupIn`]) halt silently on a non-match so
//! that unrelated chains can share one event stream. Shape validators
//! ([`KindsExact`], [`KindsSome`], [`ImageCount`]) fail with a reason, since
//! they run after the event was already recognised as addressed to the
//! chain.
//!
//! Every step writes its extracted value under its own name unless a key is
//! set with `.key(..)`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use cobalt_core::{AtTarget, Element, ElementKind, Message};
use regex::Regex;
use serde_json::{Value, json};

use super::step::{Outcome, Step};
use crate::context::ChainContext;

fn elements_json<'a>(elements: impl Iterator<Item = &'a Element>) -> Value {
    Value::Array(
        elements
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect(),
    )
}

fn group_by_kind(message: &Message, kinds: &BTreeSet<ElementKind>) -> Value {
    let grouped: BTreeMap<&str, Value> = kinds
        .iter()
        .map(|kind| (kind.as_str(), elements_json(message.of_kind(*kind))))
        .collect();
    json!(grouped)
}

fn join_kinds(kinds: &BTreeSet<ElementKind>) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Text predicates
// ============================================================================

/// Matches text starting with one of the prefixes. The first listed prefix
/// that matches wins; the trimmed remainder is extracted.
pub struct Prefix {
    prefixes: Vec<String>,
    key: String,
}

impl Prefix {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            key: "prefix".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for Prefix {
    fn name(&self) -> &str {
        "prefix"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let text = ctx.text();
        self.prefixes
            .iter()
            .find_map(|p| text.strip_prefix(p.as_str()))
            .map_or(Outcome::Halt, |rest| {
                Outcome::extract(&self.key, rest.trim())
            })
    }
}

/// Matches text equal to one of the literals.
pub struct Equal {
    literals: Vec<String>,
    key: String,
}

impl Equal {
    pub fn new<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            literals: literals.into_iter().map(Into::into).collect(),
            key: "equal".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for Equal {
    fn name(&self) -> &str {
        "equal"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let text = ctx.text();
        if self.literals.iter().any(|l| *l == text) {
            Outcome::extract(&self.key, text)
        } else {
            Outcome::Halt
        }
    }
}

/// Matches text against a regular expression.
///
/// Extracts the capture groups as an array: index 0 is the whole match,
/// unmatched optional groups are `null`.
pub struct Pattern {
    regex: Regex,
    key: String,
}

impl Pattern {
    pub fn new(regex: Regex) -> Self {
        Self {
            regex,
            key: "regex".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for Pattern {
    fn name(&self) -> &str {
        "regex"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let text = ctx.text();
        let Some(captures) = self.regex.captures(&text) else {
            return Outcome::Halt;
        };
        let groups: Vec<Value> = captures
            .iter()
            .map(|m| m.map_or(Value::Null, |m| Value::from(m.as_str())))
            .collect();
        Outcome::extract(&self.key, groups)
    }
}

// ============================================================================
// Identity predicates
// ============================================================================

/// Matches messages mentioning any of the given users. `@all` never counts.
///
/// Extracts the matched ids, deduplicated, in message order.
pub struct Mention {
    targets: BTreeSet<i64>,
    key: String,
}

impl Mention {
    pub fn new(targets: impl IntoIterator<Item = i64>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            key: "mention".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for Mention {
    fn name(&self) -> &str {
        "mention"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let mut matched: Vec<i64> = Vec::new();
        for target in ctx.event().message.mentions() {
            if let AtTarget::User(id) = target
                && self.targets.contains(&id)
                && !matched.contains(&id)
            {
                matched.push(id);
            }
        }
        if matched.is_empty() {
            Outcome::Halt
        } else {
            Outcome::extract(&self.key, matched)
        }
    }
}

/// Matches messages whose sender is in the allow-set.
pub struct SenderIn {
    users: BTreeSet<i64>,
    key: String,
}

impl SenderIn {
    pub fn new(users: impl IntoIterator<Item = i64>) -> Self {
        Self {
            users: users.into_iter().collect(),
            key: "sender".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for SenderIn {
    fn name(&self) -> &str {
        "sender"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let sender = &ctx.event().sender;
        if self.users.contains(&sender.user_id) {
            Outcome::extract(
                &self.key,
                json!({ "user_id": sender.user_id, "nickname": sender.nickname }),
            )
        } else {
            Outcome::Halt
        }
    }
}

/// Matches group messages posted in one of the groups. Private messages
/// never match.
pub struct GroupIn {
    groups: BTreeSet<i64>,
    key: String,
}

impl GroupIn {
    pub fn new(groups: impl IntoIterator<Item = i64>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
            key: "group".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for GroupIn {
    fn name(&self) -> &str {
        "group"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        match ctx.event().group_id() {
            Some(id) if self.groups.contains(&id) => Outcome::extract(&self.key, id),
            _ => Outcome::Halt,
        }
    }
}

// ============================================================================
// Shape validators
// ============================================================================

/// Requires the message's element kinds to be exactly the given set.
pub struct KindsExact {
    kinds: BTreeSet<ElementKind>,
    key: String,
}

impl KindsExact {
    pub fn new(kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            key: "type".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for KindsExact {
    fn name(&self) -> &str {
        "type"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let message = &ctx.event().message;
        let present = message.kinds();

        if let Some(extra) = present.difference(&self.kinds).next() {
            return Outcome::fail(format!(
                "unexpected type '{extra}' (expected: {})",
                join_kinds(&self.kinds)
            ));
        }
        if let Some(missing) = self.kinds.difference(&present).next() {
            return Outcome::fail(format!(
                "missing type '{missing}' (expected: {})",
                join_kinds(&self.kinds)
            ));
        }
        Outcome::extract(&self.key, group_by_kind(message, &self.kinds))
    }
}

/// Requires at least one element of each given kind.
pub struct KindsSome {
    kinds: BTreeSet<ElementKind>,
    key: String,
}

impl KindsSome {
    pub fn new(kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            key: "some".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for KindsSome {
    fn name(&self) -> &str {
        "some"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let message = &ctx.event().message;
        let present = message.kinds();

        match self.kinds.difference(&present).next() {
            Some(missing) => Outcome::fail(format!("missing type '{missing}'")),
            None => Outcome::extract(&self.key, group_by_kind(message, &self.kinds)),
        }
    }
}

/// Requires at least `min` images. Extracts the image elements.
pub struct ImageCount {
    min: usize,
    key: String,
}

impl ImageCount {
    pub fn new(min: usize) -> Self {
        Self {
            min: min.max(1),
            key: "image".into(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl Step for ImageCount {
    fn name(&self) -> &str {
        "image"
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        let message = &ctx.event().message;
        let count = message.count(ElementKind::Image);
        if count >= self.min {
            Outcome::extract(&self.key, elements_json(message.of_kind(ElementKind::Image)))
        } else {
            Outcome::fail(format!(
                "expected at least {} image(s), got {count}",
                self.min
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_core::MessageEvent;
    use std::sync::Arc;

    fn ctx(event: MessageEvent) -> ChainContext {
        ChainContext::new(Arc::new(event))
    }

    fn private(message: impl Into<Message>) -> ChainContext {
        ctx(MessageEvent::private(10001, message))
    }

    fn extracted(outcome: Outcome, key: &str) -> Value {
        match outcome {
            Outcome::Continue(bag) => bag.raw(key).cloned().unwrap_or(Value::Null),
            other => panic!("expected continue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prefix_first_match_wins() {
        let step = Prefix::new(["/", "/e"]);
        let outcome = step.check(&private("/echo  hi ")).await;
        assert_eq!(extracted(outcome, "prefix"), json!("echo  hi"));
    }

    #[tokio::test]
    async fn test_prefix_concatenates_text_elements() {
        let message = Message::new()
            .with(Element::text(" #bot"))
            .with(Element::image("x"))
            .with(Element::text(" list "));
        let outcome = Prefix::new(["#bot"]).check(&private(message)).await;
        assert_eq!(extracted(outcome, "prefix"), json!("list"));
    }

    #[tokio::test]
    async fn test_prefix_halts() {
        let outcome = Prefix::new(["/"]).check(&private("hello")).await;
        assert_eq!(outcome, Outcome::Halt);
    }

    #[tokio::test]
    async fn test_equal() {
        let step = Equal::new(["ping", "pong"]).key("word");
        assert_eq!(extracted(step.check(&private("pong")).await, "word"), json!("pong"));
        assert_eq!(step.check(&private("ping!")).await, Outcome::Halt);
    }

    #[tokio::test]
    async fn test_regex_captures() {
        let step = Pattern::new(Regex::new(r"^roll (\d+)d(\d+)(?: \+(\d+))?$").unwrap());
        let outcome = step.check(&private("roll 3d6")).await;
        assert_eq!(
            extracted(outcome, "regex"),
            json!(["roll 3d6", "3", "6", null])
        );
        assert_eq!(step.check(&private("roll")).await, Outcome::Halt);
    }

    #[tokio::test]
    async fn test_mention_dedups_and_ignores_all() {
        let message = Message::new()
            .with(Element::at_all())
            .with(Element::at(2))
            .with(Element::at(3))
            .with(Element::at(2));
        let outcome = Mention::new([2, 3, 4]).check(&private(message)).await;
        assert_eq!(extracted(outcome, "mention"), json!([2, 3]));

        let only_all = Message::from(Element::at_all());
        assert_eq!(
            Mention::new([2]).check(&private(only_all)).await,
            Outcome::Halt
        );
    }

    #[tokio::test]
    async fn test_sender() {
        let step = SenderIn::new([10001]);
        let outcome = step
            .check(&ctx(MessageEvent::private(10001, "x").with_nickname("alice")))
            .await;
        assert_eq!(
            extracted(outcome, "sender"),
            json!({"user_id": 10001, "nickname": "alice"})
        );
        assert_eq!(
            step.check(&ctx(MessageEvent::private(2, "x"))).await,
            Outcome::Halt
        );
    }

    #[tokio::test]
    async fn test_group() {
        let step = GroupIn::new([500]);
        assert_eq!(
            extracted(step.check(&ctx(MessageEvent::group(500, 1, "x"))).await, "group"),
            json!(500)
        );
        assert_eq!(
            step.check(&ctx(MessageEvent::group(501, 1, "x"))).await,
            Outcome::Halt
        );
        assert_eq!(
            step.check(&ctx(MessageEvent::private(1, "x"))).await,
            Outcome::Halt
        );
    }

    #[tokio::test]
    async fn test_type_exact() {
        let step = KindsExact::new([ElementKind::Text, ElementKind::Image]);

        let ok = Message::new()
            .with(Element::text("look"))
            .with(Element::image("cat.png"));
        let grouped = extracted(step.check(&private(ok)).await, "type");
        assert_eq!(grouped["text"], json!([{"type": "text", "data": {"text": "look"}}]));
        assert_eq!(grouped["image"].as_array().map(Vec::len), Some(1));

        let extra = Message::new()
            .with(Element::text("look"))
            .with(Element::image("cat.png"))
            .with(Element::at(3));
        match step.check(&private(extra)).await {
            Outcome::Fail(reason) => {
                assert!(reason.contains("unexpected type"));
                assert!(reason.contains("'at'"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        match step.check(&private("only text")).await {
            Outcome::Fail(reason) => assert!(reason.starts_with("missing type 'image'")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_type_some() {
        let step = KindsSome::new([ElementKind::Image]);
        let message = Message::new()
            .with(Element::text("a"))
            .with(Element::image("1"))
            .with(Element::image("2"));
        let grouped = extracted(step.check(&private(message)).await, "some");
        assert_eq!(grouped["image"].as_array().map(Vec::len), Some(2));
        assert!(grouped.get("text").is_none());

        assert!(matches!(
            step.check(&private("text only")).await,
            Outcome::Fail(_)
        ));
    }

    #[tokio::test]
    async fn test_image_count() {
        let step = ImageCount::new(2);
        let one = Message::from(Element::image("1"));
        match step.check(&private(one)).await {
            Outcome::Fail(reason) => assert_eq!(reason, "expected at least 2 image(s), got 1"),
            other => panic!("expected failure, got {other:?}"),
        }

        let two = Message::new()
            .with(Element::image("1"))
            .with(Element::image("2"));
        let images = extracted(step.check(&private(two)).await, "image");
        assert_eq!(images.as_array().map(Vec::len), Some(2));
    }
}
