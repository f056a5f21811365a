//! Message model.
//!
//! A [`Message`] is an ordered sequence of [`Element`]s. Elements are never
//! mutated once received; predicates only filter and map them.
//!
//! Elements serialize with an adjacent tag, matching the shape most chat
//! bridges already use:
//!
//! ```json
//! [{"type": "text", "data": {"text": "hello "}}, {"type": "at", "data": {"qq": 10001}}]
//! ```
//!
//! # Example
//!
//! ```rust
//! use cobalt_core::{Element, ElementKind, Message};
//!
//! let msg = Message::new()
//!     .with(Element::text(" /roll "))
//!     .with(Element::at(10001))
//!     .with(Element::text(" 3d6 "));
//!
//! assert_eq!(msg.plain_text(), "/roll3d6");
//! assert_eq!(msg.count(ElementKind::At), 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseKindError;

// ============================================================================
// Mention target
// ============================================================================

/// Who an `at` element addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtTarget {
    /// A single user.
    User(i64),
    /// Everyone in the group.
    All,
}

impl AtTarget {
    /// Returns the addressed user, or `None` for `@all`.
    pub fn user_id(self) -> Option<i64> {
        match self {
            Self::User(id) => Some(id),
            Self::All => None,
        }
    }
}

impl Serialize for AtTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::User(id) => serializer.serialize_i64(*id),
            Self::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for AtTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TargetVisitor;

        impl Visitor<'_> for TargetVisitor {
            type Value = AtTarget;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a user id or the string \"all\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<AtTarget, E> {
                Ok(AtTarget::User(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<AtTarget, E> {
                i64::try_from(v)
                    .map(AtTarget::User)
                    .map_err(|_| E::custom("user id out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<AtTarget, E> {
                if v == "all" {
                    return Ok(AtTarget::All);
                }
                v.parse()
                    .map(AtTarget::User)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

// ============================================================================
// Element
// ============================================================================

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Element {
    /// Plain text.
    Text { text: String },
    /// Built-in emoji.
    Face { id: i32 },
    /// Image, referenced by file id and optionally a download URL.
    Image {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Voice clip.
    Record { file: String },
    /// Video clip.
    Video { file: String },
    /// Mention.
    At { qq: AtTarget },
    /// Quote of an earlier message.
    Reply { id: String },
    /// Currency gift.
    RedPacket { title: String },
    /// Poke / nudge.
    Poke { id: i32 },
    /// Dice magic emoji.
    Dice {
        #[serde(default)]
        value: u8,
    },
    /// Rock-paper-scissors magic emoji.
    Rps {
        #[serde(default)]
        value: u8,
    },
    /// Shared location.
    Location {
        lat: f64,
        lon: f64,
        #[serde(default)]
        address: String,
    },
    /// Link share card.
    Share { url: String, title: String },
    /// File transfer.
    File { name: String, fid: String },
    /// Raw JSON card.
    Json { data: String },
    /// Raw XML card.
    Xml { data: String },
}

impl Element {
    /// Creates a text element.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an image element from a file id or URL.
    pub fn image(file: impl Into<String>) -> Self {
        Self::Image {
            file: file.into(),
            url: None,
        }
    }

    /// Creates a mention of one user.
    pub fn at(user_id: i64) -> Self {
        Self::At {
            qq: AtTarget::User(user_id),
        }
    }

    /// Creates a mention of everyone.
    pub fn at_all() -> Self {
        Self::At { qq: AtTarget::All }
    }

    /// Creates a face element.
    pub fn face(id: i32) -> Self {
        Self::Face { id }
    }

    /// Creates a quote of the message with the given id.
    pub fn reply(id: impl Into<String>) -> Self {
        Self::Reply { id: id.into() }
    }

    /// Returns the discriminant of this element.
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Text { .. } => ElementKind::Text,
            Self::Face { .. } => ElementKind::Face,
            Self::Image { .. } => ElementKind::Image,
            Self::Record { .. } => ElementKind::Record,
            Self::Video { .. } => ElementKind::Video,
            Self::At { .. } => ElementKind::At,
            Self::Reply { .. } => ElementKind::Reply,
            Self::RedPacket { .. } => ElementKind::RedPacket,
            Self::Poke { .. } => ElementKind::Poke,
            Self::Dice { .. } => ElementKind::Dice,
            Self::Rps { .. } => ElementKind::Rps,
            Self::Location { .. } => ElementKind::Location,
            Self::Share { .. } => ElementKind::Share,
            Self::File { .. } => ElementKind::File,
            Self::Json { .. } => ElementKind::Json,
            Self::Xml { .. } => ElementKind::Xml,
        }
    }

    /// Returns the text content if this is a text element.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns the mention target if this is an `at` element.
    pub fn as_at(&self) -> Option<AtTarget> {
        match self {
            Self::At { qq } => Some(*qq),
            _ => None,
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => f.write_str(text),
            Self::Face { id } => write!(f, "[face:{id}]"),
            Self::Image { file, .. } => write!(f, "[image:{file}]"),
            Self::Record { file } => write!(f, "[record:{file}]"),
            Self::Video { file } => write!(f, "[video:{file}]"),
            Self::At { qq: AtTarget::User(id) } => write!(f, "@{id}"),
            Self::At { qq: AtTarget::All } => f.write_str("@all"),
            Self::Reply { id } => write!(f, "[reply:{id}]"),
            Self::RedPacket { title } => write!(f, "[red packet:{title}]"),
            Self::Poke { id } => write!(f, "[poke:{id}]"),
            Self::Dice { value } => write!(f, "[dice:{value}]"),
            Self::Rps { value } => write!(f, "[rps:{value}]"),
            Self::Location { lat, lon, .. } => write!(f, "[location:{lat},{lon}]"),
            Self::Share { title, .. } => write!(f, "[share:{title}]"),
            Self::File { name, .. } => write!(f, "[file:{name}]"),
            Self::Json { .. } => f.write_str("[json]"),
            Self::Xml { .. } => f.write_str("[xml]"),
        }
    }
}

// ============================================================================
// ElementKind
// ============================================================================

/// Fieldless discriminant of [`Element`], used by shape predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    Face,
    Image,
    Record,
    Video,
    At,
    Reply,
    RedPacket,
    Poke,
    Dice,
    Rps,
    Location,
    Share,
    File,
    Json,
    Xml,
}

impl ElementKind {
    /// Every kind, in declaration order.
    pub const ALL: [ElementKind; 16] = [
        Self::Text,
        Self::Face,
        Self::Image,
        Self::Record,
        Self::Video,
        Self::At,
        Self::Reply,
        Self::RedPacket,
        Self::Poke,
        Self::Dice,
        Self::Rps,
        Self::Location,
        Self::Share,
        Self::File,
        Self::Json,
        Self::Xml,
    ];

    /// Returns the wire tag of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Face => "face",
            Self::Image => "image",
            Self::Record => "record",
            Self::Video => "video",
            Self::At => "at",
            Self::Reply => "reply",
            Self::RedPacket => "red_packet",
            Self::Poke => "poke",
            Self::Dice => "dice",
            Self::Rps => "rps",
            Self::Location => "location",
            Self::Share => "share",
            Self::File => "file",
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Vec<Element>);

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a message holding a single text element.
    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![Element::text(text)])
    }

    /// Appends an element, builder style.
    pub fn with(mut self, element: Element) -> Self {
        self.0.push(element);
        self
    }

    /// Appends an element.
    pub fn push(&mut self, element: Element) {
        self.0.push(element);
    }

    /// Inserts an element at the front.
    pub fn prepend(&mut self, element: Element) {
        self.0.insert(0, element);
    }

    pub fn elements(&self) -> &[Element] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates every text element, each trimmed of surrounding whitespace.
    ///
    /// This is the text that every text predicate inspects.
    pub fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter_map(Element::as_text)
            .map(str::trim)
            .collect()
    }

    /// Returns the set of element kinds present in this message.
    pub fn kinds(&self) -> BTreeSet<ElementKind> {
        self.0.iter().map(Element::kind).collect()
    }

    /// Iterates over the elements of one kind, preserving order.
    pub fn of_kind(&self, kind: ElementKind) -> impl Iterator<Item = &Element> {
        self.0.iter().filter(move |e| e.kind() == kind)
    }

    /// Counts the elements of one kind.
    pub fn count(&self, kind: ElementKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Returns every mention target in message order.
    pub fn mentions(&self) -> impl Iterator<Item = AtTarget> + '_ {
        self.0.iter().filter_map(Element::as_at)
    }
}

impl From<Vec<Element>> for Message {
    fn from(elements: Vec<Element>) -> Self {
        Self(elements)
    }
}

impl From<Element> for Message {
    fn from(element: Element) -> Self {
        Self(vec![element])
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl FromIterator<Element> for Message {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Message {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_trims_each_text_element() {
        let msg = Message::new()
            .with(Element::text("  hello "))
            .with(Element::image("a.png"))
            .with(Element::text(" world\n"));
        assert_eq!(msg.plain_text(), "helloworld");
    }

    #[test]
    fn test_plain_text_without_text_is_empty() {
        let msg = Message::from(Element::image("a.png"));
        assert_eq!(msg.plain_text(), "");
    }

    #[test]
    fn test_kinds_and_counts() {
        let msg = Message::new()
            .with(Element::text("x"))
            .with(Element::image("1"))
            .with(Element::image("2"));
        assert_eq!(
            msg.kinds(),
            BTreeSet::from([ElementKind::Text, ElementKind::Image])
        );
        assert_eq!(msg.count(ElementKind::Image), 2);
        assert_eq!(msg.count(ElementKind::At), 0);
    }

    #[test]
    fn test_element_wire_shape() {
        let value = serde_json::to_value(Element::at(10001)).unwrap();
        assert_eq!(value, json!({"type": "at", "data": {"qq": 10001}}));

        let all: Element =
            serde_json::from_value(json!({"type": "at", "data": {"qq": "all"}})).unwrap();
        assert_eq!(all, Element::at_all());

        let quoted: Element =
            serde_json::from_value(json!({"type": "at", "data": {"qq": "42"}})).unwrap();
        assert_eq!(quoted, Element::at(42));
    }

    #[test]
    fn test_message_deserializes_from_array() {
        let msg: Message = serde_json::from_value(json!([
            {"type": "text", "data": {"text": "hi"}},
            {"type": "red_packet", "data": {"title": "lucky"}}
        ]))
        .unwrap();
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.elements()[1].kind(), ElementKind::RedPacket);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("image".parse::<ElementKind>(), Ok(ElementKind::Image));
        assert_eq!("red_packet".parse::<ElementKind>(), Ok(ElementKind::RedPacket));
        assert!("sticker".parse::<ElementKind>().is_err());
    }

    #[test]
    fn test_mentions_preserve_order() {
        let msg = Message::new()
            .with(Element::at(2))
            .with(Element::text("hey"))
            .with(Element::at_all())
            .with(Element::at(1));
        let targets: Vec<_> = msg.mentions().collect();
        assert_eq!(targets, vec![AtTarget::User(2), AtTarget::All, AtTarget::User(1)]);
    }

    #[test]
    fn test_display() {
        let msg = Message::new()
            .with(Element::text("look "))
            .with(Element::at(7))
            .with(Element::face(14));
        assert_eq!(msg.to_string(), "look @7[face:14]");
    }
}
