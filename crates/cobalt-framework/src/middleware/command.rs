//! Command-line style option parsing over message text.
//!
//! The concatenated text is split shell-style and parsed with a
//! [`clap::Command`] generated from a declared option schema:
//!
//! ```rust,ignore
//! let step = CommandStep::new([
//!     CommandOption::new("count").alias("c").kind(ArgKind::Number).required(),
//!     CommandOption::new("name").alias("n").default("world"),
//! ]);
//! // "/greet -c 3"  →  bag["command"] = {"count": 3, "name": "world", "_": ["/greet"]}
//! ```
//!
//! `--help` aborts the chain with a [`Help`](crate::MiddlewareErrorKind::Help)
//! error carrying the usage text.

use std::fmt;

use async_trait::async_trait;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Number, Value};

use super::{Middleware, Next};
use crate::bag::ResultBag;
use crate::context::ChainContext;
use crate::error::MiddlewareError;

const STEP_NAME: &str = "command";
const HELP_ID: &str = "help";
const POSITIONAL_ID: &str = "_";

/// Splits text into arguments, honouring single and double quotes.
///
/// Backslash escapes the next character inside double quotes.
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut quoted = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => escape_next = true,
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

// ============================================================================
// Schema
// ============================================================================

/// Expected kind of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared option.
#[derive(Debug, Clone)]
pub struct CommandOption {
    name: String,
    alias: Option<String>,
    description: Option<String>,
    required: bool,
    kind: Option<ArgKind>,
    default: Option<Value>,
}

impl CommandOption {
    /// Declares `--name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            description: None,
            required: false,
            kind: None,
            default: None,
        }
    }

    /// A one-character alias becomes `-c`; longer aliases become `--alias`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn kind(mut self, kind: ArgKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Value used when the option is absent.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone()).long(self.name.clone());

        if let Some(alias) = &self.alias {
            let mut chars = alias.chars();
            arg = match (chars.next(), chars.next()) {
                (Some(c), None) => arg.short(c),
                _ => arg.visible_alias(alias.clone()),
            };
        }

        let mut help = self.description.clone().unwrap_or_default();
        if self.required {
            help.push_str(" (required)");
        }
        if let Some(kind) = self.kind {
            help.push_str(&format!(" ({kind})"));
        }
        if let Some(default) = &self.default {
            help.push_str(&format!(" (default: {default})"));
        }
        arg = arg.help(help.trim().to_string());

        match self.kind {
            Some(ArgKind::Boolean) => arg.action(ArgAction::SetTrue),
            Some(ArgKind::Array) => arg.action(ArgAction::Append).num_args(1),
            _ => arg.action(ArgAction::Set).num_args(1),
        }
    }

    /// Reads this option out of the parse result.
    fn read(&self, matches: &ArgMatches) -> Result<Option<Value>, String> {
        let present = matches.value_source(&self.name) == Some(ValueSource::CommandLine);
        if !present {
            if let Some(default) = &self.default {
                return Ok(Some(default.clone()));
            }
            if self.required {
                return Err(format!("Missing required argument: {}", self.name));
            }
            return Ok(None);
        }

        let value = match self.kind {
            Some(ArgKind::Boolean) => Value::Bool(true),
            Some(ArgKind::Array) => Value::Array(
                matches
                    .try_get_many::<String>(&self.name)
                    .ok()
                    .flatten()
                    .into_iter()
                    .flatten()
                    .map(|s| coerce(s))
                    .collect(),
            ),
            kind => {
                let raw = matches
                    .try_get_one::<String>(&self.name)
                    .ok()
                    .flatten()
                    .cloned()
                    .unwrap_or_default();
                self.convert(kind, raw)?
            }
        };
        Ok(Some(value))
    }

    fn convert(&self, kind: Option<ArgKind>, raw: String) -> Result<Value, String> {
        match kind {
            None => Ok(coerce(&raw)),
            Some(ArgKind::String) => Ok(Value::String(raw)),
            Some(ArgKind::Number) => parse_number(&raw).ok_or_else(|| self.mismatch(&coerce(&raw))),
            Some(ArgKind::Object) => match serde_json::from_str::<Value>(&raw) {
                Ok(value @ Value::Object(_)) => Ok(value),
                Ok(other) => Err(self.mismatch(&other)),
                Err(_) => Err(self.mismatch(&Value::String(raw))),
            },
            Some(ArgKind::Boolean | ArgKind::Array) => Ok(Value::String(raw)),
        }
    }

    fn mismatch(&self, actual: &Value) -> String {
        let expected = self.kind.map_or("any", ArgKind::as_str);
        format!(
            "Expected type of {} is {expected}, but got {}",
            self.name,
            json_kind(actual)
        )
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Numeric-looking values become numbers, everything else stays a string.
fn coerce(raw: &str) -> Value {
    parse_number(raw).unwrap_or_else(|| Value::String(raw.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Step
// ============================================================================

/// Parses the message text against an option schema.
///
/// Extracts an object keyed by canonical option name. Positional tokens are
/// collected under `"_"` when present.
pub struct CommandStep {
    command: Command,
    options: Vec<CommandOption>,
    key: String,
}

impl CommandStep {
    pub fn new(options: impl IntoIterator<Item = CommandOption>) -> Self {
        let options: Vec<CommandOption> = options.into_iter().collect();
        let mut command = Command::new(STEP_NAME)
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true)
            .allow_negative_numbers(true)
            .args_override_self(true)
            .arg(
                Arg::new(HELP_ID)
                    .long("help")
                    .help("Print help")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(POSITIONAL_ID)
                    .value_name("ARGS")
                    .num_args(0..)
                    .action(ArgAction::Append),
            );
        for option in &options {
            command = command.arg(option.to_arg());
        }

        Self {
            command,
            options,
            key: STEP_NAME.into(),
        }
    }

    /// Sets the name shown at the top of the usage text.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.command = self.command.name(title.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn options(&self) -> &[CommandOption] {
        &self.options
    }

    /// Generated usage text.
    pub fn usage(&self) -> String {
        self.command.clone().render_help().to_string()
    }

    /// Parses `text` into the extracted argument map.
    pub fn parse(&self, text: &str) -> Result<Map<String, Value>, MiddlewareError> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(shell_split(text))
            .map_err(|e| MiddlewareError::rejected(STEP_NAME, clap_reason(&e)))?;

        if matches.get_flag(HELP_ID) {
            return Err(MiddlewareError::help(STEP_NAME, self.usage()));
        }

        let mut parsed = Map::new();
        for option in &self.options {
            let value = option
                .read(&matches)
                .map_err(|reason| MiddlewareError::rejected(STEP_NAME, reason))?;
            if let Some(value) = value {
                parsed.insert(option.name.clone(), value);
            }
        }

        let positional: Vec<Value> = matches
            .try_get_many::<String>(POSITIONAL_ID)
            .ok()
            .flatten()
            .into_iter()
            .flatten()
            .map(|s| Value::String(s.clone()))
            .collect();
        if !positional.is_empty() {
            parsed.insert(POSITIONAL_ID.into(), Value::Array(positional));
        }

        Ok(parsed)
    }
}

/// First line of a clap error, without the `error: ` prefix.
fn clap_reason(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

#[async_trait]
impl Middleware<ChainContext> for CommandStep {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn handle(
        &self,
        ctx: &ChainContext,
        next: Next<'_, ChainContext>,
    ) -> Result<(), MiddlewareError> {
        let parsed = self.parse(&ctx.text())?;
        let mut delta = ResultBag::new();
        delta.insert(self.key.clone(), Value::Object(parsed));
        ctx.merge(delta);
        next.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiddlewareErrorKind;
    use serde_json::json;

    fn schema() -> CommandStep {
        CommandStep::new([
            CommandOption::new("count")
                .alias("c")
                .description("How many")
                .kind(ArgKind::Number)
                .required(),
            CommandOption::new("name").alias("n").default("world"),
            CommandOption::new("loud").alias("l").kind(ArgKind::Boolean),
        ])
    }

    #[test]
    fn test_shell_split() {
        assert_eq!(shell_split("/echo hello world"), vec!["/echo", "hello", "world"]);
        assert_eq!(
            shell_split(r#"/echo "hello world" 'a b'"#),
            vec!["/echo", "hello world", "a b"]
        );
        assert_eq!(shell_split(r#"say "" x"#), vec!["say", "", "x"]);
        assert!(shell_split("  \t ").is_empty());
    }

    #[test]
    fn test_parse_numbers_and_defaults() {
        let parsed = schema().parse("/greet -c 5").unwrap();
        assert_eq!(parsed["count"], json!(5));
        assert_eq!(parsed["name"], json!("world"));
        assert_eq!(parsed["_"], json!(["/greet"]));
        assert!(!parsed.contains_key("loud"));
    }

    #[test]
    fn test_parse_long_names_and_flags() {
        let parsed = schema().parse("--count 1.5 --name 'Ada L' -l").unwrap();
        assert_eq!(parsed["count"], json!(1.5));
        assert_eq!(parsed["name"], json!("Ada L"));
        assert_eq!(parsed["loud"], json!(true));
        assert!(!parsed.contains_key("_"));
    }

    #[test]
    fn test_missing_required() {
        let err = schema().parse("/greet").unwrap_err();
        assert_eq!(err.kind(), MiddlewareErrorKind::Rejected);
        assert_eq!(err.step(), "command");
        assert_eq!(err.reason(), "Missing required argument: count");
    }

    #[test]
    fn test_required_with_default_is_satisfied() {
        let step = CommandStep::new([CommandOption::new("page").required().default(1)]);
        assert_eq!(step.parse("").unwrap()["page"], json!(1));
    }

    #[test]
    fn test_kind_mismatch() {
        let err = schema().parse("-c many").unwrap_err();
        assert_eq!(
            err.reason(),
            "Expected type of count is number, but got string"
        );

        let step = CommandStep::new([CommandOption::new("opts").kind(ArgKind::Object)]);
        let err = step.parse("--opts [1]").unwrap_err();
        assert_eq!(err.reason(), "Expected type of opts is object, but got array");
        assert_eq!(
            step.parse(r#"--opts '{"a":1}'"#).unwrap()["opts"],
            json!({"a": 1})
        );
    }

    #[test]
    fn test_array_collects_repeats() {
        let step = CommandStep::new([CommandOption::new("tag").alias("t").kind(ArgKind::Array)]);
        let parsed = step.parse("-t a -t 2 --tag c").unwrap();
        assert_eq!(parsed["tag"], json!(["a", 2, "c"]));
    }

    #[test]
    fn test_help_short_circuits() {
        let err = schema().parse("/greet -c 1 --help").unwrap_err();
        assert_eq!(err.kind(), MiddlewareErrorKind::Help);
        assert!(err.reason().contains("--count"));
        assert!(err.reason().contains("How many (required) (number)"));
        assert!(err.reason().contains("(default: \"world\")"));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let err = schema().parse("-c 1 --bogus").unwrap_err();
        assert_eq!(err.kind(), MiddlewareErrorKind::Rejected);
        assert!(err.reason().contains("--bogus"));
    }
}
