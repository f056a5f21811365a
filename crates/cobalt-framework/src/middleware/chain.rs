//! Chains: ordered, immutable step sequences over one event.

use std::sync::Arc;

use cobalt_core::{ElementKind, MessageEvent};
use regex::Regex;

use super::command::{CommandOption, CommandStep};
use super::predicates::{
    Equal, GroupIn, ImageCount, KindsExact, KindsSome, Mention, Pattern, Prefix, SenderIn,
};
use super::step::{Step, StepMiddleware};
use super::{Composed, Middleware, Terminal, compose};
use crate::bag::ResultBag;
use crate::context::ChainContext;
use crate::error::MiddlewareError;

/// Result of running a chain against one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Whether every step continued.
    pub completed: bool,
    /// Values extracted up to the point the chain stopped.
    pub bag: ResultBag,
}

/// An immutable sequence of steps.
///
/// Cloning is cheap; clones share the same steps.
#[derive(Clone)]
pub struct Chain {
    composed: Composed<ChainContext>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// A chain with no steps. Always completes with an empty bag.
    pub fn empty() -> Self {
        ChainBuilder::default().build()
    }

    /// Runs every step against `event`.
    pub async fn execute(&self, event: Arc<MessageEvent>) -> Result<Execution, MiddlewareError> {
        let ctx = ChainContext::new(event);
        let completed = self.composed.execute(&ctx).await?;
        Ok(Execution {
            completed,
            bag: ctx.into_bag(),
        })
    }

    /// Runs every step, then `terminal` inside the innermost layer.
    pub async fn execute_with(
        &self,
        event: Arc<MessageEvent>,
        terminal: &dyn Terminal<ChainContext>,
    ) -> Result<Execution, MiddlewareError> {
        let ctx = ChainContext::new(event);
        let completed = self.composed.execute_with(&ctx, terminal).await?;
        Ok(Execution {
            completed,
            bag: ctx.into_bag(),
        })
    }

    pub fn len(&self) -> usize {
        self.composed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composed.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.composed.names()
    }

    /// Returns a new chain with `step` in front of the existing ones.
    pub(crate) fn prepend(&self, step: Arc<dyn Middleware<ChainContext>>) -> Self {
        let mut layers = vec![step];
        layers.extend(self.composed.layers().iter().cloned());
        Self {
            composed: compose(layers),
        }
    }
}

/// Builder for [`Chain`].
///
/// ```rust,ignore
/// let chain = Chain::builder()
///     .prefix(["/echo"])
///     .kinds([ElementKind::Text])
///     .build();
/// ```
#[derive(Default)]
pub struct ChainBuilder {
    layers: Vec<Arc<dyn Middleware<ChainContext>>>,
}

impl ChainBuilder {
    /// Appends a raw middleware layer.
    pub fn middleware<M: Middleware<ChainContext>>(mut self, middleware: M) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Appends a step.
    pub fn step<S: Step>(self, step: S) -> Self {
        self.middleware(StepMiddleware(step))
    }

    pub fn prefix<I, S>(self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(Prefix::new(prefixes))
    }

    pub fn equal<I, S>(self, literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(Equal::new(literals))
    }

    pub fn regex(self, regex: Regex) -> Self {
        self.step(Pattern::new(regex))
    }

    pub fn mention(self, targets: impl IntoIterator<Item = i64>) -> Self {
        self.step(Mention::new(targets))
    }

    pub fn sender(self, users: impl IntoIterator<Item = i64>) -> Self {
        self.step(SenderIn::new(users))
    }

    pub fn group(self, groups: impl IntoIterator<Item = i64>) -> Self {
        self.step(GroupIn::new(groups))
    }

    pub fn kinds(self, kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        self.step(KindsExact::new(kinds))
    }

    pub fn some(self, kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        self.step(KindsSome::new(kinds))
    }

    pub fn image(self, min: usize) -> Self {
        self.step(ImageCount::new(min))
    }

    pub fn command(self, options: impl IntoIterator<Item = CommandOption>) -> Self {
        self.middleware(CommandStep::new(options))
    }

    pub fn build(self) -> Chain {
        Chain {
            composed: compose(self.layers),
        }
    }
}
