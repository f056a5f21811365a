//! Steps: the uniform unit a chain is built from.
//!
//! A [`Step`] inspects the [`ChainContext`] and returns an [`Outcome`]. The
//! [`StepMiddleware`] adapter turns it into an onion layer:
//!
//! | Outcome       | Effect                                          |
//! |---------------|-------------------------------------------------|
//! | `Continue(d)` | merge `d` into the bag, run the continuation    |
//! | `Halt`        | stop silently, the event did not match          |
//! | `Fail(r)`     | abort with a `MiddlewareError` tagged with step |

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{Middleware, Next};
use crate::bag::ResultBag;
use crate::context::ChainContext;
use crate::error::MiddlewareError;

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Matched; the values are merged into the bag.
    Continue(ResultBag),
    /// Did not match. Not an error.
    Halt,
    /// Matched the scope but rejected the shape.
    Fail(String),
}

impl Outcome {
    /// Continue without extracting anything.
    pub fn pass() -> Self {
        Self::Continue(ResultBag::new())
    }

    /// Continue, writing `value` under `key`.
    pub fn extract(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut bag = ResultBag::new();
        bag.insert(key, value);
        Self::Continue(bag)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// A predicate or extractor over one chain execution.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &ChainContext) -> Outcome;
}

/// Adapts a [`Step`] into a [`Middleware`].
pub struct StepMiddleware<S>(pub S);

#[async_trait]
impl<S: Step> Middleware<ChainContext> for StepMiddleware<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn handle(
        &self,
        ctx: &ChainContext,
        next: Next<'_, ChainContext>,
    ) -> Result<(), MiddlewareError> {
        match self.0.check(ctx).await {
            Outcome::Continue(delta) => {
                ctx.merge(delta);
                next.run().await
            }
            Outcome::Halt => {
                trace!(step = self.0.name(), "Step halted");
                Ok(())
            }
            Outcome::Fail(reason) => Err(MiddlewareError::rejected(self.0.name(), reason)),
        }
    }
}

/// A step backed by a synchronous closure.
pub struct FnStep<F> {
    name: String,
    f: F,
}

/// Creates a step from a closure.
///
/// ```rust,ignore
/// let even = step_fn("even", |ctx| {
///     if ctx.event().user_id() % 2 == 0 { Outcome::pass() } else { Outcome::Halt }
/// });
/// ```
pub fn step_fn<F>(name: impl Into<String>, f: F) -> FnStep<F>
where
    F: Fn(&ChainContext) -> Outcome + Send + Sync + 'static,
{
    FnStep {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&ChainContext) -> Outcome + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &ChainContext) -> Outcome {
        (self.f)(ctx)
    }
}
