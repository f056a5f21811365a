//! Onion-style middleware composition.
//!
//! A composed stack is executed with an explicit continuation ([`Next`]).
//! Each middleware decides whether to call `next.run()`:
//!
//! ```text
//! execute(ctx)
//!   └─ mw[0].handle(ctx, next₁)
//!        └─ next₁.run() ─ mw[1].handle(ctx, next₂)
//!                           └─ next₂.run() ─ terminal(ctx)
//! ```
//!
//! - Not calling `next` halts the chain silently.
//! - Returning an error aborts the chain; the error surfaces unchanged.
//! - Calling `next` twice is rejected with a
//!   [`DoubleNext`](crate::MiddlewareErrorKind::DoubleNext) error.
//!
//! The chain completed iff every middleware invoked its continuation, in
//! which case the terminal (if any) ran.

pub mod chain;
pub mod command;
pub mod predicates;
pub mod step;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::MiddlewareError;

pub use chain::{Chain, ChainBuilder, Execution};
pub use command::{ArgKind, CommandOption, CommandStep};
pub use step::{FnStep, Outcome, Step, StepMiddleware, step_fn};

/// One layer of an onion stack over context `C`.
#[async_trait]
pub trait Middleware<C>: Send + Sync + 'static {
    /// Name used to tag errors raised by this layer.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &C, next: Next<'_, C>) -> Result<(), MiddlewareError>;
}

/// Callback invoked once every middleware has passed.
#[async_trait]
pub trait Terminal<C>: Send + Sync {
    async fn call(&self, ctx: &C) -> Result<(), MiddlewareError>;
}

/// Index of the furthest dispatched layer, plus one. Zero means none yet.
struct Cursor(AtomicUsize);

impl Cursor {
    fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Moves the cursor to `index`. Fails if `index` was already dispatched.
    fn advance(&self, index: usize) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seen| {
                (index + 1 > seen).then_some(index + 1)
            })
            .is_ok()
    }

    fn reached(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Continuation handed to a middleware.
///
/// `Next` is `Copy`; running it more than once is detected at runtime.
pub struct Next<'a, C> {
    stack: &'a [Arc<dyn Middleware<C>>],
    terminal: Option<&'a dyn Terminal<C>>,
    ctx: &'a C,
    cursor: &'a Cursor,
    index: usize,
}

impl<C> Clone for Next<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Next<'_, C> {}

impl<'a, C: Send + Sync + 'static> Next<'a, C> {
    /// Runs the rest of the stack.
    pub fn run(self) -> BoxFuture<'a, Result<(), MiddlewareError>> {
        Box::pin(async move {
            if !self.cursor.advance(self.index) {
                return Err(MiddlewareError::double_next(self.caller()));
            }
            match self.stack.get(self.index) {
                Some(middleware) => {
                    let next = Next {
                        index: self.index + 1,
                        ..self
                    };
                    middleware.handle(self.ctx, next).await
                }
                None => match self.terminal {
                    Some(terminal) => terminal.call(self.ctx).await,
                    None => Ok(()),
                },
            }
        })
    }

    /// Name of the layer that owns this continuation.
    fn caller(&self) -> &str {
        self.index
            .checked_sub(1)
            .and_then(|i| self.stack.get(i))
            .map_or("compose", |m| m.name())
    }
}

/// An immutable, shareable middleware stack.
pub struct Composed<C> {
    stack: Arc<[Arc<dyn Middleware<C>>]>,
}

impl<C> Clone for Composed<C> {
    fn clone(&self) -> Self {
        Self {
            stack: Arc::clone(&self.stack),
        }
    }
}

/// Composes `stack` into a single executable unit.
pub fn compose<C>(stack: Vec<Arc<dyn Middleware<C>>>) -> Composed<C> {
    Composed {
        stack: stack.into(),
    }
}

impl<C: Send + Sync + 'static> Composed<C> {
    /// Executes the stack. Returns `true` iff every layer continued.
    pub async fn execute(&self, ctx: &C) -> Result<bool, MiddlewareError> {
        self.dispatch(ctx, None).await
    }

    /// Executes the stack, then `terminal` if every layer continued.
    pub async fn execute_with(
        &self,
        ctx: &C,
        terminal: &dyn Terminal<C>,
    ) -> Result<bool, MiddlewareError> {
        self.dispatch(ctx, Some(terminal)).await
    }

    async fn dispatch(
        &self,
        ctx: &C,
        terminal: Option<&dyn Terminal<C>>,
    ) -> Result<bool, MiddlewareError> {
        let cursor = Cursor::new();
        let next = Next {
            stack: &self.stack,
            terminal,
            ctx,
            cursor: &cursor,
            index: 0,
        };
        next.run().await?;
        Ok(cursor.reached() == self.stack.len() + 1)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Names of the layers, in order.
    pub fn names(&self) -> Vec<&str> {
        self.stack.iter().map(|m| m.name()).collect()
    }

    pub(crate) fn layers(&self) -> &[Arc<dyn Middleware<C>>] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiddlewareErrorKind;
    use parking_lot::Mutex;

    type Log = Mutex<Vec<String>>;

    struct Record(&'static str);

    #[async_trait]
    impl Middleware<Log> for Record {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, ctx: &Log, next: Next<'_, Log>) -> Result<(), MiddlewareError> {
            ctx.lock().push(format!("{}:before", self.0));
            next.run().await?;
            ctx.lock().push(format!("{}:after", self.0));
            Ok(())
        }
    }

    struct Stop;

    #[async_trait]
    impl Middleware<Log> for Stop {
        fn name(&self) -> &str {
            "stop"
        }

        async fn handle(&self, _ctx: &Log, _next: Next<'_, Log>) -> Result<(), MiddlewareError> {
            Ok(())
        }
    }

    struct Twice;

    #[async_trait]
    impl Middleware<Log> for Twice {
        fn name(&self) -> &str {
            "twice"
        }

        async fn handle(&self, _ctx: &Log, next: Next<'_, Log>) -> Result<(), MiddlewareError> {
            next.run().await?;
            next.run().await
        }
    }

    struct Boom;

    #[async_trait]
    impl Middleware<Log> for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        async fn handle(&self, _ctx: &Log, _next: Next<'_, Log>) -> Result<(), MiddlewareError> {
            Err(MiddlewareError::rejected("boom", "exploded"))
        }
    }

    struct PushTerminal;

    #[async_trait]
    impl Terminal<Log> for PushTerminal {
        async fn call(&self, ctx: &Log) -> Result<(), MiddlewareError> {
            ctx.lock().push("terminal".into());
            Ok(())
        }
    }

    fn stack(layers: Vec<Arc<dyn Middleware<Log>>>) -> Composed<Log> {
        compose(layers)
    }

    #[tokio::test]
    async fn test_onion_order() {
        let composed = stack(vec![Arc::new(Record("a")), Arc::new(Record("b"))]);
        let log = Log::default();

        let completed = composed.execute_with(&log, &PushTerminal).await.unwrap();

        assert!(completed);
        assert_eq!(
            *log.lock(),
            vec!["a:before", "b:before", "terminal", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_halt_is_not_an_error() {
        let composed = stack(vec![
            Arc::new(Record("a")),
            Arc::new(Stop),
            Arc::new(Record("c")),
        ]);
        let log = Log::default();

        let completed = composed.execute_with(&log, &PushTerminal).await.unwrap();

        assert!(!completed);
        assert_eq!(*log.lock(), vec!["a:before", "a:after"]);
    }

    #[tokio::test]
    async fn test_double_next_rejected() {
        let composed = stack(vec![Arc::new(Twice), Arc::new(Record("b"))]);
        let log = Log::default();

        let err = composed.execute(&log).await.unwrap_err();

        assert_eq!(err.kind(), MiddlewareErrorKind::DoubleNext);
        assert_eq!(err.step(), "twice");
        // The layer after the offender ran exactly once.
        assert_eq!(*log.lock(), vec!["b:before", "b:after"]);
    }

    #[tokio::test]
    async fn test_error_propagates_unchanged() {
        let composed = stack(vec![Arc::new(Record("a")), Arc::new(Boom)]);
        let log = Log::default();

        let err = composed.execute(&log).await.unwrap_err();

        assert_eq!(err.step(), "boom");
        assert_eq!(err.reason(), "exploded");
        assert_eq!(*log.lock(), vec!["a:before"]);
    }

    #[tokio::test]
    async fn test_empty_stack_completes() {
        let composed = stack(Vec::new());
        let log = Log::default();

        assert!(composed.execute_with(&log, &PushTerminal).await.unwrap());
        assert_eq!(*log.lock(), vec!["terminal"]);
    }
}
