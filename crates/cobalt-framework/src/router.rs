//! Message routing.
//!
//! A [`Route`] bundles an event class, a [`Chain`], a terminal handler and an
//! optional error handler. The [`Router`] runs every route registered for the
//! event's class, in registration order. Each route gets its own chain
//! execution, so routes never observe each other's bags.
//!
//! # Tower Service Integration
//!
//! `Route` implements `tower::Service<Arc<EventContext>>`, so tower
//! middleware can wrap a single route:
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tower::timeout::TimeoutLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .service(route);
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use cobalt_core::EventClass;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tower::{Service, ServiceExt};
use tracing::{debug, trace, warn};

use crate::bag::ResultBag;
use crate::context::{ChainContext, EventContext};
use crate::error::{BoxError, MiddlewareError};
use crate::middleware::{Chain, Terminal};

/// Identifier returned by [`Router::register`].
pub type RouteId = u64;

/// A type-erased route handler.
pub type BoxedHandler =
    Arc<dyn Fn(Arc<EventContext>, ResultBag) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A type-erased error handler.
pub type BoxedErrorHandler =
    Arc<dyn Fn(Arc<EventContext>, MiddlewareError) -> BoxFuture<'static, ()> + Send + Sync>;

/// What happened when a route saw an event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The event is not of the route's class.
    Skipped,
    /// A step halted; the event did not match.
    Halted,
    /// Every step passed and the handler ran.
    Completed,
    /// A step or the handler failed.
    Failed(MiddlewareError),
}

impl RouteOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

struct RouteInner {
    name: String,
    class: EventClass,
    chain: Chain,
    handler: Option<BoxedHandler>,
    on_error: Option<BoxedErrorHandler>,
}

/// A chain bound to a handler for one event class.
#[derive(Clone)]
pub struct Route {
    inner: Arc<RouteInner>,
}

impl Route {
    pub fn new(class: EventClass, chain: Chain) -> Self {
        Self {
            inner: Arc::new(RouteInner {
                name: String::from("unnamed"),
                class,
                chain,
                handler: None,
                on_error: None,
            }),
        }
    }

    fn update(self, f: impl FnOnce(&mut RouteInner)) -> Self {
        let mut inner = Arc::try_unwrap(self.inner).unwrap_or_else(|shared| RouteInner {
            name: shared.name.clone(),
            class: shared.class,
            chain: shared.chain.clone(),
            handler: shared.handler.clone(),
            on_error: shared.on_error.clone(),
        });
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Sets a name for this route (useful for debugging).
    pub fn name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.update(|inner| inner.name = name)
    }

    /// Sets the handler run once every step has passed.
    pub fn handler<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<EventContext>, ResultBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: BoxedHandler = Arc::new(
            move |ctx: Arc<EventContext>, bag: ResultBag| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(f(ctx, bag))
            },
        );
        self.update(|inner| inner.handler = Some(handler))
    }

    /// Sets the callback invoked when a step or the handler fails.
    pub fn on_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<EventContext>, MiddlewareError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let on_error: BoxedErrorHandler = Arc::new(
            move |ctx: Arc<EventContext>, err: MiddlewareError| -> BoxFuture<'static, ()> {
                Box::pin(f(ctx, err))
            },
        );
        self.update(|inner| inner.on_error = Some(on_error))
    }

    /// Replies the failure reason to the sender.
    pub fn reply_errors(self) -> Self {
        self.on_error(|ctx, err| async move {
            if let Err(e) = ctx.reply(err.reason()).await {
                warn!(error = %e, "Failed to reply route error");
            }
        })
    }

    pub fn get_name(&self) -> &str {
        &self.inner.name
    }

    pub fn class(&self) -> EventClass {
        self.inner.class
    }

    pub fn chain(&self) -> &Chain {
        &self.inner.chain
    }

    /// Runs the route against one event.
    pub async fn run(&self, ctx: Arc<EventContext>) -> RouteOutcome {
        let inner = &self.inner;
        if !inner.class.accepts(ctx.event()) {
            return RouteOutcome::Skipped;
        }

        let terminal = HandlerTerminal {
            handler: inner.handler.as_ref(),
            ctx: &ctx,
        };
        let result = AssertUnwindSafe(inner.chain.execute_with(ctx.shared_event(), &terminal))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(MiddlewareError::handler("route panicked")));

        let outcome = match result {
            Ok(exec) if exec.completed => RouteOutcome::Completed,
            Ok(_) => RouteOutcome::Halted,
            Err(err) => RouteOutcome::Failed(err),
        };

        match &outcome {
            RouteOutcome::Completed => debug!(route = %inner.name, "Route completed"),
            RouteOutcome::Halted => trace!(route = %inner.name, "Route halted"),
            RouteOutcome::Failed(err) => {
                debug!(route = %inner.name, step = err.step(), reason = err.reason(), "Route failed");
                if let Some(on_error) = &inner.on_error {
                    on_error(Arc::clone(&ctx), err.clone()).await;
                }
            }
            RouteOutcome::Skipped => {}
        }

        outcome
    }
}

/// Runs the route handler as the innermost layer of the chain.
struct HandlerTerminal<'a> {
    handler: Option<&'a BoxedHandler>,
    ctx: &'a Arc<EventContext>,
}

#[async_trait]
impl Terminal<ChainContext> for HandlerTerminal<'_> {
    async fn call(&self, chain_ctx: &ChainContext) -> Result<(), MiddlewareError> {
        let Some(handler) = self.handler else {
            return Ok(());
        };
        handler(Arc::clone(self.ctx), chain_ctx.bag())
            .await
            .map_err(|e| MiddlewareError::handler(e.to_string()))
    }
}

// ============================================================================
// Tower Service Implementation for Route
// ============================================================================

impl Service<Arc<EventContext>> for Route {
    type Response = RouteOutcome;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<EventContext>) -> Self::Future {
        let route = self.clone();
        Box::pin(async move { Ok(route.run(ctx).await) })
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes events to registered routes.
#[derive(Default)]
pub struct Router {
    routes: RwLock<Vec<(RouteId, Route)>>,
    next_id: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, route: Route) -> RouteId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, route = route.get_name(), class = %route.class(), "Registering route");
        self.routes.write().push((id, route));
        id
    }

    /// Removes a route. Returns `false` if it was not registered.
    pub fn unregister(&self, id: RouteId) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|(rid, _)| *rid != id);
        routes.len() != before
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Runs every route in registration order.
    ///
    /// Routes registered or removed during dispatch take effect for the next
    /// event.
    pub async fn dispatch(&self, ctx: Arc<EventContext>) -> Vec<RouteOutcome> {
        let snapshot: Vec<Route> = self.routes.read().iter().map(|(_, r)| r.clone()).collect();
        let mut outcomes = Vec::with_capacity(snapshot.len());

        for route in snapshot {
            let outcome = match route.oneshot(Arc::clone(&ctx)).await {
                Ok(outcome) => outcome,
                Err(never) => match never {},
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiddlewareErrorKind;
    use crate::test_support::MockClient;
    use cobalt_core::{ElementKind, MessageEvent};
    use parking_lot::Mutex;

    fn ctx(event: MessageEvent, client: &Arc<MockClient>) -> Arc<EventContext> {
        Arc::new(EventContext::new(event, client.clone()))
    }

    #[tokio::test]
    async fn test_class_filtering() {
        let router = Router::new();
        router.register(Route::new(EventClass::GroupMessage, Chain::empty()));
        router.register(Route::new(EventClass::Message, Chain::empty()));

        let client = MockClient::new();
        let outcomes = router
            .dispatch(ctx(MessageEvent::private(1, "hi"), &client))
            .await;

        assert_eq!(outcomes, vec![RouteOutcome::Skipped, RouteOutcome::Completed]);
    }

    #[tokio::test]
    async fn test_handler_receives_bag() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let router = Router::new();
        router.register(
            Route::new(EventClass::Message, Chain::builder().prefix(["/echo"]).build()).handler(
                move |ctx, bag| {
                    let sink = Arc::clone(&sink);
                    async move {
                        *sink.lock() = bag.get::<String>("prefix");
                        ctx.reply("ok").await?;
                        Ok(())
                    }
                },
            ),
        );

        let client = MockClient::new();
        router
            .dispatch(ctx(MessageEvent::private(1, "/echo hi"), &client))
            .await;

        assert_eq!(seen.lock().as_deref(), Some("hi"));
        assert_eq!(client.sent_texts(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_replied() {
        let router = Router::new();
        router.register(
            Route::new(
                EventClass::Message,
                Chain::builder().some([ElementKind::Image]).build(),
            )
            .reply_errors(),
        );
        router.register(Route::new(EventClass::Message, Chain::empty()));

        let client = MockClient::new();
        let outcomes = router
            .dispatch(ctx(MessageEvent::private(1, "text only"), &client))
            .await;

        assert!(matches!(&outcomes[0], RouteOutcome::Failed(e) if e.step() == "some"));
        assert_eq!(outcomes[1], RouteOutcome::Completed);
        assert_eq!(client.sent_texts(), vec!["missing type 'image'"]);
    }

    #[tokio::test]
    async fn test_handler_error_is_tagged() {
        let router = Router::new();
        router.register(
            Route::new(EventClass::Message, Chain::empty())
                .handler(|_, _| async { Err::<(), BoxError>("disk full".into()) }),
        );

        let client = MockClient::new();
        let outcomes = router
            .dispatch(ctx(MessageEvent::private(1, "x"), &client))
            .await;

        let RouteOutcome::Failed(err) = &outcomes[0] else {
            panic!("expected failure, got {:?}", outcomes[0]);
        };
        assert_eq!(err.kind(), MiddlewareErrorKind::Handler);
        assert_eq!(err.step(), "handler");
        assert_eq!(err.reason(), "disk full");
    }

    #[tokio::test]
    async fn test_unregister() {
        let router = Router::new();
        let id = router.register(Route::new(EventClass::Message, Chain::empty()));

        assert!(router.unregister(id));
        assert!(!router.unregister(id));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_route_as_service() {
        let route = Route::new(EventClass::GroupMessage, Chain::builder().equal(["ping"]).build());
        let client = MockClient::new();

        let outcome = route
            .clone()
            .oneshot(ctx(MessageEvent::group(5, 1, "ping"), &client))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Completed);

        let outcome = route
            .oneshot(ctx(MessageEvent::group(5, 1, "pong"), &client))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Halted);
    }
}
