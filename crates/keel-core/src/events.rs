//! Event bus abstraction and the in-process binding
//!
//! Engines publish [`StatusEvent`]s to an [`EventBus`]; observers attach a
//! handler with [`EventBus::subscribe`]. Each subscription runs its handler on
//! its own task, so handlers run concurrently with further publishes but see
//! events from one publisher in publish order.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use kameo_macros::Reply;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use keel_api::{Level, StatusEvent};

use crate::error::CoreError;

/// Callback invoked once per delivered event
pub type EventHandler = Arc<dyn Fn(StatusEvent) + Send + Sync>;

/// Publish/subscribe endpoint handed to engines at construction
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: StatusEvent) -> Result<(), CoreError>;

    /// Attach a handler; events published before this call are not replayed
    async fn subscribe(&self, handler: EventHandler) -> Result<Subscription, CoreError>;
}

/// Handle to an attached handler
///
/// Dropping the handle or calling [`Subscription::cancel`] detaches the
/// handler. [`Subscription::join`] keeps it attached until the bus closes.
#[derive(Debug)]
pub struct Subscription {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Drive `handler` from `events` on a new task
    pub fn spawn<S>(events: S, handler: EventHandler) -> Self
    where
        S: Stream<Item = StatusEvent> + Send + 'static,
    {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    next = events.next() => match next {
                        Some(event) => handler(event),
                        None => break,
                    },
                }
            }
        });

        Self {
            stop: Some(stop),
            task,
        }
    }

    /// Detach the handler now and wait for its task to finish
    pub async fn cancel(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }

    /// Wait until the bus closes and every queued event has been handled
    pub async fn join(mut self) {
        let _keep_attached = self.stop.take();
        let _ = self.task.await;
    }
}

/// Standard handler that renders events through `tracing`
#[must_use]
pub fn log_sink() -> EventHandler {
    Arc::new(|event: StatusEvent| match event.level {
        Level::Debug => debug!(target: "keel::events", kind = %event.kind, "{}", event.msg),
        Level::Info => info!(target: "keel::events", kind = %event.kind, "{}", event.msg),
    })
}

// ============================================================================
// In-process binding
// ============================================================================

/// Actor owning the subscriber queues of a [`LocalBus`]
///
/// Its single mailbox serialises publishes, which fixes delivery order.
pub struct Dispatcher {
    subscribers: Vec<mpsc::UnboundedSender<StatusEvent>>,
    published: u64,
}

/// Publish one event to every attached queue
#[derive(Debug)]
pub struct Publish(pub StatusEvent);

/// Attach a subscriber queue
#[derive(Debug)]
pub struct Attach(pub mpsc::UnboundedSender<StatusEvent>);

/// Outcome of a [`Publish`]
#[derive(Debug, Clone, Copy, Reply)]
pub struct Delivery {
    /// Number of queues the event was handed to
    pub receivers: usize,
}

impl Actor for Dispatcher {
    type Args = ();
    type Error = CoreError;

    async fn on_start(_args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        debug!(id = %actor_ref.id(), "event dispatcher starting");
        Ok(Self {
            subscribers: Vec::new(),
            published: 0,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        debug!(reason = ?reason, published = self.published, "event dispatcher stopping");
        self.subscribers.clear();
        Ok(())
    }
}

impl Message<Publish> for Dispatcher {
    type Reply = Delivery;

    async fn handle(&mut self, msg: Publish, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.published += 1;
        // Queues whose subscription was cancelled are pruned here.
        self.subscribers.retain(|tx| tx.send(msg.0.clone()).is_ok());
        Delivery {
            receivers: self.subscribers.len(),
        }
    }
}

impl Message<Attach> for Dispatcher {
    type Reply = ();

    async fn handle(&mut self, msg: Attach, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.subscribers.push(msg.0);
    }
}

/// In-process event bus
///
/// Events published while nothing is subscribed are dropped.
#[derive(Clone)]
pub struct LocalBus {
    dispatcher: ActorRef<Dispatcher>,
}

impl LocalBus {
    /// Spawn the dispatcher actor
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::spawn(()),
        }
    }

    /// Stop accepting events; subscriptions end once their queues drain
    pub async fn close(&self) {
        self.dispatcher.stop_gracefully().await.ok();
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: StatusEvent) -> Result<(), CoreError> {
        self.dispatcher
            .ask(Publish(event))
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Bus(e.to_string()))
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<Subscription, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatcher
            .ask(Attach(tx))
            .await
            .map_err(|e| CoreError::Bus(e.to_string()))?;

        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Subscription::spawn(events, handler))
    }
}
