//! Event system for quality monitoring
//!
//! The monitor publishes [`QualityEvent`]s to an [`EventBus`]. Consumers
//! (UI badges, call-quality reporting, logging) either pull events from a
//! channel-backed [`EventSubscription`] or register a [`QualityEventHandler`]
//! that is driven by a forwarding task.
//!
//! Publishing never blocks and never awaits: every subscriber owns an
//! unbounded channel, and subscribers whose receiver was dropped are pruned on
//! the next publish.
//!
//! # Example
//!
//! ```rust
//! use rvoip_quality_core::events::{EventBus, EventFilter, EventKind, QualityEvent, StopReason};
//! use rvoip_quality_core::types::ConnectionId;
//!
//! let bus = EventBus::new();
//! let mut stops = bus.subscribe(EventFilter::kinds([EventKind::MonitoringStopped]));
//!
//! bus.publish(QualityEvent::MonitoringStopped {
//!     connection_id: ConnectionId::new("peer-1"),
//!     reason: StopReason::Requested,
//!     timestamp: chrono::Utc::now(),
//! });
//!
//! assert!(matches!(stops.try_recv(), Some(QualityEvent::MonitoringStopped { .. })));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::adaptation::AdaptationCommand;
use crate::types::{ConnectionId, QualitySnapshot, TrendDirection};

/// Why monitoring of a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// `stop_monitoring` or `shutdown` was called
    Requested,
    /// A new monitor was started for the same connection
    Replaced,
    /// The stats source reported the connection closed
    ConnectionClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Replaced => write!(f, "replaced"),
            Self::ConnectionClosed => write!(f, "connection-closed"),
        }
    }
}

/// Discriminant of [`QualityEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    QualityUpdated,
    AdaptationRequested,
    MonitoringStarted,
    MonitoringStopped,
}

/// Events published by the connection monitor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum QualityEvent {
    /// A tick produced a new snapshot
    QualityUpdated {
        connection_id: ConnectionId,
        snapshot: QualitySnapshot,
        trend: TrendDirection,
    },
    /// The controller asked the media layer to adapt
    AdaptationRequested {
        connection_id: ConnectionId,
        command: AdaptationCommand,
    },
    MonitoringStarted {
        connection_id: ConnectionId,
        timestamp: DateTime<Utc>,
    },
    /// Terminal event; nothing else is published for this monitor afterwards
    MonitoringStopped {
        connection_id: ConnectionId,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
}

impl QualityEvent {
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::QualityUpdated { connection_id, .. }
            | Self::AdaptationRequested { connection_id, .. }
            | Self::MonitoringStarted { connection_id, .. }
            | Self::MonitoringStopped { connection_id, .. } => connection_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::QualityUpdated { .. } => EventKind::QualityUpdated,
            Self::AdaptationRequested { .. } => EventKind::AdaptationRequested,
            Self::MonitoringStarted { .. } => EventKind::MonitoringStarted,
            Self::MonitoringStopped { .. } => EventKind::MonitoringStopped,
        }
    }

    /// Check if this event should pass through the given filter
    pub fn passes_filter(&self, filter: &EventFilter) -> bool {
        if let Some(connection_ids) = &filter.connection_ids {
            if !connection_ids.contains(self.connection_id()) {
                return false;
            }
        }

        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&self.kind()) {
                return false;
            }
        }

        true
    }
}

/// Subscription filter; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only receive events for these connections
    pub connection_ids: Option<HashSet<ConnectionId>>,
    /// Only receive these kinds of events
    pub kinds: Option<HashSet<EventKind>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn connection(connection_id: ConnectionId) -> Self {
        Self {
            connection_ids: Some(HashSet::from([connection_id])),
            kinds: None,
        }
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            connection_ids: None,
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Restrict an existing filter to the given kinds
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }
}

/// Callback-style consumer of quality events
///
/// Only `on_quality_updated` is required; the rest default to no-ops.
#[async_trait]
pub trait QualityEventHandler: Send + Sync {
    async fn on_quality_updated(
        &self,
        connection_id: ConnectionId,
        snapshot: QualitySnapshot,
        trend: TrendDirection,
    );

    async fn on_adaptation_requested(&self, _command: AdaptationCommand) {}

    async fn on_monitoring_started(&self, _connection_id: ConnectionId) {}

    async fn on_monitoring_stopped(&self, _connection_id: ConnectionId, _reason: StopReason) {}

    /// Dispatch an event to the specific handler method
    async fn on_quality_event(&self, event: QualityEvent) {
        match event {
            QualityEvent::QualityUpdated {
                connection_id,
                snapshot,
                trend,
            } => self.on_quality_updated(connection_id, snapshot, trend).await,
            QualityEvent::AdaptationRequested { command, .. } => {
                self.on_adaptation_requested(command).await
            }
            QualityEvent::MonitoringStarted { connection_id, .. } => {
                self.on_monitoring_started(connection_id).await
            }
            QualityEvent::MonitoringStopped {
                connection_id,
                reason,
                ..
            } => self.on_monitoring_stopped(connection_id, reason).await,
        }
    }
}

/// Receiving end of a bus subscription
#[derive(Debug)]
pub struct EventSubscription {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<QualityEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<QualityEvent> {
        self.receiver.recv().await
    }

    /// Next already-published event, if any
    pub fn try_recv(&mut self) -> Option<QualityEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every event published so far
    pub fn drain(&mut self) -> Vec<QualityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

struct Subscriber {
    id: Uuid,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<QualityEvent>,
}

/// Fan-out hub for quality events
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events that pass `filter`
    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().push(Subscriber { id, filter, sender });
        EventSubscription { id, receiver }
    }

    pub fn subscribe_all(&self) -> EventSubscription {
        self.subscribe(EventFilter::all())
    }

    /// Drive `handler` from a background task until the bus drops the
    /// subscription. Must be called from within a tokio runtime.
    pub fn subscribe_handler(
        &self,
        handler: Arc<dyn QualityEventHandler>,
        filter: EventFilter,
    ) -> Uuid {
        let mut subscription = self.subscribe(filter);
        let id = subscription.id();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler.on_quality_event(event).await;
            }
            trace!(subscription_id = %id, "Event handler subscription closed");
        });
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver an event to every matching subscriber
    pub fn publish(&self, event: QualityEvent) {
        let mut closed = false;
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                if !event.passes_filter(&subscriber.filter) {
                    continue;
                }
                if subscriber.sender.send(event.clone()).is_err() {
                    closed = true;
                }
            }
        }

        if closed {
            self.subscribers.write().retain(|s| !s.sender.is_closed());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
