// src/publisher/mod.rs

//! Status-change events and their fan-out.
//!
//! The scheduler and the heartbeat processor emit a [`StatusEvent`] after
//! every committed transition through an [`EventSink`]. The
//! [`UpdatePublisher`] drains that channel asynchronously and forwards each
//! event to the subscribers of its topics, so a slow subscriber never holds
//! up orchestration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{HostRoleStatus, RequestId, RoleCommand, StageId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    TaskStatusChanged {
        request_id: RequestId,
        stage_id: StageId,
        task_id: TaskId,
        host: String,
        role: String,
        command: RoleCommand,
        attempt: u32,
        from: HostRoleStatus,
        to: HostRoleStatus,
        at: DateTime<Utc>,
    },
    StageStatusChanged {
        request_id: RequestId,
        stage_id: StageId,
        sequence: u32,
        from: HostRoleStatus,
        to: HostRoleStatus,
    },
    RequestStatusChanged {
        request_id: RequestId,
        cluster: String,
        upgrade: bool,
        from: HostRoleStatus,
        to: HostRoleStatus,
        at: DateTime<Utc>,
    },
}

impl StatusEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            StatusEvent::TaskStatusChanged { request_id, .. }
            | StatusEvent::StageStatusChanged { request_id, .. }
            | StatusEvent::RequestStatusChanged { request_id, .. } => *request_id,
        }
    }

    /// Topics this event is published on.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics = vec![Topic::All, Topic::Request(self.request_id())];
        match self {
            StatusEvent::TaskStatusChanged { host, .. } => topics.push(Topic::Host(host.clone())),
            StatusEvent::RequestStatusChanged { upgrade: true, .. } => topics.push(Topic::Upgrade),
            _ => {}
        }
        topics
    }
}

/// Sending half handed to the scheduler and heartbeat processor.
///
/// Emitting never blocks and never fails the caller: with no publisher
/// attached (or after it stopped) events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("status event dropped; publisher stopped");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event.
    All,
    Request(RequestId),
    /// Task events for one host (the agent-facing topic).
    Host(String),
    /// Request status changes of upgrade Requests.
    Upgrade,
}

type Subscribers = HashMap<Topic, Vec<mpsc::UnboundedSender<StatusEvent>>>;

#[derive(Debug, Default)]
pub struct UpdatePublisher {
    subscribers: Mutex<Subscribers>,
}

impl UpdatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.entry(topic).or_default().push(tx),
            Err(_) => warn!("publisher lock poisoned; subscription dropped"),
        }
        rx
    }

    /// Deliver one event; subscribers that went away are pruned.
    pub fn publish(&self, event: &StatusEvent) -> usize {
        let Ok(mut subs) = self.subscribers.lock() else {
            warn!("publisher lock poisoned; event dropped");
            return 0;
        };

        let mut delivered = 0;
        for topic in event.topics() {
            if let Some(list) = subs.get_mut(&topic) {
                list.retain(|tx| match tx.send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => false,
                });
            }
        }
        delivered
    }

    /// Drain `events` until every sink is dropped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<StatusEvent>) {
        info!("update publisher started");
        while let Some(event) = events.recv().await {
            let delivered = self.publish(&event);
            debug!(request_id = %event.request_id(), delivered, "published status event");
        }
        info!("update publisher finished (channel closed)");
    }
}
