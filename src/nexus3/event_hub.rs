//! Per-agent pub/sub for SSE events.
//!
//! One hub instance is shared across the whole process. Each agent can have
//! any number of subscribers (one per SSE connection); events published for
//! an agent are broadcast to all of them.
//!
//! # Architecture
//!
//! - Bounded per-subscriber queues with a drop policy for slow clients
//! - Per-agent sequence numbers for ordering and gap detection
//! - Ring buffer per agent for event replay on reconnect
//! - Agent keys are removed when the last subscriber leaves, so
//!   [`total_subscriber_count`](EventHub::total_subscriber_count) stays
//!   accurate for idle-shutdown accounting
//!
//! # Example
//!
//! ```rust
//! use nexus3::EventHub;
//! use serde_json::json;
//!
//! let hub = EventHub::default();
//! let mut sub = hub.subscribe("worker-1");
//!
//! hub.publish("worker-1", &json!({"type": "turn_started"}));
//! let event = sub.try_recv().unwrap();
//! assert_eq!(event["seq"], 1);
//!
//! hub.unsubscribe("worker-1", &sub);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TrySendError, TryRecvError};

/// Default bound on each subscriber queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Default number of events retained per agent for replay.
pub const DEFAULT_HISTORY_SIZE: usize = 100;
/// Default number of consecutive drops before a slow subscriber is evicted.
pub const DEFAULT_DROP_LIMIT: u32 = 10;

/// One live subscription to an agent's event stream.
///
/// Returned by [`EventHub::subscribe`]. The receiving half of the bounded
/// queue lives here; when the hub evicts the subscriber (slow client) the
/// sending half is dropped and [`recv`](Subscription::recv) returns `None`,
/// which is the SSE handler's cue to close the stream.
pub struct Subscription {
    agent_id: String,
    id: u64,
    receiver: mpsc::Receiver<Value>,
}

impl Subscription {
    /// The agent this subscription is attached to.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Hub-internal identity, for handlers that unsubscribe on drop.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next event, waiting until one is published.
    ///
    /// Returns `None` once the hub has removed this subscriber (eviction or
    /// explicit unsubscribe).
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Non-blocking receive for polling consumers and tests.
    pub fn try_recv(&mut self) -> Option<Value> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

struct SubscriberState {
    sender: mpsc::Sender<Value>,
    consecutive_drops: u32,
}

#[derive(Default)]
struct HubState {
    /// agent_id -> (subscriber id -> state)
    subscribers: HashMap<String, HashMap<u64, SubscriberState>>,
    /// Per-agent monotonically increasing sequence counter.
    seq: HashMap<String, u64>,
    /// Ring buffer per agent for replay.
    history: HashMap<String, VecDeque<Value>>,
    next_subscriber_id: u64,
}

/// Per-agent pub/sub hub.
///
/// All mutating operations take a short internal lock and never suspend;
/// enqueues are non-blocking by design, so the hub is safe to call from any
/// task without backpressure leaking into the publisher.
pub struct EventHub {
    state: Mutex<HubState>,
    max_queue_size: usize,
    history_size: usize,
    drop_limit: u32,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_QUEUE_SIZE,
            DEFAULT_HISTORY_SIZE,
            DEFAULT_DROP_LIMIT,
        )
    }
}

impl EventHub {
    /// Create a hub.
    ///
    /// `max_queue_size` bounds each subscriber queue; when full, new events
    /// are dropped for that subscriber. `history_size` bounds the per-agent
    /// replay ring. `drop_limit` is the number of consecutive drops after
    /// which a slow subscriber is silently removed.
    pub fn new(max_queue_size: usize, history_size: usize, drop_limit: u32) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            max_queue_size,
            history_size,
            drop_limit,
        }
    }

    /// Create a subscription for an agent.
    ///
    /// The returned [`Subscription`] should be consumed by exactly one task
    /// (the SSE handler). Subscribing does not require the agent to exist;
    /// events published before the subscription are only visible through
    /// [`get_events_since`](EventHub::get_events_since).
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.max_queue_size);
        let mut state = self.state.lock().unwrap();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state
            .subscribers
            .entry(agent_id.to_string())
            .or_default()
            .insert(
                id,
                SubscriberState {
                    sender,
                    consecutive_drops: 0,
                },
            );
        Subscription {
            agent_id: agent_id.to_string(),
            id,
            receiver,
        }
    }

    /// Remove a subscription and clean up empty agent keys.
    ///
    /// Idempotent: safe to call for a subscription that was already evicted
    /// or never registered under this agent.
    pub fn unsubscribe(&self, agent_id: &str, subscription: &Subscription) {
        self.unsubscribe_by_id(agent_id, subscription.id);
    }

    pub(crate) fn unsubscribe_by_id(&self, agent_id: &str, id: u64) {
        let mut state = self.state.lock().unwrap();
        let now_empty = match state.subscribers.get_mut(agent_id) {
            Some(subs) => {
                subs.remove(&id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.subscribers.remove(agent_id);
        }
    }

    /// Publish an event to all subscribers of an agent.
    ///
    /// A copy of the caller's event is given a `seq` field (the caller's
    /// value is never mutated), stored in the replay ring, and delivered to
    /// every current subscriber with a non-blocking enqueue. A full queue
    /// drops the event for that subscriber only; after `drop_limit`
    /// consecutive drops the subscriber is removed.
    ///
    /// Sequence assignment and history always run, even with no subscribers,
    /// so replay and [`latest_seq`](EventHub::latest_seq) stay correct.
    ///
    /// Returns the assigned sequence number. Never fails.
    pub fn publish(&self, agent_id: &str, event: &Value) -> u64 {
        let mut state = self.state.lock().unwrap();

        let seq = {
            let counter = state.seq.entry(agent_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut stamped = event.clone();
        if let Some(obj) = stamped.as_object_mut() {
            obj.insert("seq".to_string(), Value::from(seq));
        }

        let history = state
            .history
            .entry(agent_id.to_string())
            .or_insert_with(VecDeque::new);
        if history.len() == self.history_size {
            history.pop_front();
        }
        history.push_back(stamped.clone());

        let drop_limit = self.drop_limit;
        let now_empty = match state.subscribers.get_mut(agent_id) {
            Some(subs) => {
                let mut evicted: Vec<u64> = Vec::new();
                for (id, sub) in subs.iter_mut() {
                    match sub.sender.try_send(stamped.clone()) {
                        Ok(()) => sub.consecutive_drops = 0,
                        Err(TrySendError::Full(_)) => {
                            sub.consecutive_drops += 1;
                            if sub.consecutive_drops >= drop_limit {
                                evicted.push(*id);
                            }
                        }
                        // Receiver gone without unsubscribing: prune now.
                        Err(TrySendError::Closed(_)) => evicted.push(*id),
                    }
                }
                for id in evicted {
                    subs.remove(&id);
                }
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.subscribers.remove(agent_id);
        }

        seq
    }

    /// Whether a subscription is still registered for an agent.
    ///
    /// SSE handlers use this to detect that they were evicted as a slow
    /// client and should close their connection.
    pub fn is_subscribed(&self, agent_id: &str, subscription: &Subscription) -> bool {
        let state = self.state.lock().unwrap();
        state
            .subscribers
            .get(agent_id)
            .map(|subs| subs.contains_key(&subscription.id))
            .unwrap_or(false)
    }

    /// Whether the agent currently has at least one subscriber.
    pub fn has_subscribers(&self, agent_id: &str) -> bool {
        self.subscriber_count(agent_id) > 0
    }

    /// Number of active subscribers for one agent.
    pub fn subscriber_count(&self, agent_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .subscribers
            .get(agent_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Total subscribers across all agents.
    ///
    /// Idle-shutdown logic consults this; the server should not exit while
    /// SSE connections are live.
    pub fn total_subscriber_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.subscribers.values().map(|subs| subs.len()).sum()
    }

    /// Buffered events with `seq > since_seq`, in increasing `seq` order.
    ///
    /// Reconnecting clients call this with their last seen sequence number
    /// to fill the gap, provided the gap still fits in the replay ring.
    pub fn get_events_since(&self, agent_id: &str, since_seq: u64) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        match state.history.get(agent_id) {
            Some(history) => history
                .iter()
                .filter(|ev| ev.get("seq").and_then(Value::as_u64).unwrap_or(0) > since_seq)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Highest sequence number ever assigned for an agent, or 0.
    ///
    /// Does not decrease when old events fall out of the replay ring.
    pub fn latest_seq(&self, agent_id: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state.seq.get(agent_id).copied().unwrap_or(0)
    }

    /// Drop the replay ring and sequence counter for a destroyed agent.
    ///
    /// Live subscriptions are left in place; their streams simply see no
    /// further events.
    pub fn forget_agent(&self, agent_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.seq.remove(agent_id);
        state.history.remove(agent_id);
    }
}
