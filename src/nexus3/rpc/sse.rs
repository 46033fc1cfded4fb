//! Server-Sent Events plane.
//!
//! `GET /events/{agent_id}?since=N` replays the buffered events with
//! `seq > N`, then streams live events. The stream closes when the hub
//! evicts the subscriber for slowness; a reconnecting client passes its
//! last seen `seq` to fill the gap.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use log::debug;
use serde::Deserialize;

use crate::nexus3::event_hub::EventHub;
use crate::nexus3::rpc::ServerState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Replay buffered events with `seq` greater than this before going live.
    pub since: Option<u64>,
}

/// Unsubscribes when the SSE connection goes away, so idle accounting does
/// not count dead streams.
struct UnsubscribeGuard {
    hub: Arc<EventHub>,
    agent_id: String,
    subscriber_id: u64,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe_by_id(&self.agent_id, self.subscriber_id);
    }
}

pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.auth.validate(authorization) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let hub = Arc::clone(state.registry.hub());
    let replay = match query.since {
        Some(since) => hub.get_events_since(&agent_id, since),
        None => Vec::new(),
    };
    debug!(
        "SSE subscriber for '{}' (replaying {} events)",
        agent_id,
        replay.len()
    );

    let subscription = hub.subscribe(&agent_id);
    let guard = UnsubscribeGuard {
        hub: Arc::clone(&hub),
        agent_id: agent_id.clone(),
        subscriber_id: subscription.id(),
    };

    // Live events end when the hub drops the sender (eviction) or the
    // client disconnects (guard drops, unsubscribing).
    let live = stream::unfold((subscription, guard), |(mut subscription, guard)| async {
        subscription
            .recv()
            .await
            .map(|event| (event, (subscription, guard)))
    });

    let stream = stream::iter(replay)
        .chain(live)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_string())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
