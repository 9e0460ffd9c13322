//! Server-Sent Events for streamed replies

use crate::conversation::ThreadStats;
use crate::service::Reply;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Characters per `fragment` event when the client does not ask
pub const DEFAULT_FRAGMENT_CHARS: usize = 16;

/// `fragment` events covering the reply, then one `done` event
pub fn reply_stream(
    reply: &Reply,
    stats: &ThreadStats,
    max_chars: usize,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events: Vec<Event> = reply
        .fragments(max_chars)
        .map(|text| {
            Event::default()
                .event("fragment")
                .data(json!({ "type": "fragment", "text": text }).to_string())
        })
        .collect();

    events.push(
        Event::default().event("done").data(
            json!({
                "type": "done",
                "degraded": reply.degraded,
                "stats": stats,
            })
            .to_string(),
        ),
    );

    Sse::new(stream::iter(events.into_iter().map(Ok))).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
