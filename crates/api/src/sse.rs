//! Server-Sent Events framing over a watch subscription.
//!
//! One `data: <event-json>\n\n` chunk per event, a `: connected\n\n`
//! greeting on open, and a `: heartbeat\n\n` comment through idle periods.
//! The subscriber handle lives inside the body stream, so a client
//! disconnect drops the body and unsubscribes automatically.

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use reef_watch::Subscriber;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{Instant, Interval};

/// Keep-alive comment cadence for idle streams.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct SseState {
    subscriber: Subscriber,
    heartbeat: Interval,
}

/// Build the streaming response body for one subscriber.
pub fn sse_body(subscriber: Subscriber) -> UnsyncBoxBody<Bytes, Infallible> {
    let heartbeat = tokio::time::interval_at(
        Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );

    let greeting = futures::stream::iter([Bytes::from_static(b": connected\n\n")]);
    let events = futures::stream::unfold(
        SseState {
            subscriber,
            heartbeat,
        },
        |mut state| async move {
            loop {
                tokio::select! {
                    event = state.subscriber.recv() => {
                        let event = event?; // None: bus closed, end the stream
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                return Some((Bytes::from(format!("data: {}\n\n", json)), state));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping unencodable watch event");
                            }
                        }
                    }
                    _ = state.heartbeat.tick() => {
                        return Some((Bytes::from_static(b": heartbeat\n\n"), state));
                    }
                }
            }
        },
    );

    let frames = greeting
        .chain(events)
        .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
    StreamBody::new(frames).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_watch::{Event, WatchBus};

    async fn next_chunk(body: &mut UnsyncBoxBody<Bytes, Infallible>) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("frame within deadline")
            .expect("stream still open")
            .expect("infallible");
        String::from_utf8(frame.into_data().expect("data frame").to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_greeting_then_events() {
        let bus = WatchBus::new();
        let mut body = sse_body(bus.subscribe("", 8));

        assert_eq!(next_chunk(&mut body).await, ": connected\n\n");

        bus.publish(&Event::put("x", "v"));
        let chunk = next_chunk(&mut body).await;
        assert!(chunk.starts_with("data: "), "{}", chunk);
        assert!(chunk.ends_with("\n\n"));
        assert!(chunk.contains(r#""key":"x""#));
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_closes() {
        let bus = WatchBus::new();
        let mut body = sse_body(bus.subscribe("", 8));
        assert_eq!(next_chunk(&mut body).await, ": connected\n\n");

        bus.close();
        let end = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("frame within deadline");
        assert!(end.is_none(), "stream must end after bus close");
    }

    #[tokio::test]
    async fn test_dropping_body_unsubscribes() {
        let bus = WatchBus::new();
        let body = sse_body(bus.subscribe("", 8));
        assert_eq!(bus.subscriber_count(), 1);

        drop(body);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
