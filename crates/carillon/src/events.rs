//! Lifecycle events
//!
//! The monitor loop reports transport edges as [`LifecycleEvent`]s on an
//! [`EventStream`]. The numeric codes are part of the external contract.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleEvent {
    Stopped = 0,
    Started = 2,
    Paused = 3,
}

impl LifecycleEvent {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            LifecycleEvent::Stopped => "stopped",
            LifecycleEvent::Started => "started",
            LifecycleEvent::Paused => "paused",
        }
    }
}

impl TryFrom<u8> for LifecycleEvent {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(LifecycleEvent::Stopped),
            2 => Ok(LifecycleEvent::Started),
            3 => Ok(LifecycleEvent::Paused),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

impl Serialize for LifecycleEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Sending half, held by the monitor loop
pub type EventSender = mpsc::UnboundedSender<LifecycleEvent>;

/// Lifecycle events for one session
///
/// Ends after the final `Stopped` once the session is over.
pub struct EventStream {
    inner: UnboundedReceiverStream<LifecycleEvent>,
}

impl EventStream {
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            EventStream {
                inner: UnboundedReceiverStream::new(rx),
            },
        )
    }
}

impl Stream for EventStream {
    type Item = LifecycleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_codes_round_trip() {
        for event in [
            LifecycleEvent::Stopped,
            LifecycleEvent::Started,
            LifecycleEvent::Paused,
        ] {
            assert_eq!(LifecycleEvent::try_from(event.code()), Ok(event));
        }
        assert_eq!(LifecycleEvent::try_from(1), Err(1));
        assert_eq!(LifecycleEvent::Paused.code(), 3);
    }

    #[test]
    fn test_serializes_as_code() {
        let json = serde_json::to_string(&[LifecycleEvent::Started, LifecycleEvent::Stopped])
            .unwrap();
        assert_eq!(json, "[2,0]");
    }

    #[test]
    fn test_display() {
        assert_eq!(LifecycleEvent::Started.to_string(), "started(2)");
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_drops() {
        let (tx, mut stream) = EventStream::channel();
        tx.send(LifecycleEvent::Started).unwrap();
        tx.send(LifecycleEvent::Stopped).unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(LifecycleEvent::Started));
        assert_eq!(stream.next().await, Some(LifecycleEvent::Stopped));
        assert_eq!(stream.next().await, None);
    }
}
