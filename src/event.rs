//! Lifecycle events delivered to the owning application.
//!
//! Delivery is fire-and-forget: sinks never report failure back to the
//! controller. Sinks run outside the controller's state lock and may call
//! back into it.

use std::os::fd::RawFd;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, trace};

/// Emitted once a tunnel is established. Payload: `{"fd": <int>}`.
pub const VPN_SERVICE_START: &str = "vpn_service_start";

/// Emitted when a tunnel is torn down. Payload: `{}`.
pub const VPN_SERVICE_STOP: &str = "vpn_service_stop";

/// One-way event channel to the owning application.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

impl<F> EventSink for F
where
    F: Fn(&str, Value) + Send + Sync,
{
    fn emit(&self, event: &str, payload: Value) {
        self(event, payload)
    }
}

/// Events raised by the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Started { fd: RawFd },
    Stopped,
}

impl ServiceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEvent::Started { .. } => VPN_SERVICE_START,
            ServiceEvent::Stopped => VPN_SERVICE_STOP,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ServiceEvent::Started { fd } => json!({ "fd": fd }),
            ServiceEvent::Stopped => json!({}),
        }
    }

    pub(crate) fn emit_to(&self, sink: &dyn EventSink) {
        sink.emit(self.name(), self.payload());
    }
}

/// An emitted event as carried by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: Value,
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EmittedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EmittedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: Value) {
        let event = EmittedEvent {
            name: event.to_string(),
            payload,
        };
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }
}

/// Only logs events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &str, payload: Value) {
        info!(event, %payload, "Lifecycle event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_event_names_and_payloads() {
        let started = ServiceEvent::Started { fd: 17 };
        assert_eq!(started.name(), "vpn_service_start");
        assert_eq!(started.payload(), json!({ "fd": 17 }));

        assert_eq!(ServiceEvent::Stopped.name(), "vpn_service_stop");
        assert_eq!(ServiceEvent::Stopped.payload(), json!({}));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        ServiceEvent::Started { fd: 3 }.emit_to(&sink);
        ServiceEvent::Stopped.emit_to(&sink);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, VPN_SERVICE_START);
        assert_eq!(first.payload["fd"], 3);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.name, VPN_SERVICE_STOP);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_sink_logs_event() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            ServiceEvent::Started { fd: 42 }.emit_to(&TracingSink);
        });

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Lifecycle event"), "{output}");
        assert!(output.contains(VPN_SERVICE_START), "{output}");
        assert!(output.contains(r#"{"fd":42}"#), "{output}");
    }

    #[test]
    fn test_channel_sink_ignores_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(VPN_SERVICE_STOP, json!({}));
    }
}
