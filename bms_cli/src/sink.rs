//! JSON-lines event output.

use bms_core::{Event, EventSink};
use serde_json::json;
use std::io::Write;
use std::sync::Mutex;

/// Writes one JSON object per event. Write errors are logged and dropped;
/// the control loop never blocks on a broken output.
pub struct JsonlSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

/// Stable JSON shape of an event.
pub fn event_json(e: &Event) -> serde_json::Value {
    json!({
        "ts_ms": e.timestamp_ms,
        "entity": e.entity.to_string(),
        "event": e.kind.name(),
        "detail": e.kind.detail(),
        "value": e.value,
    })
}

impl EventSink for JsonlSink {
    fn publish(&self, event: &Event) {
        let line = event_json(event).to_string();
        let mut out = match self.out.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(error = %e, "event output failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::{Entity, EventKind, FaultKind};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn one_object_per_line() {
        let buf = Shared::default();
        let sink = JsonlSink::new(buf.clone());
        sink.publish(&Event {
            entity: Entity::Cell(4),
            kind: EventKind::FaultRaised(FaultKind::Overtemperature),
            value: Some(61.5),
            timestamp_ms: 42,
        });
        sink.publish(&Event {
            entity: Entity::KeepAlive,
            kind: EventKind::KeepAliveExpired,
            value: None,
            timestamp_ms: 43,
        });
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["entity"], "cell4");
        assert_eq!(lines[0]["event"], "fault_raised");
        assert_eq!(lines[0]["detail"], "Overtemperature");
        assert_eq!(lines[0]["value"], 61.5);
        assert!(lines[1]["value"].is_null());
    }
}
