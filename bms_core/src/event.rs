//! Structured state-change records and the sink they are published to.

use crate::relay::{Cause, RelayState};
use crate::types::{AdvisoryKind, Entity, FaultKind, Quantity};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    FaultRaised(FaultKind),
    FaultCleared(FaultKind),
    Advisory {
        quantity: Quantity,
        kind: AdvisoryKind,
    },
    AdvisoryCleared {
        quantity: Quantity,
        kind: AdvisoryKind,
    },
    RelayTransition {
        from: RelayState,
        to: RelayState,
        cause: Cause,
    },
    /// Open commanded outside the normal fault path (startup, shutdown).
    RelayForcedOpen(Cause),
    BalanceChanged(Vec<u16>),
    CurrentLimit,
    KeepAliveExpired,
    KeepAliveRenewed,
}

impl EventKind {
    /// Stable machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::FaultRaised(_) => "fault_raised",
            EventKind::FaultCleared(_) => "fault_cleared",
            EventKind::Advisory { .. } => "advisory",
            EventKind::AdvisoryCleared { .. } => "advisory_cleared",
            EventKind::RelayTransition { .. } => "relay_transition",
            EventKind::RelayForcedOpen(_) => "relay_forced_open",
            EventKind::BalanceChanged(_) => "balance_changed",
            EventKind::CurrentLimit => "current_limit",
            EventKind::KeepAliveExpired => "keepalive_expired",
            EventKind::KeepAliveRenewed => "keepalive_renewed",
        }
    }

    /// Human-readable detail, empty when the name says it all.
    pub fn detail(&self) -> String {
        match self {
            EventKind::FaultRaised(k) | EventKind::FaultCleared(k) => k.to_string(),
            EventKind::Advisory { quantity, kind } | EventKind::AdvisoryCleared { quantity, kind } => {
                format!("{quantity} {kind}")
            }
            EventKind::RelayTransition { from, to, cause } => format!("{from} -> {to} ({cause})"),
            EventKind::RelayForcedOpen(cause) => cause.to_string(),
            EventKind::BalanceChanged(cells) => format!("{cells:?}"),
            EventKind::CurrentLimit | EventKind::KeepAliveExpired | EventKind::KeepAliveRenewed => {
                String::new()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub entity: Entity,
    pub kind: EventKind,
    pub value: Option<f32>,
    /// Wall-clock UNIX milliseconds.
    pub timestamp_ms: u64,
}

pub trait EventSink: Send {
    fn publish(&self, event: &Event);
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn publish(&self, event: &Event) {
        (**self).publish(event);
    }
}

impl<T: EventSink + Sync + ?Sized> EventSink for Arc<T> {
    fn publish(&self, event: &Event) {
        (**self).publish(event);
    }
}

/// Publishes to every inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &Event) {
        for s in &self.sinks {
            s.publish(event);
        }
    }
}

/// Forwards events to `tracing` at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, e: &Event) {
        let entity = e.entity.to_string();
        let kind = e.kind.name();
        let detail = e.kind.detail();
        match &e.kind {
            EventKind::FaultRaised(_) | EventKind::KeepAliveExpired => {
                tracing::error!(target: "bms::event", %entity, kind, %detail, value = ?e.value, ts = e.timestamp_ms)
            }
            EventKind::Advisory { .. } | EventKind::RelayForcedOpen(_) => {
                tracing::warn!(target: "bms::event", %entity, kind, %detail, value = ?e.value, ts = e.timestamp_ms)
            }
            EventKind::CurrentLimit => {
                tracing::debug!(target: "bms::event", %entity, kind, value = ?e.value, ts = e.timestamp_ms)
            }
            _ => {
                tracing::info!(target: "bms::event", %entity, kind, %detail, value = ?e.value, ts = e.timestamp_ms)
            }
        }
    }
}
