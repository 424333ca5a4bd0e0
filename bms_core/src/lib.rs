#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core battery-management logic (hardware-agnostic).
//!
//! All device interactions go through the `bms_traits` seams: `SensorLink`
//! for raw samples, `RelayOutput` for the main contactor, `BalanceOutput` for
//! the bleed resistors.
//!
//! ## Architecture
//!
//! - **Calibration**: linear raw to physical conversion (`calibration`)
//! - **Sampler/Filter**: decayed moving average and staleness per channel (`filter`)
//! - **Poll Scheduler**: one thread per cadence writing the shared `Pack` (`scheduler`)
//! - **Safety Limit Engine**: hard faults, advisories, current derating (`limits`)
//! - **Cell Balance Controller**: greedy per-cycle selection (`balance`)
//! - **Relay State Machine**: hold-off timing and forced opens (`relay`)
//! - **Keep-alive**: restart-survivable deadline (`keepalive`)
//! - **Controller**: the tick that connects them and publishes events (`controller`)
//!
//! Filtered values have a single writer (the cadence owning the channel) and
//! are published as atomic `f32` bits; the relay output has a single writer
//! (the state machine).

pub mod balance;
pub mod builder;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod energy;
pub mod error;
pub mod event;
pub mod filter;
pub mod hw_error;
pub mod keepalive;
pub mod limits;
pub mod mocks;
pub mod pack;
pub mod relay;
pub mod runner;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod util;

pub use builder::ControllerBuilder;
pub use calibration::Calibration;
pub use config::{
    BalanceCfg, Band, CellCfg, ChannelCfg, ControllerCfg, CrossCheckCfg, KeepAliveCfg, Limit,
    PackCfg, Periods, PollCfg, QuantityCfg, RelayCfg,
};
pub use controller::Controller;
pub use error::{BmsError, BuildError, Result};
pub use event::{Event, EventKind, EventSink, FanoutSink, TracingSink};
pub use filter::{Reading, smoothing_weight};
pub use keepalive::KeepAlive;
pub use limits::{Advisory, AdvisorySet, Fault, FaultSet, SafetyEngine, SafetyReport, derate_factor};
pub use pack::{Pack, Snapshot};
pub use relay::{Cause, RelayState, RelayStateMachine, RelayStatus, Transition};
pub use runner::{RunOptions, RunSummary};
pub use scheduler::{CadenceWorker, CycleSummary, PollScheduler};
pub use status::{ControllerStatus, TickOutcome};
pub use types::{AdvisoryKind, Cadence, Entity, FaultKind, Quantity};
