//! Dial alignment and pulse scheduling for a sensorless slave clock.
//!
//! The clock's hands only move when a relay closes one of two excitation
//! lines (A, B) to common. Nothing reads the dial back, so this crate keeps
//! a model of where the dial is (system time plus an offset) and issues
//! pulses to keep that model true.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `slaveclock.yaml` into
//!   strongly-typed structs.
//! - [`time`] -- [`TimeSource`] trait, the system clock, and a settable
//!   clock for tests.
//! - [`relay`] -- Output pins, active levels, and the A/B relay pair.
//! - [`pulse`] -- [`PulseSequencer`]: non-overlapping pulses and bursts.
//! - [`dial`] -- [`DialOffsetModel`] and operator dial readings.
//! - [`planner`] -- Stall-or-advance planning on the 720-minute dial.
//! - [`state`] -- [`SharedState`]: everything behind the controller lock.
//! - [`cadence`] -- Per-minute pulse pattern and the hourly correction
//!   burst.
//! - [`convergence`] -- The fast-set session state machine.
//! - [`control`] -- [`ClockControl`]: operations for the control surface.
//! - [`daemon`] -- [`Daemon`]: the scheduling loop.
//!
//! [`TimeSource`]: time::TimeSource
//! [`PulseSequencer`]: pulse::PulseSequencer
//! [`DialOffsetModel`]: dial::DialOffsetModel
//! [`SharedState`]: state::SharedState
//! [`ClockControl`]: control::ClockControl
//! [`Daemon`]: daemon::Daemon

pub mod cadence;
pub mod config;
pub mod control;
pub mod convergence;
pub mod daemon;
pub mod dial;
pub mod planner;
pub mod pulse;
pub mod relay;
pub mod state;
pub mod time;
