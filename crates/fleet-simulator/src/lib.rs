//! # Fleet Simulator
//!
//! Kinetic telemetry simulator for fleets of tracked devices: cargo ships
//! looping between ports, trucks shuttling between depots and static retail
//! freezers, each reporting cold-chain and GPS readings on a fixed interval.
//!
//! ## Features
//!
//! - Waypoint routes expanded into dense polylines, with an optional routing service
//! - Docking and approach behaviour near waypoints
//! - Compressor-cycle sensor model with injectable refrigeration faults
//! - Log, HTTP and NATS publishers with bounded retries

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod docking;
pub mod entity;
pub mod error;
pub mod faults;
pub mod motion;
pub mod publish;
pub mod route;
pub mod scheduler;
pub mod sensors;

pub use config::{EngineTunables, EntitySpec, FleetConfig, PublisherKind, SimulatorConfig, tick_interval_from_secs};
pub use docking::DockingPolicy;
pub use entity::SimulatedEntity;
pub use error::{ConfigError, PublishError, RoutingError};
pub use faults::{FaultProfile, SensorProfile};
pub use motion::{MotionParams, MotionState, StepOutcome, WrapMode};
pub use publish::{HttpPublisher, LogPublisher, NatsPublisher, Publisher, RetryPolicy, RetryingPublisher};
pub use route::{Closure, HttpRouteProvider, Polyline, Route, RouteBuilder, RouteProvider, StraightLineRouter};
pub use scheduler::{EntitySummary, PublishScheduler, SchedulerOptions};
pub use sensors::{ColdChainBounds, ColdChainSynthesizer, SensorReading};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
