//! meetgrid-health — liveness sweeps over the worker registry.
//!
//! Workers prove they are alive by heartbeating. A worker whose last
//! heartbeat is older than the staleness threshold is marked `Unhealthy`
//! so candidate selection stops offering it work. `Draining` workers are
//! left alone; they are leaving on purpose.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── interval loop (select: cancelled | next tick)
//!   ├── StateStore::mark_stale_unhealthy(threshold)
//!   └── Optional HealthCallback(transitioned ids) for MC failover
//! ```

pub mod checker;

pub use checker::{BoxFuture, HealthCallback, HealthChecker};
