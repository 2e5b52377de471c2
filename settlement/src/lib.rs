//! Rail Settlement Engine
//!
//! Routes payment transfers onto external settlement rails, gates them by
//! rail operating windows and holiday calendars, executes them with bounded
//! retries, and reconciles the ledger against each rail's own records.
//!
//! # Architecture
//!
//! - [`router`]: rail selection, fees, execution, retry backoff
//! - [`window`]: cutoffs, frequencies, holidays, queueing, emergency overrides
//! - [`reconciliation`]: ledger-vs-rail matching and discrepancy severity
//! - [`engine`]: wiring plus the periodic sweeps
//!
//! Storage and rail I/O sit behind traits ([`store`], [`adapters`]) so the
//! engine runs against in-memory backends and mock rails in tests.
//!
//! # Example
//!
//! ```no_run
//! use rail_settlement::{
//!     AdapterRegistry, EngineConfig, Protocol, SettlementEngine, SettlementRequest, TenantId,
//!     TracingEventSink,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rail_settlement::Result<()> {
//!     let (adapters, _mocks) = AdapterRegistry::with_mocks();
//!     let engine = SettlementEngine::in_memory(
//!         EngineConfig::default(),
//!         adapters,
//!         Arc::new(TracingEventSink),
//!     )?;
//!
//!     let request = SettlementRequest::new(TenantId::new("acme"), Protocol::CrossBorder, dec!(100), "USD")
//!         .to_country("BR");
//!     let response = engine.settle(request).await?;
//!     println!("{} via {}: net {}", response.status, response.rail, response.net_amount);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
#[allow(missing_docs)]
pub mod metrics;
pub mod reconciliation;
pub mod router;
pub mod store;
pub mod types;
pub mod window;

// Re-exports
pub use adapters::{AdapterError, AdapterRegistry, MockOutcome, MockRail, RailExecutor, RailQuery};
pub use catalog::{RailCatalog, RailDescriptor, RailSettings};
pub use config::EngineConfig;
pub use engine::{SettlementEngine, SweepReport};
pub use error::{Error, Result};
pub use events::{ChannelEventSink, EventSink, SettlementEvent, TracingEventSink};
pub use reconciliation::ReconciliationEngine;
pub use router::SettlementRouter;
pub use store::InMemoryStore;
pub use types::*;
pub use window::SettlementWindowManager;
