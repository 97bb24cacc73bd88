//! Kiln Client: gRPC connectivity for the kilnd build engine
//!
//! This crate provides the client half of the engine control API: address
//! parsing for the transports kilnd listens on, channel construction over
//! unix sockets and TCP, and per-call tracing with an optional span
//! hand-off to a trace delegate.
//!
//! # Architecture
//!
//! - **EngineAddr**: Parsed transport address (unix socket or HTTP endpoint)
//! - **KilnClient**: Cheap-to-clone handle over a shared gRPC channel
//! - **TraceDelegate**: Sink for completed RPC spans, attached via [`ClientOpts`]
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_client::KilnClient;
//!
//! async fn example() -> Result<(), kiln_client::ClientError> {
//!     let client = KilnClient::connect("unix:///run/kilnd.sock")?;
//!     for worker in client.list_workers().await? {
//!         println!("worker {}", worker.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod addr;
pub mod client;
pub mod error;
pub mod trace;

pub use addr::EngineAddr;
pub use client::{ClientOpts, KilnClient};
pub use error::ClientError;
pub use trace::{SpanRecord, TraceDelegate, TRACEPARENT_HEADER};
