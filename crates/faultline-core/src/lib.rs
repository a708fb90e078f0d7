//! Client-side error resilience and recovery engine.
//!
//! `faultline-core` sits between a host application's fault capture points
//! (global error handlers, rejection handlers, component boundaries) and
//! the mechanisms that keep a session usable when things break. For each
//! reported fault it:
//!
//! 1. Derives a stable [`fingerprint::Fingerprint`] and deduplicates
//!    repeats within the session.
//! 2. Classifies a [`fault::Severity`] tier from the fault kind, message,
//!    connectivity, and session fault pressure ([`classify`]).
//! 3. Gates the fault through a trailing-window circuit breaker
//!    ([`breaker`]); during a fault storm, handling degrades to
//!    delivery-only for non-critical faults.
//! 4. Runs an ordered recovery pipeline ([`recovery`]): backoff retry,
//!    data refresh, cache restore, offline fallback, and a last-resort
//!    refresh prompt.
//! 5. Throttles user-facing notifications ([`notify`]): a fixed session
//!    budget, one visible message per tier, fixed messages per kind.
//! 6. Sanitizes the record ([`sanitize`]) and queues it for batched
//!    delivery to a collector ([`batcher`]).
//!
//! The engine is a terminal sink: nothing reported into it is ever
//! re-thrown, and failures inside recovery hooks or the transport are
//! absorbed and logged. Host integration happens through the collaborator
//! traits in [`host`]; every default collaborator is a no-op, so the engine
//! works standalone.
//!
//! # Example
//!
//! ```no_run
//! use faultline_core::engine::ResilienceEngine;
//! use faultline_core::fault::{Fault, FaultContext, FaultKind};
//!
//! # async fn demo() {
//! let mut engine = ResilienceEngine::builder().build();
//!
//! let report = engine
//!     .report_fault(
//!         Fault::new(FaultKind::Network, "failed to fetch /api/cart")
//!             .with_context(FaultContext::new().with("action", "checkout")),
//!     )
//!     .await;
//! println!("severity: {}, fingerprint: {}", report.severity, report.fingerprint);
//! # }
//! ```

pub mod batcher;
pub mod breaker;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fault;
pub mod fingerprint;
pub mod host;
pub mod notify;
pub mod recovery;
pub mod sanitize;

pub use config::EngineConfig;
pub use engine::{FaultReport, RecoveryStatus, ResilienceEngine};
pub use error::{RecoveryError, TransportError};
pub use fault::{Fault, FaultContext, FaultKind, Severity};
