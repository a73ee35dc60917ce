//! JSON REST API for Lexa.
//!
//! Exposes an axum [`Router`] backed by a [`FactService`]. Authentication,
//! TLS and transport concerns are the caller's responsibility; the caller's
//! identity arrives in headers (see [`context`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", lexa_api::api_router(service.clone()))
//! ```

pub mod audit;
pub mod context;
pub mod error;
pub mod evidence;
pub mod explain;
pub mod facts;
pub mod ops;

use axum::{
  Router,
  routing::{get, post},
};
use lexa_core::{
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::FactService;

pub use error::ApiError;

/// Build the API router for `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, U, G>(service: FactService<S, U, G>) -> Router<()>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  Router::new()
    // Facts
    .route("/facts", get(facts::history::<S, U, G>))
    .route("/facts/latest", get(facts::latest::<S, U, G>))
    .route("/facts/recompute", post(facts::recompute::<S, U, G>))
    // Explanations
    .route("/explain", post(explain::explain::<S, U, G>))
    .route("/explain/latest", get(explain::latest::<S, U, G>))
    // ESG evidence
    .route("/esg/evidence/verify", post(evidence::verify::<S, U, G>))
    // Audit & ops
    .route("/audit", get(audit::list::<S, U, G>))
    .route("/ops/refresh", post(ops::refresh::<S, U, G>))
    .with_state(service)
}
