//! Job execution and orchestration for the Lexa fact snapshot engine.
//!
//! [`Engine`] runs the individual jobs (recompute, explain, nightly refresh)
//! against a [`LedgerStore`](lexa_core::store::LedgerStore). [`queue`] runs
//! them on a pool of tokio workers with retry, and [`FactService`] layers the
//! explain-time recompute-then-retry policy on top.

#![allow(async_fn_in_trait)]

pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod job;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod service;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use service::FactService;
