//! Core types and trait definitions for the Lexa fact snapshot engine.
//!
//! No HTTP or database dependencies; every other crate builds on it.

// Trait methods spell out `impl Future + Send`; implementors use `async fn`.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod drift;
pub mod entity;
pub mod error;
pub mod evidence;
pub mod explain;
pub mod fact;
pub mod hash;
pub mod producer;
pub mod store;

pub use error::{Error, Result};
