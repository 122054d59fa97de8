//! # Coalesce
//!
//! Request-scoped batching and deduplication of point lookups.
//!
//! ## Overview
//!
//! Resolvers of a nested API response tend to fetch the same kind of entity
//! one key at a time: every movement asks for its vehicle, every comment for
//! its author. Issued naively that is one backend query per field. This crate
//! collects those lookups for a short window and answers them with a single
//! bulk query, while memoizing every settled key for the rest of the request.
//!
//! Key components include:
//!
//! - [`Loader`], the per-request handle resolvers call [`load`](Loader::load) on
//! - [`BatchFn`], the user supplied bulk fetch, answering a batch of keys at once
//! - [`RequestScope`], which ties the loaders of one request to its lifetime
//! - [`LoaderConfig`], the batching window and capacity
//!
//! ## Architecture
//!
//! ### Batches
//!
//! A loader holds at most one collecting batch. The first key opens it and
//! arms a timer; the batch is sealed when it reaches `capacity` unique keys or
//! when the `window` elapses, whichever happens first. A sealed batch is handed
//! to a spawned dispatch task and the next load opens a fresh batch.
//!
//! ### Deduplication
//!
//! A key requested twice in one batch is sent to the batch function once and
//! both callers receive the same result. A key already being fetched by an
//! earlier batch is joined rather than fetched again, and a key that already
//! settled is answered from the memo without touching a batch at all.
//!
//! ### Failure
//!
//! Per-key errors reach only that key's callers and are never cached, so a
//! later load retries. A failing, panicking or malformed batch call fails every
//! caller of that batch with [`LoadError::Dispatch`] and caches nothing.
//!
//! ## Example
//!
//! ```
//! # use async_trait::async_trait;
//! # use coalesce::{BatchFn, Fetched, Loaded, Loader, LoaderConfig, RequestScope};
//! # use tokio_util::sync::CancellationToken;
//! struct Users;
//!
//! #[async_trait]
//! impl BatchFn<u64, String> for Users {
//!     async fn load(&self, ids: &[u64], _cancel: CancellationToken) -> anyhow::Result<Fetched<u64, String>> {
//!         // SELECT id, name FROM users WHERE id = ANY($1)
//!         Ok(Fetched::found(ids.iter().filter(|id| **id < 100).map(|id| (*id, format!("user-{id}")))))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scope = RequestScope::new();
//! let users: Loader<u64, String> = scope.loader(Users, LoaderConfig::default()).unwrap();
//!
//! let (a, b, c) = tokio::join!(users.load(7), users.load(7), users.load(500));
//! assert_eq!(a.unwrap(), Loaded::Found("user-7".to_string()));
//! assert_eq!(b.unwrap(), Loaded::Found("user-7".to_string()));
//! assert_eq!(c.unwrap(), Loaded::NotFound);
//! # }
//! ```
//!

mod communication;
mod config;
mod core;
mod error;
mod key;
mod loaded;
mod loader;
mod memo;
mod scope;

pub use communication::Pending;
pub use config::{DEFAULT_CAPACITY, DEFAULT_WINDOW, LoaderConfig};
pub use core::handler::{BatchFn, Fetched, KeyResult};
pub use error::{ConfigError, LoadError, SharedError};
pub use key::parse_key;
pub use loaded::Loaded;
pub use loader::Loader;
pub use scope::RequestScope;
