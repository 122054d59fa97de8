//! # Core Batching Machinery
//!
//! The pieces a [`Loader`](crate::Loader) is assembled from. None of them are
//! public; they are exercised through the loader and tested in isolation here.
//!
//! ## Module Structure
//!
//! * [`batch`] - The collecting batch: unique keys in first-seen order, the
//!   waiters parked on each key, and the `Collecting → Sealed → Dispatching → Done`
//!   state machine that guarantees a batch is dispatched exactly once.
//!
//! * [`handler`] - The [`BatchFn`](handler::BatchFn) trait user code implements,
//!   and [`Fetched`](handler::Fetched), the two answer shapes it may return.
//!
//! * [`dispatch`] - One call into the batch function, with panics contained,
//!   cancellation observed, and the answer aligned to the requested keys.
//!
//! * [`timer`] - The single-shot window timer that seals a batch when its
//!   window elapses before it fills up.
//!
pub(crate) mod batch;
pub(crate) mod dispatch;
pub(crate) mod handler;
pub(crate) mod timer;
