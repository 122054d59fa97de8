mod pending;
mod waiter;

pub use pending::Pending;
pub(crate) use waiter::{Outcome, Waiter};
