pub mod api;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod layout;
pub mod results;
pub mod session;
pub mod worker;

pub use error::{KeyWeaveError, KwResult};
pub use keyweave_protocol as protocol;

use std::sync::{Mutex, MutexGuard, PoisonError};

// A panicking callback must not wedge the foreground.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
