//! Testing utilities for the transport layer.
//!
//! This module provides an instrumented in-memory hub for testing code that
//! drives a [`crate::HubConnection`] without a server. Tests script start
//! results, inspect the calls that reached the connection, drive lifecycle
//! callbacks and push stream items by hand.

mod memory;

pub use memory::{Gate, MemoryConnection, MemoryHub, MemoryStream, RecordedCall};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, carrying on through poisoning from a panicking test thread
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
