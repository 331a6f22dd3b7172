//! Initialize-once holders for process-wide values
//!
//! A `LazyHolder` builds its value on first access through a fallible
//! initializer and hands out `Arc` clones afterwards. `set` installs an
//! explicit value and `reset` drops the cached one so the next access
//! rebuilds it (test isolation).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

type Init<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

pub struct LazyHolder<T> {
    slot: RwLock<Option<Arc<T>>>,
    init: Init<T>,
}

impl<T> LazyHolder<T> {
    pub fn new(init: impl Fn() -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            slot: RwLock::new(None),
            init: Box::new(init),
        }
    }

    /// Get the value, building it on first access.
    ///
    /// A failed initializer leaves the holder empty so a later call retries.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(value) = self.slot.read().as_ref() {
            return Ok(Arc::clone(value));
        }

        let mut slot = self.slot.write();
        // Another caller may have won the race between the two locks.
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new((self.init)()?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Get the value only if it was already built.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    /// Install a value, replacing any cached one.
    pub fn set(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.slot.write() = Some(Arc::clone(&value));
        value
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Drop the cached value. Intended for test harnesses.
    pub fn reset(&self) {
        *self.slot.write() = None;
    }
}

impl<T> fmt::Debug for LazyHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyHolder")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
