//! Reuse pools for transports and clients.
//!
//! A checkout is exclusive: the object is owned by the [`Pooled`] guard until
//! the guard is dropped, at which point it goes back to the pool. The pool
//! counts outstanding checkouts so a leak shows up as a non-zero count.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

pub struct Pool<T> {
    name: &'static str,
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    outstanding: AtomicUsize,
    created: AtomicUsize,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new<F>(name: &'static str, factory: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Arc::new(Self {
            name,
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            outstanding: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        })
    }

    /// Takes an idle object, or creates one when the pool is empty.
    pub fn checkout(self: &Arc<Self>) -> Pooled<T> {
        let reused = self.idle.lock().pop();
        let item = match reused {
            Some(item) => item,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(pool = self.name, outstanding, "checked out");
        Pooled { item: Some(item), pool: Arc::clone(self) }
    }

    fn put_back(&self, item: T) {
        self.idle.lock().push(item);
        let outstanding = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(pool = self.name, outstanding, "returned");
    }

    /// Checkouts not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Objects ever built by the factory.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An object checked out of a [`Pool`]; returned when dropped.
pub struct Pooled<T: Send + 'static> {
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only `drop` takes the item
        self.item.as_ref().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put_back(item);
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("pool", &self.pool.name).finish_non_exhaustive()
    }
}
