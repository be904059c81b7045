//! Deferred-free table.
//!
//! Values handed across the glue boundary are registered here together with
//! the function that releases them. A sweep ([`GcTable::run`]) releases every
//! registered entry exactly once. Entries are keyed by the identity of the
//! shared data plus the identity of the free function, so the same data may be
//! registered once per distinct free function.
//!
//! Misuse (duplicate registration, freeing an absent entry) is a programming
//! error and panics.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Function releasing one registered obligation.
pub type GcFreeFn<T> = fn(Rc<T>);

/// Identity of a GC entry: `(data address, free function address)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcKey {
    data: usize,
    free: usize,
}

impl GcKey {
    pub fn new<T>(data: &Rc<T>, free: GcFreeFn<T>) -> Self {
        Self {
            data: Rc::as_ptr(data) as *const () as usize,
            free: free as usize,
        }
    }
}

impl fmt::Debug for GcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcKey({:#x}, {:#x})", self.data, self.free)
    }
}

#[derive(Default)]
pub struct GcTable {
    entries: HashMap<GcKey, Box<dyn FnOnce()>>,
}

impl fmt::Debug for GcTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl GcTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `free(data)` to run on the next sweep.
    ///
    /// # Panics
    ///
    /// If the same `(data, free)` pair is already registered.
    pub fn add<T: 'static>(&mut self, data: Rc<T>, free: GcFreeFn<T>) -> GcKey {
        let key = GcKey::new(&data, free);
        assert!(
            !self.entries.contains_key(&key),
            "gc_add: {key:?} is already registered"
        );
        self.entries.insert(key, Box::new(move || free(data)));
        key
    }

    /// Whether `key` is registered.
    pub fn test(&self, key: GcKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Release one entry right away.
    ///
    /// # Panics
    ///
    /// If `key` is not registered.
    pub fn free_now(&mut self, key: GcKey) {
        let free = self.take(key, "gc_free_now");
        free();
    }

    /// Drop an entry without running its free function.
    ///
    /// # Panics
    ///
    /// If `key` is not registered.
    pub fn remove(&mut self, key: GcKey) {
        // dropping the closure drops the captured Rc, never the free call
        drop(self.take(key, "gc_remove"));
    }

    /// Release every entry. Entries added by free functions during the sweep
    /// are released in a follow-up round. Returns the number of entries freed.
    pub fn run(&mut self) -> usize {
        let mut freed = 0;
        while !self.entries.is_empty() {
            let entries = std::mem::take(&mut self.entries);
            freed += entries.len();
            for free in entries.into_values() {
                free();
            }
        }
        if freed > 0 {
            debug!("gc: released {} entries", freed);
        }
        freed
    }

    fn take(&mut self, key: GcKey, caller: &str) -> Box<dyn FnOnce()> {
        match self.entries.remove(&key) {
            Some(free) => free,
            None => panic!("{caller}: {key:?} is not registered"),
        }
    }
}
