//! Locks that don’t make you deal with poisoning.
//!
//! A lock only becomes poisoned if a thread panics while holding it. There
//! is no sensible way to recover from that, so the wrappers simply panic,
//! too.

use std::sync::{Mutex as StdMutex, RwLock as StdRwLock};

pub use std::sync::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};


//------------ RwLock --------------------------------------------------------

/// A read/write lock that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct RwLock<T: ?Sized>(StdRwLock<T>);

impl<T> RwLock<T> {
    /// Creates a new, unlocked read/write lock.
    pub fn new(t: T) -> Self {
        RwLock(StdRwLock::new(t))
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires the lock for shared read access.
    ///
    /// Blocks until no writer holds the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn read(&self) -> RwLockReadGuard<T> {
        self.0.read().expect("acquiring a poisoned rwlock")
    }

    /// Acquires the lock for exclusive write access.
    ///
    /// Blocks until neither readers nor a writer hold the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn write(&self) -> RwLockWriteGuard<T> {
        self.0.write().expect("acquiring a poisoned rwlock")
    }
}


//------------ Mutex ---------------------------------------------------------

/// A mutex that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(StdMutex<T>);

impl<T> Mutex<T> {
    /// Creates a new, unlocked mutex.
    pub fn new(t: T) -> Self {
        Mutex(StdMutex::new(t))
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex.
    ///
    /// Blocks until nobody else holds the mutex.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn lock(&self) -> MutexGuard<T> {
        self.0.lock().expect("acquiring a poisoned mutex")
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn readers_see_writes() {
        let lock = RwLock::new(Arc::new(1));
        let old = lock.read().clone();
        *lock.write() = Arc::new(2);
        assert_eq!(*old, 1);
        assert_eq!(**lock.read(), 2);
    }

    #[test]
    #[should_panic]
    fn poisoned_mutex_panics() {
        let mutex = Arc::new(Mutex::new(0));
        let clone = mutex.clone();
        let _ = thread::spawn(move || {
            let _guard = clone.lock();
            panic!("poison");
        }).join();
        drop(mutex.lock());
    }
}
