//! Hot-reloadable shared state.
//!
//! Both the profile repository and the policy set are immutable values
//! that are rebuilt from files every now and then. [`Reloadable`] holds
//! the current value behind a read/write lock and replaces it wholesale
//! when a rebuild succeeds.

use std::fmt;
use std::sync::Arc;
use log::{info, warn};
use crate::utils::sync::{Mutex, RwLock};


//------------ Build ---------------------------------------------------------

/// A type that can build a fresh value from its sources.
pub trait Build: Send + Sync {
    /// The type of the value being built.
    type Output: Send + Sync;

    /// The error that happens if building fails.
    type Error: fmt::Display;

    /// Builds a new value.
    fn build(&self) -> Result<Self::Output, Self::Error>;

    /// A short description of the value for log messages.
    fn describe(&self) -> String;
}


//------------ Reloadable ----------------------------------------------------

/// A value that can be rebuilt and swapped while in use.
///
/// Readers get an `Arc` of the current value via [`get`][Self::get] and
/// keep using it for as long as they like. A [`reload`][Self::reload]
/// builds a new value without holding the lock and only takes the write
/// lock to swap the reference. If building fails, the old value stays in
/// place.
pub struct Reloadable<B: Build> {
    /// The builder for new values.
    builder: B,

    /// The current value.
    current: RwLock<Arc<B::Output>>,

    /// Serializes reloads so only one build runs at a time.
    reloading: Mutex<()>,
}

impl<B: Build> Reloadable<B> {
    /// Creates a new value by running the builder once.
    ///
    /// Fails if the builder fails. There is no empty default state.
    pub fn new(builder: B) -> Result<Self, B::Error> {
        let current = builder.build()?;
        Ok(Reloadable {
            builder,
            current: RwLock::new(Arc::new(current)),
            reloading: Mutex::new(()),
        })
    }

    /// Returns the current value.
    pub fn get(&self) -> Arc<B::Output> {
        self.current.read().clone()
    }

    /// Rebuilds the value and, if that succeeds, replaces the current one.
    ///
    /// If building fails, a warning is logged, the current value is kept,
    /// and the error is returned.
    pub fn reload(&self) -> Result<(), B::Error> {
        let _reloading = self.reloading.lock();
        match self.builder.build() {
            Ok(value) => {
                *self.current.write() = Arc::new(value);
                info!("Reloaded {}.", self.builder.describe());
                Ok(())
            }
            Err(err) => {
                warn!(
                    "Failed to reload {}: {}. Keeping previous version.",
                    self.builder.describe(), err
                );
                Err(err)
            }
        }
    }
}

impl<B: Build + fmt::Debug> fmt::Debug for Reloadable<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reloadable")
            .field("builder", &self.builder)
            .finish()
    }
}


//============ Tests =========================================================
