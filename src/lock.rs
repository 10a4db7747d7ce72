//! Poison-tolerant locking helpers.
//!
//! Every piece of state guarded in this crate is brought back to a consistent
//! shape before user callbacks run, so a panic in a subscriber never leaves a
//! half-written value behind the lock. Recovering the guard from a poisoned
//! mutex is therefore always sound here.

use std::sync::{
  Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
  TryLockError,
};

pub(crate) trait MutexExt<T> {
  /// Locks the mutex, recovering the guard if a previous holder panicked.
  fn guard(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
  #[inline]
  fn guard(&self) -> MutexGuard<'_, T> { self.lock().unwrap_or_else(PoisonError::into_inner) }
}

pub(crate) trait CondvarExt {
  fn wait_on<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T>;
}

impl CondvarExt for Condvar {
  #[inline]
  fn wait_on<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    self.wait(guard).unwrap_or_else(PoisonError::into_inner)
  }
}

pub(crate) trait RwLockExt<T> {
  fn read_guard(&self) -> RwLockReadGuard<'_, T>;

  /// Takes the write lock only if nobody holds the lock right now.
  fn try_write_guard(&self) -> Option<RwLockWriteGuard<'_, T>>;
}

impl<T> RwLockExt<T> for RwLock<T> {
  #[inline]
  fn read_guard(&self) -> RwLockReadGuard<'_, T> {
    self.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn try_write_guard(&self) -> Option<RwLockWriteGuard<'_, T>> {
    match self.try_write() {
      Ok(guard) => Some(guard),
      Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
      Err(TryLockError::WouldBlock) => None,
    }
  }
}
