//! Reference-counted ownership of a closeable resource.
//!
//! A producer wraps an expensive resource (a native frame buffer, say) in a
//! [`SharedResource`] the moment it becomes available and publishes the
//! handle. Every consumer [`acquire`](SharedResource::acquire)s its own
//! [`Holder`] right away in `on_next` and drops it when done. The resource is
//! closed exactly once, when the last key is released, on the releasing
//! thread. If a borrow from [`Holder::get`] is still alive at that point, the
//! thread ending the last borrow closes it instead.
//!
//! Keys are opaque tokens, one per claimant. The producer's root key is
//! claimed at construction. Once the key set has drained the resource is gone
//! for good and any further `acquire` fails with [`ClosedError`].
//!
//! ```rust
//! use flowcore::prelude::*;
//!
//! struct Frame(Vec<u8>);
//!
//! impl Closeable for Frame {
//!   fn close(self) -> Result<(), BoxError> { Ok(()) }
//! }
//!
//! let (shared, root) = SharedResource::new(Frame(vec![1, 2, 3]));
//! let consumer = shared.acquire(Key::unique()).unwrap();
//! drop(root);
//! assert_eq!(consumer.get().unwrap().0, vec![1, 2, 3]);
//! drop(consumer);
//! assert!(shared.is_closed());
//! ```

use std::{
  collections::HashSet,
  fmt,
  ops::Deref,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, RwLock, RwLockReadGuard,
  },
};

use log::{debug, warn};

use crate::{
  error::{BoxError, ClosedError},
  lock::{MutexExt, RwLockExt},
};

/// A resource that needs explicit, fallible cleanup.
pub trait Closeable: Send {
  fn close(self) -> Result<(), BoxError>;
}

/// Opaque claim token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(u64);

impl Key {
  /// Returns a key that no other call has returned.
  pub fn unique() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Key(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

struct Core<R: Closeable> {
  keys: Mutex<HashSet<Key>>,
  value: RwLock<Option<R>>,
}

impl<R: Closeable> Core<R> {
  fn acquire(&self, key: Key) -> Result<(), ClosedError> {
    let mut keys = self.keys.guard();
    if keys.is_empty() {
      return Err(ClosedError);
    }
    keys.insert(key);
    Ok(())
  }

  fn release(&self, key: Key) {
    {
      let mut keys = self.keys.guard();
      if !keys.remove(&key) || !keys.is_empty() {
        return;
      }
    }
    self.close_if_drained();
  }

  /// Closes the value once the key set is empty. Left to the last live
  /// borrow if one still reads the value.
  fn close_if_drained(&self) {
    let value = match self.value.try_write_guard() {
      Some(mut slot) => slot.take(),
      None => return,
    };
    if let Some(value) = value {
      debug!("last key released, closing shared resource");
      if let Err(err) = value.close() {
        warn!("unexpected error while closing shared resource: {err}");
      }
    }
  }

  fn holds(&self, key: Key) -> bool { self.keys.guard().contains(&key) }

  fn is_drained(&self) -> bool { self.keys.guard().is_empty() }
}

/// Handle to a reference-counted resource. Cloning the handle does not claim
/// the resource; only [`acquire`](Self::acquire) does.
pub struct SharedResource<R: Closeable> {
  core: Arc<Core<R>>,
}

impl<R: Closeable> Clone for SharedResource<R> {
  fn clone(&self) -> Self { SharedResource { core: self.core.clone() } }
}

impl<R: Closeable> SharedResource<R> {
  /// Wraps `value` and returns the handle together with the root holder.
  pub fn new(value: R) -> (Self, Holder<R>) {
    let root = Key::unique();
    let shared = Self::with_root_key(value, root);
    let holder = Holder { core: shared.core.clone(), key: root, project: identity };
    (shared, holder)
  }

  /// Wraps `value` with `root` as the initial claim. The caller must
  /// eventually [`release`](Self::release) `root`.
  pub fn with_root_key(value: R, root: Key) -> Self {
    let core = Core { keys: Mutex::new(HashSet::from([root])), value: RwLock::new(Some(value)) };
    SharedResource { core: Arc::new(core) }
  }

  /// Claims the resource for `key`. Fails once the resource was closed.
  pub fn acquire(&self, key: Key) -> Result<Holder<R>, ClosedError> {
    self.core.acquire(key)?;
    Ok(Holder { core: self.core.clone(), key, project: identity })
  }

  /// Drops the claim of `key`, closing the resource if it was the last.
  pub fn release(&self, key: Key) { self.core.release(key) }

  /// A view onto part of the resource, sharing this resource's claims.
  pub fn view<V: ?Sized>(&self, project: fn(&R) -> &V) -> SharedView<R, V> {
    SharedView { core: self.core.clone(), project }
  }

  pub fn is_closed(&self) -> bool { self.core.is_drained() }

  /// Number of outstanding claims.
  pub fn claims(&self) -> usize { self.core.keys.guard().len() }
}

impl<R: Closeable> fmt::Debug for SharedResource<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedResource").field("claims", &self.claims()).finish()
  }
}

/// Projection of a [`SharedResource`] onto a component of the resource.
///
/// Views acquire and release against the same key set as the resource they
/// came from, so differently typed consumers share one lifetime.
pub struct SharedView<R: Closeable, V: ?Sized> {
  core: Arc<Core<R>>,
  project: fn(&R) -> &V,
}

impl<R: Closeable, V: ?Sized> Clone for SharedView<R, V> {
  fn clone(&self) -> Self { SharedView { core: self.core.clone(), project: self.project } }
}

impl<R: Closeable, V: ?Sized> SharedView<R, V> {
  pub fn acquire(&self, key: Key) -> Result<Holder<R, V>, ClosedError> {
    self.core.acquire(key)?;
    Ok(Holder { core: self.core.clone(), key, project: self.project })
  }

  pub fn release(&self, key: Key) { self.core.release(key) }
}

/// One claim on a shared resource. Dropping or [`close`](Self::close)-ing
/// the holder releases its key.
pub struct Holder<R: Closeable, V: ?Sized = R> {
  core: Arc<Core<R>>,
  key: Key,
  project: fn(&R) -> &V,
}

impl<R: Closeable, V: ?Sized> Holder<R, V> {
  pub fn key(&self) -> Key { self.key }

  /// Borrows the (projected) resource.
  ///
  /// Borrows are shared: any number of holders, views included, may read the
  /// resource at once from any thread. Fails if this holder's key was
  /// released out from under it through [`SharedResource::release`].
  pub fn get(&self) -> Result<Held<'_, R, V>, ClosedError> {
    if !self.core.holds(self.key) {
      return Err(ClosedError);
    }
    let guard = self.core.value.read_guard();
    if guard.is_none() {
      return Err(ClosedError);
    }
    Ok(Held { core: &*self.core, guard: Some(guard), project: self.project })
  }

  /// Releases this claim now.
  pub fn close(self) {}
}

impl<R: Closeable, V: ?Sized> Drop for Holder<R, V> {
  fn drop(&mut self) { self.core.release(self.key) }
}

impl<R: Closeable, V: ?Sized> fmt::Debug for Holder<R, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Holder").field("key", &self.key).finish()
  }
}

/// Borrow of a held resource, returned by [`Holder::get`].
pub struct Held<'a, R: Closeable, V: ?Sized> {
  core: &'a Core<R>,
  guard: Option<RwLockReadGuard<'a, Option<R>>>,
  project: fn(&R) -> &V,
}

impl<R: Closeable, V: ?Sized> Deref for Held<'_, R, V> {
  type Target = V;

  fn deref(&self) -> &V {
    let value = self
      .guard
      .as_ref()
      .and_then(|slot| slot.as_ref())
      .expect("held resource checked present on borrow");
    (self.project)(value)
  }
}

impl<R: Closeable, V: ?Sized> Drop for Held<'_, R, V> {
  fn drop(&mut self) {
    drop(self.guard.take());
    if self.core.is_drained() {
      self.core.close_if_drained();
    }
  }
}

fn identity<R>(value: &R) -> &R { value }

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicUsize, Ordering},
      mpsc,
    },
    thread,
    time::Duration,
  };

  use super::*;

  struct Frame {
    pixels: Vec<u8>,
    width: u32,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
  }

  impl Closeable for Frame {
    fn close(self) -> Result<(), BoxError> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      if self.fail_close {
        Err("native buffer already freed".into())
      } else {
        Ok(())
      }
    }
  }

  fn pixels_of(frame: &Frame) -> &[u8] { &frame.pixels }

  fn width_of(frame: &Frame) -> &u32 { &frame.width }

  fn frame(closes: &Arc<AtomicUsize>) -> Frame {
    Frame { pixels: vec![1, 2, 3, 4], width: 2, closes: closes.clone(), fail_close: false }
  }

  #[test]
  fn closes_only_after_the_last_release() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let (k1, k2) = (Key::unique(), Key::unique());
    let first = shared.acquire(k1).unwrap();
    let second = shared.acquire(k2).unwrap();
    drop(root);

    first.close();
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert_eq!(second.get().unwrap().pixels, vec![1, 2, 3, 4]);

    drop(second);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(shared.is_closed());
  }

  #[test]
  fn acquire_after_close_fails() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    drop(root);

    assert_eq!(shared.acquire(Key::unique()).unwrap_err(), ClosedError);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn explicit_root_key_and_release() {
    let closes = Arc::new(AtomicUsize::new(0));
    let root = Key::unique();
    let shared = SharedResource::with_root_key(frame(&closes), root);
    let consumer = Key::unique();
    let holder = shared.acquire(consumer).unwrap();

    shared.release(root);
    shared.release(root);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert_eq!(shared.claims(), 1);

    shared.release(consumer);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    drop(holder);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn views_share_the_key_accounting() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let pixels = shared.view(pixels_of);
    let width = shared.view(width_of);

    let p = pixels.acquire(Key::unique()).unwrap();
    let w = width.acquire(Key::unique()).unwrap();
    drop(root);

    assert_eq!(&*p.get().unwrap(), &[1, 2, 3, 4]);
    assert_eq!(*w.get().unwrap(), 2);
    drop(p);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    drop(w);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn two_views_borrowed_at_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let p = shared.view(pixels_of).acquire(Key::unique()).unwrap();
    let w = shared.view(width_of).acquire(Key::unique()).unwrap();
    drop(root);

    let (pixels, width) = (p.get().unwrap(), w.get().unwrap());
    assert_eq!(pixels.len() as u32, *width * 2);
    drop((pixels, width));

    drop((p, w));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn holders_on_two_threads_borrow_concurrently() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let other = shared.acquire(Key::unique()).unwrap();
    let borrowed = root.get().unwrap();

    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
      let width = other.get().map(|frame| frame.width);
      let _ = tx.send(width);
    });

    let width = rx.recv_timeout(Duration::from_secs(5)).expect("second borrow must not block");
    assert_eq!(width, Ok(2));
    assert_eq!(borrowed.width, 2);
    reader.join().unwrap();
  }

  #[test]
  fn last_borrow_closes_when_keys_drain_underneath_it() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let holder = shared.acquire(Key::unique()).unwrap();
    drop(root);

    let borrowed = holder.get().unwrap();
    shared.release(holder.key());
    assert!(shared.is_closed());
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert_eq!(borrowed.width, 2);

    drop(borrowed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    drop(holder);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn close_failure_is_swallowed() {
    let _ = env_logger::try_init();
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(Frame { fail_close: true, ..frame(&closes) });

    drop(root);

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(shared.is_closed());
  }

  #[test]
  fn holder_released_out_from_under_it() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let holder = shared.acquire(Key::unique()).unwrap();

    shared.release(holder.key());

    assert!(holder.get().is_err());
    drop(holder);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    drop(root);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn concurrent_claims_close_exactly_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (shared, root) = SharedResource::new(frame(&closes));
    let workers: Vec<_> = (0..8)
      .map(|_| {
        let holder = shared.acquire(Key::unique()).unwrap();
        thread::spawn(move || {
          for _ in 0..100 {
            assert_eq!(holder.get().unwrap().width, 2);
          }
        })
      })
      .collect();
    drop(root);
    for worker in workers {
      worker.join().unwrap();
    }

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(shared.is_closed());
  }
}
