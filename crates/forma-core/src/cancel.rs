//! Cooperative cancellation for DDL execution and row writes.
//!
//! A [`CancelHandle`] raises the flag; every clone of the paired
//! [`CancelSignal`] observes it. Stores check the signal immediately before
//! committing and roll back when it is set.

use tokio::sync::watch;

/// Create a linked handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// The raising side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) { self.tx.send_replace(true); }

  /// Another signal observing this handle.
  pub fn signal(&self) -> CancelSignal {
    CancelSignal {
      rx: Some(self.tx.subscribe()),
    }
  }
}

/// The observing side. Cheap to clone and `Send`, so it can travel into the
/// database thread alongside a write.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
  rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
  /// A signal that is never raised.
  pub fn never() -> Self { Self { rx: None } }

  pub fn is_cancelled(&self) -> bool {
    self.rx.as_ref().is_some_and(|rx| *rx.borrow())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn never_is_not_cancelled() {
    assert!(!CancelSignal::never().is_cancelled());
    assert!(!CancelSignal::default().is_cancelled());
  }

  #[test]
  fn cancel_is_observed_by_every_clone() {
    let (handle, signal) = cancellation();
    let other = signal.clone();
    let late = handle.signal();
    assert!(!signal.is_cancelled());

    handle.cancel();
    assert!(signal.is_cancelled());
    assert!(other.is_cancelled());
    assert!(late.is_cancelled());
  }

  #[test]
  fn flag_survives_dropped_handle() {
    let (handle, signal) = cancellation();
    handle.cancel();
    drop(handle);
    assert!(signal.is_cancelled());
  }
}
