use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

/// Failure reported by whichever task initializes shared state ahead of the
/// rendezvous (Open Question O-2, resolved: see SPEC_FULL.md §9). Carried as
/// a `String` rather than a boxed error since the initializer and the
/// waiters may live in different modules with no shared concrete error type.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("startup initialization failed: {0}")]
pub struct InitError(pub String);

/// A one-shot startup barrier: one task calls `signal(Ok(()))` or
/// `signal(Err(..))` once initialization finishes; any number of other
/// tasks call `wait()` and block until that happens. A failed
/// initialization is propagated to every waiter instead of hanging them
/// forever, which a plain `Condvar` without a status flag would do.
pub struct Rendezvous {
    state: Mutex<Option<Result<(), InitError>>>,
    condvar: Condvar,
}

impl Rendezvous {
    pub fn new() -> Arc<Self> {
        Arc::new(Rendezvous {
            state: Mutex::new(None),
            condvar: Condvar::new(),
        })
    }

    /// Called exactly once by the initializing task. A second call is a
    /// caller bug; it silently overwrites the first result rather than
    /// panicking, since by the time it could race, at least one waiter may
    /// already have observed the first result.
    pub fn signal(&self, result: Result<(), InitError>) {
        let mut guard = self.state.lock().expect("rendezvous mutex poisoned");
        *guard = Some(result);
        self.condvar.notify_all();
    }

    /// Blocks until `signal` has been called, then returns its result.
    pub fn wait(&self) -> Result<(), InitError> {
        let guard = self.state.lock().expect("rendezvous mutex poisoned");
        let guard = self
            .condvar
            .wait_while(guard, |state| state.is_none())
            .expect("rendezvous mutex poisoned");
        guard.clone().expect("wait_while guarantees Some")
    }

    /// Non-blocking peek, for callers on an async executor that would rather
    /// poll than tie up a worker thread in `wait`.
    pub fn poll(&self) -> Option<Result<(), InitError>> {
        self.state.lock().expect("rendezvous mutex poisoned").clone()
    }
}

/// `tokio::sync::Notify`-backed twin of [`Rendezvous`], for an engine
/// started from an async caller (§5 "for engines exposing themselves over
/// IPC"). Same status-flag-before-notify shape, so the same O-2 fix applies:
/// a failed init is observed by every waiter, never a silent success.
pub struct AsyncRendezvous {
    state: Mutex<Option<Result<(), InitError>>>,
    notify: tokio::sync::Notify,
}

impl AsyncRendezvous {
    pub fn new() -> Arc<Self> {
        Arc::new(AsyncRendezvous {
            state: Mutex::new(None),
            notify: tokio::sync::Notify::new(),
        })
    }

    /// Called exactly once by the initializing task, before the transport
    /// is considered bound.
    pub fn signal(&self, result: Result<(), InitError>) {
        let mut guard = self.state.lock().expect("rendezvous mutex poisoned");
        *guard = Some(result);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Awaits `signal`, then returns its result. Never spins: a caller that
    /// awaits before `signal` is woken by the same `notify_waiters` call
    /// that set the status, so there is no missed-wakeup window.
    pub async fn wait(&self) -> Result<(), InitError> {
        loop {
            if let Some(result) = self.poll() {
                return result;
            }
            let notified = self.notify.notified();
            if let Some(result) = self.poll() {
                return result;
            }
            notified.await;
        }
    }

    pub fn poll(&self) -> Option<Result<(), InitError>> {
        self.state.lock().expect("rendezvous mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_signaled() {
        let rendezvous = Rendezvous::new();
        let waiter = Arc::clone(&rendezvous);
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        rendezvous.signal(Ok(()));

        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn failed_init_propagates_to_waiters() {
        let rendezvous = Rendezvous::new();
        rendezvous.signal(Err(InitError("storage unavailable".into())));
        assert_eq!(
            rendezvous.wait(),
            Err(InitError("storage unavailable".into()))
        );
    }

    #[test]
    fn poll_is_none_before_signal() {
        let rendezvous = Rendezvous::new();
        assert_eq!(rendezvous.poll(), None);
        rendezvous.signal(Ok(()));
        assert_eq!(rendezvous.poll(), Some(Ok(())));
    }

    #[tokio::test]
    async fn async_wait_blocks_until_signaled() {
        let rendezvous = AsyncRendezvous::new();
        let waiter = Arc::clone(&rendezvous);
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        rendezvous.signal(Ok(()));

        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn async_failed_init_propagates_to_waiters() {
        let rendezvous = AsyncRendezvous::new();
        rendezvous.signal(Err(InitError("storage unavailable".into())));
        assert_eq!(
            rendezvous.wait().await,
            Err(InitError("storage unavailable".into()))
        );
    }
}
