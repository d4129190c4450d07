//! Single-fire fan-out gate.
//!
//! Lets any number of waiters register interest in a resource that is not
//! available yet, and delivers one outcome to all of them exactly once.
//! Commands issued while the client is reconnecting park here until the
//! restored connection is ready.
//!
//! # Example
//!
//! ```
//! use beanstalk_client::gate::WaitingGate;
//!
//! let mut gate = WaitingGate::new();
//! let mut a = gate.push().unwrap();
//! let mut b = gate.push().unwrap();
//!
//! gate.fire(Ok(7)).unwrap();
//!
//! assert_eq!(a.try_recv().unwrap().unwrap(), 7);
//! assert_eq!(b.try_recv().unwrap().unwrap(), 7);
//! assert!(gate.push().is_err());
//! ```

use tokio::sync::oneshot;

use crate::error::{BeanstalkError, Result};

/// Receiver handed to a waiter.
pub type Waiter<T> = oneshot::Receiver<Result<T>>;

/// One outcome, many waiters, fires once.
#[derive(Debug)]
pub struct WaitingGate<T> {
    queue: Vec<oneshot::Sender<Result<T>>>,
    fired: bool,
}

impl<T: Clone> WaitingGate<T> {
    pub fn new() -> Self {
        Self {
            queue: Vec::new(),
            fired: false,
        }
    }

    /// Register a waiter.
    ///
    /// # Errors
    ///
    /// [`BeanstalkError::Precondition`] if the gate has already fired.
    pub fn push(&mut self) -> Result<Waiter<T>> {
        if self.fired {
            return Err(BeanstalkError::Precondition(
                "cannot wait on a gate that has already fired".into(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.queue.push(tx);
        Ok(rx)
    }

    /// Deliver `outcome` to every registered waiter in registration order.
    ///
    /// Waiters that have gone away are skipped.
    ///
    /// # Errors
    ///
    /// [`BeanstalkError::Precondition`] if the gate has already fired.
    pub fn fire(&mut self, outcome: Result<T>) -> Result<()> {
        if self.fired {
            return Err(BeanstalkError::Precondition("gate fired twice".into()));
        }
        self.fired = true;

        for tx in self.queue.drain(..) {
            let _ = tx.send(outcome.clone());
        }
        Ok(())
    }

    /// Whether the gate has fired.
    pub fn is_fired(&self) -> bool {
        self.fired
    }

    /// Number of waiters registered and not yet released.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T: Clone> Default for WaitingGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_reaches_every_waiter() {
        let mut gate = WaitingGate::new();
        let mut waiters: Vec<_> = (0..5).map(|_| gate.push().unwrap()).collect();
        assert_eq!(gate.len(), 5);

        gate.fire(Ok("ready".to_string())).unwrap();

        for waiter in waiters.iter_mut() {
            assert_eq!(waiter.try_recv().unwrap().unwrap(), "ready");
        }
        assert!(gate.is_empty());
    }

    #[test]
    fn test_error_outcome_is_shared() {
        let mut gate: WaitingGate<u32> = WaitingGate::new();
        let mut a = gate.push().unwrap();
        let mut b = gate.push().unwrap();

        gate.fire(Err(BeanstalkError::NotConnected)).unwrap();

        assert!(matches!(a.try_recv().unwrap(), Err(BeanstalkError::NotConnected)));
        assert!(matches!(b.try_recv().unwrap(), Err(BeanstalkError::NotConnected)));
    }

    #[test]
    fn test_fire_twice_is_rejected() {
        let mut gate = WaitingGate::new();
        let mut waiter = gate.push().unwrap();

        gate.fire(Ok(1)).unwrap();
        let err = gate.fire(Ok(2)).unwrap_err();

        assert!(matches!(err, BeanstalkError::Precondition(_)));
        assert_eq!(waiter.try_recv().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_push_after_fire_is_rejected() {
        let mut gate = WaitingGate::new();
        gate.fire(Ok(())).unwrap();

        assert!(gate.is_fired());
        assert!(matches!(gate.push(), Err(BeanstalkError::Precondition(_))));
    }

    #[test]
    fn test_dropped_waiter_is_skipped() {
        let mut gate = WaitingGate::new();
        let dropped = gate.push().unwrap();
        let mut kept = gate.push().unwrap();
        drop(dropped);

        gate.fire(Ok(3)).unwrap();
        assert_eq!(kept.try_recv().unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_waiters_in_separate_tasks() {
        let mut gate = WaitingGate::new();
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        for i in 0..3 {
            let waiter = gate.push().unwrap();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let value: u32 = waiter.await.unwrap().unwrap();
                order_tx.send((i, value)).unwrap();
            });
        }
        drop(order_tx);

        gate.fire(Ok(42)).unwrap();

        let mut seen = Vec::new();
        while let Some(entry) = order_rx.recv().await {
            seen.push(entry);
        }
        seen.sort();
        assert_eq!(seen, vec![(0, 42), (1, 42), (2, 42)]);
    }
}
