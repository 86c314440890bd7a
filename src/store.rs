//! Single-value stores with snapshot semantics.
//!
//! Each store holds exactly one current value behind a `tokio::sync::watch`
//! channel: `set` replaces the value atomically, `get` hands out the current
//! `Arc` snapshot without blocking the writer, and a reader mid-frame keeps
//! whatever snapshot it already took. No partial write is ever observable.

use std::sync::Arc;

use tokio::sync::watch;

use crate::parameters::{Background, Parameters};

/// Store for the current [`Parameters`] snapshot.
#[derive(Debug)]
pub struct ParameterStore {
    tx: watch::Sender<Arc<Parameters>>,
}

impl ParameterStore {
    /// Create a store seeded with `initial`.
    pub fn new(initial: Parameters) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<Parameters> {
        self.tx.borrow().clone()
    }

    /// Atomically replace the current value.
    pub fn set(&self, parameters: Parameters) {
        self.tx.send_replace(Arc::new(parameters));
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Parameters>> {
        self.tx.subscribe()
    }
}

/// Store for the current [`Background`] reference.
#[derive(Debug)]
pub struct BackgroundStore {
    tx: watch::Sender<Arc<Background>>,
}

impl BackgroundStore {
    /// Create an empty store (no subtraction).
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Background::default()));
        Self { tx }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<Background> {
        self.tx.borrow().clone()
    }

    /// Atomically replace the current background.
    pub fn set(&self, background: Background) {
        self.tx.send_replace(Arc::new(background));
    }

    /// Drop the reference image; subsequent frames are not subtracted.
    pub fn clear(&self) {
        self.set(Background::default());
    }
}

impl Default for BackgroundStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn snapshot_outlives_replacement() {
        let store = ParameterStore::new(Parameters::for_detector(16, 8));
        let before = store.get();

        let mut next = Parameters::for_detector(16, 8);
        next.rotation = 180;
        store.set(next);

        // The earlier snapshot is unaffected by the replacement.
        assert_eq!(before.rotation, 0);
        assert_eq!(store.get().rotation, 180);
    }

    #[test]
    fn background_clear_empties_the_store() {
        let store = BackgroundStore::new();
        store.set(Background {
            filename: "bg.npy".into(),
            data: Some(Array2::<u16>::ones((4, 4))),
        });
        assert!(!store.get().is_empty());

        store.clear();
        let current = store.get();
        assert!(current.is_empty());
        assert!(current.filename.is_empty());
    }

    #[tokio::test]
    async fn subscribers_observe_replacements() {
        let store = ParameterStore::new(Parameters::for_detector(4, 4));
        let mut rx = store.subscribe();

        let mut next = Parameters::for_detector(4, 4);
        next.min_threshold = 2.5;
        store.set(next);

        rx.changed().await.expect("change notification");
        assert_eq!(rx.borrow().min_threshold, 2.5);
    }
}
