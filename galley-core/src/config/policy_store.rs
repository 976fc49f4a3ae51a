//! Hot-swappable configuration values.
//!
//! Readers take a cheap `Arc` snapshot and never block a reload; a reload
//! swaps the whole value at once so a reader never sees half of an update.

use std::sync::Arc;

use tokio::sync::watch;

pub struct PolicyStore<T> {
    tx: Arc<watch::Sender<Arc<T>>>,
}

/// Waits for the next replacement of a [`PolicyStore`] value.
pub struct PolicyWatcher<T> {
    rx: watch::Receiver<Arc<T>>,
}

impl<T> PolicyStore<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Swap in a new value and wake every watcher.
    pub fn replace(&self, value: T) {
        self.tx.send_replace(Arc::new(value));
    }

    pub fn watch(&self) -> PolicyWatcher<T> {
        PolicyWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Clone for PolicyStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Default> Default for PolicyStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> PolicyWatcher<T> {
    /// Wait for the next replacement and return the new value.
    ///
    /// Returns `None` once every [`PolicyStore`] handle has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_is_visible_to_clones() {
        let store = PolicyStore::new(1u32);
        let other = store.clone();
        store.replace(7);
        assert_eq!(*other.current(), 7);
    }

    #[tokio::test]
    async fn test_watcher_sees_replacement() {
        let store = PolicyStore::new("a".to_string());
        let mut watcher = store.watch();
        let handle = {
            let store = store.clone();
            tokio::spawn(async move { store.replace("b".to_string()) })
        };
        let next = watcher.changed().await.unwrap();
        assert_eq!(next.as_str(), "b");
        handle.await.unwrap();
    }
}
