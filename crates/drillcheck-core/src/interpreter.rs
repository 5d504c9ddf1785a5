//! Init-once handle for expensive interpreter setup.
//!
//! The first caller runs the initializer; concurrent callers wait for that
//! same run. A failed initialization is not cached, so the next caller
//! retries.

use std::future::Future;

use tokio::sync::OnceCell;

/// Lazily initialized value shared by every caller.
#[derive(Debug)]
pub struct SharedHandle<T> {
    cell: OnceCell<T>,
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedHandle<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the value, running `init` if no caller has succeeded yet.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> anyhow::Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.cell.get_or_try_init(init).await
    }

    /// The value, if initialization already succeeded.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Drop the cached value so the next caller initializes again.
    pub fn reset(&mut self) -> Option<T> {
        self.cell.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_init() {
        let handle = Arc::new(SharedHandle::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    handle
                        .get_or_try_init(|| async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok("python3".to_string())
                        })
                        .await
                        .map(|v| v.clone())
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap(), "python3");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn failed_init_is_retried() {
        let handle = SharedHandle::<u32>::new();
        let first = handle
            .get_or_try_init(|| async { anyhow::bail!("interpreter missing") })
            .await;
        assert!(first.is_err());
        assert!(!handle.is_initialized());

        let second = handle.get_or_try_init(|| async { Ok(7) }).await.unwrap();
        assert_eq!(*second, 7);
        assert_eq!(handle.get(), Some(&7));
    }

    #[tokio::test]
    async fn reset_clears_value() {
        let mut handle = SharedHandle::<u32>::new();
        handle.get_or_try_init(|| async { Ok(1) }).await.unwrap();
        assert_eq!(handle.reset(), Some(1));
        assert!(handle.get().is_none());
    }
}
