use crate::error::{SyncError, SyncResult};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag, checked by file tasks at every suspension point.
///
/// A child token is cancelled when either it or its parent is; cancelling a child
/// leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.load(Ordering::SeqCst))
    }

    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn child(&self) -> Self {
        Self { own: Arc::new(AtomicBool::new(false)), parent: Some(self.own.clone()) }
    }
}
