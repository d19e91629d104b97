use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use drudge::{ContextHandle, ContextProvider};

/// Context provider that records enter/exit activity.
///
/// Tests use it to assert that the guard bootstraps exactly one context
/// per job and tears it down on every exit path. It can simulate an
/// already-active ambient context and a failing bootstrap.
#[derive(Default)]
pub struct RecordingContextProvider {
    ambient: AtomicBool,
    fail_bootstrap: AtomicBool,
    enters: AtomicUsize,
    exits: AtomicUsize,
}

impl RecordingContextProvider {
    /// Provider with no ambient context, the worker-process case.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider reporting an already-active ambient context, the
    /// request-handler case.
    pub fn with_ambient_context() -> Self {
        let provider = Self::default();
        provider.ambient.store(true, Ordering::SeqCst);
        provider
    }

    /// Provider whose bootstrap fails, for exercising context-setup
    /// failure handling.
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.fail_bootstrap.store(true, Ordering::SeqCst);
        provider
    }

    pub fn set_ambient(&self, active: bool) {
        self.ambient.store(active, Ordering::SeqCst);
    }

    pub fn enter_count(&self) -> usize {
        self.enters.load(Ordering::SeqCst)
    }

    pub fn exit_count(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextProvider for RecordingContextProvider {
    fn is_active(&self) -> bool {
        self.ambient.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> anyhow::Result<ContextHandle> {
        if self.fail_bootstrap.load(Ordering::SeqCst) {
            anyhow::bail!("context bootstrap failed: bad configuration");
        }
        self.enters.fetch_add(1, Ordering::SeqCst);
        Ok(ContextHandle::new())
    }

    async fn exit(&self, _handle: ContextHandle) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RecordingContextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingContextProvider")
            .field("ambient", &self.is_active())
            .field("enters", &self.enter_count())
            .field("exits", &self.exit_count())
            .finish()
    }
}
