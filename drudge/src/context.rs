use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// Opaque token handed out by [`ContextProvider::enter`] and consumed by
/// [`ContextProvider::exit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ContextHandle(Uuid);

impl ContextHandle {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Supplies the ambient application context a job depends on
/// (configuration, database handles, integrations).
///
/// `enter` may perform the full application bootstrap. It is expected to
/// run once per worker-process job invocation, not once per process:
/// idempotent but not cheap. A bootstrap failure is fatal to the job
/// attempt and surfaces as an execution failure.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Whether an ambient context is already active for the caller.
    fn is_active(&self) -> bool;

    /// Construct and enter a fresh application context.
    async fn enter(&self) -> anyhow::Result<ContextHandle>;

    /// Tear down a context previously returned by `enter`. Release is
    /// unconditional; implementations log their own cleanup problems.
    async fn exit(&self, handle: ContextHandle);
}

/// Ensures a unit of work runs with the ambient context it depends on.
///
/// When a context is already active (the common case inside a request),
/// the work runs directly. When none exists (the common case inside a
/// detached worker process), a fresh context is entered first and torn
/// down after the work returns. Teardown happens exactly once, on every
/// exit path including the error path.
#[derive(Clone)]
pub struct ContextGuard {
    provider: Arc<dyn ContextProvider>,
}

impl ContextGuard {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self { provider }
    }

    /// Run `work` with a context active.
    pub async fn run<T, F, Fut>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if self.provider.is_active() {
            return work().await;
        }

        let handle = self.provider.enter().await?;
        tracing::debug!(context = %handle.as_uuid(), "entered fresh application context");

        let result = work().await;

        self.provider.exit(handle).await;
        tracing::debug!(context = %handle.as_uuid(), "application context torn down");

        result
    }
}

impl std::fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGuard")
            .field("active", &self.provider.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingProvider {
        ambient: AtomicBool,
        enters: AtomicUsize,
        exits: AtomicUsize,
        fail_enter: bool,
    }

    impl CountingProvider {
        fn new(ambient: bool) -> Self {
            Self {
                ambient: AtomicBool::new(ambient),
                enters: AtomicUsize::new(0),
                exits: AtomicUsize::new(0),
                fail_enter: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_enter: true,
                ..Self::new(false)
            }
        }
    }

    #[async_trait]
    impl ContextProvider for CountingProvider {
        fn is_active(&self) -> bool {
            self.ambient.load(Ordering::SeqCst)
        }

        async fn enter(&self) -> anyhow::Result<ContextHandle> {
            if self.fail_enter {
                anyhow::bail!("bad configuration");
            }
            self.enters.fetch_add(1, Ordering::SeqCst);
            Ok(ContextHandle::new())
        }

        async fn exit(&self, _handle: ContextHandle) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn bootstraps_when_no_ambient_context() {
        let provider = Arc::new(CountingProvider::new(false));
        let guard = ContextGuard::new(provider.clone());

        let out = guard.run(|| async { Ok(41 + 1) }).await.unwrap();

        assert_eq!(out, 42);
        assert_eq!(provider.enters.load(Ordering::SeqCst), 1);
        assert_eq!(provider.exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reuses_ambient_context() {
        let provider = Arc::new(CountingProvider::new(true));
        let guard = ContextGuard::new(provider.clone());

        guard.run(|| async { Ok(()) }).await.unwrap();

        assert_eq!(provider.enters.load(Ordering::SeqCst), 0);
        assert_eq!(provider.exits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tears_down_on_error_path() {
        let provider = Arc::new(CountingProvider::new(false));
        let guard = ContextGuard::new(provider.clone());

        let result: anyhow::Result<()> =
            guard.run(|| async { anyhow::bail!("handler exploded") }).await;

        assert!(result.is_err());
        assert_eq!(provider.enters.load(Ordering::SeqCst), 1);
        assert_eq!(provider.exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bootstrap_failure_is_fatal_and_skips_teardown() {
        let provider = Arc::new(CountingProvider::failing());
        let guard = ContextGuard::new(provider.clone());

        let result: anyhow::Result<()> = guard.run(|| async { Ok(()) }).await;

        assert!(result.is_err());
        assert_eq!(provider.exits.load(Ordering::SeqCst), 0);
    }
}
