use polyllm_provider::Capabilities;
use std::future::Future;
use tokio::sync::RwLock;

/// Lazily populated, per-provider capability snapshot.
///
/// The read path takes the lock briefly; probes run without holding it,
/// so two concurrent first readers may both probe — the later commit
/// supersedes the earlier, which is acceptable for a best-effort
/// snapshot. Probe failures are not cached; the fallback is returned and
/// the next reader probes again.
pub struct CapabilityCache {
    inner: RwLock<Option<Capabilities>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Return the cached snapshot, probing on a miss. `probe` resolves to
    /// `None` when the models endpoint could not be reached.
    pub async fn get_or_probe<F, Fut>(&self, fallback: Capabilities, probe: F) -> Capabilities
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Capabilities>>,
    {
        if let Some(cached) = self.inner.read().await.clone() {
            return cached;
        }
        match probe().await {
            Some(probed) => {
                *self.inner.write().await = Some(probed.clone());
                probed
            }
            None => fallback,
        }
    }

    /// Drop the cached snapshot so the next read probes again.
    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}
