//! Short-lived memory of locally applied mutations
//!
//! The UI marks an entity right after saving it; when the server echoes the
//! change back over the push stream, [`DedupGuard::was_recently_updated`]
//! tells the UI to skip reloading it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default dedup window
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(2000);

/// Map of entity id to the instant of its last local mutation
///
/// Staleness is decided from the stored instant alone. The removal task
/// scheduled by [`mark_updated_locally`](Self::mark_updated_locally) only
/// reclaims memory, and never evicts a newer mark of the same id.
#[derive(Debug, Clone)]
pub struct DedupGuard {
    window: Duration,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl DedupGuard {
    /// Create a guard with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The dedup window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record that `id` was just changed locally
    ///
    /// Schedules removal after the window when called inside a Tokio runtime.
    /// Expired entries are pruned here as well, so the map stays bounded
    /// without one.
    pub fn mark_updated_locally(&self, id: &str) {
        let stamp = Instant::now();
        {
            let mut entries = self.entries.lock();
            let window = self.window;
            entries.retain(|_, marked| marked.elapsed() < window);
            entries.insert(id.to_string(), stamp);
        }
        trace!(id, "marked as locally updated");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let entries = Arc::clone(&self.entries);
            let id = id.to_string();
            let window = self.window;
            handle.spawn(async move {
                tokio::time::sleep_until(stamp + window).await;
                let mut entries = entries.lock();
                if entries.get(&id) == Some(&stamp) {
                    entries.remove(&id);
                }
            });
        }
    }

    /// Whether `id` was marked less than one window ago
    pub fn was_recently_updated(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(stamp) if stamp.elapsed() < self.window => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }

    /// Number of entries currently held, stale or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are held
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
