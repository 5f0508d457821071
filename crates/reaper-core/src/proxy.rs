use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct RotatorInner {
    endpoints: Vec<String>,
    cursor: usize,
}

/// Round-robin pool of egress proxy endpoints.
///
/// Clones share the same pool and cursor, so concurrent job runs draw
/// endpoints in turn.
#[derive(Debug, Clone, Default)]
pub struct ProxyRotator {
    inner: Arc<Mutex<RotatorInner>>,
}

impl ProxyRotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rotator = Self::new();
        for endpoint in endpoints {
            rotator.add(endpoint);
        }
        rotator
    }

    fn lock_inner(&self) -> MutexGuard<'_, RotatorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy rotator mutex");
            poisoned.into_inner()
        })
    }

    pub fn add(&self, endpoint: impl Into<String>) {
        self.lock_inner().endpoints.push(endpoint.into());
    }

    /// Endpoint under the cursor, advancing it. `None` when the pool is empty.
    pub fn next(&self) -> Option<String> {
        let mut inner = self.lock_inner();
        if inner.endpoints.is_empty() {
            return None;
        }
        let endpoint = inner.endpoints[inner.cursor].clone();
        inner.cursor = (inner.cursor + 1) % inner.endpoints.len();
        Some(endpoint)
    }

    pub fn len(&self) -> usize {
        self.lock_inner().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
