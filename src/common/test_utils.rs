use crate::notification::RemovalCause;

use parking_lot::Mutex;
use std::sync::Arc;

/// Collects removal notifications for assertions.
pub(crate) struct Recorder<K, V> {
    events: Mutex<Vec<(Arc<K>, V, RemovalCause)>>,
}

impl<K, V> Default for Recorder<K, V> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<K, V> Recorder<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn listener(self: &Arc<Self>) -> impl Fn(Arc<K>, V, RemovalCause) + Send + Sync {
        let recorder = Arc::clone(self);
        move |k, v, cause| recorder.events.lock().push((k, v, cause))
    }

    pub(crate) fn events(&self) -> Vec<(Arc<K>, V, RemovalCause)> {
        self.events.lock().clone()
    }

    pub(crate) fn causes(&self) -> Vec<RemovalCause> {
        self.events.lock().iter().map(|(_, _, c)| *c).collect()
    }

    pub(crate) fn count(&self, cause: RemovalCause) -> usize {
        self.events.lock().iter().filter(|(_, _, c)| *c == cause).count()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().clear();
    }
}
