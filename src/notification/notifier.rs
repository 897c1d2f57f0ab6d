use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::ReentrantMutex;

use crate::{
    common::concurrent::{
        constants::MAX_NOTIFICATIONS_PER_TASK,
        thread_pool::{PoolName, ThreadPool, ThreadPoolRegistry},
    },
    notification::{DeliveryMode, RemovalCause, RemovalListener},
};

pub(crate) struct RemovedEntry<K, V> {
    key: Arc<K>,
    value: V,
    cause: RemovalCause,
}

/// Queues removal records and delivers them to the listener in FIFO order.
///
/// Records are enqueued while the segment lock is held, so the queue order
/// matches the order of the removals of any single key. Delivery happens
/// outside the segment locks, either on the caller's thread or on the
/// notifier pool depending on the `DeliveryMode`.
pub(crate) struct RemovalNotifier<K, V> {
    snd: Sender<RemovedEntry<K, V>>,
    state: Arc<NotifierState<K, V>>,
    mode: DeliveryMode,
    thread_pool: Option<Arc<ThreadPool>>,
}

impl<K, V> Drop for RemovalNotifier<K, V> {
    fn drop(&mut self) {
        let state = &self.state;
        // Disallow to create and run a notification task by now.
        state.shutdown();

        // Wait for the notification task to finish. (busy loop)
        while state.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }

        if let Some(pool) = &self.thread_pool {
            ThreadPoolRegistry::release_pool(pool);
        }
    }
}

impl<K, V> RemovalNotifier<K, V> {
    pub(crate) fn new(
        listener: RemovalListener<K, V>,
        mode: DeliveryMode,
        cache_name: Option<String>,
    ) -> Self {
        let (snd, rcv) = crossbeam_channel::unbounded();
        let thread_pool = match mode {
            DeliveryMode::Immediate => None,
            DeliveryMode::Queued => Some(ThreadPoolRegistry::acquire_pool(
                PoolName::RemovalNotifier,
            )),
        };
        let state = NotifierState {
            rcv,
            listener,
            task_lock: ReentrantMutex::new(Cell::new(false)),
            is_enabled: AtomicBool::new(true),
            is_running: Default::default(),
            is_shutting_down: Default::default(),
            cache_name,
        };
        Self {
            snd,
            state: Arc::new(state),
            mode,
            thread_pool,
        }
    }

    #[cfg(test)]
    pub(crate) fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Appends a record to the delivery queue. Never blocks.
    pub(crate) fn enqueue(&self, key: Arc<K>, value: V, cause: RemovalCause) {
        let entry = RemovedEntry { key, value, cause };
        // The receiver lives in `self.state`, so the channel cannot be
        // disconnected while `self` exists.
        self.snd
            .send(entry)
            .expect("The notification channel was disconnected");
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.snd.len()
    }
}

impl<K, V> RemovalNotifier<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Delivers the queued records according to the delivery mode. Must be
    /// called without holding any segment lock.
    pub(crate) fn deliver(&self) {
        if self.snd.is_empty() {
            return;
        }
        match self.mode {
            DeliveryMode::Immediate => self.state.drain(usize::MAX),
            DeliveryMode::Queued => self.submit_task(),
        }
    }

    /// Delivers every queued record on the calling thread, regardless of the
    /// delivery mode. Waits for a running background task first.
    pub(crate) fn flush(&self) {
        self.state.drain(usize::MAX);
    }

    fn submit_task(&self) {
        let Some(pool) = &self.thread_pool else {
            return;
        };
        if self.state.is_shutting_down() || !self.state.try_set_running() {
            return;
        }
        let task = NotificationTask {
            state: Arc::clone(&self.state),
        };
        pool.execute(move || task.execute());
    }
}

struct NotifierState<K, V> {
    rcv: Receiver<RemovedEntry<K, V>>,
    listener: RemovalListener<K, V>,
    // Serializes the delivery. The flag is set while this thread is delivering,
    // so a listener that calls back into the cache does not deliver
    // recursively.
    task_lock: ReentrantMutex<Cell<bool>>,
    is_enabled: AtomicBool,
    is_running: AtomicBool,
    is_shutting_down: AtomicBool,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    cache_name: Option<String>,
}

impl<K, V> NotifierState<K, V> {
    fn drain(&self, max_notifications: usize) {
        let delivering = self.task_lock.lock();
        if delivering.get() {
            return;
        }
        delivering.set(true);

        let mut count = 0;
        while count < max_notifications && !self.is_shutting_down() {
            match self.rcv.try_recv() {
                Ok(entry) => self.notify(entry),
                Err(_) => break,
            }
            count += 1;
        }

        delivering.set(false);
    }

    fn notify(&self, entry: RemovedEntry<K, V>) {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        if !self.is_enabled.load(Ordering::Acquire) {
            return;
        }

        let RemovedEntry { key, value, cause } = entry;
        let listener_clo = || (self.listener)(key, value, cause);

        // Safety: It is safe to assert unwind safety here because we will not
        // call the listener again if it has been panicked.
        let result = catch_unwind(AssertUnwindSafe(listener_clo));
        if let Err(_payload) = result {
            self.is_enabled.store(false, Ordering::Release);
            #[cfg(feature = "logging")]
            log_panic(&*_payload, self.cache_name.as_deref());
        }
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    fn try_set_running(&self) -> bool {
        self.is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_running(&self, value: bool) {
        self.is_running.store(value, Ordering::Release);
    }

    fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::Release);
    }
}

struct NotificationTask<K, V> {
    state: Arc<NotifierState<K, V>>,
}

impl<K, V> NotificationTask<K, V> {
    fn execute(&self) {
        let state = &self.state;
        loop {
            state.drain(MAX_NOTIFICATIONS_PER_TASK);
            state.set_running(false);

            // Records enqueued after the drain but before the flag was cleared
            // would otherwise wait for the next write.
            if state.rcv.is_empty() || state.is_shutting_down() || !state.try_set_running() {
                break;
            }
        }
    }
}

#[cfg(feature = "logging")]
fn log_panic(payload: &(dyn std::any::Any + Send + 'static), cache_name: Option<&str>) {
    // Try to downcast the payload into &str or String.
    //
    // NOTE: Clippy will complain if we use `if let Some(_)` here.
    // https://rust-lang.github.io/rust-clippy/master/index.html#manual_map
    let message: Option<std::borrow::Cow<'_, str>> =
        (payload.downcast_ref::<&str>().map(|s| (*s).into()))
            .or_else(|| payload.downcast_ref::<String>().map(Into::into));

    let cn = cache_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default();

    if let Some(m) = message {
        log::error!("{cn}Disabled the removal listener because it panicked at '{m}'");
    } else {
        log::error!("{cn}Disabled the removal listener because it panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::RemovalNotifier;
    use crate::{
        common::test_utils::Recorder,
        notification::{macros::assert_eq_with_mode, DeliveryMode, RemovalCause},
    };

    use std::sync::Arc;

    #[test]
    fn delivers_in_fifo_order() {
        for mode in [DeliveryMode::Immediate, DeliveryMode::Queued] {
            let recorder = Recorder::<u32, &str>::new();
            let notifier: RemovalNotifier<u32, &str> =
                RemovalNotifier::new(Arc::new(recorder.listener()), mode, None);
            assert_eq!(notifier.delivery_mode(), mode);

            notifier.enqueue(Arc::new(1), "a", RemovalCause::Replaced);
            notifier.enqueue(Arc::new(1), "b", RemovalCause::Explicit);
            notifier.enqueue(Arc::new(2), "c", RemovalCause::Size);
            assert_eq_with_mode!(notifier.queued_len(), 3, mode);

            notifier.deliver();
            notifier.flush();

            let values: Vec<_> = recorder.events().into_iter().map(|(_, v, _)| v).collect();
            assert_eq_with_mode!(values, vec!["a", "b", "c"], mode);
            assert_eq_with_mode!(
                recorder.causes(),
                vec![
                    RemovalCause::Replaced,
                    RemovalCause::Explicit,
                    RemovalCause::Size
                ],
                mode
            );
            assert_eq_with_mode!(notifier.queued_len(), 0, mode);
        }
    }

    #[test]
    fn panicking_listener_is_disabled() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls1 = Arc::clone(&calls);
        let listener = move |_k: Arc<u32>, _v: u32, _c: RemovalCause| {
            calls1.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
            panic!("listener panic");
        };
        let notifier: RemovalNotifier<u32, u32> = RemovalNotifier::new(
            Arc::new(listener),
            DeliveryMode::Immediate,
            Some("test".into()),
        );
        notifier.enqueue(Arc::new(1), 1, RemovalCause::Explicit);
        notifier.enqueue(Arc::new(2), 2, RemovalCause::Explicit);
        notifier.deliver();

        assert_eq!(calls.load(std::sync::atomic::Ordering::Acquire), 1);
        assert_eq!(notifier.queued_len(), 0);
    }
}
