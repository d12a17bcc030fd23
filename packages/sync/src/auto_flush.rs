//! The background thread behind a bus's auto-flush.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SyncError};

/// A thread that runs a tick every `interval` until stopped.
///
/// The tick returns `false` to end the worker on its own. Dropping the
/// worker stops it and waits for an in-progress tick to finish.
pub(crate) struct FlushWorker {
    interval: Duration,
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub(crate) fn spawn<F>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_clone = stop.clone();

        let thread = thread::Builder::new()
            .name("appvirt-flush".to_string())
            .spawn(move || loop {
                let deadline = Instant::now() + interval;
                {
                    let (lock, cvar) = &*stop_clone;
                    let mut stopped = lock.lock();
                    while !*stopped {
                        if cvar.wait_until(&mut stopped, deadline).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        return;
                    }
                }
                if !tick() {
                    return;
                }
            })
            .map_err(SyncError::Spawn)?;

        Ok(Self {
            interval,
            stop,
            thread: Some(thread),
        })
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn stop(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();

        if let Some(thread) = self.thread.take() {
            // The worker never calls back into stop, so this cannot self-join.
            let _ = thread.join();
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let mut worker = FlushWorker::spawn(Duration::from_millis(5), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        worker.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "only {} ticks", after_stop);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn tick_can_end_the_worker() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let _worker = FlushWorker::spawn(Duration::from_millis(5), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            false
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_stops_a_long_interval_promptly() {
        let worker = FlushWorker::spawn(Duration::from_secs(3600), || true).unwrap();
        assert_eq!(worker.interval(), Duration::from_secs(3600));
        let started = Instant::now();
        drop(worker);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
