//! Idle release: stop redirecting once a guest has gone quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use appvirt_core::{FileTableEntry, ResourceRequest};
use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::filesystem::{Resolution, ResourceProvider};

/// A countdown that latches once `timeout` passes without a `touch`.
///
/// The check is lazy: the countdown is evaluated whenever someone asks,
/// so no timer thread is needed.
#[derive(Debug)]
pub struct IdleRelease {
    timeout: Duration,
    last_activity: Mutex<Instant>,
    released: AtomicBool,
}

impl IdleRelease {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Mutex::new(Instant::now()),
            released: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Restart the countdown. Has no effect once released.
    pub fn touch(&self) {
        if !self.released.load(Ordering::SeqCst) {
            *self.last_activity.lock() = Instant::now();
        }
    }

    /// Count one unit of activity. Returns false, without touching, once
    /// released.
    pub fn record_activity(&self) -> bool {
        if self.is_released() {
            return false;
        }
        self.touch();
        true
    }

    pub fn is_released(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            return true;
        }
        let idle = self.last_activity.lock().elapsed();
        if idle < self.timeout {
            return false;
        }
        if !self.released.swap(true, Ordering::SeqCst) {
            info!(idle_ms = idle.as_millis() as u64, "idle timeout reached, redirection released");
        }
        true
    }
}

/// Wraps a provider so that, once idle-released, every request passes
/// through untouched.
///
/// The countdown can be shared with other consumers, so that activity
/// anywhere in a guest keeps every provider redirecting.
pub struct ReleasingProvider<P> {
    inner: P,
    release: Arc<IdleRelease>,
}

impl<P: ResourceProvider> ReleasingProvider<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self::sharing(inner, Arc::new(IdleRelease::new(timeout)))
    }

    /// Wrap `inner` around an existing countdown.
    pub fn sharing(inner: P, release: Arc<IdleRelease>) -> Self {
        Self { inner, release }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn release(&self) -> &Arc<IdleRelease> {
        &self.release
    }
}

impl<P: ResourceProvider> ResourceProvider for ReleasingProvider<P> {
    fn resolve(&self, request: &ResourceRequest) -> Result<Resolution> {
        if !self.release.record_activity() {
            return Ok(Resolution::pass_through(request));
        }
        self.inner.resolve(request)
    }

    fn delete(&self, entry: &FileTableEntry) -> Result<bool> {
        if !self.release.record_activity() {
            return Ok(false);
        }
        self.inner.delete(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use appvirt_core::CreationDisposition;

    use crate::filesystem::Outcome;

    struct Counting(Mutex<usize>);

    impl ResourceProvider for Counting {
        fn resolve(&self, request: &ResourceRequest) -> Result<Resolution> {
            *self.0.lock() += 1;
            Ok(Resolution::new(
                FileTableEntry::new(request.identifier(), "D:\\Virtual\\x", request.kind()),
                Outcome::Existing,
            ))
        }

        fn delete(&self, _entry: &FileTableEntry) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn activity_keeps_the_countdown_alive() {
        let release = IdleRelease::new(Duration::from_millis(200));
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(20));
            release.touch();
            assert!(!release.is_released());
        }
    }

    #[test]
    fn release_latches() {
        let release = IdleRelease::new(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));
        assert!(release.is_released());
        release.touch();
        assert!(release.is_released());
    }

    #[test]
    fn shared_countdown_sees_activity_from_elsewhere() {
        let release = Arc::new(IdleRelease::new(Duration::from_millis(150)));
        let provider = ReleasingProvider::sharing(Counting(Mutex::new(0)), release.clone());
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(50));
            assert!(release.record_activity());
        }
        let request = ResourceRequest::file("C:\\Temp\\a.txt", CreationDisposition::OpenAlways);
        assert_eq!(
            provider.resolve(&request).unwrap().outcome(),
            Outcome::Existing
        );

        thread::sleep(Duration::from_millis(250));
        assert!(!release.record_activity());
        assert_eq!(
            provider.resolve(&request).unwrap().outcome(),
            Outcome::PassThrough
        );
    }

    #[test]
    fn released_provider_passes_everything_through() {
        let provider = ReleasingProvider::new(Counting(Mutex::new(0)), Duration::from_millis(100));
        let request = ResourceRequest::file("C:\\Temp\\a.txt", CreationDisposition::CreateAlways);

        assert_eq!(
            provider.resolve(&request).unwrap().outcome(),
            Outcome::Existing
        );
        thread::sleep(Duration::from_millis(250));

        let resolution = provider.resolve(&request).unwrap();
        assert_eq!(resolution.outcome(), Outcome::PassThrough);
        assert_eq!(resolution.target(), "C:\\Temp\\a.txt");
        assert_eq!(*provider.inner().0.lock(), 1);
        assert!(!provider.delete(resolution.entry()).unwrap());
    }
}
