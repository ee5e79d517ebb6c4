use anyhow::{Context, Result};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Monitor a task which may take a long time, and write messages to the console
/// as needed.
/// After SILENT_INTERVAL: print activity
/// After LOG_INTERVAL: print activity and duration
struct WaitMonitor {
    done: Arc<AtomicBool>,
}
impl WaitMonitor {
    const SILENT_INTERVAL: Duration = Duration::from_millis(500);
    const LOG_INTERVAL: Duration = Duration::from_secs(5);

    fn new(activity: String) -> WaitMonitor {
        let done = Arc::new(AtomicBool::new(false));
        let r = WaitMonitor { done: done.clone() };
        std::thread::spawn(move || {
            WaitMonitor::run(done, activity);
        });
        r
    }
    fn run(done: Arc<AtomicBool>, activity: String) {
        let start = Instant::now();
        let mut next_log = start + Self::SILENT_INTERVAL;
        loop {
            std::thread::sleep(next_log.saturating_duration_since(Instant::now()));
            if done.load(Ordering::Relaxed) {
                break;
            }
            let waited = next_log.duration_since(start);
            if waited <= Self::SILENT_INTERVAL {
                eprintln!("{}", activity);
            } else {
                eprintln!("{} ({} s)", activity, waited.as_secs());
            }
            next_log += Self::LOG_INTERVAL;
        }
    }
    fn done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}
impl Drop for WaitMonitor {
    fn drop(&mut self) {
        self.done()
    }
}

/// Advisory lock serializing load-patch-save cycles on one destination.
///
/// The lock is taken on a `<destination>.lock` file next to the destination,
/// because saving replaces the destination file itself.
pub(crate) struct DestinationLock {
    path: PathBuf,
    lock: fd_lock::RwLock<File>,
}
impl DestinationLock {
    pub(crate) fn open(destination: &Path) -> Result<DestinationLock> {
        let mut name = destination.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        Ok(DestinationLock {
            path,
            lock: fd_lock::RwLock::new(file),
        })
    }

    /// Block until the lock is ours. Released when the guard is dropped.
    pub(crate) fn acquire(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>> {
        let wait_mon = WaitMonitor::new(format!("Waiting for lock {}", self.path.display()));
        let guard = self
            .lock
            .write()
            .with_context(|| format!("locking {}", self.path.display()))?;
        wait_mon.done();
        tracing::debug!(path = %self.path.display(), "lock acquired");
        Ok(guard)
    }
}
