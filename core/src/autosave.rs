//! Periodic background saving of modified user models.
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::ModelCache;

pub const DEFAULT_TICK: Duration = Duration::from_secs(5);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Background thread calling [`ModelCache::save_models`].
///
/// The thread wakes every `tick` and saves when more than `interval` has
/// passed since the last save; the first tick always saves. Stopping waits
/// for a save in progress to finish.
pub struct AutoSaveScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaveScheduler {
    pub fn start(cache: Arc<ModelCache>) -> Self {
        Self::with_timing(cache, DEFAULT_TICK, DEFAULT_INTERVAL)
    }

    pub fn with_timing(cache: Arc<ModelCache>, tick: Duration, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("autosave".into())
            .spawn(move || {
                let mut last_save: Option<Instant> = None;
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // stop requested or scheduler dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let due = last_save.map_or(true, |t| t.elapsed() > interval);
                    if due {
                        debug!("auto-saving language models");
                        last_save = Some(Instant::now());
                        cache.save_models();
                    }
                }
                debug!("auto-save stopped");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to start auto-save thread: {}", e);
                None
            }
        };

        info!(
            "auto-save every {}s, checked every {}s",
            interval.as_secs(),
            tick.as_secs_f64()
        );
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for it. Calling it again does nothing.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("auto-save thread panicked");
            }
        }
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ModelCache::new(dir.path(), dir.path()));
        let mut scheduler =
            AutoSaveScheduler::with_timing(cache, Duration::from_secs(3600), DEFAULT_INTERVAL);
        assert!(scheduler.is_running());

        let started = Instant::now();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
