use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic background tick, cancelled when stopped or dropped. The owner
/// holds the only handle, so the task cannot outlive it.
pub struct RefreshTimer {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn start<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let worker = thread::spawn(move || loop {
            match cancelled.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        log::debug!("refresh timer started ({interval:?})");

        Self {
            cancel: Some(cancel),
            worker: Some(worker),
        }
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("refresh timer tick panicked");
            }
            log::debug!("refresh timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
