//! The one background thread that runs frame analysis.

use anyhow::{Context, Result};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Owns the analysis thread. Shut down once, at process teardown.
pub struct AnalysisExecutor {
    tx: mpsc::Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

/// Cloneable submit side of the executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<Message>,
}

impl AnalysisExecutor {
    pub fn start() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = thread::Builder::new()
            .name("frame-analysis".into())
            .spawn(move || {
                while let Ok(Message::Run(job)) = rx.recv() {
                    job();
                }
                log::debug!("analysis worker exiting");
            })
            .context("spawning analysis thread")?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drain jobs already queued, then stop the thread.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if worker.join().is_err() {
            log::error!("analysis worker panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for AnalysisExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ExecutorHandle {
    /// Queue a job. Fails once the executor has shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| anyhow::anyhow!("analysis executor is shut down"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_jobs_in_order_on_one_thread() -> Result<()> {
        let mut executor = AnalysisExecutor::start()?;
        let handle = executor.handle();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            handle.submit(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send((i, name)).unwrap();
            })?;
        }
        let got: Vec<_> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(got.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(got
            .iter()
            .all(|(_, name)| name.as_deref() == Some("frame-analysis")));
        executor.shutdown();
        Ok(())
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_work() -> Result<()> {
        let mut executor = AnalysisExecutor::start()?;
        let handle = executor.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        handle.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;

        executor.shutdown();
        executor.shutdown();
        assert!(!executor.is_running());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(handle.submit(|| {}).is_err());
        Ok(())
    }
}
