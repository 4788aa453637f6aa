//! Dedicated search thread.
//!
//! The interactive surface sends jobs over a channel and gets a ticket back
//! right away, so it can keep drawing a spinner and forward Ctrl-C as a
//! cancellation while the session builds indexes and embeds queries.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::semantic::{BuildReport, CancelToken, SearchError, SearchResponse, SearchSession};

/// History navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recall {
    Previous,
    Next,
}

enum Job {
    Search {
        raw: String,
        cancel: CancelToken,
        reply: mpsc::Sender<Result<SearchResponse, SearchError>>,
    },
    WarmUp {
        cancel: CancelToken,
        reply: mpsc::Sender<Result<BuildReport, SearchError>>,
    },
    Recall {
        direction: Recall,
        reply: mpsc::Sender<Option<String>>,
    },
    Shutdown,
}

/// Pending result of a job running on the worker.
pub struct SearchTicket<T> {
    cancel: CancelToken,
    rx: mpsc::Receiver<Result<T, SearchError>>,
}

impl<T> SearchTicket<T> {
    #[cfg(test)]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T, SearchError> {
        self.rx.recv().unwrap_or(Err(SearchError::WorkerGone))
    }

    /// Wait up to `timeout`; `None` while the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, SearchError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(SearchError::WorkerGone)),
        }
    }
}

pub struct SearchWorker {
    tx: mpsc::Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl SearchWorker {
    /// Move `session` onto a new thread and start serving jobs.
    pub fn start(session: SearchSession) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || run(session, rx));

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Queue a raw query line.
    pub fn submit(&self, raw: &str) -> SearchTicket<SearchResponse> {
        let cancel = CancelToken::new();
        let (reply, rx) = mpsc::channel();
        // a dead worker drops `reply`, which the ticket reports as WorkerGone
        let _ = self.tx.send(Job::Search {
            raw: raw.to_string(),
            cancel: cancel.clone(),
            reply,
        });
        SearchTicket { cancel, rx }
    }

    /// Queue an index build for the active model.
    pub fn warm_up(&self) -> SearchTicket<BuildReport> {
        let cancel = CancelToken::new();
        let (reply, rx) = mpsc::channel();
        let _ = self.tx.send(Job::WarmUp {
            cancel: cancel.clone(),
            reply,
        });
        SearchTicket { cancel, rx }
    }

    /// Step through the session history.
    pub fn recall(&self, direction: Recall) -> Result<Option<String>, SearchError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Job::Recall { direction, reply })
            .map_err(|_| SearchError::WorkerGone)?;
        rx.recv().map_err(|_| SearchError::WorkerGone)
    }

    /// Stop after the queued jobs are done.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                log::error!("search worker panicked: {err:?}");
            }
        }
    }
}

impl Drop for SearchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut session: SearchSession, rx: mpsc::Receiver<Job>) {
    log::debug!("search worker waiting for jobs");

    while let Ok(job) = rx.recv() {
        match job {
            Job::Search { raw, cancel, reply } => {
                let result = session.submit(&raw, &cancel);
                if let Err(e) = &result {
                    log::debug!("query {:?} failed: {}", raw, e);
                }
                let _ = reply.send(result);
            }
            Job::WarmUp { cancel, reply } => {
                let _ = reply.send(session.warm_up(&cancel));
            }
            Job::Recall { direction, reply } => {
                let history = session.history_mut();
                let entry = match direction {
                    Recall::Previous => history.previous(),
                    Recall::Next => history.next(),
                };
                let _ = reply.send(entry.map(str::to_string));
            }
            Job::Shutdown => break,
        }
    }

    log::debug!("search worker stopped");
}
