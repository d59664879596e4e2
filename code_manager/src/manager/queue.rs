//manager/queue.rs
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Returned by [`JobQueue::push`] once the queue is closed; hands the job back.
#[derive(Debug)]
pub struct QueueClosed<T>(pub T);

struct State<T> {
    jobs: VecDeque<T>,
    closed: bool,
}

/// FIFO job queue shared by a pool of workers.
pub struct JobQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends a job and wakes one waiting worker.
    pub async fn push(&self, job: T) -> Result<(), QueueClosed<T>> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueClosed(job));
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next job. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before looking so a close between the check and the await is seen.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(job) = state.jobs.pop_front() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting jobs. Jobs already queued are still handed out.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Spawns `count` workers that each take one job at a time from `queue` until it is
/// closed and drained.
pub fn spawn_workers<T, F, Fut>(
    queue: std::sync::Arc<JobQueue<T>>,
    count: usize,
    handler: F,
) -> Vec<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    (0..count.max(1))
        .map(|worker| {
            let queue = queue.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                tracing::debug!(worker, "test run worker started");
                while let Some(job) = queue.pop().await {
                    handler(job).await;
                }
                tracing::debug!(worker, "test run worker stopped");
            })
        })
        .collect()
}
