use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};
use tracing::warn;

use crate::episode::{TransferJob, TransferOutcome, execute_transfer};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, ProgressReporter, SharedProgressReporter};

/// Identity of a scheduled transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub cast_uid: String,
    pub episode_uid: String,
}

/// Sent exactly once per submitted transfer, when it reaches a terminal
/// state. The store applies these to record local filenames.
#[derive(Debug)]
pub struct TransferCompletion {
    pub cast_uid: String,
    pub episode_uid: String,
    pub outcome: TransferOutcome,
}

#[derive(Debug, Clone)]
enum TaskState {
    Waiting,
    Running { received: u64, expected: Option<u64> },
    Completed,
    Failed,
}

/// A transfer currently moving bytes
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub key: TaskKey,
    pub received: u64,
    pub expected: Option<u64>,
}

/// Point-in-time view of every tracked transfer
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub waiting: Vec<TaskKey>,
    pub running: Vec<RunningTask>,
    pub completed: Vec<TaskKey>,
    pub failed: Vec<TaskKey>,
}

type Registry = Arc<Mutex<HashMap<TaskKey, TaskState>>>;

/// Bounded-concurrency download scheduler.
///
/// `submit` never blocks: each job is spawned immediately and waits on a
/// semaphore permit, so at most `concurrency` transfers move bytes at once
/// while the rest queue in submission order.
pub struct DownloadScheduler<C> {
    client: Arc<C>,
    semaphore: Arc<Semaphore>,
    registry: Registry,
    completion_tx: mpsc::UnboundedSender<TransferCompletion>,
}

impl<C: HttpClient + 'static> DownloadScheduler<C> {
    /// Create a scheduler and the receiving end of its completion channel
    pub fn new(
        client: Arc<C>,
        concurrency: usize,
    ) -> (Self, mpsc::UnboundedReceiver<TransferCompletion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            registry: Arc::new(Mutex::new(HashMap::new())),
            completion_tx,
        };

        (scheduler, completion_rx)
    }

    /// Queue a transfer. Returns false when the same cast/episode pair is
    /// already tracked.
    pub fn submit(&self, job: TransferJob) -> bool {
        let key = TaskKey {
            cast_uid: job.cast_uid.clone(),
            episode_uid: job.episode_uid.clone(),
        };

        {
            let mut registry = self.registry.lock().unwrap();
            if registry.contains_key(&key) {
                return false;
            }
            registry.insert(key.clone(), TaskState::Waiting);
        }

        let client = self.client.clone();
        let semaphore = self.semaphore.clone();
        let registry = self.registry.clone();
        let completion_tx = self.completion_tx.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so this only fails at shutdown
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            registry.lock().unwrap().insert(
                key.clone(),
                TaskState::Running {
                    received: 0,
                    expected: None,
                },
            );

            let reporter: SharedProgressReporter = Arc::new(RegistryReporter {
                key: key.clone(),
                registry: registry.clone(),
            });

            let outcome = execute_transfer(client.as_ref(), &job, &reporter).await;

            let terminal = match &outcome {
                TransferOutcome::Failure { error } => {
                    warn!(
                        "Download of '{}' / '{}' failed: {error}",
                        job.cast_uid, job.episode_uid
                    );
                    TaskState::Failed
                }
                _ => TaskState::Completed,
            };
            registry.lock().unwrap().insert(key, terminal);

            let _ = completion_tx.send(TransferCompletion {
                cast_uid: job.cast_uid.clone(),
                episode_uid: job.episode_uid.clone(),
                outcome,
            });
        });

        true
    }

    /// Snapshot of all tracked transfers, each list in a stable order
    pub fn status(&self) -> SchedulerStatus {
        let registry = self.registry.lock().unwrap();
        let mut status = SchedulerStatus::default();

        for (key, state) in registry.iter() {
            match state {
                TaskState::Waiting => status.waiting.push(key.clone()),
                TaskState::Running { received, expected } => status.running.push(RunningTask {
                    key: key.clone(),
                    received: *received,
                    expected: *expected,
                }),
                TaskState::Completed => status.completed.push(key.clone()),
                TaskState::Failed => status.failed.push(key.clone()),
            }
        }

        status.waiting.sort();
        status.running.sort_by(|a, b| a.key.cmp(&b.key));
        status.completed.sort();
        status.failed.sort();

        status
    }

    /// True once every submitted transfer has reached a terminal state
    pub fn is_idle(&self) -> bool {
        self.registry
            .lock()
            .unwrap()
            .values()
            .all(|state| matches!(state, TaskState::Completed | TaskState::Failed))
    }
}

/// Feeds transfer progress into the registry so `status` reflects live
/// byte counts
struct RegistryReporter {
    key: TaskKey,
    registry: Registry,
}

impl ProgressReporter for RegistryReporter {
    fn report(&self, event: ProgressEvent) {
        let state = match event {
            ProgressEvent::TransferStarting { content_length } => TaskState::Running {
                received: 0,
                expected: content_length,
            },
            ProgressEvent::TransferProgress {
                bytes_downloaded,
                total_bytes,
            } => TaskState::Running {
                received: bytes_downloaded,
                expected: total_bytes,
            },
            _ => return,
        };

        self.registry.lock().unwrap().insert(self.key.clone(), state);
    }
}
