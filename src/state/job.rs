/// Background scan jobs
///
/// At most one reconciliation pass runs per catalog at a time. The pass runs
/// on a blocking worker with its own database connection, and its progress is
/// published as a [`ScanStatus`] that callers can poll or await.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::data::ScanReport;
use super::library::Library;
use crate::media::geocode::Gazetteer;
use crate::media::probe::MediaProbe;
use crate::media::thumbnail::ThumbnailStore;
use crate::scanner::{CancelToken, ScanError, Scanner};

/// Lifecycle of the most recent scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Running {
        root: PathBuf,
        started_at: DateTime<Utc>,
    },
    Completed {
        root: PathBuf,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        report: ScanReport,
    },
    Failed {
        root: PathBuf,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: String,
    },
}

impl ScanStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ScanStatus::Running { .. })
    }
}

/// Answer to a start request
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Accepted,
    /// Another pass holds the catalog; nothing was started
    AlreadyRunning {
        root: PathBuf,
        started_at: DateTime<Utc>,
    },
}

/// Everything a pass needs besides its root
pub struct ScanEnvironment {
    pub database_path: PathBuf,
    pub thumbnails: ThumbnailStore,
    pub probe: Arc<dyn MediaProbe>,
    pub gazetteer: Arc<dyn Gazetteer>,
}

struct JobSlot {
    status: ScanStatus,
    cancel: Option<CancelToken>,
}

/// The one place the current job lives
struct JobRegister {
    slot: Mutex<JobSlot>,
    changes: watch::Sender<ScanStatus>,
}

impl JobRegister {
    fn lock(&self) -> MutexGuard<'_, JobSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, status: ScanStatus) {
        let mut slot = self.lock();
        slot.cancel = None;
        slot.status = status.clone();
        self.changes.send_replace(status);
    }
}

/// Starts scans and reports on them
#[derive(Clone)]
pub struct JobController {
    register: Arc<JobRegister>,
    env: Arc<ScanEnvironment>,
}

impl JobController {
    pub fn new(env: ScanEnvironment) -> Self {
        let (changes, _) = watch::channel(ScanStatus::Idle);
        Self {
            register: Arc::new(JobRegister {
                slot: Mutex::new(JobSlot {
                    status: ScanStatus::Idle,
                    cancel: None,
                }),
                changes,
            }),
            env: Arc::new(env),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.env.database_path
    }

    /// Start a pass over `root` unless one is already running.
    ///
    /// Returns immediately; the pass runs on a blocking worker.
    pub fn start_scan(&self, root: impl Into<PathBuf>) -> StartOutcome {
        let root = root.into();
        let started_at = Utc::now();
        let cancel = CancelToken::new();

        {
            let mut slot = self.register.lock();
            if let ScanStatus::Running { root, started_at } = &slot.status {
                info!(root = %root.display(), "scan already running, request ignored");
                return StartOutcome::AlreadyRunning {
                    root: root.clone(),
                    started_at: *started_at,
                };
            }
            slot.status = ScanStatus::Running {
                root: root.clone(),
                started_at,
            };
            slot.cancel = Some(cancel.clone());
            self.register.changes.send_replace(slot.status.clone());
        }

        let register = Arc::clone(&self.register);
        let env = Arc::clone(&self.env);
        let job_root = root.clone();
        let job = move || run_pass(&register, &env, job_root, started_at, &cancel);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                if let Err(err) = thread::Builder::new().name("catalog-scan".to_string()).spawn(job) {
                    error!(error = %err, "could not start scan worker");
                    self.register.finish(ScanStatus::Failed {
                        root,
                        started_at,
                        finished_at: Utc::now(),
                        error: format!("could not start scan worker: {}", err),
                    });
                }
            }
        }

        StartOutcome::Accepted
    }

    pub fn status(&self) -> ScanStatus {
        self.register.lock().status.clone()
    }

    /// Receiver that sees every status transition
    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.register.changes.subscribe()
    }

    /// Ask the running pass to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match &self.register.lock().cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Resolve once no pass is running, with the final status
    pub async fn wait_until_finished(&self) -> ScanStatus {
        let mut changes = self.subscribe();
        let status = match changes.wait_for(|status| !status.is_running()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }
}

fn run_pass(
    register: &JobRegister,
    env: &ScanEnvironment,
    root: PathBuf,
    started_at: DateTime<Utc>,
    cancel: &CancelToken,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| scan_once(env, &root, cancel)));
    let finished_at = Utc::now();

    let status = match outcome {
        Ok(Ok(report)) => ScanStatus::Completed {
            root,
            started_at,
            finished_at,
            report,
        },
        Ok(Err(err)) => {
            warn!(root = %root.display(), error = %err, "scan failed");
            ScanStatus::Failed {
                root,
                started_at,
                finished_at,
                error: err.to_string(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(root = %root.display(), panic = %message, "scan worker panicked");
            ScanStatus::Failed {
                root,
                started_at,
                finished_at,
                error: format!("scan aborted: {}", message),
            }
        }
    };

    register.finish(status);
}

fn scan_once(env: &ScanEnvironment, root: &Path, cancel: &CancelToken) -> Result<ScanReport, ScanError> {
    let mut library = Library::open(&env.database_path)?;
    let mut scanner = Scanner::new(
        &mut library,
        &env.thumbnails,
        Arc::clone(&env.probe),
        Arc::clone(&env.gazetteer),
    );
    scanner.scan(root, cancel)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
