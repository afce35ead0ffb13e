//! Container jobs and the bounded queue the ingestion workers share.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, Mutex};

use crate::api::repository::Repository;
use crate::fuse::inode::SharedTree;

/// One (project, container) pair to list and insert into the tree.
pub struct ContainerJob {
    pub repository: Arc<dyn Repository>,
    /// Remote project name, unsanitized.
    pub project: String,
    /// Remote container name, unsanitized.
    pub container: String,
    /// Tree path of the already created container directory.
    pub path: String,
    /// Timestamp given to every node created for this job.
    pub timestamp: SystemTime,
    pub tree: SharedTree,
}

impl fmt::Display for ContainerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.repository.name(),
            self.project,
            self.container
        )
    }
}

/// Receiving end shared by every worker; each job is taken exactly once.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<ContainerJob>>>,
}

impl JobReceiver {
    /// Next job, or `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<ContainerJob> {
        self.inner.lock().await.recv().await
    }
}

/// Bounded job queue; senders wait while it is full.
pub fn job_queue(capacity: usize) -> (mpsc::Sender<ContainerJob>, JobReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        sender,
        JobReceiver {
            inner: Arc::new(Mutex::new(receiver)),
        },
    )
}
