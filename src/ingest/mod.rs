//! Builds the tree from repository listings.
//!
//! [`build_tree`] walks projects and containers of every visible repository,
//! creating their directories, and queues one [`ContainerJob`] per container.
//! A fixed pool of workers drains the queue: each job lists the container's
//! objects and turns every flat key into directories plus a leaf file.
//!
//! Listing failures never abort the build. A failed project or container is
//! logged and left out of the tree.

pub mod queue;
#[cfg(test)]
mod tests;

pub use queue::{job_queue, ContainerJob, JobReceiver};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::client::ApiError;
use crate::api::types::{ObjectMetadata, ObjectRef};
use crate::fuse::inode::{lock_tree, NodeKind, SharedTree, TreeError, ROOT_INO};
use crate::fuse::sanitize::sanitize_name;
use crate::registry::RepositoryRegistry;

/// Default number of ingestion workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Jobs that may wait in the queue before the driver blocks.
pub const QUEUE_CAPACITY: usize = 64;

/// Outcome counters of one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Jobs whose listing succeeded.
    pub completed: usize,
    /// Jobs whose listing failed.
    pub failed: usize,
    /// Objects placed in the tree.
    pub objects: usize,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Fixed pool of workers consuming container jobs.
pub struct Pipeline {
    sender: mpsc::Sender<ContainerJob>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PipelineStats>>,
}

impl Pipeline {
    /// Spawn `workers` tasks on the current runtime.
    pub fn start(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = job_queue(capacity);
        let stats = Arc::new(Mutex::new(PipelineStats::default()));

        let workers = (0..workers.max(1))
            .map(|id| tokio::spawn(run_worker(id, receiver.clone(), stats.clone())))
            .collect();

        Self {
            sender,
            workers,
            stats,
        }
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: ContainerJob) -> Result<(), String> {
        self.sender
            .send(job)
            .await
            .map_err(|e| format!("Ingestion queue closed, dropped {}", e.0))
    }

    /// Close the queue and wait until every worker has drained it.
    pub async fn finish(self) -> PipelineStats {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                log::error!("Ingestion worker stopped abnormally: {}", e);
            }
        }
        let stats = *self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats
    }
}

async fn run_worker(id: usize, receiver: JobReceiver, stats: Arc<Mutex<PipelineStats>>) {
    while let Some(job) = receiver.next().await {
        match process_job(&job).await {
            Ok(placed) => {
                log::debug!("Worker {} placed {} objects from {}", id, placed, job);
                let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                stats.completed += 1;
                stats.objects += placed;
            }
            Err(e) => {
                log::warn!("Failed to list objects of {}, leaving it out: {}", job, e);
                discard_container(&job);
                stats.lock().unwrap_or_else(|e| e.into_inner()).failed += 1;
            }
        }
    }
    log::debug!("Ingestion worker {} finished", id);
}

/// List the job's container and insert its objects.
pub async fn process_job(job: &ContainerJob) -> Result<usize, ApiError> {
    let objects = job
        .repository
        .list_third_level(&job.project, &job.container)
        .await?;
    Ok(populate_container(job, &objects))
}

/// Remove the (still empty) directory of a job whose listing failed.
fn discard_container(job: &ContainerJob) {
    let mut tree = lock_tree(&job.tree);
    if let Some(ino) = tree.resolve(&job.path) {
        if let Err(e) = tree.remove_empty_dir(ino) {
            log::warn!("Could not remove {:?}: {}", job.path, e);
        }
    }
}

// ── Key insertion ─────────────────────────────────────────────────────────────

/// Insert `objects` below the job's container directory.
///
/// Every key segment is sanitized. Missing directories are sized with the
/// total of the objects below them; keys ending in `/` become empty
/// directories. The tree lock is held per key, never across keys.
/// Returns the number of objects placed.
pub fn populate_container(job: &ContainerJob, objects: &[ObjectMetadata]) -> usize {
    let Some(container_ino) = lock_tree(&job.tree).resolve(&job.path) else {
        log::warn!("Container directory {:?} vanished, skipping {}", job.path, job);
        return 0;
    };

    let entries: Vec<(Vec<String>, &ObjectMetadata)> = objects
        .iter()
        .filter_map(|object| {
            let segments: Vec<String> = object
                .name
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| sanitize_name(s, ""))
                .collect();
            (!segments.is_empty()).then_some((segments, object))
        })
        .collect();

    let mut dir_sizes: HashMap<String, u64> = HashMap::new();
    for (segments, object) in &entries {
        if object.is_directory_marker() {
            continue;
        }
        for depth in 1..segments.len() {
            *dir_sizes.entry(segments[..depth].join("/")).or_default() += object.bytes.max(0) as u64;
        }
    }

    let repository = job.repository.name().to_string();
    let mut placed = 0;

    for (segments, object) in entries {
        let is_marker = object.is_directory_marker();
        let dir_depth = if is_marker { segments.len() } else { segments.len() - 1 };

        let mut tree = lock_tree(&job.tree);
        let mut current = container_ino;
        let mut failed = false;

        for depth in 0..dir_depth {
            let name = &segments[depth];
            if let Some(dir) = tree.find_dir_child(current, name) {
                current = dir;
                continue;
            }
            let size = dir_sizes
                .get(&segments[..=depth].join("/"))
                .copied()
                .unwrap_or(0);
            let path = child_path(tree.path_of(current).unwrap_or_default(), name);
            match tree.insert(&path, NodeKind::Directory, size, job.timestamp, None) {
                Ok(ino) => current = ino,
                Err(e) => {
                    log::warn!("Skipping {:?} in {}: cannot create {:?}: {}", object.name, job, path, e);
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            continue;
        }

        if is_marker {
            placed += 1;
            continue;
        }

        let leaf = &segments[segments.len() - 1];
        let path = child_path(tree.path_of(current).unwrap_or_default(), leaf);
        let origin = ObjectRef::new(&repository, &job.project, &job.container, &object.name);
        match tree.insert(
            &path,
            NodeKind::File,
            object.bytes.max(0) as u64,
            job.timestamp,
            Some(origin),
        ) {
            Ok(_) => placed += 1,
            Err(TreeError::Exists) => {
                log::warn!("Duplicate object {:?} in {}, keeping the first", object.name, job)
            }
            Err(e) => log::warn!("Skipping {:?} in {}: {}", object.name, job, e),
        }
    }

    placed
}

fn child_path(parent: String, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

// ── Enumeration driver ────────────────────────────────────────────────────────

/// Populate `tree` from every visible repository and wait for all jobs.
///
/// Project and container directories carry the sizes reported by their
/// listings; the root carries the sum of the project sizes.
pub async fn build_tree(
    registry: &RepositoryRegistry,
    tree: &SharedTree,
    workers: usize,
) -> PipelineStats {
    let timestamp = SystemTime::now();
    let pipeline = Pipeline::start(workers, QUEUE_CAPACITY);
    let mut total: u64 = 0;

    for repository in registry.visible() {
        let projects = match repository.list_top_level().await {
            Ok(projects) => projects,
            Err(e) => {
                log::warn!("Failed to list projects of {}: {}", repository.name(), e);
                continue;
            }
        };
        log::info!("{} lists {} projects", repository.name(), projects.len());

        for project in projects {
            let containers = match repository.list_second_level(&project.name).await {
                Ok(containers) => containers,
                Err(e) => {
                    log::warn!(
                        "Failed to list containers of {} project {:?}: {}",
                        repository.name(),
                        project.name,
                        e
                    );
                    continue;
                }
            };

            let project_size = project.bytes.max(0) as u64;
            let project_path = sanitize_name(&project.name, "");
            let inserted = lock_tree(tree).insert(
                &project_path,
                NodeKind::Directory,
                project_size,
                timestamp,
                None,
            );
            if let Err(e) = inserted {
                log::warn!(
                    "Skipping {} project {:?}: {}",
                    repository.name(),
                    project.name,
                    e
                );
                continue;
            }
            total += project_size;

            for container in containers {
                let path = child_path(project_path.clone(), &sanitize_name(&container.name, ""));
                let inserted = lock_tree(tree).insert(
                    &path,
                    NodeKind::Directory,
                    container.bytes.max(0) as u64,
                    timestamp,
                    None,
                );
                if let Err(e) = inserted {
                    log::warn!("Skipping container {:?}: {}", path, e);
                    continue;
                }

                let job = ContainerJob {
                    repository: repository.clone(),
                    project: project.name.clone(),
                    container: container.name.clone(),
                    path,
                    timestamp,
                    tree: tree.clone(),
                };
                if let Err(e) = pipeline.submit(job).await {
                    log::error!("{}", e);
                }
            }
        }
    }

    let stats = pipeline.finish().await;
    if let Err(e) = lock_tree(tree).set_size(ROOT_INO, total) {
        log::error!("Failed to size the root directory: {}", e);
    }
    log::info!(
        "Tree built: {} containers listed, {} failed, {} objects",
        stats.completed,
        stats.failed,
        stats.objects
    );
    stats
}
