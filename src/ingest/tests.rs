//! Unit tests for key insertion, the worker pool and the enumeration driver.
//!
//! Uses `MockRepository` to serve listings from memory.

#[cfg(test)]
mod ingest_tests {
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    use crate::api::repository::Repository;
    use crate::api::testing::MockRepository;
    use crate::fuse::inode::{lock_tree, NodeKind, SharedTree, Tree, ROOT_INO};
    use crate::ingest::{build_tree, populate_container, process_job, ContainerJob, Pipeline};
    use crate::registry::RepositoryRegistry;

    // ── Helpers ──────────────────────────────────────────────────────────

    fn shared_tree() -> SharedTree {
        Arc::new(Mutex::new(Tree::new()))
    }

    /// Create `project/container` directories and a job targeting them.
    fn job_for(
        tree: &SharedTree,
        repository: Arc<dyn Repository>,
        project: &str,
        container: &str,
    ) -> ContainerJob {
        let now = SystemTime::now();
        let path = format!("{}/{}", project, container);
        {
            let mut t = lock_tree(tree);
            if t.resolve(project).is_none() {
                t.insert(project, NodeKind::Directory, 0, now, None).unwrap();
            }
            t.insert(&path, NodeKind::Directory, 0, now, None).unwrap();
        }
        ContainerJob {
            repository,
            project: project.to_string(),
            container: container.to_string(),
            path,
            timestamp: now,
            tree: tree.clone(),
        }
    }

    fn size_of(tree: &SharedTree, path: &str) -> Option<(u64, NodeKind)> {
        let t = lock_tree(tree);
        let ino = t.resolve(path)?;
        let node = t.get(ino)?;
        Some((node.size, node.kind()))
    }

    // ── Key insertion ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_nested_keys_build_sized_directories() {
        let repo = Arc::new(MockRepository::new("swift").with_objects(
            "child_2",
            "dir",
            &[
                ("dir1/dir2/dir3/file", 30),
                ("dir1/dir4/another_file", 50),
                ("dir1/dir2/logs", 101),
                ("dir1/dir5/", 1),
            ],
        ));
        let tree = shared_tree();
        let job = job_for(&tree, repo, "child_2", "dir");

        let placed = process_job(&job).await.unwrap();
        assert_eq!(placed, 4);

        let base = "child_2/dir";
        let dir = NodeKind::Directory;
        let file = NodeKind::File;
        assert_eq!(size_of(&tree, &format!("{}/dir1", base)), Some((181, dir)));
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir2", base)), Some((131, dir)));
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir2/dir3", base)), Some((30, dir)));
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir4", base)), Some((50, dir)));
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir2/dir3/file", base)), Some((30, file)));
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir2/logs", base)), Some((101, file)));
        assert_eq!(
            size_of(&tree, &format!("{}/dir1/dir4/another_file", base)),
            Some((50, file))
        );
        assert_eq!(size_of(&tree, &format!("{}/dir1/dir5", base)), Some((0, dir)));

        let t = lock_tree(&tree);
        let dir5 = t.resolve(&format!("{}/dir1/dir5", base)).unwrap();
        assert!(t.children(dir5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_nodes_keep_remote_key() {
        let repo = Arc::new(MockRepository::new("swift").with_objects(
            "proj",
            "bucket",
            &[("we:ird/na|me.txt", 12)],
        ));
        let tree = shared_tree();
        let job = job_for(&tree, repo, "proj", "bucket");
        process_job(&job).await.unwrap();

        let t = lock_tree(&tree);
        let ino = t.resolve("proj/bucket/we.ird/na_me.txt").unwrap();
        let origin = t.get(ino).unwrap().origin().unwrap().clone();
        assert_eq!(origin.repository, "swift");
        assert_eq!(origin.project, "proj");
        assert_eq!(origin.container, "bucket");
        assert_eq!(origin.key, "we:ird/na|me.txt");
    }

    #[tokio::test]
    async fn test_file_then_directory_collision() {
        let repo = Arc::new(MockRepository::new("swift"));
        let tree = shared_tree();
        let job = job_for(&tree, repo, "proj", "bucket");

        let objects: Vec<_> = [("a", 5), ("a/b", 3), ("a/c", 4)]
            .iter()
            .map(|(name, bytes)| crate::api::types::ObjectMetadata {
                name: name.to_string(),
                bytes: *bytes,
                content_type: None,
                hash: None,
                last_modified: None,
            })
            .collect();
        assert_eq!(populate_container(&job, &objects), 3);

        assert_eq!(size_of(&tree, "proj/bucket/a"), Some((5, NodeKind::File)));
        assert_eq!(size_of(&tree, "proj/bucket/DIR_1_a"), Some((7, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "proj/bucket/DIR_1_a/b"), Some((3, NodeKind::File)));
        assert_eq!(size_of(&tree, "proj/bucket/DIR_1_a/c"), Some((4, NodeKind::File)));

        let t = lock_tree(&tree);
        assert_eq!(t.original_path("proj/bucket/DIR_1_a"), Some("proj/bucket/a"));
        assert_eq!(t.renamed().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_then_file_collision() {
        let repo = Arc::new(
            MockRepository::new("swift").with_objects("proj", "bucket", &[("a/b", 3), ("a", 5)]),
        );
        let tree = shared_tree();
        let job = job_for(&tree, repo, "proj", "bucket");
        process_job(&job).await.unwrap();

        assert_eq!(size_of(&tree, "proj/bucket/a"), Some((3, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "proj/bucket/FILE_1_a"), Some((5, NodeKind::File)));
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_skipped() {
        let repo = Arc::new(
            MockRepository::new("swift").with_objects("proj", "bucket", &[("x", 1), ("x", 2)]),
        );
        let tree = shared_tree();
        let job = job_for(&tree, repo, "proj", "bucket");

        assert_eq!(process_job(&job).await.unwrap(), 1);
        assert_eq!(size_of(&tree, "proj/bucket/x"), Some((1, NodeKind::File)));
    }

    #[tokio::test]
    async fn test_listing_error_leaves_tree_unchanged() {
        let repo = Arc::new(MockRepository::new("swift").failing_objects("proj", "bucket"));
        let tree = shared_tree();
        let job = job_for(&tree, repo, "proj", "bucket");
        let snapshot = lock_tree(&tree).clone();

        assert!(process_job(&job).await.is_err());
        assert_eq!(*lock_tree(&tree), snapshot);
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_pipeline_isolates_failed_jobs() {
        let repo: Arc<dyn Repository> = Arc::new(
            MockRepository::new("swift")
                .with_objects("proj", "one", &[("a.txt", 1)])
                .with_objects("proj", "three", &[("c/d.txt", 3)])
                .failing_objects("proj", "two"),
        );
        let tree = shared_tree();
        let jobs: Vec<ContainerJob> = ["one", "two", "three"]
            .iter()
            .map(|c| job_for(&tree, repo.clone(), "proj", c))
            .collect();

        let pipeline = Pipeline::start(2, 1);
        for job in jobs {
            pipeline.submit(job).await.unwrap();
        }
        let stats = pipeline.finish().await;

        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.objects, 2);
        assert!(size_of(&tree, "proj/one/a.txt").is_some());
        assert!(size_of(&tree, "proj/three/c/d.txt").is_some());
        assert_eq!(size_of(&tree, "proj/two"), None);
    }

    #[tokio::test]
    async fn test_pipeline_with_no_jobs() {
        let pipeline = Pipeline::start(4, 8);
        assert_eq!(pipeline.finish().await, Default::default());
    }

    // ── Enumeration driver ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_build_tree_from_registry() {
        let visible = MockRepository::new("swift")
            .with_project("alpha", 100)
            .with_project("broken", 50)
            .with_container("alpha", "data", 60)
            .with_container("alpha", "logs", 40)
            .with_objects("alpha", "data", &[("x/y.bin", 60)])
            .with_objects("alpha", "logs", &[("run.log", 40)])
            .failing_containers("broken");
        let hidden = MockRepository::new("archive")
            .hidden()
            .with_project("secret", 10);

        let mut registry = RepositoryRegistry::new();
        registry.register(Arc::new(visible)).unwrap();
        registry.register(Arc::new(hidden)).unwrap();

        let tree = shared_tree();
        let stats = build_tree(&registry, &tree, 4).await;

        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(size_of(&tree, ""), Some((100, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "alpha"), Some((100, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "alpha/data"), Some((60, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "alpha/data/x"), Some((60, NodeKind::Directory)));
        assert_eq!(size_of(&tree, "alpha/logs/run.log"), Some((40, NodeKind::File)));
        assert_eq!(size_of(&tree, "broken"), None);
        assert_eq!(size_of(&tree, "secret"), None);

        let t = lock_tree(&tree);
        let root: Vec<String> = t
            .children(ROOT_INO)
            .unwrap()
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert_eq!(root, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_build_tree_survives_failing_repository() {
        let failing = MockRepository::new("archive").failing_top_level();
        let working = MockRepository::new("swift")
            .with_project("alpha", 1)
            .with_container("alpha", "c", 1)
            .with_objects("alpha", "c", &[("f", 1)]);

        let mut registry = RepositoryRegistry::new();
        registry.register(Arc::new(failing)).unwrap();
        registry.register(Arc::new(working)).unwrap();

        let tree = shared_tree();
        build_tree(&registry, &tree, 2).await;
        assert_eq!(size_of(&tree, "alpha/c/f"), Some((1, NodeKind::File)));
    }

    #[tokio::test]
    async fn test_project_clash_between_repositories() {
        let first = MockRepository::new("archive")
            .with_project("shared", 5)
            .with_container("shared", "from-archive", 5);
        let second = MockRepository::new("swift")
            .with_project("shared", 7)
            .with_container("shared", "from-swift", 7);

        let mut registry = RepositoryRegistry::new();
        registry.register(Arc::new(first)).unwrap();
        registry.register(Arc::new(second)).unwrap();

        let tree = shared_tree();
        build_tree(&registry, &tree, 2).await;

        // registry order is by name, so the archive project wins
        assert!(size_of(&tree, "shared/from-archive").is_some());
        assert_eq!(size_of(&tree, "shared/from-swift"), None);
        assert_eq!(size_of(&tree, ""), Some((5, NodeKind::Directory)));
    }
}
