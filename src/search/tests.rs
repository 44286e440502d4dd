//! Search Module Tests
//!
//! Drives the orchestrator tick by tick against in-memory workers.
//!
//! ## Test Scopes
//! - **Submission**: empty registry, probe upload failures and deadlines.
//! - **Dispatch**: every side exit of a shard (owner unknown, probe missing, empty shard,
//!   remote failure, deadline).
//! - **Completion**: callbacks, task completion, priority order, callbacks racing a tick.

#[cfg(test)]
mod tests {
    use crate::distribution::distributor::ShardDistributor;
    use crate::error::{CoordinatorError, RemoteError};
    use crate::search::handlers::handle_task_result;
    use crate::search::orchestrator::{OrchestratorSettings, SearchOrchestrator};
    use crate::search::protocol::TaskResultParams;
    use crate::search::types::{DispatchErrorKind, SearchTaskId, ShardMatch};
    use crate::testing::{FakeWorker, TestCluster};
    use crate::workers::types::WorkerId;

    use axum::extract::{Extension, Query};
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        cluster: TestCluster,
        workers: Vec<Arc<FakeWorker>>,
        distributor: Arc<ShardDistributor>,
        orchestrator: Arc<SearchOrchestrator>,
        photos: TempDir,
    }

    impl Fixture {
        /// Registers `workers`, places `dirs` (one photo each) on them.
        async fn new(workers: &[&str], dirs: &[&str], settings: OrchestratorSettings) -> Self {
            let cluster = TestCluster::new();
            let fakes = workers.iter().map(|id| cluster.add_worker(id, 4)).collect();
            for dir in dirs {
                cluster.archive.put_file(dir, "1.jpg", dir.as_bytes());
            }

            let distributor = ShardDistributor::new(
                cluster.registry.clone(),
                cluster.archive.clone(),
                cluster.store.clone(),
                Duration::ZERO,
            );
            distributor.load_local_directories().await.unwrap();
            if !workers.is_empty() && !dirs.is_empty() {
                distributor.auto_distribute().await.unwrap();
            }

            let orchestrator =
                SearchOrchestrator::new(cluster.registry.clone(), distributor.clone(), settings);

            Self {
                cluster,
                workers: fakes,
                distributor,
                orchestrator,
                photos: TempDir::new().unwrap(),
            }
        }

        fn photo(&self, name: &str) -> String {
            let path = self.photos.path().join(name);
            std::fs::write(&path, b"face bytes").unwrap();
            path.to_string_lossy().into_owned()
        }
    }

    fn remote_id(worker: &FakeWorker, directory: &str) -> String {
        worker
            .created_tasks()
            .into_iter()
            .find(|(_, dir, _)| dir == directory)
            .map(|(_, _, task_id)| task_id)
            .unwrap()
    }

    // ============================================================
    // SUBMISSION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_submit_rejects_empty_registry() {
        let fixture = Fixture::new(&[], &["A"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");

        let result = fixture.orchestrator.submit(&photo, 0).await;

        assert!(matches!(result, Err(CoordinatorError::NoWorkersRegistered)));
        assert_eq!(fixture.orchestrator.active_count(), 0);
        assert!(fixture.orchestrator.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_missing_photo_fails() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;

        let result = fixture.orchestrator.submit("/no/such/photo.jpg", 0).await;

        assert!(matches!(result, Err(CoordinatorError::Io(_))));
        assert_eq!(fixture.orchestrator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_tracks_every_assigned_shard() {
        let fixture = Fixture::new(&["w1", "w2"], &["A", "B", "C"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");

        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        let snapshot = fixture.orchestrator.status(&id).await.unwrap();

        let mut pending = snapshot.pending.clone();
        pending.sort();
        assert_eq!(pending, vec!["A", "B", "C"]);
        assert_eq!(snapshot.probe_uploaded_to.len(), 2);
        assert!(!snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_slow_photo_upload_within_upload_deadline() {
        // ARRANGE
        let settings = OrchestratorSettings {
            call_deadline: Duration::from_millis(20),
            upload_deadline: Duration::from_millis(500),
            ..OrchestratorSettings::default()
        };
        let fixture = Fixture::new(&["w1", "w2"], &["A"], settings).await;
        fixture.workers[0].delay_probe_upload(Duration::from_millis(100));
        fixture.workers[1].delay_probe_upload(Duration::from_secs(2));
        let photo = fixture.photo("face.jpg");

        // ACT
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        // ASSERT
        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.probe_uploaded_to, vec![WorkerId::from("w1")]);
    }

    // ============================================================
    // DISPATCH & COMPLETION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_task_completes_with_every_outcome_accounted_for() {
        // ARRANGE
        let fixture = Fixture::new(&["w1"], &["A", "B", "C"], OrchestratorSettings::default()).await;
        let w1 = &fixture.workers[0];
        w1.fail_sub_task(
            "C",
            RemoteError::Rejected {
                status: 500,
                message: "boom".to_string(),
            },
        );
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        // ACT
        let first = fixture.orchestrator.tick().await;
        assert!(fixture.orchestrator.report_result(&remote_id(w1, "A"), true, Some("face-7".to_string())).await);
        assert!(fixture.orchestrator.report_result(&remote_id(w1, "B"), false, None).await);
        let second = fixture.orchestrator.tick().await;

        // ASSERT
        assert_eq!(first.dispatched, 2);
        assert_eq!(first.dispatch_errors, 1);
        assert_eq!(first.completed, 0);
        assert_eq!(second.completed, 1);

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert!(snapshot.is_complete());
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(
            snapshot.matched,
            vec![ShardMatch {
                directory: "A".to_string(),
                hint: Some("face-7".to_string()),
            }]
        );
        assert_eq!(snapshot.cleared_no_match, vec!["B"]);
        assert_eq!(snapshot.dispatch_errors.len(), 1);
        assert_eq!(snapshot.dispatch_errors[0].directory, "C");
        assert!(matches!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::Remote(_)));

        assert!(!fixture.orchestrator.is_active(&id));
        assert_eq!(fixture.orchestrator.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_worker_without_probe_photo_gets_no_sub_tasks() {
        let fixture = Fixture::new(&["w1", "w2"], &["A", "B"], OrchestratorSettings::default()).await;
        let w2 = &fixture.workers[1];
        w2.fail_probe_upload(RemoteError::Rejected {
            status: 500,
            message: "no space".to_string(),
        });
        let w2_shards = fixture
            .distributor
            .directories_of(&WorkerId::from("w2"))
            .await;
        let photo = fixture.photo("face.jpg");

        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        fixture.orchestrator.tick().await;

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.probe_uploaded_to.len(), 1);
        assert_eq!(snapshot.in_flight.len(), 1);
        assert_eq!(snapshot.dispatch_errors.len(), 1);
        assert_eq!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::ProbeNotUploaded);
        assert_eq!(vec![snapshot.dispatch_errors[0].directory.clone()], w2_shards);
        assert!(w2.created_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_empty_shard_is_cleared_without_sub_task() {
        let fixture = Fixture::new(&["w1"], &[], OrchestratorSettings::default()).await;
        fixture.cluster.archive.put_empty_dir("empty");
        fixture.distributor.load_local_directories().await.unwrap();
        fixture.distributor.auto_distribute().await.unwrap();
        let photo = fixture.photo("face.jpg");

        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        let summary = fixture.orchestrator.tick().await;

        assert_eq!(summary.completed, 1);
        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.cleared_no_match, vec!["empty"]);
        assert!(fixture.workers[0].created_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_shard_without_owner_is_a_dispatch_error() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        fixture.distributor.clear_assignments().await.unwrap();
        fixture.orchestrator.tick().await;

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::ShardOwnerUnknown);
    }

    #[tokio::test]
    async fn test_unreachable_owner_is_a_dispatch_error() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        fixture.workers[0].set_reachable(false);
        fixture.orchestrator.tick().await;

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::WorkerUnreachable);
    }

    #[tokio::test]
    async fn test_slow_sub_task_creation_times_out() {
        let settings = OrchestratorSettings {
            call_deadline: Duration::from_millis(20),
            ..OrchestratorSettings::default()
        };
        let fixture = Fixture::new(&["w1"], &["A"], settings).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        fixture.workers[0].delay_sub_tasks(Duration::from_millis(300));
        fixture.orchestrator.tick().await;

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_lost_result_expires_in_flight_shard() {
        let settings = OrchestratorSettings {
            result_deadline: Some(Duration::from_millis(10)),
            ..OrchestratorSettings::default()
        };
        let fixture = Fixture::new(&["w1"], &["A"], settings).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();

        fixture.orchestrator.tick().await;
        assert_eq!(fixture.orchestrator.status(&id).await.unwrap().in_flight.len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let summary = fixture.orchestrator.tick().await;

        assert_eq!(summary.completed, 1);
        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.dispatch_errors[0].kind, DispatchErrorKind::ResultTimeout);

        // The late result no longer finds an active task.
        let late = remote_id(&fixture.workers[0], "A");
        assert!(!fixture.orchestrator.report_result(&late, true, None).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_result_waits_for_tick_holding_the_task() {
        // ARRANGE
        let fixture = Fixture::new(&["w1"], &["A", "B"], OrchestratorSettings::default()).await;
        let w1 = fixture.workers[0].clone();
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        w1.delay_sub_tasks(Duration::from_millis(300));

        // ACT: the tick holds the task while B is still being dispatched.
        let ticking = fixture.orchestrator.clone();
        let tick = tokio::spawn(async move { ticking.tick().await });

        let mut remote_a = None;
        for _ in 0..200 {
            if let Some((_, _, task_id)) = w1.created_tasks().into_iter().next() {
                remote_a = Some(task_id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let remote_a = remote_a.unwrap();

        let reporting = fixture.orchestrator.clone();
        let report =
            tokio::spawn(async move { reporting.report_result(&remote_a, false, None).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // ASSERT
        assert!(!tick.is_finished());
        assert!(!report.is_finished(), "callback ran while the tick held the task");

        let summary = tick.await.unwrap();
        assert!(report.await.unwrap());
        assert_eq!(summary.dispatched, 2);

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.shard_count, 2);
        assert_eq!(snapshot.cleared_no_match, vec!["A"]);
        assert_eq!(snapshot.in_flight.len(), 1);
        assert_eq!(snapshot.in_flight[0].directory, "B");

        let mut seen: Vec<String> = snapshot.pending.clone();
        seen.extend(snapshot.in_flight.iter().map(|shard| shard.directory.clone()));
        seen.extend(snapshot.cleared_no_match.iter().cloned());
        seen.extend(snapshot.matched.iter().map(|shard| shard.directory.clone()));
        seen.extend(snapshot.dispatch_errors.iter().map(|failure| failure.directory.clone()));
        seen.sort();
        assert_eq!(seen, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_unknown_result_is_ignored() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        fixture.orchestrator.tick().await;

        let accepted = fixture.orchestrator.report_result("task-999", true, None).await;

        assert!(!accepted);
        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.in_flight.len(), 1);
        assert!(snapshot.matched.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_result_is_ignored() {
        let fixture = Fixture::new(&["w1"], &["A", "B"], OrchestratorSettings::default()).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        fixture.orchestrator.tick().await;
        let remote = remote_id(&fixture.workers[0], "A");

        assert!(fixture.orchestrator.report_result(&remote, false, None).await);
        assert!(!fixture.orchestrator.report_result(&remote, true, None).await);

        let snapshot = fixture.orchestrator.status(&id).await.unwrap();
        assert_eq!(snapshot.cleared_no_match, vec!["A"]);
        assert!(snapshot.matched.is_empty());
    }

    #[tokio::test]
    async fn test_lower_priority_value_is_dispatched_first() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;
        let routine = fixture.photo("routine.jpg");
        let urgent = fixture.photo("urgent.jpg");

        fixture.orchestrator.submit(&routine, 5).await.unwrap();
        fixture.orchestrator.submit(&urgent, 1).await.unwrap();
        fixture.orchestrator.tick().await;

        let created = fixture.workers[0].created_tasks();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].0, "probe-urgent.jpg");
        assert_eq!(created[1].0, "probe-routine.jpg");
    }

    #[tokio::test]
    async fn test_status_of_unknown_task() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;

        let result = fixture.orchestrator.status(&SearchTaskId::from("missing")).await;

        assert!(matches!(result, Err(CoordinatorError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_scheduler_loop_completes_tasks() {
        let settings = OrchestratorSettings {
            tick_interval: Duration::from_millis(5),
            ..OrchestratorSettings::default()
        };
        let fixture = Fixture::new(&["w1"], &["A"], settings).await;
        let photo = fixture.photo("face.jpg");
        let id = fixture.orchestrator.submit(&photo, 0).await.unwrap();
        let handle = fixture.orchestrator.clone().start();

        let mut remote = None;
        for _ in 0..100 {
            if let Some((_, _, task_id)) = fixture.workers[0].created_tasks().into_iter().next() {
                remote = Some(task_id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fixture.orchestrator.report_result(&remote.unwrap(), true, None).await);

        for _ in 0..100 {
            if !fixture.orchestrator.is_active(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(fixture.orchestrator.status(&id).await.unwrap().is_complete());
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_task_result_handler_rejects_bad_callbacks() {
        let fixture = Fixture::new(&["w1"], &["A"], OrchestratorSettings::default()).await;

        let (missing, _) = handle_task_result(
            Extension(fixture.orchestrator.clone()),
            Query(TaskResultParams {
                task_id: None,
                found: Some("1".to_string()),
                face_id: None,
            }),
        )
        .await;
        let (unknown, body) = handle_task_result(
            Extension(fixture.orchestrator.clone()),
            Query(TaskResultParams {
                task_id: Some("task-404".to_string()),
                found: Some("0".to_string()),
                face_id: None,
            }),
        )
        .await;

        assert_eq!(missing, StatusCode::BAD_REQUEST);
        assert_eq!(unknown, StatusCode::BAD_REQUEST);
        assert!(!body.accepted);
    }
}
