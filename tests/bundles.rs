//! Integration tests for bundles and bundle progress monitoring.

use std::time::Duration;

use astra::models::{NewDataProduct, NewTask, Status};
use astra::monitor::{BundleMonitor, BundleWatcher, MonitorError};
use astra::outputs::{OutputKind, OutputRecord};
use astra::storage::{CreateTablesOptions, Database, DatabaseError};
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("astra.db").display());
    let db = Database::connect(&url).await.expect("Failed to connect");
    db.create_tables(CreateTablesOptions::default())
        .await
        .expect("Failed to create tables");
    (dir, db)
}

/// Creates a bundle holding `n` new tasks.
async fn bundle_with_tasks(db: &Database, n: usize) -> (i64, Vec<i64>) {
    let bundle = db
        .create_bundle(Some(json!({"pipeline": "classify"})))
        .await
        .unwrap();
    let mut task_ids = Vec::with_capacity(n);
    for _ in 0..n {
        task_ids.push(db.create_task(&NewTask::new("classify")).await.unwrap().id);
    }
    db.add_tasks_to_bundle(bundle.id, &task_ids).await.unwrap();
    (bundle.id, task_ids)
}

fn classification() -> OutputRecord {
    OutputRecord::new(OutputKind::ClassifySource)
        .set("p_yso", 0.9)
        .set("lp_yso", -0.105)
}

#[tokio::test]
async fn test_create_and_get_bundle() {
    let (_dir, db) = setup().await;
    let bundle = db
        .create_bundle(Some(json!({"description": "nightly"})))
        .await
        .unwrap();
    assert_eq!(bundle.status, Status::Created);
    assert_eq!(bundle.meta, Some(json!({"description": "nightly"})));

    db.update_bundle_status(bundle.id, Status::Submitted)
        .await
        .unwrap();
    let fetched = db.get_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, Status::Submitted);

    let err = db
        .update_bundle_status(bundle.id + 1, Status::Running)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

#[tokio::test]
async fn test_bundle_tasks_and_membership() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 3).await;

    let tasks = db.bundle_tasks(bundle_id).await.unwrap();
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), task_ids);
    assert_eq!(db.count_tasks(bundle_id).await.unwrap(), 3);

    let bundles = db.task_bundles(task_ids[0]).await.unwrap();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].id, bundle_id);

    let updated = db
        .update_bundle_task_statuses(bundle_id, Status::Submitted)
        .await
        .unwrap();
    assert_eq!(updated, 3);
    let tasks = db.bundle_tasks(bundle_id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == Status::Submitted));
}

#[tokio::test]
async fn test_adding_a_task_twice_keeps_one_membership() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 1).await;

    let added = db
        .add_tasks_to_bundle(bundle_id, &[task_ids[0], task_ids[0]])
        .await
        .unwrap();
    assert_eq!(added, 0);
    assert_eq!(db.count_tasks(bundle_id).await.unwrap(), 1);
    assert_eq!(db.bundle_tasks(bundle_id).await.unwrap().len(), 1);

    db.create_output(task_ids[0], &classification()).await.unwrap();
    let progress = BundleWatcher::new(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5))
        .watch(&db, bundle_id)
        .await
        .unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.total, 1);
}

#[tokio::test]
async fn test_count_tasks_with_outputs_counts_distinct_tasks() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 3).await;
    assert_eq!(db.count_tasks_with_outputs(bundle_id).await.unwrap(), 0);

    // Several outputs for one task still count once.
    for _ in 0..3 {
        db.create_output(task_ids[0], &classification()).await.unwrap();
    }
    assert_eq!(db.count_tasks_with_outputs(bundle_id).await.unwrap(), 1);

    db.create_output(task_ids[2], &classification()).await.unwrap();
    assert_eq!(db.count_tasks_with_outputs(bundle_id).await.unwrap(), 2);

    // Outputs of tasks outside the bundle do not count.
    let outsider = db.create_task(&NewTask::new("classify")).await.unwrap();
    db.create_output(outsider.id, &classification()).await.unwrap();
    assert_eq!(db.count_tasks_with_outputs(bundle_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_count_input_data_products() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 2).await;

    assert_eq!(db.count_input_data_products(bundle_id).await.unwrap(), 0);
    assert_eq!(db.count_input_data_products_size(bundle_id).await.unwrap(), None);

    let (sized, _) = db
        .get_or_create_data_product(
            &NewDataProduct::new("apStar", json!({"obj": "A"})).with_size(100),
        )
        .await
        .unwrap();
    let (unsized_dp, _) = db
        .get_or_create_data_product(&NewDataProduct::new("apStar", json!({"obj": "B"})))
        .await
        .unwrap();

    db.add_task_input_data_products(task_ids[0], &[sized.id, unsized_dp.id])
        .await
        .unwrap();
    db.add_task_input_data_products(task_ids[1], &[sized.id])
        .await
        .unwrap();

    // Shared inputs are counted once per task.
    assert_eq!(db.count_input_data_products(bundle_id).await.unwrap(), 3);
    assert_eq!(
        db.count_input_data_products_size(bundle_id).await.unwrap(),
        Some(200)
    );
}

#[tokio::test]
async fn test_delete_bundle_keeps_tasks() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 2).await;

    db.delete_bundle(bundle_id).await.unwrap();

    assert!(db.get_bundle(bundle_id).await.unwrap().is_none());
    assert_eq!(db.count_tasks(bundle_id).await.unwrap(), 0);
    for task_id in task_ids {
        assert!(db.get_task(task_id).await.unwrap().is_some());
        assert!(db.task_bundles(task_id).await.unwrap().is_empty());
    }

    let err = db.delete_bundle(bundle_id).await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

#[tokio::test]
async fn test_watch_returns_when_all_tasks_have_outputs() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 2).await;

    let writer_db = db.clone();
    let writer = tokio::spawn(async move {
        for task_id in task_ids {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer_db
                .create_output(task_id, &classification())
                .await
                .unwrap();
        }
    });

    let mut reports = Vec::new();
    let progress = BundleWatcher::new(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(10))
        .watch_with(&db, bundle_id, |p| reports.push(p.completed))
        .await
        .unwrap();
    writer.await.unwrap();

    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 2);
    assert!(progress.is_complete());
    assert_eq!(reports.first(), Some(&0));
    assert_eq!(reports.last(), Some(&2));
    assert!(reports.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_watch_complete_bundle_returns_immediately() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 1).await;
    db.create_output(task_ids[0], &classification()).await.unwrap();

    let mut calls = 0;
    let progress = BundleWatcher::new(Duration::from_secs(60))
        .watch_with(&db, bundle_id, |_| calls += 1)
        .await
        .unwrap();
    assert_eq!(calls, 1);
    assert_eq!(progress.fraction(), 1.0);

    // An empty bundle is trivially complete.
    let empty = db.create_bundle(None).await.unwrap();
    let progress = BundleWatcher::new(Duration::from_secs(60))
        .watch(&db, empty.id)
        .await
        .unwrap();
    assert_eq!(progress.total, 0);
}

#[tokio::test]
async fn test_watch_times_out() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 2).await;
    db.create_output(task_ids[0], &classification()).await.unwrap();

    let err = BundleWatcher::new(Duration::from_millis(10))
        .with_timeout(Duration::from_millis(60))
        .watch(&db, bundle_id)
        .await
        .unwrap_err();
    match err {
        MonitorError::TimedOut { completed, total } => {
            assert_eq!(completed, 1);
            assert_eq!(total, 2);
        }
        other => panic!("Expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bundle_monitor_publishes_progress() {
    let (_dir, db) = setup().await;
    let (bundle_id, task_ids) = bundle_with_tasks(&db, 2).await;

    let monitor = BundleMonitor::spawn(
        db.clone(),
        bundle_id,
        BundleWatcher::new(Duration::from_millis(10)).with_timeout(Duration::from_secs(10)),
    );
    let mut updates = monitor.subscribe();

    for task_id in &task_ids {
        db.create_output(*task_id, &classification()).await.unwrap();
    }

    let progress = monitor.wait().await.unwrap();
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.total, 2);

    let last = updates.borrow_and_update().clone();
    assert_eq!(last.bundle_id, bundle_id);
    assert_eq!(last.completed, 2);
}

#[tokio::test]
async fn test_bundle_monitor_stop() {
    let (_dir, db) = setup().await;
    let (bundle_id, _) = bundle_with_tasks(&db, 1).await;

    let monitor = BundleMonitor::spawn(db, bundle_id, BundleWatcher::new(Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(monitor.progress().total, 1);

    let progress = monitor.stop().await.unwrap();
    assert_eq!(progress.completed, 0);
    assert!(!progress.is_complete());
}
