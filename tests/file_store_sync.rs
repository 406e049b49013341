use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tempfile::tempdir;

use tabsync::store::GridState;
use tabsync::{
    FileGridStore, LockConfig, LockKey, Record, RetryExecutor, SyncConfig, SyncError,
    Synchronizer, TabularStore, WriteMode,
};

fn batch(values: Vec<Value>) -> Vec<Record> {
    values
        .into_iter()
        .map(|value| value.as_object().cloned().unwrap())
        .collect()
}

fn synchronizer(lock_dir: &Path, mode: WriteMode) -> Synchronizer {
    let config = SyncConfig {
        mode,
        lock: LockConfig {
            dir: lock_dir.to_path_buf(),
            ..LockConfig::default()
        },
        ..SyncConfig::default()
    };
    let retry = RetryExecutor::new(config.retry).with_sleeper(|_| {});
    Synchronizer::new(config).unwrap().with_retry(retry)
}

#[test]
fn daily_batches_replace_their_own_partition() {
    let dir = tempdir().unwrap();
    let store = FileGridStore::open(dir.path().join("store.json")).unwrap();
    let locks = dir.path().join("locks");

    let first = synchronizer(&locks, WriteMode::FullRefresh)
        .run(
            &store,
            &batch(vec![
                json!({"date": "2024-01-01", "clicks": 10}),
                json!({"date": "2024-01-02", "clicks": 12}),
            ]),
        )
        .unwrap();
    assert_eq!(first.total_records, 2);
    assert_eq!(first.new_columns, vec!["date", "clicks"]);

    let incremental = synchronizer(&locks, WriteMode::Incremental);
    let second = incremental
        .run(
            &store,
            &batch(vec![
                json!({"date": "2024-01-02T08:00:00", "clicks": 20, "country": "NZ"}),
                json!({"date": "Jan 3, 2024", "clicks": 30, "country": "AU"}),
            ]),
        )
        .unwrap();
    assert_eq!(second.deleted_records, 1);
    assert_eq!(second.new_records, 2);
    assert_eq!(second.updated_records, 0);
    assert_eq!(second.total_records, 3);
    assert_eq!(second.new_columns, vec!["country"]);

    let reopened = FileGridStore::open(store.path()).unwrap();
    assert_eq!(
        reopened.read_snapshot().unwrap(),
        vec![
            vec!["date", "clicks", "country"],
            vec!["2024-01-01", "10"],
            vec!["2024-01-02", "20", "NZ"],
            vec!["2024-01-03", "30", "AU"],
        ]
        .into_iter()
        .map(|row| row.into_iter().map(String::from).collect::<Vec<_>>())
        .collect::<Vec<_>>()
    );

    let replay = incremental
        .run(
            &store,
            &batch(vec![json!({"date": "2024-01-03", "clicks": 31, "country": "AU"})]),
        )
        .unwrap();
    assert_eq!(replay.deleted_records, 1);
    assert_eq!(replay.total_records, 3);
    assert!(!locks.join(LockKey::for_target(&SyncConfig::default().target).file_name()).exists());
}

#[test]
fn undated_batches_append_without_deleting() {
    let dir = tempdir().unwrap();
    let store = FileGridStore::open(dir.path().join("store.json")).unwrap();
    let sync = synchronizer(&dir.path().join("locks"), WriteMode::Incremental);

    sync.run(&store, &batch(vec![json!({"name": "a"})])).unwrap();
    let stats = sync.run(&store, &batch(vec![json!({"name": "a"})])).unwrap();
    assert_eq!(stats.deleted_records, 0);
    assert_eq!(stats.total_records, 2);
}

#[test]
fn empty_full_refresh_leaves_a_status_message() {
    let dir = tempdir().unwrap();
    let store = FileGridStore::open(dir.path().join("store.json")).unwrap();
    let locks = dir.path().join("locks");
    synchronizer(&locks, WriteMode::FullRefresh)
        .run(&store, &batch(vec![json!({"date": "2024-01-01"})]))
        .unwrap();
    synchronizer(&locks, WriteMode::FullRefresh)
        .run(&store, &[])
        .unwrap();

    let state: GridState = store.load().unwrap();
    assert!(state.rows.is_empty());
    assert!(state.message.is_some());
}

#[test]
fn contention_is_reported_with_holder() {
    let dir = tempdir().unwrap();
    let locks = dir.path().join("locks");
    let store = FileGridStore::open(dir.path().join("store.json")).unwrap();
    let first = synchronizer(&locks, WriteMode::Incremental);
    let key = LockKey::for_target(&first.config().target);
    let _held = first.locks().acquire(&key).unwrap();

    let err = synchronizer(&locks, WriteMode::Incremental)
        .run(&store, &batch(vec![json!({"date": "2024-01-01"})]))
        .unwrap_err();
    match err {
        SyncError::LockContention { holder, .. } => {
            assert_eq!(holder, first.config().lock.holder)
        }
        other => panic!("expected contention, got {other}"),
    }
    assert!(!store.path().exists());
}

#[test]
fn cli_syncs_a_batch_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("batch.json");
    fs::write(
        &input,
        r#"[{"day": "2024-05-01", "visits": 3}, {"day": "2024-05-02", "visits": 4}]"#,
    )
    .unwrap();
    let store_path = dir.path().join("out/store.json");
    let args = |extra: &[&str]| -> Vec<String> {
        let mut args = vec![
            "sync".to_string(),
            input.display().to_string(),
            "--store-path".to_string(),
            store_path.display().to_string(),
            "--lock-dir".to_string(),
            dir.path().join("locks").display().to_string(),
        ];
        args.extend(extra.iter().map(|arg| arg.to_string()));
        args
    };

    let dry = tabsync::cli::execute(args(&["--dry-run"]).into_iter())
        .unwrap()
        .unwrap();
    assert!(dry.dry_run);
    assert!(!store_path.exists());

    let stats = tabsync::cli::execute(args(&[]).into_iter()).unwrap().unwrap();
    assert_eq!(stats.total_records, 2);
    let again = tabsync::cli::execute(args(&[]).into_iter()).unwrap().unwrap();
    assert_eq!(again.deleted_records, 2);
    assert_eq!(again.total_records, 2);

    let state = FileGridStore::open(&store_path).unwrap().load().unwrap();
    assert_eq!(state.rows.len(), 3);
    assert!(state.date_columns.contains(&0));
}
