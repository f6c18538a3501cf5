use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use resto_backoffice::attendance::AttendanceSettings;
use resto_backoffice::capture::{CaptureDir, ExportFetcher};
use resto_backoffice::db;
use resto_backoffice::ingest::{
    run_attendance_job, run_scheduled_cycle, IngestOutcome, JobSettings, ATTENDANCE_JOB,
};

const EXPORT: &str = "\
1\talice\t2024-01-05\t13:32:00\t1\t0
1\talice\t2024-01-05\t09:00:00\t1\t0
2\tBob\t2024-01-05\t08:45:10\t1\t0
1\talice\t2024-01-05\t18:05:00\t1\t0
garbage line
1\talice\t2024-01-05\t12:15:00\t1\t0
3\tghost\t2024-01-05\t10:00:00\t1\t0
";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    db::insert_user(&pool, "alice@example.com", Some("Alice Nguyen"))
        .await
        .unwrap();
    db::insert_user(&pool, "bob@example.com", None).await.unwrap();
    pool
}

fn settings() -> JobSettings {
    JobSettings {
        attendance: AttendanceSettings {
            email_domain: "example.com".into(),
        },
        lease_ttl: chrono::Duration::seconds(600),
    }
}

fn target() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    target().and_hms_opt(h, m, s).unwrap()
}

fn completed(outcome: IngestOutcome) -> resto_backoffice::attendance::IngestReport {
    match outcome {
        IngestOutcome::Completed(report) => report,
        IngestOutcome::Skipped => panic!("ingest unexpectedly skipped"),
    }
}

#[tokio::test]
async fn folds_first_in_last_out_per_user() {
    let pool = setup_pool().await;
    let report = completed(
        run_attendance_job(&pool, &settings(), EXPORT, target())
            .await
            .unwrap(),
    );

    assert_eq!(report.parsed_events, 6);
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(report.inserted_records, 6);
    assert_eq!(report.timekeeping_created, 2);
    assert_eq!(report.timekeeping_updated, 0);
    assert_eq!(report.unresolved_names, vec!["ghost".to_string()]);
    assert_eq!(report.dedup_day, Some(target()));

    let alice = db::find_user_id_by_email(&pool, "alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    assert_eq!(rows.len(), 2);
    let alice_row = rows.iter().find(|r| r.user_id == alice).unwrap();
    assert_eq!(alice_row.check_in, at(9, 0, 0));
    assert_eq!(alice_row.check_out, at(18, 5, 0));

    // Bob scanned once, so his interval is a single instant.
    let bob_row = rows.iter().find(|r| r.user_id != alice).unwrap();
    assert_eq!(bob_row.check_in, at(8, 45, 10));
    assert_eq!(bob_row.check_out, at(8, 45, 10));
}

#[tokio::test]
async fn reprocessing_the_same_file_writes_nothing() {
    let pool = setup_pool().await;
    run_attendance_job(&pool, &settings(), EXPORT, target())
        .await
        .unwrap();
    let before = db::count_scanner_records(&pool, Some(target())).await.unwrap();

    let report = completed(
        run_attendance_job(&pool, &settings(), EXPORT, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 0);
    assert_eq!(report.folded_users, 0);
    assert_eq!(
        db::count_scanner_records(&pool, Some(target())).await.unwrap(),
        before
    );
    assert_eq!(db::list_timekeeping(&pool, target()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn later_scans_overwrite_the_interval() {
    let pool = setup_pool().await;
    run_attendance_job(&pool, &settings(), EXPORT, target())
        .await
        .unwrap();

    let extended = format!("{}1\talice\t2024-01-05\t19:30:00\t1\t0\n", EXPORT);
    let report = completed(
        run_attendance_job(&pool, &settings(), &extended, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 1);
    assert_eq!(report.timekeeping_created, 0);
    assert_eq!(report.timekeeping_updated, 1);

    let alice = db::find_user_id_by_email(&pool, "alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    let alice_row = rows.iter().find(|r| r.user_id == alice).unwrap();
    assert_eq!(alice_row.check_in, at(9, 0, 0));
    assert_eq!(alice_row.check_out, at(19, 30, 0));
}

#[tokio::test]
async fn unmatched_names_keep_scans_without_user() {
    let pool = setup_pool().await;
    run_attendance_job(&pool, &settings(), EXPORT, target())
        .await
        .unwrap();

    let orphaned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM finger_scanner_records WHERE display_name = 'ghost' AND user_id IS NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphaned, 1);

    let matched: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM finger_scanner_records WHERE display_name = 'Bob' AND user_id IS NOT NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(matched, 1);
}

#[tokio::test]
async fn empty_export_is_a_noop() {
    let pool = setup_pool().await;
    let report = completed(
        run_attendance_job(&pool, &settings(), "\n\nnot a scan\n", target())
            .await
            .unwrap(),
    );
    assert_eq!(report.parsed_events, 0);
    assert_eq!(report.dedup_day, None);
    assert_eq!(db::count_scanner_records(&pool, None).await.unwrap(), 0);
}

#[tokio::test]
async fn held_lease_skips_without_writing() {
    let pool = setup_pool().await;
    assert!(db::try_acquire_lease(
        &pool,
        ATTENDANCE_JOB,
        "other-run",
        Utc::now(),
        chrono::Duration::seconds(600),
    )
    .await
    .unwrap());

    let outcome = run_attendance_job(&pool, &settings(), EXPORT, target())
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Skipped);
    assert_eq!(db::count_scanner_records(&pool, None).await.unwrap(), 0);
    assert_eq!(
        db::lease_holder(&pool, ATTENDANCE_JOB).await.unwrap().as_deref(),
        Some("other-run")
    );

    assert!(db::release_lease(&pool, ATTENDANCE_JOB, "other-run")
        .await
        .unwrap());
    let outcome = run_attendance_job(&pool, &settings(), EXPORT, target())
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Completed(_)));
    assert_eq!(db::lease_holder(&pool, ATTENDANCE_JOB).await.unwrap(), None);
}

#[tokio::test]
async fn expired_lease_can_be_taken_over() {
    let pool = setup_pool().await;
    let ttl = chrono::Duration::seconds(60);
    let start = Utc::now();

    assert!(db::try_acquire_lease(&pool, ATTENDANCE_JOB, "crashed", start, ttl)
        .await
        .unwrap());
    assert!(!db::try_acquire_lease(&pool, ATTENDANCE_JOB, "next", start, ttl)
        .await
        .unwrap());

    let later = start + chrono::Duration::seconds(61);
    assert!(db::try_acquire_lease(&pool, ATTENDANCE_JOB, "next", later, ttl)
        .await
        .unwrap());
    // The old holder cannot release a lease it no longer owns.
    assert!(!db::release_lease(&pool, ATTENDANCE_JOB, "crashed")
        .await
        .unwrap());
}

struct StubFetcher(&'static str);

#[async_trait]
impl ExportFetcher for StubFetcher {
    async fn fetch(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }
}

#[tokio::test]
async fn scheduled_cycle_downloads_promotes_and_ingests() {
    let pool = setup_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let capture = CaptureDir::new(dir.path(), "attlog.dat", 5);
    let fetcher = StubFetcher(EXPORT);

    let outcome = run_scheduled_cycle(&pool, &settings(), &capture, Some(&fetcher), target())
        .await
        .unwrap()
        .expect("capture was waiting");
    let report = completed(outcome);
    assert_eq!(report.inserted_records, 6);

    assert!(!capture.raw_path().exists());
    assert!(dir.path().join("attlog-2024-01-05.dat").exists());

    // Without a fetcher and without a raw capture there is nothing to do.
    let outcome = run_scheduled_cycle(&pool, &settings(), &capture, None, target())
        .await
        .unwrap();
    assert!(outcome.is_none());
}

async fn setup_file_pool(dir: &tempfile::TempDir) -> sqlx::SqlitePool {
    let url = format!("sqlite://{}", dir.path().join("backoffice.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    for email in ["alice@example.com", "bob@example.com", "carol@example.com"] {
        db::insert_user(&pool, email, None).await.unwrap();
    }
    pool
}

#[tokio::test]
async fn ingest_runs_on_a_spawned_task() {
    let pool = setup_pool().await;
    let job = settings();
    let handle = tokio::spawn({
        let pool = pool.clone();
        async move { run_attendance_job(&pool, &job, EXPORT, target()).await }
    });
    let report = completed(handle.await.unwrap().unwrap());
    assert_eq!(report.inserted_records, 6);
}

#[tokio::test]
async fn name_variants_fold_into_one_account() {
    let pool = setup_pool().await;
    let export = "1\talice\t2024-01-05\t09:00:00\t1\t0\n1\tAlice\t2024-01-05\t18:05:00\t1\t0\n";

    let report = completed(
        run_attendance_job(&pool, &settings(), export, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 2);
    assert_eq!(report.timekeeping_created, 1);
    assert_eq!(report.folded_users, 1);

    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].check_in, at(9, 0, 0));
    assert_eq!(rows[0].check_out, at(18, 5, 0));
}

#[tokio::test]
async fn failed_interval_write_leaves_scans_for_the_next_run() {
    let pool = setup_pool().await;
    sqlx::query(
        "CREATE TRIGGER reject_timekeeping BEFORE INSERT ON timekeepings \
         BEGIN SELECT RAISE(ABORT, 'timekeeping writes disabled'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let err = run_attendance_job(&pool, &settings(), EXPORT, target()).await;
    assert!(err.is_err());
    // Only the unmatched name, which has no interval to write, kept its scan.
    assert_eq!(db::count_scanner_records(&pool, None).await.unwrap(), 1);
    assert!(db::list_timekeeping(&pool, target()).await.unwrap().is_empty());
    assert_eq!(db::lease_holder(&pool, ATTENDANCE_JOB).await.unwrap(), None);

    sqlx::query("DROP TRIGGER reject_timekeeping")
        .execute(&pool)
        .await
        .unwrap();
    let report = completed(
        run_attendance_job(&pool, &settings(), EXPORT, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 5);
    assert_eq!(report.timekeeping_created, 2);

    let alice = db::find_user_id_by_email(&pool, "alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    let alice_row = rows.iter().find(|r| r.user_id == alice).unwrap();
    assert_eq!(alice_row.check_in, at(9, 0, 0));
    assert_eq!(alice_row.check_out, at(18, 5, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_folds_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let pool = setup_file_pool(&dir).await;
    let export = "\
1\talice\t2024-01-05\t09:00:00\t1\t0
2\tAlice\t2024-01-05\t12:30:00\t1\t0
3\tALICE\t2024-01-05\t18:05:00\t1\t0
1\tbob\t2024-01-05\t08:15:00\t1\t0
2\tBob\t2024-01-05\t17:00:00\t1\t0
1\tcarol\t2024-01-05\t10:00:00\t1\t0
1\tcarol\t2024-01-05\t14:45:00\t1\t0
4\tghost\t2024-01-05\t11:00:00\t1\t0
4\tGhost\t2024-01-05\t11:05:00\t1\t0
";

    let report = completed(
        run_attendance_job(&pool, &settings(), export, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 9);
    assert_eq!(report.timekeeping_created, 3);
    assert_eq!(report.folded_users, 4);
    assert_eq!(
        report.unresolved_names,
        vec!["Ghost".to_string(), "ghost".to_string()]
    );

    let expected = [
        ("alice@example.com", at(9, 0, 0), at(18, 5, 0)),
        ("bob@example.com", at(8, 15, 0), at(17, 0, 0)),
        ("carol@example.com", at(10, 0, 0), at(14, 45, 0)),
    ];
    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    assert_eq!(rows.len(), 3);
    for (email, check_in, check_out) in expected {
        let user_id = db::find_user_id_by_email(&pool, email)
            .await
            .unwrap()
            .unwrap();
        let row = rows.iter().find(|r| r.user_id == user_id).unwrap();
        assert_eq!((row.check_in, row.check_out), (check_in, check_out), "{}", email);
    }

    // A later export adding one scan under a different spelling updates the
    // same row instead of colliding with it.
    let later = format!("{}5\taLiCe\t2024-01-05\t19:10:00\t1\t0\n", export);
    let report = completed(
        run_attendance_job(&pool, &settings(), &later, target())
            .await
            .unwrap(),
    );
    assert_eq!(report.inserted_records, 1);
    assert_eq!(report.timekeeping_created, 0);
    assert_eq!(report.timekeeping_updated, 1);
    let alice = db::find_user_id_by_email(&pool, "alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = db::list_timekeeping(&pool, target()).await.unwrap();
    let row = rows.iter().find(|r| r.user_id == alice).unwrap();
    assert_eq!((row.check_in, row.check_out), (at(9, 0, 0), at(19, 10, 0)));
    assert_eq!(db::count_scanner_records(&pool, Some(target())).await.unwrap(), 10);
}
