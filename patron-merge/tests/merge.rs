#![cfg(feature = "test-utils")]

use patron_merge::credentials::CredentialResolver;
use patron_merge::error::ErrorKind;
use patron_merge::job::{MergeJob, MergeJobConfig, MergeReport};
use patron_merge::queries::insert_staging_row_statement;
use patron_merge::response::SUCCESS_MESSAGE;
use patron_merge::session::{RedshiftSessionFactory, SessionFactory, WarehouseSession};
use patron_merge::test_utils::credentials::{FakeDecrypter, FakeIssuer};
use patron_merge::test_utils::database::{TestDatabase, spawn_test_database};
use patron_merge_config::shared::{MergeTablesConfig, TableName};
use patron_merge_telemetry::tracing::init_test_tracing;

const STAGING_TABLE: &str = "patron_info_staging";
const MAIN_TABLE: &str = "patron_info";

const PATRON_COLUMNS: &str = "patron_id varchar(16) NOT NULL, address varchar(64), visits integer, score double precision, active boolean";

/// Creates staging and main with the same layout. Main rejects the address `bad`.
async fn create_patron_tables(database: &TestDatabase) {
    database
        .execute(&format!(
            "CREATE TABLE {STAGING_TABLE} ({PATRON_COLUMNS});
             CREATE TABLE {MAIN_TABLE} ({PATRON_COLUMNS}, CONSTRAINT address_not_bad CHECK (address <> 'bad'));"
        ))
        .await;
}

fn merge_job(
    database: &TestDatabase,
    require_unique_patron_ids: bool,
) -> MergeJob<FakeDecrypter, FakeIssuer, RedshiftSessionFactory> {
    MergeJob::new(
        CredentialResolver::new(FakeDecrypter::new(), FakeIssuer::new()),
        RedshiftSessionFactory::new(database.connection_config()),
        MergeJobConfig {
            auth: database.auth_config(),
            database: database.name.clone(),
            tables: MergeTablesConfig {
                staging: TableName::parse(STAGING_TABLE).unwrap(),
                main: TableName::parse(MAIN_TABLE).unwrap(),
                require_unique_patron_ids,
            },
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_collapses_identical_duplicates_and_replaces_main_rows() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES
                ('p1', 'addr1', 5, 0.1, true),
                ('p1', 'addr1', 5, 0.1, true),
                ('p2', 'addr2', NULL, NULL, false),
                ('p2', 'addr2', NULL, NULL, false),
                ('p2', 'addr2', NULL, NULL, false),
                ('p3', NULL, 7, 2.5, NULL);
             INSERT INTO {MAIN_TABLE} VALUES
                ('p1', 'old', 1, NULL, false),
                ('p9', 'keep', NULL, NULL, NULL);"
        ))
        .await;

    let report = merge_job(&database, false).run().await.unwrap();

    assert_eq!(
        report,
        MergeReport {
            duplicate_groups: 2,
            integrity_checked: false,
        }
    );
    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec![
            "(p1,addr1,5,0.1,t)",
            "(p2,addr2,,,f)",
            "(p3,,7,2.5,)",
            "(p9,keep,,,)",
        ]
    );
    assert!(database.table_rows(STAGING_TABLE).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_reports_success_after_merging() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES ('p1', 'addr1', 1, NULL, true);"
        ))
        .await;

    let response = merge_job(&database, false)
        .handle(serde_json::json!({ "source": "aws.events" }))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.body.contains(SUCCESS_MESSAGE));
    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec!["(p1,addr1,1,,t)"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn float_values_survive_duplicate_collapse() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES
                ('p4', NULL, NULL, 0.1::float8 + 0.2::float8, NULL),
                ('p4', NULL, NULL, 0.1::float8 + 0.2::float8, NULL);"
        ))
        .await;

    merge_job(&database, false).run().await.unwrap();

    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec!["(p4,,,0.30000000000000004,)"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicting_duplicates_leave_both_tables_untouched() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES
                ('p1', 'addr1', 5, NULL, true),
                ('p1', 'addr2', 5, NULL, true);
             INSERT INTO {MAIN_TABLE} VALUES ('p1', 'old', 1, NULL, false);"
        ))
        .await;

    let err = merge_job(&database, false).run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ReconciliationConflict);
    assert_eq!(
        database.table_rows(STAGING_TABLE).await,
        vec!["(p1,addr1,5,,t)", "(p1,addr2,5,,t)"]
    );
    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec!["(p1,old,1,,f)"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_rolls_back_and_reports_the_server_message() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES ('p1', 'bad', 2, NULL, true);
             INSERT INTO {MAIN_TABLE} VALUES ('p1', 'old', 1, NULL, false);"
        ))
        .await;

    let err = merge_job(&database, false).run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    let detail = err.detail().unwrap();
    assert!(detail.starts_with("statement 2 of 3: "), "{detail}");
    assert!(detail.contains("23514"), "{detail}");
    assert!(detail.contains("violates check constraint"), "{detail}");
    assert!(detail.contains("constraint: address_not_bad"), "{detail}");

    // The delete of the replaced main row was rolled back together with the failed insert.
    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec!["(p1,old,1,,f)"]
    );
    assert_eq!(
        database.table_rows(STAGING_TABLE).await,
        vec!["(p1,bad,2,,t)"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn strict_mode_rejects_duplicates_without_mutating() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES
                ('p1', 'addr1', 5, NULL, true),
                ('p1', 'addr1', 5, NULL, true),
                ('p2', NULL, NULL, NULL, NULL);"
        ))
        .await;

    let err = merge_job(&database, true).run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailed);
    assert_eq!(err.detail(), Some("3 rows but 2 distinct patron ids"));
    assert_eq!(database.table_rows(STAGING_TABLE).await.len(), 3);
    assert!(database.table_rows(MAIN_TABLE).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn session_round_trips_text_values_through_parameters() {
    init_test_tracing();

    let database = spawn_test_database().await;
    create_patron_tables(&database).await;
    database
        .execute(&format!(
            "INSERT INTO {STAGING_TABLE} VALUES ('p1', '', -3, 1e-7, false);"
        ))
        .await;

    let session = RedshiftSessionFactory::new(database.connection_config())
        .open(database.credentials())
        .await
        .unwrap();

    let rows = session
        .fetch_rows(&format!("SELECT * FROM {STAGING_TABLE};"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    // An empty address is a value, not NULL.
    assert_eq!(rows[0].get(1), Some(Some("")));

    let main = TableName::parse(MAIN_TABLE).unwrap();
    session
        .execute_transaction(&[insert_staging_row_statement(&main, &rows[0])])
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        database.table_rows(STAGING_TABLE).await
    );
    assert_eq!(
        database.table_rows(MAIN_TABLE).await,
        vec![r#"(p1,"",-3,1e-07,f)"#]
    );
}
