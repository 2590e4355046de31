use std::collections::HashMap;
use std::path::{Path, PathBuf};

use patron_merge_config::shared::{AuthMode, JobConfig, ValidationError};
use patron_merge_config::{Environment, LoadConfigError, load_config_from};
use secrecy::ExposeSecret;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/configuration")
}

fn missing_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/does-not-exist")
}

fn required_variables() -> HashMap<String, String> {
    HashMap::from([
        ("REDSHIFT_DB_HOST".to_string(), "host-ciphertext".to_string()),
        ("REDSHIFT_DB_NAME".to_string(), "dev".to_string()),
        ("REDSHIFT_DB_USER".to_string(), "user-ciphertext".to_string()),
        ("REDSHIFT_DB_PASSWORD".to_string(), "0123".to_string()),
        ("STAGING_TABLE".to_string(), "test_staging_table".to_string()),
        ("MAIN_TABLE".to_string(), "test_main_table".to_string()),
    ])
}

#[test]
fn environment_alone_is_enough() {
    let config: JobConfig =
        load_config_from(&missing_dir(), Environment::Dev, Some(required_variables())).unwrap();

    assert_eq!(config.redshift_db_host, "host-ciphertext");
    assert_eq!(config.redshift_db_name, "dev");
    assert_eq!(config.redshift_db_port, 5439);
    assert_eq!(config.redshift_auth_mode, AuthMode::EncryptedPassword);
    assert_eq!(config.aws_region, JobConfig::DEFAULT_AWS_REGION);
    assert!(!config.require_unique_patron_ids);
    assert!(config.allowed_tables.is_empty());
    // Numeric-looking secrets must survive untouched.
    assert_eq!(
        config.redshift_db_password.as_ref().unwrap().expose_secret(),
        "0123"
    );
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn environment_values_are_parsed_into_typed_fields() {
    let mut variables = required_variables();
    variables.insert("REDSHIFT_DB_PORT".to_string(), "6000".to_string());
    variables.insert("REDSHIFT_AUTH_MODE".to_string(), "iam".to_string());
    variables.insert("REDSHIFT_CLUSTER".to_string(), "patron-cluster".to_string());
    variables.insert("REQUIRE_UNIQUE_PATRON_IDS".to_string(), "true".to_string());
    variables.insert(
        "ALLOWED_TABLES".to_string(),
        "test_staging_table, test_main_table".to_string(),
    );
    variables.insert("AWS_REGION".to_string(), "eu-west-1".to_string());

    let config: JobConfig =
        load_config_from(&missing_dir(), Environment::Dev, Some(variables)).unwrap();

    assert_eq!(config.redshift_db_port, 6000);
    assert_eq!(config.redshift_auth_mode, AuthMode::Iam);
    assert_eq!(config.redshift_cluster.as_deref(), Some("patron-cluster"));
    assert!(config.require_unique_patron_ids);
    assert_eq!(
        config.allowed_tables,
        vec!["test_staging_table".to_string(), "test_main_table".to_string()]
    );
    assert_eq!(config.aws_region, "eu-west-1");

    let tables = config.merge_tables().unwrap();
    assert!(tables.require_unique_patron_ids);
}

#[test]
fn files_are_layered_under_the_environment() {
    let mut variables = required_variables();
    variables.remove("STAGING_TABLE");
    variables.remove("MAIN_TABLE");
    variables.insert("REDSHIFT_DB_PORT".to_string(), "5441".to_string());

    let dev: JobConfig =
        load_config_from(&fixtures_dir(), Environment::Dev, Some(variables.clone())).unwrap();
    assert_eq!(dev.redshift_db_port, 5441);
    assert_eq!(dev.redshift_auth_mode, AuthMode::Password);
    assert_eq!(dev.redshift_statement_timeout_ms, 600_000);
    assert_eq!(dev.staging_table, "patron_info_staging");
    assert_eq!(dev.allowed_tables.len(), 2);
    assert!(!dev.require_unique_patron_ids);
    assert_eq!(dev.validate(), Ok(()));

    let prod: JobConfig =
        load_config_from(&fixtures_dir(), Environment::Prod, Some(variables)).unwrap();
    assert!(prod.require_unique_patron_ids);
}

#[test]
fn missing_required_key_fails_deserialization() {
    let mut variables = required_variables();
    variables.remove("STAGING_TABLE");

    let err = load_config_from::<JobConfig>(&missing_dir(), Environment::Dev, Some(variables))
        .unwrap_err();

    assert!(matches!(err, LoadConfigError::Deserialization(_)));
    assert!(err.to_string().contains("staging_table"));
}

#[test]
fn loaded_table_names_are_validated() {
    let mut variables = required_variables();
    variables.insert(
        "MAIN_TABLE".to_string(),
        "main; delete from patrons".to_string(),
    );

    let config: JobConfig =
        load_config_from(&missing_dir(), Environment::Dev, Some(variables)).unwrap();

    assert!(matches!(
        config.validate(),
        Err(ValidationError::InvalidTableName { .. })
    ));
}
