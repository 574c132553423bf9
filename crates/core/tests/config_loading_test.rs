use std::io::Write;

use fleet_core::AppConfig;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_file_environment_layering() {
    let file = write_config(
        r#"
        [distributor]
        default_strategy = "latency_based"
        max_concurrent_tasks = 16

        [orchestration]
        default_aggregation = "weighted"
        "#,
    );
    let path = file.path().to_str().unwrap().to_string();

    // 环境变量覆盖文件中的值，文件未设置的字段取默认值
    std::env::set_var("FLEET_DISTRIBUTOR__MAX_CONCURRENT_TASKS", "64");
    let config = AppConfig::load(Some(&path));
    std::env::remove_var("FLEET_DISTRIBUTOR__MAX_CONCURRENT_TASKS");
    let config = config.unwrap();

    assert_eq!(config.distributor.default_strategy, "latency_based");
    assert_eq!(config.distributor.max_concurrent_tasks, 64);
    assert_eq!(config.distributor.node_timeout_seconds, 300);
    assert_eq!(config.orchestration.default_aggregation, "weighted");
    assert_eq!(config.orchestration.max_concurrent_tasks, 100);
}

#[test]
fn test_invalid_file_values_fail_validation() {
    let file = write_config(
        r#"
        [orchestration]
        coordination_mode = "anarchic"
        "#,
    );
    let path = file.path().to_str().unwrap().to_string();

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(format!("{err:#}").contains("anarchic"));
}

#[test]
fn test_retry_policy_backoff_from_file() {
    let file = write_config(
        r#"
        [orchestration.retry_policy]
        max_retries = 2
        initial_delay_ms = 100
        max_delay_ms = 250
        backoff_factor = 2.0
        "#,
    );
    let path = file.path().to_str().unwrap().to_string();

    let config = AppConfig::load(Some(&path)).unwrap();
    let policy = config.orchestration.retry_policy.unwrap();
    assert!(policy.should_retry(1));
    assert!(!policy.should_retry(2));
    assert_eq!(policy.delay_for(0).as_millis(), 100);
    assert_eq!(policy.delay_for(1).as_millis(), 200);
    assert_eq!(policy.delay_for(5).as_millis(), 250);
}
