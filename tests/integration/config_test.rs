use tempfile::TempDir;
use whybusy::core::config::MonitorConfig;
use whybusy::MonitorError;

#[test]
fn test_config_default_is_valid() {
    let config = MonitorConfig::default();
    assert_eq!(config.update_interval_ms, 2000);
    assert_eq!(config.idle_poll_ms, 2000);
    assert!(config.collect_gpu);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_errors() {
    let config = MonitorConfig {
        top_processes: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

    let config = MonitorConfig {
        probe_timeout_ms: 0,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("probe_timeout_ms"));
}

#[test]
fn test_config_empty_file_returns_default() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "  \n").unwrap();

    let config = MonitorConfig::load_from(&path).unwrap();
    assert_eq!(config, MonitorConfig::default());
}

#[test]
fn test_config_disable_gpu_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("whybusy").join("config.json");

    let config = MonitorConfig {
        update_interval_ms: 750,
        collect_gpu: false,
        ..Default::default()
    };
    config.save_to(&path).unwrap();

    let loaded = MonitorConfig::load_from(&path).unwrap();
    assert!(!loaded.collect_gpu);
    assert_eq!(loaded.update_interval_ms, 750);
}

#[test]
fn test_config_malformed_json_has_context() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = MonitorConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}
