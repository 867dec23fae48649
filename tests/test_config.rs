use std::path::{Path, PathBuf};

use benchstate::cli::{BenchConfig, CONFIG_FILE};

fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join(CONFIG_FILE);
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn relative_paths_resolve_against_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
host: "127.0.0.1"
port: 8080
store_dir: runs
plan: plans/psu.yaml
subscriber_capacity: 32
"#,
    );

    let cfg = BenchConfig::load(Some(&path)).unwrap();

    assert_eq!(cfg.host.as_deref(), Some("127.0.0.1"));
    assert_eq!(cfg.port, Some(8080));
    assert_eq!(cfg.store_dir, Some(dir.path().join("runs")));
    assert_eq!(cfg.plan, Some(dir.path().join("plans/psu.yaml")));
    assert_eq!(cfg.subscriber_capacity, Some(32));
}

#[test]
fn absolute_paths_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "store_dir: /var/lib/benchstate\n");

    let cfg = BenchConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.store_dir, Some(PathBuf::from("/var/lib/benchstate")));
    assert!(cfg.plan.is_none());
}

#[test]
fn zero_subscriber_capacity_is_rejected() {
    let err = BenchConfig::from_yaml_str("subscriber_capacity: 0").unwrap_err();
    assert!(err.to_string().contains("subscriber_capacity must be at least 1"));

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "subscriber_capacity: 0\n");
    let err = BenchConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Invalid config file"));
    assert!(format!("{:#}", err).contains("subscriber_capacity must be at least 1"));
}

#[test]
fn zero_port_and_blank_host_are_rejected() {
    assert!(BenchConfig::from_yaml_str("port: 0").is_err());
    assert!(BenchConfig::from_yaml_str("host: '  '").is_err());
}

#[test]
fn unknown_keys_are_rejected() {
    let err = BenchConfig::from_yaml_str("subscriber_capactiy: 8").unwrap_err();
    assert!(err.to_string().contains("subscriber_capactiy"));
}

#[test]
fn plan_flag_overrides_configured_plan() {
    let cfg = BenchConfig::from_yaml_str("plan: bench.yaml").unwrap();

    assert_eq!(cfg.plan_path(None).unwrap(), PathBuf::from("bench.yaml"));
    assert_eq!(
        cfg.plan_path(Some(PathBuf::from("other.yaml"))).unwrap(),
        PathBuf::from("other.yaml")
    );

    let err = BenchConfig::default().plan_path(None).unwrap_err();
    assert!(err.to_string().contains("No plan given"));
}

#[test]
fn missing_explicit_path_returns_error() {
    let err = BenchConfig::load(Some(Path::new("/nonexistent/benchstate.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn invalid_yaml_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "port: [not a number");

    let err = BenchConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Invalid config file"));
}
