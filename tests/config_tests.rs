use reactor_http_server::config::{ServerConfig, TriggerMode};
use std::time::Duration;

fn valid_config() -> (tempfile::TempDir, ServerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new()
        .with_address("127.0.0.1", 9090)
        .with_worker_threads(2)
        .with_doc_root(dir.path());
    (dir, config)
}

#[test]
fn test_default_config() {
    let config = ServerConfig::default();
    assert_eq!(config.socket_address(), "127.0.0.1:8080");
    assert_eq!(config.trigger_mode, TriggerMode::EtEt);
    assert_eq!(config.connection_timeout, Duration::from_secs(60));
    assert!(config.worker_threads > 0);
    assert!(config.task_queue_capacity.is_none());
    assert!(!config.opt_linger);
}

#[test]
fn test_trigger_mode_selector() {
    let expected = [
        (TriggerMode::LtLt, false, false),
        (TriggerMode::LtEt, false, true),
        (TriggerMode::EtLt, true, false),
        (TriggerMode::EtEt, true, true),
    ];
    for (selector, (mode, listen, conn)) in expected.into_iter().enumerate() {
        let parsed = TriggerMode::from_selector(selector as u8).unwrap();
        assert_eq!(parsed, mode);
        assert_eq!(parsed.listen_edge_triggered(), listen);
        assert_eq!(parsed.conn_edge_triggered(), conn);
    }
    assert!(TriggerMode::from_selector(4).is_err());
}

#[test]
fn test_validate() {
    let (_dir, config) = valid_config();
    assert!(config.validate().is_ok());

    assert!(config.clone().with_address("127.0.0.1", 80).validate().is_err());
    assert!(config.clone().with_worker_threads(0).validate().is_err());
    assert!(config.clone().with_max_connections(0).validate().is_err());
    assert!(config
        .clone()
        .with_doc_root("/definitely/not/here")
        .validate()
        .is_err());

    let mut bounded = config.clone();
    bounded.task_queue_capacity = Some(0);
    assert!(bounded.validate().is_err());
}

#[test]
fn test_json_round_trip() {
    let (dir, config) = valid_config();
    let config = config
        .with_trigger_mode(TriggerMode::LtEt)
        .with_connection_timeout(Duration::from_millis(1500))
        .with_linger(true);

    let path = dir.path().join("server.json");
    config.save_to_json_file(&path).unwrap();
    let loaded = ServerConfig::from_json_file(&path).unwrap();

    assert_eq!(loaded.port, 9090);
    assert_eq!(loaded.trigger_mode, TriggerMode::LtEt);
    assert_eq!(loaded.connection_timeout, Duration::from_millis(1500));
    assert!(loaded.opt_linger);
    assert_eq!(loaded.doc_root, config.doc_root);
}

#[test]
fn test_invalid_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(ServerConfig::from_json_file(&path).is_err());
    assert!(ServerConfig::from_json_file(dir.path().join("missing.json")).is_err());
}
