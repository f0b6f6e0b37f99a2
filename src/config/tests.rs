//! Config module tests

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("CS_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${CS_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("CS_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("CS_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${CS_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("CS_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${CS_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("CS_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("CS_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${CS_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("clustersync.toml");

    std::env::set_var("CS_TEST_DATA_DIR", "/srv/geoserver");

    let config_content = r#"
[node]
data_dir = "${CS_TEST_DATA_DIR}"
instance_name = "${CS_TEST_INSTANCE:-member-1}"

[broker]
enabled = true
bind = "127.0.0.1:61617"
connect_timeout = "2s"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.node.data_dir, PathBuf::from("/srv/geoserver"));
    assert_eq!(config.node.instance_name.as_deref(), Some("member-1"));
    assert!(config.broker.enabled);
    assert_eq!(config.broker.bind.port(), 61617);
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(2));

    std::env::remove_var("CS_TEST_DATA_DIR");
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.node.data_dir, PathBuf::from("data"));
    assert!(!config.broker.enabled);
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.node.inbound_capacity, 1024);
    assert!(config.node.instance_name.is_none());
    assert_eq!(config.broker.bind.port(), 61616);
    assert_eq!(config.broker.role().unwrap(), BrokerRole::Master);
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(5));
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("[log]\nlevel = \"debug\"\n").unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.node.data_dir, PathBuf::from("data"));
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "warn"

[node]
data_dir = "/var/lib/geoserver"
instance_name = "gs-1"
inbound_capacity = 64

[broker]
enabled = true
bind = "0.0.0.0:7000"
management_bind = "127.0.0.1:7001"
role = "slave"
connect_timeout = "750ms"
"#,
    )
    .unwrap();

    assert_eq!(config.node.instance_name.as_deref(), Some("gs-1"));
    assert_eq!(config.node.inbound_capacity, 64);
    assert_eq!(
        config.broker.management_bind,
        Some("127.0.0.1:7001".parse().unwrap())
    );
    assert_eq!(config.broker.role().unwrap(), BrokerRole::Slave);
    assert_eq!(config.broker.connect_timeout, Duration::from_millis(750));

    let broker = config.broker.broker_config("gs-1").unwrap();
    assert_eq!(broker.broker_id, "gs-1");
    assert_eq!(broker.bind.port(), 7000);
    assert_eq!(broker.role, BrokerRole::Slave);
}

#[test]
fn test_invalid_role() {
    let result = Config::parse("[broker]\nrole = \"observer\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_empty_instance_name() {
    let result = Config::parse("[node]\ninstance_name = \" \"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_zero_inbound_capacity() {
    let result = Config::parse("[node]\ninbound_capacity = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_management_bind_must_differ() {
    let result = Config::parse(
        "[broker]\nbind = \"127.0.0.1:7000\"\nmanagement_bind = \"127.0.0.1:7000\"\n",
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_malformed_toml() {
    let result = Config::parse("[node\ndata_dir = 1");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
