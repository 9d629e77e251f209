use outreach_core::{ConfigError, DispatchConfig, LimitsConfig, ProxyHealthConfig, SupervisorConfig};

#[test]
fn test_defaults_are_valid() {
    let config = DispatchConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.limits.max_messages_per_hour, 30);
    assert_eq!(config.retry.max_attempts_before_block, 3);
    assert_eq!(config.proxy.min_attempts_for_check, 10);
    assert_eq!(config.supervisor.max_restart_attempts, 5);
    assert_eq!(config.database.url, "sqlite://outreach.db");
}

#[test]
fn test_partial_json_fills_defaults() {
    let json = r#"{
        "limits": { "max_messages_per_hour": 60 },
        "proxy": { "chat_not_found_threshold": 55.0 }
    }"#;
    let config: DispatchConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.limits.max_messages_per_hour, 60);
    assert_eq!(config.limits.cycle_delay_minutes, 20);
    assert!((config.proxy.chat_not_found_threshold - 55.0).abs() < f64::EPSILON);
    assert_eq!(config.proxy.min_attempts_for_check, 10);
    assert_eq!(config.supervisor.shutdown_grace_secs, 5);
}

#[test]
fn test_rejects_zero_hourly_cap() {
    let config = DispatchConfig {
        limits: LimitsConfig {
            max_messages_per_hour: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "limits.max_messages_per_hour")
        }
        other => panic!("expected invalid value, got {:?}", other),
    }
}

#[test]
fn test_rejects_out_of_range_threshold() {
    let proxy = ProxyHealthConfig {
        chat_not_found_threshold: 0.0,
        ..Default::default()
    };
    assert!(proxy.validate().is_err());

    let proxy = ProxyHealthConfig {
        chat_not_found_threshold: 100.0,
        ..Default::default()
    };
    assert!(proxy.validate().is_ok());
}

#[test]
fn test_rejects_cap_below_base_delay() {
    let supervisor = SupervisorConfig {
        restart_base_delay_secs: 60,
        restart_max_delay_secs: 30,
        ..Default::default()
    };
    assert!(supervisor.validate().is_err());
}

#[test]
fn test_missing_database_url() {
    let mut config = DispatchConfig::default();
    config.database.url = "  ".to_string();
    assert_eq!(
        config.validate(),
        Err(ConfigError::MissingField {
            field: "database.url".to_string()
        })
    );
}
