use gridcon::config::Config;
use tempfile::tempdir;

#[test]
fn save_and_reload_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gridcon_config.yaml");

    let mut config = Config::default();
    config.modbus.ip = "10.4.0.15".to_string();
    config.modbus.unit_id = 1;
    config.ratings.rated_power_w = 250_000.0;
    config.sync.reconnect_timeout_secs = 300;
    config.save_to_file(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.modbus.ip, "10.4.0.15");
    assert_eq!(loaded.modbus.unit_id, 1);
    assert_eq!(loaded.ratings.rated_power_w, 250_000.0);
    assert_eq!(loaded.sync.reconnect_timeout_secs, 300);
    // Untouched sections keep their defaults
    assert_eq!(loaded.faults.acknowledge_interval_secs, 5);
    assert_eq!(loaded.poll_interval_ms, 1000);
}

#[test]
fn minimal_yaml_fills_in_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.yaml");
    std::fs::write(
        &path,
        "modbus:\n  ip: 192.168.1.20\n  port: 1502\n  unit_id: 0\nratings:\n  rated_power_w: 500000\n  max_charge_w: 200000\n  max_discharge_w: 200000\n",
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.modbus.port, 1502);
    assert_eq!(config.ratings.rated_power_w, 500_000.0);
    assert_eq!(config.sync.reconnect_timeout_secs, 600);
    assert!(config.digital_inputs.disconnect_switch.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_yaml_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "modbus: [not, a, mapping").unwrap();
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn missing_file_is_an_error() {
    assert!(Config::from_file("/nonexistent/gridcon.yaml").is_err());
}

#[test]
fn validation_rejects_bad_ratings() {
    let mut config = Config::default();
    config.ratings.max_discharge_w = -1.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.poll_interval_ms = 0;
    assert!(config.validate().is_err());
}
