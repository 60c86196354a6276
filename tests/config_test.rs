//! Integration tests for configuration loading

use smart_queue::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[server]
http_port = 9080
ws_port = 9081
update_buffer = 16

[auth]
api_key = "test-key"

[capacity]
default = 3

[reservations]
ttl_secs = 60
sweep_interval_secs = 5

[places]
hall_1 = 2
hall_2 = 5
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.http_port(), 9080);
    assert_eq!(config.ws_port(), 9081);
    assert_eq!(config.update_buffer(), 16);
    assert_eq!(config.api_key(), "test-key");
    assert_eq!(config.default_capacity(), 3);
    assert_eq!(config.reservation_ttl_secs(), 60);
    assert_eq!(config.sweep_interval_secs(), 5);
    assert_eq!(config.places().get("hall_1"), Some(&2));
    assert_eq!(config.places().get("hall_2"), Some(&5));
}

#[test]
fn test_partial_config_falls_back_to_section_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[capacity]\ndefault = 25\n")
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.default_capacity(), 25);
    assert_eq!(config.http_port(), 8080);
    assert_eq!(config.reservation_ttl_secs(), 120);
    assert_eq!(config.api_key(), "SMARTQUEUE-ESP32-KEY");
}

#[test]
fn test_zero_capacity_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[capacity]\ndefault = 0\n").unwrap();
    temp_file.flush().unwrap();
    assert!(Config::from_file(temp_file.path()).is_err());

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[places]\nhall_1 = 0\n").unwrap();
    temp_file.flush().unwrap();
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.http_port(), 8080);
    assert_eq!(config.ws_port(), 8081);
    assert_eq!(config.default_capacity(), 10);
}
