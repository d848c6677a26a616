use dify_relay::config::{AllowedOrigins, AppConfig};
use dify_relay::upstream::AppMode;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const MANAGED_VARS: [&str; 14] = [
    "CONFIG_FILE",
    "DIFY_API_URL",
    "DIFY_API_KEY",
    "VERIFY_SSL",
    "DIFY_APP_MODE",
    "APP_HOST",
    "APP_PORT",
    "APP_DEBUG",
    "ALLOWED_ORIGINS",
    "RELAY_SERVER__PORT",
    "RELAY_UPSTREAM__API_KEY",
    "RELAY_UPSTREAM__APP_MODE",
    "RELAY_UPSTREAM__TIMEOUTS__STREAMING_SECS",
    "RELAY_CORS__ALLOWED_ORIGINS",
];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    for var in MANAGED_VARS {
        // SAFETY: tests touching the environment are serialized with `#[serial]`.
        unsafe { env::remove_var(var) };
    }
}

fn set_var(key: &str, value: &str) {
    // SAFETY: tests touching the environment are serialized with `#[serial]`.
    unsafe { env::set_var(key, value) };
}

fn load(args: &[&str]) -> Result<AppConfig, config::ConfigError> {
    let argv = std::iter::once("dify-relay").chain(args.iter().copied());
    AppConfig::load_from_args(argv)
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]).expect("defaults should load");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8000);
    assert!(!config.server.debug);
    assert_eq!(config.upstream.api_url, "https://api.dify.ai/v1");
    assert_eq!(config.upstream.app_mode, AppMode::Workflow);
    assert_eq!(config.upstream.input_field, "input");
    assert_eq!(config.upstream.default_user, "default-user");
    assert!(!config.upstream.verify_ssl);
    assert_eq!(config.upstream.timeouts.blocking_secs, 60);
    assert_eq!(config.upstream.timeouts.streaming_secs, 120);
    assert_eq!(config.upstream.timeouts.metadata_secs, 30);
    assert_eq!(config.upstream.timeouts.connect_secs, 10);
    assert_eq!(config.cors.origins(), AllowedOrigins::Any);
    assert_eq!(config.assets.static_dir, std::path::PathBuf::from("static"));
}

#[test]
#[serial]
fn test_missing_api_key_fails_validation() {
    clear_env_vars();

    let config = load(&[]).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("API key"));
}

#[test]
#[serial]
fn test_prefixed_env_override() {
    clear_env_vars();
    set_var("RELAY_SERVER__PORT", "9090");
    set_var("RELAY_UPSTREAM__TIMEOUTS__STREAMING_SECS", "30");
    set_var("RELAY_UPSTREAM__API_KEY", "app-from-env");

    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.upstream.timeouts.streaming_secs, 30);
    assert_eq!(config.upstream.api_key, "app-from-env");
    assert!(config.validate().is_ok());

    clear_env_vars();
}

#[test]
#[serial]
fn test_flat_env_wins_over_prefixed_env() {
    clear_env_vars();
    set_var("RELAY_UPSTREAM__APP_MODE", "workflow");
    set_var("DIFY_APP_MODE", "Chat");
    set_var("DIFY_API_KEY", "app-flat");
    set_var("DIFY_API_URL", "https://dify.internal/v1");
    set_var("VERIFY_SSL", "true");
    set_var("APP_PORT", "8081");
    set_var("ALLOWED_ORIGINS", "https://a.example,https://b.example");

    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.upstream.app_mode, AppMode::Chat);
    assert_eq!(config.upstream.api_key, "app-flat");
    assert_eq!(config.upstream.api_url, "https://dify.internal/v1");
    assert!(config.upstream.verify_ssl);
    assert_eq!(config.server.port, 8081);
    assert_eq!(
        config.cors.origins(),
        AllowedOrigins::List(vec![
            "https://a.example".to_string(),
            "https://b.example".to_string()
        ])
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_flat_booleans_accept_dotenv_spellings() {
    clear_env_vars();
    set_var("VERIFY_SSL", "False");
    set_var("APP_DEBUG", "1");

    let config = load(&[]).expect("Failed to load config");
    assert!(!config.upstream.verify_ssl);
    assert!(config.server.debug);

    set_var("VERIFY_SSL", "yes");
    set_var("APP_DEBUG", "off");
    let config = load(&[]).expect("Failed to load config");
    assert!(config.upstream.verify_ssl);
    assert!(!config.server.debug);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_flag_wins_over_env() {
    clear_env_vars();
    set_var("APP_PORT", "9000");

    let config = load(&["--port", "7000", "--debug", "true"]).expect("Failed to load config");
    assert_eq!(config.server.port, 7000);
    assert!(config.server.debug);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    writeln!(
        file,
        "server:\n  port: 7070\nupstream:\n  api_key: app-from-file\n  app_mode: chat\n  default_user: kiosk"
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = load(&["--config", &path]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.upstream.api_key, "app-from-file");
    assert_eq!(config.upstream.app_mode, AppMode::Chat);
    assert_eq!(config.upstream.default_user, "kiosk");
    // Untouched keys keep their defaults.
    assert_eq!(config.upstream.input_field, "input");

    // Env still wins over the file.
    set_var("CONFIG_FILE", &path);
    set_var("RELAY_SERVER__PORT", "6061");
    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.server.port, 6061);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result = load(&["--config", "/nonexistent/relay.yaml"]);
    assert!(result.is_err());
}

/// Removes `./config.yaml` even when an assertion fails.
struct CwdConfig;

impl Drop for CwdConfig {
    fn drop(&mut self) {
        let _ = fs::remove_file("config.yaml");
    }
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    fs::write("config.yaml", "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");
    let _guard = CwdConfig;

    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.server.port, 6060);
}
