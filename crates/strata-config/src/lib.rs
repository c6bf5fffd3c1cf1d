//! Configuration loading and CLI definitions.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

use serde::{Deserialize, Serialize};

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, ConfigFormat, load_config, parse_config};
pub use types::*;
pub use validate::validate_config;

/// Top-level configuration.
///
/// `relay` and `secure` are optional: a driver enables the layers it has a
/// section for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default)]
    pub secure: Option<SecureConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FULL_TOML: &str = r#"
[network]
connect_timeout_ms = 500
mtu = 1200

[relay]
heartbeat_ms = 3000
[relay.server]
endpoint = "203.0.113.7:7777"
allocation_id = "0102030405060708090a0b0c0d0e0f10"
connection_data = "aabb"
host_connection_data = "ccdd"
key = "00112233"
nonce = 4

[secure]
hostname = "game.example"
client_auth = "none"

[logging]
level = "debug"
filters = { strata_relay = "trace" }
"#;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.network.connect_timeout_ms, 1000);
        assert_eq!(cfg.network.mtu, 1400);
        assert_eq!(cfg.network.send_queue_capacity, 512);
        assert!(cfg.relay.is_none());
        assert!(cfg.secure.is_none());
        validate_config(&cfg).unwrap();
    }

    #[test]
    fn parses_full_toml() {
        let cfg: Config = toml::from_str(FULL_TOML).unwrap();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.network.connect_timeout_ms, 500);
        let relay = cfg.relay.unwrap();
        assert_eq!(relay.heartbeat_ms, 3000);
        assert_eq!(relay.server.nonce, 4);
        let secure = cfg.secure.unwrap();
        assert_eq!(secure.client_auth, ClientAuthPolicy::None);
        assert_eq!(secure.hostname.as_deref(), Some("game.example"));
        assert_eq!(
            cfg.logging.filters.get("strata_relay").map(String::as_str),
            Some("trace")
        );
    }

    #[test]
    fn relay_heartbeat_defaults() {
        let toml_str = r#"
[relay.server]
endpoint = "127.0.0.1:1"
allocation_id = "00000000000000000000000000000000"
key = "01"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.relay.unwrap().heartbeat_ms, 9000);
    }

    #[test]
    fn validation_rejects_zero_values() {
        let mut cfg = Config::default();
        cfg.network.connect_timeout_ms = 0;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));

        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        cfg.relay.as_mut().unwrap().heartbeat_ms = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validation_rejects_bad_relay_descriptor() {
        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        cfg.relay.as_mut().unwrap().server.allocation_id = "0102".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        cfg.relay.as_mut().unwrap().server.key = "not hex".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validation_rejects_tls_bounds() {
        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        let secure = cfg.secure.as_mut().unwrap();
        secure.min_version = "tls13".into();
        secure.max_version = "tls12".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        cfg.secure.as_mut().unwrap().min_version = "ssl3".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        let secure = cfg.secure.as_mut().unwrap();
        secure.handshake_timeout_min_ms = 9000;
        secure.handshake_timeout_max_ms = 100;
        assert!(validate_config(&cfg).is_err());

        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        cfg.secure.as_mut().unwrap().client_auth = ClientAuthPolicy::Required;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn load_by_extension() {
        let file = write_temp(".toml", FULL_TOML);
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.network.mtu, 1200);

        let jsonc = r#"{
            // comments are allowed
            "network": { "mtu": 900 }
        }"#;
        let file = write_temp(".jsonc", jsonc);
        assert_eq!(load_config(file.path()).unwrap().network.mtu, 900);

        let file = write_temp(".yaml", "network:\n  mtu: 800\n");
        assert_eq!(load_config(file.path()).unwrap().network.mtu, 800);

        let file = write_temp(".ini", "");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/nonexistent/strata.toml").unwrap_err();
        assert_eq!(err.error_type(), strata_core::ERROR_IO);
        assert!(err.to_string().contains("/nonexistent/strata.toml"));
    }

    #[test]
    fn parse_errors_name_the_format() {
        assert!(matches!(
            parse_config("[network\n", ConfigFormat::Toml),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            parse_config("{ \"network\": ", ConfigFormat::Json),
            Err(ConfigError::Json(_))
        ));
        let cfg = parse_config("relay: ~\n", ConfigFormat::Yaml).unwrap();
        assert!(cfg.relay.is_none());
    }

    #[test]
    fn overrides_apply_to_present_sections() {
        let mut cfg: Config = toml::from_str(FULL_TOML).unwrap();
        let overrides = CliOverrides {
            mtu: Some(999),
            heartbeat_ms: Some(1234),
            send_role: Some("client".into()),
            log_level: Some("warn".into()),
            ..Default::default()
        };
        apply_overrides(&mut cfg, &overrides);
        assert_eq!(cfg.network.mtu, 999);
        assert_eq!(cfg.relay.as_ref().unwrap().heartbeat_ms, 1234);
        assert_eq!(cfg.secure.as_ref().unwrap().send_role, Role::Client);
        assert_eq!(cfg.logging.level.as_deref(), Some("warn"));

        let mut bare = Config::default();
        apply_overrides(&mut bare, &overrides);
        assert!(bare.relay.is_none());
        assert!(bare.secure.is_none());
    }
}
