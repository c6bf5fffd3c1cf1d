//! `strata check`: load a configuration and build the layers it enables.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use strata_config::{
    CliOverrides, Config, LoggingConfig, apply_overrides, load_config, validate_config,
};
use strata_relay::{RelayConnectionStatus, RelayLayer};
use strata_secure::SecureLayer;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Config file path (toml/json/jsonc/yaml)
    #[arg(short, long, default_value = "strata.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// What a successful check built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub relay: Option<RelayConnectionStatus>,
    pub secure: bool,
    pub packet_padding: usize,
}

pub fn run_check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    let summary = build_layers(&config)?;
    info!(
        config = %args.config.display(),
        relay = summary.relay.is_some(),
        secure = summary.secure,
        packet_padding = summary.packet_padding,
        "configuration OK"
    );
    println!("{}: OK", args.config.display());
    Ok(())
}

/// Construct every layer `config` has a section for.
pub fn build_layers(config: &Config) -> Result<LayerSummary, Box<dyn std::error::Error>> {
    let mut packet_padding = 0;
    let relay = match &config.relay {
        Some(relay) => {
            let layer = RelayLayer::new(&config.network, relay, &mut packet_padding)?;
            Some(layer.connection_status())
        }
        None => None,
    };
    let secure = match &config.secure {
        Some(secure) => {
            SecureLayer::from_config(&config.network, Some(secure))?;
            true
        }
        None => false,
    };
    Ok(LayerSummary {
        relay,
        secure,
        packet_padding,
    })
}

/// Base level plus per-module filters, e.g. `info,strata_relay=debug`.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.level.as_deref().unwrap_or("info").to_string();
    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }
    filter_str
}

/// Install the global subscriber described by `[logging]`.
///
/// `format` is one of pretty (default), compact or json; `output` is stderr
/// (default) or stdout.
fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_new(filter_directives(config)).unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = match config.output.as_deref() {
        Some("stdout") => BoxMakeWriter::new(io::stdout),
        _ => BoxMakeWriter::new(io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_deref() {
        Some("json") => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        Some("compact") => registry
            .with(fmt::layer().compact().with_writer(writer))
            .init(),
        _ => registry.with(fmt::layer().with_writer(writer)).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_module_overrides() {
        let mut logging = LoggingConfig {
            level: Some("warn".into()),
            ..Default::default()
        };
        assert_eq!(filter_directives(&logging), "warn");

        logging
            .filters
            .insert("strata_relay".into(), "trace".into());
        assert_eq!(filter_directives(&logging), "warn,strata_relay=trace");
        assert_eq!(filter_directives(&LoggingConfig::default()), "info");
    }

    #[test]
    fn empty_config_builds_nothing() {
        let summary = build_layers(&Config::default()).unwrap();
        assert_eq!(
            summary,
            LayerSummary {
                relay: None,
                secure: false,
                packet_padding: 0,
            }
        );
    }

    #[test]
    fn builds_relay_and_secure_layers() {
        let cfg: Config = toml::from_str(
            r#"
[relay.server]
endpoint = "127.0.0.1:7777"
allocation_id = "000102030405060708090a0b0c0d0e0f"
key = "aa55"

[secure]
client_auth = "none"
"#,
        )
        .unwrap();
        let summary = build_layers(&cfg).unwrap();
        assert_eq!(summary.relay, Some(RelayConnectionStatus::NotEstablished));
        assert!(summary.secure);
        assert_eq!(summary.packet_padding, strata_proto::RELAY_HEADER_LEN);
    }

    #[test]
    fn unreadable_certificate_fails() {
        let cfg: Config = toml::from_str(
            r#"
[secure]
certificate = "/nonexistent/cert.pem"
private_key = "/nonexistent/key.pem"
"#,
        )
        .unwrap();
        assert!(build_layers(&cfg).is_err());
    }
}
