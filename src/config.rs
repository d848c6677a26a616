use std::path::{Path, PathBuf};

use clap::Parser;
use clap::builder::BoolishValueParser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::upstream::{AppMode, UpstreamSettings};

/// Picture served by the avatar endpoint unless configured otherwise.
pub const DEFAULT_AVATAR_URL: &str =
    "https://cdn.jsdelivr.net/gh/twitter/twemoji@14.0.2/assets/72x72/1f916.png";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Upstream API base URL
    #[arg(long, env = "DIFY_API_URL")]
    pub api_url: Option<String>,

    /// Upstream app API key
    #[arg(long, env = "DIFY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Verify the upstream TLS certificate (`true`/`false`, `1`/`0`, `yes`/`no`)
    #[arg(long, env = "VERIFY_SSL", value_parser = BoolishValueParser::new())]
    pub verify_ssl: Option<bool>,

    /// Upstream app flavor: workflow or chat
    #[arg(long, env = "DIFY_APP_MODE")]
    pub app_mode: Option<String>,

    /// Address to bind
    #[arg(long, env = "APP_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "APP_PORT")]
    pub port: Option<u16>,

    /// Verbose logging
    #[arg(long, env = "APP_DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: Option<bool>,

    /// `*` or a comma-separated list of allowed origins
    #[arg(long, env = "ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamSettings,
    pub cors: CorsConfig,
    pub assets: AssetsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    /// Directory holding the chat widget.
    pub static_dir: PathBuf,
    /// Picture the avatar endpoint redirects to.
    pub avatar_url: String,
}

/// Parsed `cors.allowed_origins`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl CorsConfig {
    pub fn origins(&self) -> AllowedOrigins {
        let origins: Vec<String> = self
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args_os())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.debug", false)?
            .set_default("upstream.api_url", "https://api.dify.ai/v1")?
            .set_default("upstream.api_key", "")?
            .set_default("upstream.verify_ssl", false)?
            .set_default("upstream.app_mode", "workflow")?
            .set_default("upstream.input_field", "input")?
            .set_default("upstream.default_user", "default-user")?
            .set_default("upstream.timeouts.blocking_secs", 60)?
            .set_default("upstream.timeouts.streaming_secs", 120)?
            .set_default("upstream.timeouts.metadata_secs", 30)?
            .set_default("upstream.timeouts.connect_secs", 10)?
            .set_default("cors.allowed_origins", "*")?
            .set_default("assets.static_dir", "static")?
            .set_default("assets.avatar_url", DEFAULT_AVATAR_URL)?;

        // Explicit file must exist; ./config.yaml is picked up only if present.
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        } else if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::from(Path::new("config.yaml")));
        }

        // e.g. RELAY_SERVER__PORT=9000
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Flat deployment variables and flags, via clap.
        if let Some(api_url) = cli.api_url {
            builder = builder.set_override("upstream.api_url", api_url)?;
        }
        if let Some(api_key) = cli.api_key {
            builder = builder.set_override("upstream.api_key", api_key)?;
        }
        if let Some(verify_ssl) = cli.verify_ssl {
            builder = builder.set_override("upstream.verify_ssl", verify_ssl)?;
        }
        if let Some(app_mode) = cli.app_mode {
            builder = builder.set_override("upstream.app_mode", app_mode.to_lowercase())?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(debug) = cli.debug {
            builder = builder.set_override("server.debug", debug)?;
        }
        if let Some(origins) = cli.allowed_origins {
            builder = builder.set_override("cors.allowed_origins", origins)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "upstream API key is not set (DIFY_API_KEY or RELAY_UPSTREAM__API_KEY)".into(),
            ));
        }
        if self.upstream.input_field.trim().is_empty() && self.upstream.app_mode == AppMode::Workflow
        {
            return Err(config::ConfigError::Message(
                "upstream.input_field cannot be empty in workflow mode".into(),
            ));
        }
        Ok(())
    }

    /// Address to bind, `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
