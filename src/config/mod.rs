//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::{Component, Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CleanupArgs, CliArgs, Command, ServeArgs, ServeOverrides, StorageOverride};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mdport";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_ROOT: &str = ".";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_UPLOAD_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];
const DEFAULT_EXPORT_MAX_REQUEST_BYTES: u64 = 32 * 1024 * 1024;
const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
const DEFAULT_TITLE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_TITLE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_OUTPUT_RETENTION_SECS: u64 = 60 * 60;
const DEFAULT_UPLOAD_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub uploads: UploadSettings,
    pub export: ExportSettings,
    pub sessions: SessionSettings,
    pub title: TitleSettings,
    pub maintenance: MaintenanceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Filesystem layout. Uploaded images are served and exported by their URL below the root,
/// so the uploads directory is always a plain relative path.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub uploads_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl StorageSettings {
    pub fn uploads_path(&self) -> PathBuf {
        self.root.join(&self.uploads_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }

    /// Site-relative URL prefix under which uploads are published, e.g. `/uploads`.
    pub fn uploads_url_prefix(&self) -> String {
        let segments: Vec<_> = self
            .uploads_dir
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => segment.to_str(),
                _ => None,
            })
            .collect();
        format!("/{}", segments.join("/"))
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_file_bytes: NonZeroU64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct TitleSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub output_retention: Duration,
    pub upload_retention: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MDPORT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cleanup(args)) => raw.apply_storage_override(&args.storage),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    uploads: RawUploadSettings,
    export: RawExportSettings,
    sessions: RawSessionSettings,
    title: RawTitleSettings,
    maintenance: RawMaintenanceSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.uploads_max_file_bytes {
            self.uploads.max_file_bytes = Some(limit);
        }
        if let Some(ttl) = overrides.session_ttl_seconds {
            self.sessions.ttl_seconds = Some(ttl);
        }

        self.apply_storage_override(&overrides.storage);
    }

    fn apply_storage_override(&mut self, overrides: &StorageOverride) {
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            uploads,
            export,
            sessions,
            title,
            maintenance,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            uploads: build_upload_settings(uploads)?,
            export: build_export_settings(export)?,
            sessions: build_session_settings(sessions)?,
            title: build_title_settings(title)?,
            maintenance: build_maintenance_settings(maintenance)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = positive_secs(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: graceful_secs,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "must not be empty"));
    }

    let uploads_dir = storage
        .uploads_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR));
    if !is_plain_relative(&uploads_dir) {
        return Err(LoadError::invalid(
            "storage.uploads_dir",
            "must be a non-empty relative path without `.` or `..` segments",
        ));
    }

    let output_dir = storage
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.output_dir", "must not be empty"));
    }
    if output_dir.starts_with(&uploads_dir) || uploads_dir.starts_with(&output_dir) {
        return Err(LoadError::invalid(
            "storage.output_dir",
            "must not overlap the uploads directory",
        ));
    }

    Ok(StorageSettings {
        root,
        uploads_dir,
        output_dir,
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_file_bytes_value = uploads
        .max_file_bytes
        .unwrap_or(DEFAULT_UPLOAD_MAX_FILE_BYTES);
    let max_file_bytes = NonZeroU64::new(max_file_bytes_value)
        .ok_or_else(|| LoadError::invalid("uploads.max_file_bytes", "must be greater than zero"))?;
    usize::try_from(max_file_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_file_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let allowed_extensions: Vec<String> = match uploads.allowed_extensions {
        Some(values) => values
            .into_iter()
            .map(|value| value.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .collect(),
        None => DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|value| value.to_string())
            .collect(),
    };
    if allowed_extensions.is_empty() {
        return Err(LoadError::invalid(
            "uploads.allowed_extensions",
            "at least one extension must be allowed",
        ));
    }

    Ok(UploadSettings {
        max_file_bytes,
        allowed_extensions,
    })
}

fn build_export_settings(export: RawExportSettings) -> Result<ExportSettings, LoadError> {
    let value = export
        .max_request_bytes
        .unwrap_or(DEFAULT_EXPORT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(value).ok_or_else(|| {
        LoadError::invalid("export.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(value).map_err(|_| {
        LoadError::invalid(
            "export.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ExportSettings { max_request_bytes })
}

fn build_session_settings(sessions: RawSessionSettings) -> Result<SessionSettings, LoadError> {
    let ttl = positive_secs(
        sessions.ttl_seconds,
        DEFAULT_SESSION_TTL_SECS,
        "sessions.ttl_seconds",
    )?;
    Ok(SessionSettings { ttl })
}

fn build_title_settings(title: RawTitleSettings) -> Result<TitleSettings, LoadError> {
    let timeout = positive_secs(
        title.timeout_seconds,
        DEFAULT_TITLE_TIMEOUT_SECS,
        "title.timeout_seconds",
    )?;

    let user_agent = title
        .user_agent
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_TITLE_USER_AGENT.to_string());
    if user_agent.is_empty() {
        return Err(LoadError::invalid("title.user_agent", "must not be empty"));
    }

    Ok(TitleSettings {
        timeout,
        user_agent,
    })
}

fn build_maintenance_settings(
    maintenance: RawMaintenanceSettings,
) -> Result<MaintenanceSettings, LoadError> {
    let interval = positive_secs(
        maintenance.interval_seconds,
        DEFAULT_MAINTENANCE_INTERVAL_SECS,
        "maintenance.interval_seconds",
    )?;

    Ok(MaintenanceSettings {
        enabled: maintenance.enabled.unwrap_or(true),
        interval,
        output_retention: Duration::from_secs(
            maintenance
                .output_retention_seconds
                .unwrap_or(DEFAULT_OUTPUT_RETENTION_SECS),
        ),
        upload_retention: Duration::from_secs(
            maintenance
                .upload_retention_seconds
                .unwrap_or(DEFAULT_UPLOAD_RETENTION_SECS),
        ),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_file_bytes: Option<u64>,
    allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExportSettings {
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTitleSettings {
    timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMaintenanceSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
    output_retention_seconds: Option<u64>,
    upload_retention_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_secs(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn is_plain_relative(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some()
        && components.all(|component| matches!(component, Component::Normal(_)))
}
