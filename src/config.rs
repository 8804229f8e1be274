use crate::services::{mailer::SmtpSettings, metadata_store::WriteMode};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

const ENV_PREFIX: &str = "OBJECT_DIGEST_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub region: String,
    /// Prefix of every source and thumbnail URI handed out.
    pub public_url: String,
    pub source_bucket: String,
    pub thumbnail_bucket: String,
    pub metadata_bucket: String,
    pub metadata_key: String,
    pub email_recipient: String,
    pub smtp: SmtpSettings,
    pub write_mode: WriteMode,
    /// Base delay between versioned append attempts.
    pub append_backoff_ms: u64,
    pub thumbnail_concurrency: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload thumbnailing and daily digest service")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_DIGEST_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_DIGEST_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_DIGEST_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_DIGEST_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Base URL for resource URIs (overrides OBJECT_DIGEST_PUBLIC_URL)
    #[arg(long, global = true)]
    pub public_url: Option<String>,

    /// `legacy` or `versioned` (overrides OBJECT_DIGEST_WRITE_MODE)
    #[arg(long, global = true)]
    pub write_mode: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply the database schema and exit
    Migrate,
    /// Run one upload invocation from a JSON event file
    Process {
        #[arg(long)]
        event: PathBuf,
    },
    /// Send the digest for the day before `--now` (defaults to the current time)
    Digest {
        /// Unix seconds
        #[arg(long)]
        now: Option<i64>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let text = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let port = args.port.map_or_else(|| parsed(&var, "PORT", 3000), Ok)?;
        let write_mode_name = args
            .write_mode
            .unwrap_or_else(|| text("WRITE_MODE", "versioned"));
        let max_attempts = parsed(&var, "MAX_APPEND_ATTEMPTS", 5u32)?;
        let write_mode = WriteMode::from_name(&write_mode_name, max_attempts).ok_or_else(|| {
            anyhow!("unknown write mode `{write_mode_name}`, expected `legacy` or `versioned`")
        })?;

        let smtp = SmtpSettings {
            host: text("SMTP_HOST", ""),
            port: parsed(&var, "SMTP_PORT", 587)?,
            username: var("SMTP_USERNAME"),
            password: var("SMTP_PASSWORD"),
            starttls: parsed(&var, "SMTP_STARTTLS", true)?,
            from: text("EMAIL_SENDER", "object-digest@localhost"),
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| text("HOST", "0.0.0.0")),
            port,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| text("STORAGE_DIR", "./data/objects")),
            database_url: args
                .database_url
                .unwrap_or_else(|| text("DATABASE_URL", "sqlite://./data/meta/object_digest.db")),
            region: text("REGION", "local"),
            public_url: args
                .public_url
                .unwrap_or_else(|| text("PUBLIC_URL", &format!("http://localhost:{port}"))),
            source_bucket: text("SOURCE_BUCKET", "uploads"),
            thumbnail_bucket: text("THUMBNAIL_BUCKET", "thumbnails"),
            metadata_bucket: text("METADATA_BUCKET", "object-metadata"),
            metadata_key: text("METADATA_KEY", "metadata.json"),
            email_recipient: text("EMAIL_RECIPIENT", "admin@localhost"),
            smtp,
            write_mode,
            append_backoff_ms: parsed(&var, "APPEND_BACKOFF_MS", 25u64)?,
            thumbnail_concurrency: parsed(&var, "THUMBNAIL_CONCURRENCY", 4usize)?.max(1),
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Buckets the service provisions at startup.
    pub fn buckets(&self) -> [&str; 3] {
        [
            self.source_bucket.as_str(),
            self.thumbnail_bucket.as_str(),
            self.metadata_bucket.as_str(),
        ]
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let args = Args::try_parse_from(argv).unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_env_or_flags() {
        let (cfg, command) = load(&["object-digest"], &[]).unwrap();

        assert_eq!(command, Command::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.public_url, "http://localhost:3000");
        assert_eq!(cfg.metadata_key, "metadata.json");
        assert_eq!(cfg.write_mode, WriteMode::Versioned { max_attempts: 5 });
        assert!(cfg.smtp.host.is_empty());
        assert_eq!(cfg.buckets(), ["uploads", "thumbnails", "object-metadata"]);
    }

    #[test]
    fn flags_override_environment() {
        let (cfg, _) = load(
            &["object-digest", "--port", "8080", "--write-mode", "legacy"],
            &[
                ("OBJECT_DIGEST_PORT", "9000"),
                ("OBJECT_DIGEST_WRITE_MODE", "versioned"),
                ("OBJECT_DIGEST_SOURCE_BUCKET", "incoming"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.write_mode, WriteMode::Legacy);
        assert_eq!(cfg.source_bucket, "incoming");
    }

    #[test]
    fn bad_port_reports_the_variable() {
        let err = load(&["object-digest"], &[("OBJECT_DIGEST_PORT", "eighty")]).unwrap_err();
        assert!(format!("{err:#}").contains("OBJECT_DIGEST_PORT"));
    }

    #[test]
    fn unknown_write_mode_is_rejected() {
        let err = load(&["object-digest", "--write-mode", "yolo"], &[]).unwrap_err();
        assert!(err.to_string().contains("yolo"));
    }

    #[test]
    fn subcommands_parse_with_global_flags() {
        let (cfg, command) = load(
            &["object-digest", "digest", "--now", "1683359006", "--port", "1234"],
            &[],
        )
        .unwrap();
        assert_eq!(command, Command::Digest { now: Some(1683359006) });
        assert_eq!(cfg.port, 1234);

        let (_, command) = load(&["object-digest", "process", "--event", "batch.json"], &[]).unwrap();
        assert_eq!(
            command,
            Command::Process {
                event: PathBuf::from("batch.json")
            }
        );
    }
}
