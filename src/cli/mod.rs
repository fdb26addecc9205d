//! Command-line entry points.
//!
//! `serve` (the default) runs the scheduler and the HTTP API. The other
//! commands operate on the same data directory for one-off inspection and
//! manual runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::SecretString;

use crate::api;
use crate::automation::{ActivityLog, AutomationConfig, RuntimeDeps, SchedulerRuntime};
use crate::config::Config;
use crate::google::{FileTokenStore, GoogleBusinessClient};
use crate::llm::create_content_generator;
use crate::store::JsonStore;

#[derive(Parser, Debug)]
#[command(name = "gbp-autopilot", version, about)]
pub struct Cli {
    /// Directory holding settings, tokens and the activity log
    #[arg(long, env = "AUTOPILOT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Port for the HTTP API
    #[arg(long, env = "AUTOPILOT_PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start all enabled jobs and serve the HTTP API
    Serve,

    /// Show automation status for a location
    Status {
        location_id: String,
    },

    /// Show recent activity
    Activity {
        /// Number of records to show, newest first
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Generate a post for a location without publishing it
    Preview {
        location_id: String,
    },

    /// Publish a post for a location now
    PostNow {
        location_id: String,
    },

    /// Check and reply to a location's reviews now
    CheckReviews {
        location_id: String,
    },

    /// Manage stored OAuth tokens
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommand {
    /// Store an access token (and optional refresh token) for a user
    Set {
        user_id: String,

        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires
        #[arg(long)]
        expires_in: Option<i64>,
    },
}

/// Collaborators wired from a [`Config`].
pub struct Services {
    pub runtime: SchedulerRuntime,
    pub tokens: Arc<FileTokenStore>,
}

impl Services {
    /// Open the stores under the data directory and assemble the runtime.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let settings: JsonStore<AutomationConfig> =
            JsonStore::open(storage.settings_path()).await?;
        let replied: JsonStore<Vec<String>> =
            JsonStore::open(storage.replied_reviews_path()).await?;
        let activity = ActivityLog::open(storage.activity_path()).await?;
        let tokens = Arc::new(FileTokenStore::open(storage.tokens_path(), &config.google).await?);

        let runtime = SchedulerRuntime::new(
            RuntimeDeps {
                settings: Arc::new(settings),
                replied: Arc::new(replied),
                credentials: tokens.clone(),
                generator: create_content_generator(&config.llm),
                api: Arc::new(GoogleBusinessClient::new(&config.google)),
                activity: Arc::new(activity),
            },
            &config.automation,
        );

        tracing::debug!(data_dir = %storage.data_dir.display(), "Services ready");
        Ok(Self { runtime, tokens })
    }
}

impl Cli {
    /// Apply flag overrides on top of the environment config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
    }
}

/// Run a parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config);
    run_command(cli.command.unwrap_or(Command::Serve), &config).await
}

pub async fn run_command(command: Command, config: &Config) -> anyhow::Result<()> {
    let services = Services::build(config).await?;
    let runtime = &services.runtime;

    match command {
        Command::Serve => serve(runtime.clone(), config.api.port).await,
        Command::Status { location_id } => {
            let status = runtime.get_status(&location_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Activity { limit } => {
            let records = runtime.recent_activity(limit).await;
            if records.is_empty() {
                println!("No activity recorded.");
            }
            for record in records {
                println!(
                    "{}  {:<22} {}  {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(record.activity_type)?
                        .as_str()
                        .unwrap_or_default(),
                    record.location_id,
                    record.details
                );
            }
            Ok(())
        }
        Command::Preview { location_id } => {
            let generated = runtime.generate_post_content(&location_id, None).await?;
            println!("{}", generated.content);
            if let Some(cta) = generated.call_to_action {
                println!();
                println!("Button: {}", serde_json::to_string(&cta)?);
            }
            Ok(())
        }
        Command::PostNow { location_id } => {
            let result = runtime.trigger_post(&location_id, None).await?;
            println!("Published {} via {:?}", result.post_name, result.endpoint);
            Ok(())
        }
        Command::CheckReviews { location_id } => {
            let result = runtime.trigger_review_check(&location_id).await?;
            println!(
                "Reviews: {} total, {} unreplied, {} replied, {} failed, {} skipped",
                result.total_reviews,
                result.unreplied,
                result.replied,
                result.failed,
                result.skipped
            );
            Ok(())
        }
        Command::Token(cmd) => run_token_command(cmd, &services.tokens).await,
    }
}

async fn run_token_command(cmd: TokenCommand, tokens: &FileTokenStore) -> anyhow::Result<()> {
    match cmd {
        TokenCommand::Set {
            user_id,
            access_token,
            refresh_token,
            expires_in,
        } => {
            tokens
                .save_token(
                    &user_id,
                    SecretString::from(access_token),
                    refresh_token.map(SecretString::from),
                    expires_in,
                )
                .await?;
            println!("Stored token for {}", user_id);
            Ok(())
        }
    }
}

async fn serve(runtime: SchedulerRuntime, port: u16) -> anyhow::Result<()> {
    let jobs = runtime.initialize_all().await?;
    tracing::info!(jobs, "Scheduler started");

    let result = api::serve(runtime.clone(), port, shutdown_signal()).await;
    runtime.stop_all().await;
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use tempfile::tempdir;

    use super::*;
    use crate::automation::{AutomationUpdate, CredentialProvider};
    use crate::config::StorageConfig;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            storage: StorageConfig {
                data_dir: dir.to_path_buf(),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["gbp-autopilot"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_global_overrides() {
        let cli =
            Cli::try_parse_from(["gbp-autopilot", "status", "loc-1", "--port", "8080"]).unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.api.port, 8080);
        assert!(matches!(cli.command, Some(Command::Status { ref location_id }) if location_id == "loc-1"));
    }

    #[test]
    fn test_token_set_parses() {
        let cli = Cli::try_parse_from([
            "gbp-autopilot",
            "token",
            "set",
            "owner",
            "--access-token",
            "abc",
            "--expires-in",
            "3600",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Token(TokenCommand::Set {
                user_id,
                refresh_token,
                expires_in,
                ..
            })) => {
                assert_eq!(user_id, "owner");
                assert!(refresh_token.is_none());
                assert_eq!(expires_in, Some(3600));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_set_persists() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        run_command(
            Command::Token(TokenCommand::Set {
                user_id: "owner".into(),
                access_token: "abc".into(),
                refresh_token: None,
                expires_in: Some(3600),
            }),
            &config,
        )
        .await
        .unwrap();

        let services = Services::build(&config).await.unwrap();
        assert_eq!(services.tokens.known_users().await, vec!["owner".to_string()]);
    }

    #[tokio::test]
    async fn test_status_for_unknown_location_fails() {
        let dir = tempdir().unwrap();
        let err = run_command(
            Command::Status {
                location_id: "nowhere".into(),
            },
            &config_in(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_settings_survive_rebuild() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let services = Services::build(&config).await.unwrap();
        let update: AutomationUpdate = serde_json::from_value(serde_json::json!({
            "autoReply": { "enabled": false, "replyToAll": true }
        }))
        .unwrap();
        services.runtime.update_settings("loc-1", update).await.unwrap();
        services.runtime.stop_all().await;

        let rebuilt = Services::build(&config).await.unwrap();
        let status = rebuilt.runtime.get_status("loc-1").await.unwrap();
        assert!(status.auto_reply.is_some_and(|r| !r.enabled));
    }
}
