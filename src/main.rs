use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tokio::signal;

use tokenfleet::config::{Config, DEFAULT_CONFIG_PATH};
use tokenfleet::fleet::FleetSupervisor;
use tokenfleet::notify::WebhookNotifier;
use tokenfleet::rest::{CheckOutcome, RestClient, DEFAULT_API_BASE};
use tokenfleet::summary::{self, CheckReport};

#[derive(Parser)]
#[command(name = "tokenfleet", version, about = "Keeps a fleet of gateway sessions alive")]
struct Args {
    /// Path to the tokens configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate credentials against the REST API and exit
    #[arg(long)]
    check: bool,

    /// Write an example config file and exit
    #[arg(long)]
    create_config: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenfleet=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.create_config {
        if args.config.exists() {
            tracing::error!("{} already exists, refusing to overwrite", args.config.display());
            std::process::exit(1);
        }
        if let Err(e) = Config::create_example(&args.config) {
            tracing::error!("failed to create example config: {e}");
            std::process::exit(1);
        }
        eprintln!();
        eprintln!(
            "  Created {}. Add your tokens, then run again.",
            args.config.display()
        );
        eprintln!();
        return;
    }

    if !args.config.exists() {
        if let Err(e) = Config::create_example(&args.config) {
            tracing::error!("failed to create example config: {e}");
            std::process::exit(1);
        }
        eprintln!();
        eprintln!(
            "  Created {}. Add your tokens, then run again.",
            args.config.display()
        );
        eprintln!();
        return;
    }

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    print_banner(&args, &config);

    if args.check {
        run_check(&config).await;
        return;
    }

    run_fleet(config).await;
}

fn print_banner(args: &Args, config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("GIT_SHA");
    let webhook = if config.webhook_url.is_some() {
        "enabled"
    } else {
        "disabled"
    };

    eprintln!();
    eprintln!("  \x1b[1;36mtokenfleet\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mconfig\x1b[0m      {}", args.config.display());
    eprintln!("  \x1b[2msessions\x1b[0m    {}", config.credentials.len());
    eprintln!("  \x1b[2mgateway\x1b[0m     {}", config.fleet.gateway.url);
    eprintln!("  \x1b[2mwebhook\x1b[0m     {webhook}");
    eprintln!();
}

async fn run_fleet(config: Config) {
    let (events_tx, notifier_task) = match &config.webhook_url {
        Some(url) => WebhookNotifier::spawn(url.clone()),
        None => WebhookNotifier::log_only(),
    };

    let supervisor = FleetSupervisor::new(
        config.credentials.clone(),
        config.fleet.clone(),
        events_tx.clone(),
    );

    let stopper = supervisor.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        stopper.stop_all().await;
    });

    supervisor.clone().start().await;

    let status = supervisor.status().await;
    tracing::info!(
        total = status.total,
        connected = status.connected,
        "fleet exited"
    );

    // Let the notifier flush anything still queued.
    drop(events_tx);
    drop(supervisor);
    let _ = tokio::time::timeout(Duration::from_secs(5), notifier_task).await;
}

async fn run_check(config: &Config) {
    let api_base =
        std::env::var("FLEET_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    let client = RestClient::new(api_base);
    let total = config.credentials.len();
    let mut reports = Vec::with_capacity(total);

    for (i, credential) in config.credentials.iter().enumerate() {
        let index = i + 1;
        let outcome = if credential.looks_valid() {
            client.fetch_identity(credential).await
        } else {
            CheckOutcome::Failed("implausible credential format".to_string())
        };

        match &outcome {
            CheckOutcome::Valid(identity) => {
                tracing::info!(index, account = %identity.tag(), "credential valid");
            }
            CheckOutcome::Invalid => tracing::error!(index, "credential invalid or expired"),
            CheckOutcome::RateLimited => tracing::warn!(index, "credential check rate limited"),
            CheckOutcome::Failed(message) => {
                tracing::error!(index, "credential check failed: {message}");
            }
        }
        reports.push(CheckReport {
            index,
            credential: credential.redacted(),
            outcome,
        });

        // Keep check traffic polite; mirrors the stagger used by the fleet.
        if index < total {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    summary::print_summary(&reports);

    match summary::write_report_file(Path::new("."), &reports) {
        Ok(path) => tracing::info!("check results saved to {}", path.display()),
        Err(e) => tracing::warn!("failed to save check results: {e}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_to_fleet_mode_on_the_standard_config() {
        let args = Args::parse_from(["tokenfleet"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!args.check);
        assert!(!args.create_config);
    }

    #[test]
    fn create_config_flag_honours_the_config_path() {
        let args = Args::parse_from(["tokenfleet", "--create-config", "--config", "alt.json"]);
        assert!(args.create_config);
        assert_eq!(args.config, PathBuf::from("alt.json"));
    }
}
