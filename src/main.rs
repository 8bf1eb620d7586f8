//! Bootstrap binary: loads configuration, wires the HTTP client, vendor
//! adapter, challenge resolver, and scheduler into an [`Fsm`], runs it to
//! completion, and fans out notifications on success.
//!
//! CLI shape follows the `abp-daemon` crate's `clap::Parser` pattern
//! (config-path-plus-flags, no subcommands).

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use ticket_sentinel::challenge::{AutomaticResolver, ChallengeResolver, ManualResolver};
use ticket_sentinel::config::{AppConfig, ChallengeMode};
use ticket_sentinel::http::HttpClient;
use ticket_sentinel::schedule::Schedule;
use ticket_sentinel::{Fsm, RunResult};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "ticket-sentinel", about = "Races a live-event vendor's sale API for a single order.")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: std::path::PathBuf,

    /// Log every request/response at debug level, overriding the config file.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if cli.debug {
        config.debug = true;
    }

    let _guard = ticket_sentinel::logging::init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> ExitCode {
    let http = match HttpClient::new(
        Duration::from_secs_f64(config.network.timeout),
        config.network.rest,
        config.network.proxy.as_deref(),
        &config.identity.header,
        &config.identity.cookie,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let resolver: Arc<dyn ChallengeResolver> = match config.challenge.mode {
        ChallengeMode::Automatic => {
            let solver_url = match &config.challenge.solver_url {
                Some(url) => url.clone(),
                None => {
                    error!("automatic challenge mode requires challenge.solver_url");
                    return ExitCode::FAILURE;
                }
            };
            match AutomaticResolver::new(solver_url, Duration::from_secs_f64(config.network.timeout)) {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    error!(error = %e, "failed to build automatic challenge resolver");
                    return ExitCode::FAILURE;
                }
            }
        }
        ChallengeMode::Manual => {
            let webdriver_url = match &config.challenge.webdriver_url {
                Some(url) => url.clone(),
                None => {
                    error!("manual challenge mode requires challenge.webdriver_url");
                    return ExitCode::FAILURE;
                }
            };
            Arc::new(ManualResolver::new(webdriver_url))
        }
    };

    let api = ticket_sentinel::api::VendorClient::new(http.clone(), config.target.clone(), config.debug);
    let schedule = Schedule::new(config.network.sleep, ticket_sentinel::schedule::DEFAULT_REFRESH_INTERVAL_SECONDS);

    info!(
        project_id = config.target.project_id,
        session_id = config.target.session_id,
        sku_id = config.target.sku_id,
        "starting acquisition"
    );

    let mut fsm = Fsm::new(api, resolver, config.target.clone(), schedule, config.challenge.gt.clone());

    match fsm.run().await {
        RunResult::Success(record) => {
            info!(title = %record.title, message = %record.message, "acquisition succeeded");
            if let Some(order_id) = record.order_id {
                let url = format!("https://show.bilibili.com/platform/orderDetail.html?order_id={order_id}");
                if let Err(e) = webbrowser::open(&url) {
                    info!(error = %e, url, "could not open order page in a browser");
                }
            }
            let handles = ticket_sentinel::notify::fan_out(&config.notify, &record, reqwest::Client::new());
            for handle in handles {
                let _ = handle.await;
            }
            ExitCode::SUCCESS
        }
        RunResult::Fatal { code, msg } => {
            error!(code = code.0, %msg, "acquisition aborted by a fatal vendor response");
            ExitCode::FAILURE
        }
        RunResult::Interrupted => {
            info!("acquisition interrupted by operator");
            ExitCode::from(130)
        }
    }
}
