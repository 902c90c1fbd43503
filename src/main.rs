use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{DashboardApi, HttpApi, DEFAULT_BASE_URL};
use crate::filters::{parse_date, DateRange, FilterPatch, PnlType};
use crate::store::Dashboard;
use crate::tui::Component;

use chrono::NaiveDate;
use clap::{arg, ArgMatches, Command};
use eyre::WrapErr;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod api;
mod error;
mod filters;
mod report;
mod store;
mod tui;
mod widgets;

#[derive(Serialize, Deserialize)]
struct Config {
    api_base_url: String,
    default_start_date: NaiveDate,
    default_end_date: NaiveDate,
    /// Per-request timeout; 0 disables it
    request_timeout_secs: u64,
    log_file: String,
    #[serde(default)]
    disabled_components: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let range = DateRange::default();
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            default_start_date: range.start,
            default_end_date: range.end,
            request_timeout_secs: 0,
            log_file: "pnl_dashboard.log".to_string(),
            disabled_components: Vec::new(),
        }
    }
}

impl Config {
    fn date_range(&self) -> DateRange {
        DateRange {
            start: self.default_start_date,
            end: self.default_end_date,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

fn cli() -> Command {
    Command::new("pnl_dashboard")
        .about("A terminal dashboard for portfolio P/L analytics")
        .arg(
            arg!(--api <URL> "Base address of the analytics API")
                .required(false)
                .global(true),
        )
        .subcommand(Command::new("tui").about("Open the interactive dashboard (default)"))
        .subcommand(Command::new("config").about("Print the path to the config file"))
        .subcommand(
            Command::new("snapshot")
                .about("Print metric cards and rankings for the default filters")
                .arg(arg!(--security <TICKER> "Security to report on").required(false))
                .arg(
                    arg!(--"pnl-type" <TYPE> "total, realized_total or unrealized_total")
                        .required(false),
                )
                .arg(arg!(--start <DATE> "Start date, YYYY-MM-DD").required(false))
                .arg(arg!(--end <DATE> "End date, YYYY-MM-DD").required(false)),
        )
        .subcommand(Command::new("accounts").about("List the available accounts"))
        .subcommand(Command::new("securities").about("List the available security tickers"))
        .subcommand(Command::new("refresh").about("Ask the backend to rebuild its dataset"))
}

// overrides for the default filters, as one patch
fn snapshot_patch(matches: &ArgMatches) -> eyre::Result<FilterPatch> {
    let mut patch = FilterPatch::default();
    if let Some(security) = matches.get_one::<String>("security") {
        patch = patch.and(FilterPatch::security(security.as_str()));
    }
    if let Some(pnl_type) = matches.get_one::<String>("pnl-type") {
        patch = patch.and(FilterPatch::pnl_type(pnl_type.parse::<PnlType>()?));
    }
    if let Some(start) = matches.get_one::<String>("start") {
        patch.start_date = Some(parse_date(start)?);
    }
    if let Some(end) = matches.get_one::<String>("end") {
        patch.end_date = Some(parse_date(end)?);
    }
    Ok(patch)
}

fn init_logging(cfg: &Config, interactive: bool) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if interactive {
        // the terminal belongs to the dashboard, logs go to a file
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.log_file)
            .wrap_err_with(|| format!("Failed to open log file {}", cfg.log_file))?;
        builder.with_ansi(false).with_writer(Arc::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cfg: Config = confy::load("pnl_dashboard", "config").wrap_err("Failed to load config")?;

    let matches = cli().get_matches();
    let interactive = matches!(matches.subcommand_name(), None | Some("tui"));
    init_logging(&cfg, interactive)?;

    let sub_matches = matches.subcommand().map(|(_, m)| m).unwrap_or(&matches);
    let base_url = sub_matches
        .get_one::<String>("api")
        .cloned()
        .unwrap_or_else(|| cfg.api_base_url.clone());
    let http = HttpApi::new(&base_url, cfg.timeout())?;
    tracing::info!("Using analytics API at {}", http.base_url());
    let api: Arc<dyn DashboardApi> = Arc::new(http);

    match matches.subcommand() {
        Some(("config", _)) => {
            let path = confy::get_configuration_file_path("pnl_dashboard", "config")?;
            println!("Your config file is located here: \n{}", path.display());
            println!("\nComponents that can be listed under disabled_components:");
            for component in Component::all() {
                println!("  {:<14}{}", component.as_str(), component.description());
            }
        }
        Some(("snapshot", sub)) => {
            let overrides = snapshot_patch(sub)?;
            let dashboard = report::snapshot(api.as_ref(), cfg.date_range(), overrides).await?;
            report::print_snapshot(&dashboard);
        }
        Some(("accounts", _)) => {
            let accounts = api.accounts().await?.unwrap_or_default();
            report::print_reference("Accounts", &accounts);
        }
        Some(("securities", _)) => {
            let securities = api.securities().await?.unwrap_or_default();
            report::print_reference("Securities", &securities);
        }
        Some(("refresh", _)) => {
            let reply = api.refresh_dataset().await?;
            report::print_refresh(&reply);
        }
        _ => {
            let dashboard = Dashboard::new(cfg.date_range());
            tui::run_tui(api, dashboard, cfg.disabled_components.clone()).await?;
        }
    }
    Ok(())
}
