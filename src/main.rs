use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use airpulse::air::{AirQualitySnapshot, Reading};
use airpulse::config::{AppConfig, LoggingConfig};
use airpulse::dashboard::record_reading;
use airpulse::network::{classify, EffectiveType, NetworkSignals};
use airpulse::storage::{self, AIR_QUALITY_KEY};

#[derive(Parser)]
#[command(
    name = "airpulse",
    about = "Air-quality dashboard daemon with network-aware refresh",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $AIRPULSE_CONFIG, then /etc/airpulse/airpulse.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler + polling)
    Serve {
        /// Bind address, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show the network tier for a set of connection signals
    Classify {
        /// Whether the host is online
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        online: bool,

        /// Effective connection type: slow-2g, 2g, 3g or 4g
        #[arg(long)]
        effective_type: Option<EffectiveType>,

        /// Downlink estimate in Mbit/s
        #[arg(long)]
        downlink: Option<f64>,

        /// Round-trip estimate in milliseconds
        #[arg(long)]
        rtt: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect or load the stored air-quality snapshot
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Print the current snapshot
    Show {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Record readings from a JSON file (one reading or an array)
    Import {
        /// Input file path
        file: PathBuf,
    },
}

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&logging.level))
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve the config with a plain stderr subscriber in place, so lookup
/// fallbacks are reported before the configured one exists.
fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LoggingConfig::default().level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || AppConfig::resolve(path))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    airpulse::runtime()
        .context("failed to start async runtime")?
        .block_on(run(cli.command, config))
}

async fn run(command: Commands, mut config: AppConfig) -> Result<()> {

    match command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting airpulse daemon");
            airpulse::serve(config).await?;
        }
        Commands::Classify {
            online,
            effective_type,
            downlink,
            rtt,
            json,
        } => {
            let signals = NetworkSignals {
                online,
                effective_type,
                downlink_mbps: downlink,
                rtt_ms: rtt,
            };
            let tier = classify(&signals, &config.network.thresholds);
            let range = tier.simulated_delay_range();
            let strategy = tier.loading_strategy();

            if json {
                let report = serde_json::json!({
                    "tier": tier,
                    "signals": signals,
                    "polling_interval_ms": tier.polling_interval().as_millis() as u64,
                    "simulated_delay_ms": [range.start(), range.end()],
                    "strategy": strategy,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let yes_no = |b: bool| if b { "yes" } else { "no" };
                println!("Tier:             {}", tier);
                println!("Polling interval: {} ms", tier.polling_interval().as_millis());
                println!("Simulated delay:  {}-{} ms", range.start(), range.end());
                println!(
                    "Loading:          charts={} stations={} historical={} compression={:?}",
                    yes_no(strategy.load_charts),
                    yes_no(strategy.load_stations),
                    yes_no(strategy.load_historical),
                    strategy.compression
                );
            }
        }
        Commands::Snapshot { action } => {
            let store = airpulse::open_store(&config.storage)?;

            match action {
                SnapshotAction::Show { json } => {
                    let snapshot: Option<AirQualitySnapshot> =
                        storage::load(store.as_ref(), AIR_QUALITY_KEY)?;
                    match snapshot {
                        None => println!("No readings stored."),
                        Some(snap) if json => println!("{}", serde_json::to_string_pretty(&snap)?),
                        Some(snap) => {
                            println!("\n=== Current Air Quality ===");
                            println!("AQI:         {} ({})", snap.current_aqi, snap.category());
                            println!("Trend:       {:?}", snap.trend);
                            println!("Temperature: {:.1} C", snap.temperature);
                            println!("Humidity:    {:.0} %", snap.humidity);
                            println!("Wind:        {:.1} km/h {}", snap.wind_speed, snap.wind_direction);
                            println!("Visibility:  {:.1} km", snap.visibility);
                            println!("History:     {} points", snap.historical.len());
                            println!("Updated:     {}", snap.last_updated.to_rfc3339());
                            println!("\nRecommendations:");
                            for rec in airpulse::air::health_recommendations(snap.current_aqi) {
                                println!(" - {} {}", rec.icon, rec.text);
                            }
                            println!();
                        }
                    }
                }
                SnapshotAction::Import { file } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    let readings: Vec<Reading> = match serde_json::from_str::<Vec<Reading>>(&raw) {
                        Ok(list) => list,
                        Err(_) => vec![serde_json::from_str::<Reading>(&raw)
                            .with_context(|| format!("{} holds no readings", file.display()))?],
                    };

                    let count = readings.len();
                    let mut latest = None;
                    for reading in readings {
                        latest = Some(record_reading(store.as_ref(), reading)?);
                    }
                    match latest {
                        Some(snap) => println!(
                            "Imported {} reading(s); current AQI {} ({}).",
                            count,
                            snap.current_aqi,
                            snap.category()
                        ),
                        None => println!("No readings to import."),
                    }
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
