//! Cache simulation CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cache-sim")]
#[command(about = "Replays time-window request scenarios against the block cache", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override number of requests
        #[arg(short, long)]
        requests: Option<u64>,

        /// Override concurrency level
        #[arg(short, long)]
        concurrency: Option<u32>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Run a quick sliding-window check
    Quick {
        /// Points per requested window
        #[arg(short, long, default_value = "48")]
        points: usize,

        /// Number of requests
        #[arg(short, long, default_value = "200")]
        requests: u64,

        /// Cache budget in data points
        #[arg(short, long, default_value = "10000")]
        max_size: usize,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            requests,
            concurrency,
            output,
        } => {
            eprintln!("Loading scenario: {}", scenario.display());

            let mut config = cache_sim::SimConfig::from_file(&scenario)?;
            if let Some(r) = requests {
                config.requests = r;
            }
            if let Some(c) = concurrency {
                config.concurrency = c;
            }
            config.validate()?;

            eprintln!("✓ Configuration loaded successfully");
            eprintln!("  Name: {}", config.name);
            eprintln!("  Description: {}", config.description);
            eprintln!("  Requests: {}", config.requests);
            eprintln!("  Concurrency: {}", config.concurrency);
            eprintln!("  Services: {}", config.services.len());
            eprintln!();

            let mut runner = cache_sim::SimRunner::new(config)?;
            let results = runner.run().await?;

            match output.as_str() {
                "json" => {
                    println!("{}", cache_sim::ResultsReport::format_json(&results)?);
                }
                "csv" => {
                    println!("{}", cache_sim::ResultsReport::csv_header());
                    println!("{}", cache_sim::ResultsReport::format_csv(&results));
                }
                _ => {
                    println!("{}", cache_sim::ResultsReport::format_table(&results));
                }
            }

            Ok(())
        }
        Commands::Quick {
            points,
            requests,
            max_size,
        } => {
            let config = cache_sim::SimConfig {
                name: "quick".to_string(),
                description: "Quick sliding-window check".to_string(),
                requests,
                concurrency: 4,
                warmup_requests: 0,
                seed: None,
                cache: block_cache::CacheConfig {
                    max_cache_data_size: max_size,
                    ..block_cache::CacheConfig::from_env()
                },
                services: vec![cache_sim::ServiceConfig {
                    name: "forecast".to_string(),
                    providers: 2,
                    latency_ms: 2,
                    failure_rate: 0.0,
                    locations: vec!["Helsinki".to_string()],
                    parameters: vec!["Temperature".to_string()],
                    resolution: 3600,
                    weight: 1.0,
                }],
                window: cache_sim::WindowPattern::Sliding {
                    start: chrono::Utc::now().timestamp() / 3600 * 3600,
                    point_count: points,
                    step: 1,
                    span: None,
                },
            };
            config.validate()?;

            let mut runner = cache_sim::SimRunner::new(config)?;
            let results = runner.run().await?;
            println!("{}", cache_sim::ResultsReport::format_table(&results));

            Ok(())
        }
        Commands::List { dir } => {
            println!("Available scenarios in {}:", dir.display());
            println!();

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("Error reading directory: {}", e);
                    eprintln!("Make sure the directory exists and is readable");
                    return Ok(());
                }
            };

            let mut scenarios = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
                    continue;
                }
                if let Ok(config) = cache_sim::SimConfig::from_file(&path) {
                    let file = path
                        .file_name()
                        .map(|f| f.to_string_lossy().to_string())
                        .unwrap_or_default();
                    scenarios.push((file, config.name, config.description));
                }
            }
            scenarios.sort_by(|a, b| a.0.cmp(&b.0));

            if scenarios.is_empty() {
                println!("No scenario files found");
            } else {
                for (filename, name, desc) in scenarios {
                    println!("  {} - {}", filename, name);
                    println!("    {}", desc);
                    println!();
                }
            }

            Ok(())
        }
    }
}
