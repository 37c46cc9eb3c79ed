//! Geomerge CLI - fetch, parse and merge open-data resources
//!
//! ```bash
//! geomerge serve                        # Start HTTP server (port 3000)
//! geomerge merge bathing.json -o out.json
//! geomerge resolve bathing.json         # Show resolved resource URLs
//! geomerge parse input.csv              # Parse a delimited file to JSON
//! geomerge features                     # List loaded descriptions
//! ```

use clap::{Parser, Subcommand};
use geomerge::{parse_file, AppConfig, DescriptionRegistry, MergeEngine};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geomerge")]
#[command(about = "Fetch open-data resources and merge them into GeoJSON", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: GEOMERGE_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory of description documents
        #[arg(short, long)]
        descriptions: Option<PathBuf>,
    },

    /// Fetch and merge the datasets of a description file
    Merge {
        /// Description JSON file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve resource URLs without downloading
    Resolve {
        /// Description JSON file
        input: PathBuf,
    },

    /// Parse a delimited file and output JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Fixed column names, comma separated (file is split on '|')
        #[arg(long, value_delimiter = ',')]
        headers: Option<Vec<String>>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List valid description documents
    Features {
        /// Directory of description documents
        #[arg(short, long)]
        descriptions: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match AppConfig::from_env() {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, mut config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Serve { port, descriptions } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = descriptions {
                config.descriptions_dir = dir;
            }
            geomerge::server::start_server(config).await
        }
        Commands::Merge { input, output } => cmd_merge(&config, &input, output.as_deref()).await,
        Commands::Resolve { input } => cmd_resolve(&config, &input).await,
        Commands::Parse {
            input,
            headers,
            output,
        } => cmd_parse(&input, headers.as_deref(), output.as_deref()),
        Commands::Features { descriptions } => {
            cmd_features(descriptions.as_deref().unwrap_or(&config.descriptions_dir))
        }
    }
}

async fn cmd_merge(
    config: &AppConfig,
    input: &Path,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Merging: {}", input.display());

    let description = DescriptionRegistry::load_file(input)?;
    let engine = MergeEngine::from_config(config)?;
    let merged = engine.run(&description).await?;

    eprintln!(
        "   {} feature(s) in {} collection(s)",
        merged.feature_count(),
        merged.collections().len()
    );

    let json = serde_json::to_string_pretty(&merged)?;
    write_output(&json, output)?;
    Ok(())
}

async fn cmd_resolve(config: &AppConfig, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let description = DescriptionRegistry::load_file(input)?;
    let engine = MergeEngine::from_config(config)?;
    let urls = engine.resolve_urls(&description).await;

    println!("{}", serde_json::to_string_pretty(&urls)?);
    Ok(())
}

fn cmd_parse(
    input: &Path,
    headers: Option<&[String]>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Parsing CSV: {}", input.display());

    let result = parse_file(input, headers)?;

    eprintln!("   Encoding: {}", result.encoding);
    eprintln!(
        "   Delimiter: {}",
        result.delimiter.map(format_delimiter).unwrap_or_else(|| "none".to_string())
    );
    eprintln!("   Columns: {}", result.headers.join(", "));
    for warning in result.warnings.iter().take(5) {
        eprintln!("   Warning: {}", warning);
    }
    if result.width_mismatches() > 5 {
        eprintln!("   ... {} width mismatches in total", result.width_mismatches());
    }
    eprintln!("Parsed {} records", result.records.len());

    let json = serde_json::to_string_pretty(&result.records)?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_features(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = DescriptionRegistry::with_dir(dir);
    if registry.is_empty() {
        eprintln!("No valid descriptions in {}", registry.dir().display());
        return Ok(());
    }

    for name in registry.names() {
        let datasets = registry.get(name).map(|d| d.datasets.len()).unwrap_or(0);
        println!("{} ({} dataset(s))", name, datasets);
    }
    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("   Saved to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
