//! folio - Save articles as EPUB

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use folio::{ArticleInput, EpubExporter, ExportConfig};

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "Save articles as EPUB", long_about = None)]
#[command(after_help = "EXAMPLES:
    folio export article.json -o books/    Export an extracted article
    folio info book.epub                   Show package contents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Export an article JSON file as EPUB
    Export {
        /// Article JSON (camelCase keys)
        #[arg(value_name = "ARTICLE")]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,

        /// JSON configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Per-image fetch timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,

        /// Largest image to embed, in bytes
        #[arg(long, value_name = "BYTES")]
        max_image_bytes: Option<u64>,

        /// Image fetches in flight at once
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Show the layout and metadata of an EPUB
    Info {
        #[arg(value_name = "EPUB")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let result = match cli.command {
        Command::Export {
            input,
            output,
            config,
            timeout,
            max_image_bytes,
            concurrency,
        } => {
            let overrides = Overrides {
                timeout,
                max_image_bytes,
                concurrency,
            };
            export(&input, &output, config.as_deref(), overrides).await
        }
        Command::Info { input } => show_info(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "folio=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Overrides {
    timeout: Option<f64>,
    max_image_bytes: Option<u64>,
    concurrency: Option<usize>,
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<ExportConfig, String> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("{}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => ExportConfig::default(),
    };

    if let Some(secs) = overrides.timeout {
        let timeout = Duration::try_from_secs_f64(secs).map_err(|e| format!("--timeout: {e}"))?;
        config = config.with_fetch_timeout(timeout);
    }
    if let Some(max) = overrides.max_image_bytes {
        config = config.with_max_image_bytes(max);
    }
    if let Some(n) = overrides.concurrency {
        config = config.with_fetch_concurrency(n);
    }
    Ok(config)
}

async fn export(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    overrides: Overrides,
) -> Result<(), String> {
    let config = load_config(config, overrides)?;

    let json = std::fs::read_to_string(input).map_err(|e| format!("{}: {e}", input.display()))?;
    let article: ArticleInput =
        serde_json::from_str(&json).map_err(|e| format!("{}: {e}", input.display()))?;

    let exporter = EpubExporter::with_config(config).map_err(|e| e.to_string())?;
    let path = exporter
        .export_to_dir(&article, output)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", path.display());
    Ok(())
}

fn show_info(path: &Path) -> Result<(), String> {
    let inspection = folio::inspect_epub(path).map_err(|e| e.to_string())?;
    let package = &inspection.package;

    println!("File: {}", path.display());
    println!("Title: {}", package.title);
    if !package.creator.is_empty() {
        println!("Author: {}", package.creator);
    }
    if !package.language.is_empty() {
        println!("Language: {}", package.language);
    }
    println!("Identifier: {}", package.identifier);
    if let Some(ref modified) = package.modified {
        println!("Modified: {modified}");
    }
    println!("Spine items: {}", package.spine.len());
    println!();

    for entry in &inspection.entries {
        let media_type = entry
            .name
            .strip_prefix("OEBPS/")
            .and_then(|href| package.manifest_item(href))
            .map(|item| item.media_type.as_str())
            .unwrap_or("-");
        println!(
            "{:>9} {:>9}  {:?}  {:<24} {}",
            entry.size, entry.compressed_size, entry.compression, media_type, entry.name
        );
    }

    Ok(())
}
