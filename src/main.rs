mod document;
mod fetch;
mod logging;
mod parser;
mod pipeline;
mod reviews;
mod settings;
mod store;
mod text;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::fetch::FetchClient;
use crate::parser::movie::MOVIE_KEY;
use crate::reviews::ReviewLimits;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "imdb_scraper", about = "Resumable IMDb movie details and review scraper")]
struct Cli {
    /// Settings file (default: ./imdb_scraper.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape title pages listed in the URL task list
    Details {
        /// Task list, spreadsheet or CSV (default: <data_dir>/IMDB_Movie_URLs.xlsx)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Details store (default: <data_dir>/IMDb_Movie_Details.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Max movies to scrape this run (default: all remaining)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Collect user reviews for every movie in the details store
    Reviews {
        /// Details store to read movies from
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Review store (default: <data_dir>/IMDb_Reviews.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Listing pages per movie (default: review_page_budget)
        #[arg(long)]
        pages: Option<usize>,
        /// Max movies to process this run
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Row and key counts of an output store
    Stats {
        /// Store to inspect (default: the details store)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Key column (default: url)
        #[arg(short, long)]
        key: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_file = settings::load_env_file(None);
    let settings = Settings::load(cli.config.as_deref())?;
    let log_path = logging::init(&settings.log_dir, &settings.log_file)?;
    info!(log = %log_path.display(), "logging initialized");
    if let Some(path) = env_file {
        info!(path = %path.display(), "environment file loaded");
    }
    settings.report();
    settings.ensure_dirs()?;

    let t0 = Instant::now();

    let result = match cli.command {
        Commands::Details { input, output, limit } => {
            let input = input.unwrap_or_else(|| settings.movie_urls_path());
            let output = output.unwrap_or_else(|| settings.details_path());
            let client = FetchClient::new(&settings)?;
            println!("Scraping movie details from {}...", input.display());
            let summary = pipeline::run_details(&settings, &client, &input, &output, limit)?;
            summary.print();
            Ok(())
        }
        Commands::Reviews { input, output, pages, limit } => {
            let input = input.unwrap_or_else(|| settings.details_path());
            let output = output.unwrap_or_else(|| settings.reviews_path());
            let limits = ReviewLimits {
                page_budget: pages.unwrap_or(settings.review_page_budget),
                max_reviews: settings.max_reviews_per_movie,
            };
            let client = FetchClient::new(&settings)?;
            println!(
                "Collecting reviews for movies in {} (up to {} pages, {} reviews each)...",
                input.display(),
                limits.page_budget,
                limits.max_reviews
            );
            let summary =
                pipeline::run_reviews(&settings, &client, &input, &output, &limits, limit)?;
            summary.print();
            Ok(())
        }
        Commands::Stats { output, key, json } => {
            let path = output.unwrap_or_else(|| settings.details_path());
            let key = key.unwrap_or_else(|| MOVIE_KEY.to_string());
            let s = store::store_stats(&path, &key)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
            } else {
                println!("Store:      {}", s.path.display());
                println!("Rows:       {}", s.rows);
                println!("Keys:       {}", s.distinct_keys);
                println!("Duplicated: {}", s.duplicate_keys);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
