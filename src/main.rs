mod catalog;
mod database;
mod error;
mod index;
mod ingest;
mod media;
mod ml;
mod search;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use crate::catalog::Catalog;
use crate::database::repo::Repository;
use crate::ml::detector::{Detector, SidecarDetector};
use crate::search::translations::TranslationTable;
use crate::utils::config::{self, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file in KEY=VALUE form
    #[arg(short, long, default_value = ".env")]
    env: PathBuf,

    /// Overrides DATABASE_PATH
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and write the effective settings to the settings file
    Init,
    /// Index every image under a directory using its detection sidecars
    Ingest {
        input_dir: PathBuf,
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Search by tag (`#name`), by tag or text, or list everything
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        per_page: Option<u32>,
        #[arg(short, long, default_value = "en")]
        locale: String,
    },
    /// Autocomplete a partial query
    Suggest {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "en")]
        locale: String,
    },
    /// Register a tag ahead of any detection that uses it
    AddTag { name: String },
    /// List known tags with their display names
    Tags {
        #[arg(short, long, default_value = "en")]
        locale: String,
    },
    /// Show one image with its detections
    Show { id: i64 },
    /// Show the texts found on one image, most confident first
    Texts { id: i64 },
    /// Remove an image and its detections
    Delete { id: i64 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut settings = config::get_settings(&args.env)?;
    if let Some(db_path) = args.db_path {
        settings.database = db_path;
    }

    let catalog = Arc::new(open_catalog(&settings)?);

    match args.command {
        Command::Init => {
            config::save_to_env(&args.env, &settings)?;
            info!("Wrote settings to {:?}", args.env);
            Ok(())
        }
        Command::Ingest { input_dir, workers } => {
            let detector: Arc<dyn Detector> = Arc::new(SidecarDetector::default());
            let progress = ProgressBar::new_spinner();
            progress.set_style(
                ProgressStyle::with_template("{spinner} {pos} images {msg}")
                    .context("Invalid progress template")?,
            );
            progress.enable_steady_tick(Duration::from_millis(120));

            let report = ingest::pipeline::run(
                &input_dir,
                catalog,
                detector,
                settings.allowed_extensions.clone(),
                workers.unwrap_or(settings.ingest_workers),
                progress,
            )?;
            print_json(&report)
        }
        Command::Search { query, page, per_page, locale } => {
            let per_page = per_page.unwrap_or(settings.per_page);
            print_json(&catalog.search(&query, page, per_page, &locale)?)
        }
        Command::Suggest { query, limit, locale } => {
            let limit = limit.unwrap_or(settings.suggest_limit);
            print_json(&catalog.suggest(&query, limit, &locale)?)
        }
        Command::AddTag { name } => print_json(&catalog.add_tag(&name)?),
        Command::Tags { locale } => print_json(&catalog.list_tags(&locale)?),
        Command::Show { id } => print_json(&catalog.image(id)?),
        Command::Texts { id } => print_json(&catalog.image_texts(id)?),
        Command::Delete { id } => print_json(&catalog.delete_image(id)?),
    }
}

fn open_catalog(settings: &Settings) -> Result<Catalog> {
    if let Some(parent) = settings.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    let repo = Repository::open(&settings.database)
        .with_context(|| format!("Failed to open database {:?}", settings.database))?;

    let translations = match &settings.translations {
        Some(path) => TranslationTable::load(path)?,
        None => TranslationTable::default(),
    };

    info!("DB: {:?}", settings.database);
    info!("Translations: {} tags", translations.len());
    Ok(Catalog::new(repo, translations, settings.cache_policy, settings.max_per_page))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
