use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow};
use tracing::info;

use crate::index::cache::CachePolicy;

pub const TRANSLATIONS_FILE: &str = "tag_translations.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database: PathBuf,
    pub translations: Option<PathBuf>,
    pub per_page: u32,
    pub max_per_page: u32,
    pub suggest_limit: usize,
    pub ingest_workers: usize,
    pub cache_policy: CachePolicy,
    pub allowed_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("runtime/db/app.db"),
            translations: None,
            per_page: 12,
            max_per_page: 100,
            suggest_limit: 5,
            ingest_workers: 2,
            cache_policy: CachePolicy::FailOpen,
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "webp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Main entry point to get settings.
/// Reads the env file if present, then falls back to defaults. When no translations
/// path is configured, nearby directories are searched for `tag_translations.json`.
pub fn get_settings(env_path: &Path) -> Result<Settings> {
    let mut settings = if env_path.exists() {
        let settings = load_from_env(env_path)?;
        info!("Loaded settings from {:?}", env_path);
        settings
    } else {
        info!("No settings at {:?}, using defaults", env_path);
        Settings::default()
    };

    if settings.translations.is_none() {
        match find_file(TRANSLATIONS_FILE, 3) {
            Ok(path) => {
                info!("Found tag translations: {:?}", path);
                settings.translations = Some(path);
            }
            Err(e) => info!("{}", e),
        }
    }

    Ok(settings)
}

fn find_file(filename: &str, max_depth: usize) -> Result<PathBuf> {
    let root = std::env::current_dir()?;

    let search_result = WalkDir::new(&root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name() == filename);

    if let Some(entry) = search_result {
        return Ok(entry.path().to_path_buf());
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

pub fn load_from_env(path: &Path) -> Result<Settings> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut settings = Settings::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "DATABASE_PATH" => settings.database = PathBuf::from(value),
            "TRANSLATIONS_PATH" => settings.translations = Some(PathBuf::from(value)),
            "PER_PAGE" => settings.per_page = parse(key, value)?,
            "MAX_PER_PAGE" => settings.max_per_page = parse(key, value)?,
            "SUGGEST_LIMIT" => settings.suggest_limit = parse(key, value)?,
            "INGEST_WORKERS" => settings.ingest_workers = parse(key, value)?,
            "CACHE_POLICY" => settings.cache_policy = value.parse()?,
            "ALLOWED_EXTENSIONS" => {
                settings.allowed_extensions = value
                    .split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect()
            }
            _ => {}
        }
    }

    if settings.per_page == 0 || settings.per_page > settings.max_per_page {
        return Err(anyhow!(
            "PER_PAGE must be between 1 and MAX_PER_PAGE ({})",
            settings.max_per_page
        ));
    }
    if settings.ingest_workers == 0 {
        return Err(anyhow!("INGEST_WORKERS must be at least 1"));
    }

    Ok(settings)
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: '{}'", key.trim(), value))
}

pub fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    writeln!(file, "DATABASE_PATH={}", settings.database.display())?;
    if let Some(translations) = &settings.translations {
        writeln!(file, "TRANSLATIONS_PATH={}", translations.display())?;
    }
    writeln!(file, "PER_PAGE={}", settings.per_page)?;
    writeln!(file, "MAX_PER_PAGE={}", settings.max_per_page)?;
    writeln!(file, "SUGGEST_LIMIT={}", settings.suggest_limit)?;
    writeln!(file, "INGEST_WORKERS={}", settings.ingest_workers)?;
    writeln!(file, "CACHE_POLICY={}", settings.cache_policy)?;
    writeln!(file, "ALLOWED_EXTENSIONS={}", settings.allowed_extensions.join(","))?;
    Ok(())
}
