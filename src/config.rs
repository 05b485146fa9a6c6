use crate::pagination::LayoutConfig;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Dual-language ebook reader with synchronized panels.
#[derive(Parser, Debug, Clone)]
#[command(name = "dual-reader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "DUAL_READER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a default config file and initialize the database.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Import a book file, or every supported file under a directory.
    Import {
        /// Path to an EPUB/MOBI/TXT file or a directory.
        path: PathBuf,
    },

    /// List imported books.
    List,

    /// Remove a book and everything cached for it.
    Remove {
        /// Book ID.
        id: String,
    },

    /// Print a page in both panels.
    Read {
        /// Book ID.
        id: String,
        /// Page to open, 1-based (defaults to the resumed position).
        #[arg(short, long)]
        page: Option<usize>,
        /// Target language (overrides config).
        #[arg(short, long)]
        lang: Option<String>,
    },

    /// Toggle a bookmark on a page.
    Bookmark {
        /// Book ID.
        id: String,
        /// Page number, 1-based.
        page: usize,
        /// Optional note.
        #[arg(short, long)]
        note: Option<String>,
    },

    /// List bookmarks of a book.
    Bookmarks {
        /// Book ID.
        id: String,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Page layout used by the paginator.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Translation provider configuration.
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Reading session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Reader panel configuration.
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/reader.db")
}

/// Translation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// LibreTranslate-compatible endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Optional API key sent with each request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default target language.
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Attempts per translation before giving up on transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds; doubles on each attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            target_language: default_target_language(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TranslationConfig {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_endpoint() -> String {
    "http://localhost:5000/translate".to_string()
}

fn default_target_language() -> String {
    "fr".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_timeout_secs() -> u64 {
    15
}

/// Reading session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum interval between position writes, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl SessionConfig {
    /// Debounce interval as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1_000
}

/// Reader panel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Mirror scroll offsets between the two panels.
    #[serde(default = "default_sync_scrolling")]
    pub sync_scrolling: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sync_scrolling: default_sync_scrolling(),
        }
    }
}

fn default_sync_scrolling() -> bool {
    true
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("dual-reader.toml"),
            dirs::config_dir()
                .map(|p| p.join("dual-reader").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# dual-reader configuration

[database]
# path = "/var/lib/dual-reader/reader.db"

[layout]
font_size = 16.0
margin = 24.0
panel_ratio = 0.5
viewport_width = 1280.0
viewport_height = 800.0
line_spacing = 1.4

[translation]
endpoint = "http://localhost:5000/translate"
# api_key = "..."
target_language = "fr"
# Transient failures are retried with exponential backoff
max_attempts = 3
base_delay_ms = 200
max_delay_ms = 5000
timeout_secs = 15

[session]
# Position writes are coalesced within this window
debounce_ms = 1000

[reader]
sync_scrolling = true
"#
        .to_string()
    }
}

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// MOBI format (Mobipocket eBook).
    Mobi,
    /// Plain text format.
    Txt,
}

impl BookFormat {
    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "mobi" | "azw" | "prc" => Some(BookFormat::Mobi),
            "txt" => Some(BookFormat::Txt),
            _ => None,
        }
    }

    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Mobi => "mobi",
            BookFormat::Txt => "txt",
        }
    }
}
