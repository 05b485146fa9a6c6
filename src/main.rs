//! dual-reader entry point.

use clap::Parser;
use dual_reader::{
    config::{Cli, Command, Config},
    db::Database,
    library::Library,
    reader::{ReaderSettings, TranslationState},
    translation::{HttpTranslator, RetryPolicy, RetryingTranslator},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dual_reader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Import { path } => cmd_import(&path, &config),
        Command::List => cmd_list(&config),
        Command::Remove { id } => cmd_remove(&id, &config),
        Command::Read { id, page, lang } => cmd_read(&id, page, lang, &config).await,
        Command::Bookmark { id, page, note } => cmd_bookmark(&id, page, note, &config),
        Command::Bookmarks { id } => cmd_bookmarks(&id, &config),
    }
}

/// Initialize config and database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to point at your translation provider.");
    println!("Then run: dual-reader import /path/to/books");

    Ok(())
}

fn cmd_import(path: &Path, config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;

    if path.is_dir() {
        let report = library.import_dir(path)?;
        for book in &report.imported {
            println!("Imported: {} ({})", book.title, book.id);
        }
        for (file, reason) in &report.failed {
            println!("Failed:   {} - {}", file.display(), reason);
        }
        println!(
            "\n{} imported, {} failed",
            report.imported.len(),
            report.failed.len()
        );
    } else {
        let book = library.import(path)?;
        println!(
            "Imported: {} by {} ({})",
            book.title,
            book.authors_display(),
            book.id
        );
    }

    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let books = library.list()?;

    if books.is_empty() {
        println!("No books imported.");
        return Ok(());
    }

    println!("{:<36} {:<6} {:<30} AUTHOR", "ID", "FORMAT", "TITLE");
    println!("{}", "-".repeat(90));
    for book in books {
        println!(
            "{:<36} {:<6} {:<30} {}",
            book.id,
            book.format.as_str(),
            truncate(&book.title, 30),
            book.authors_display()
        );
    }

    Ok(())
}

fn cmd_remove(id: &str, config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let book = library.remove(id)?;
    println!("Removed: {}", book.title);
    Ok(())
}

/// Print one page in both panels.
async fn cmd_read(
    id: &str,
    page: Option<usize>,
    lang: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let book = library.get(id)?;

    let mut settings = ReaderSettings::from(config);
    if let Some(lang) = lang {
        settings.target_language = Some(lang);
    }
    settings.start_page = page.map(|p| p.saturating_sub(1));

    let translator = RetryingTranslator::new(
        HttpTranslator::new(&config.translation)?,
        RetryPolicy::from(&config.translation),
    );
    let mut reader = library.open_reader(id, settings, Arc::new(translator))?;
    reader.await_translation().await;

    let snapshot = reader.snapshot();
    println!(
        "{} - page {}/{} ({:.0}%){}",
        book.title,
        snapshot.page_index + 1,
        snapshot.page_count,
        snapshot.reading_fraction * 100.0,
        if snapshot.bookmarked { " [bookmarked]" } else { "" }
    );
    println!("{}", "=".repeat(80));
    println!("{}", snapshot.original);
    println!("{}", "-".repeat(80));
    match (&snapshot.state, &snapshot.error_badge) {
        (TranslationState::Idle, _) => println!("(no target language)"),
        (_, Some(reason)) => {
            println!("{}", snapshot.translated);
            println!("\n[translation unavailable: {}]", reason);
        }
        _ => println!("{}", snapshot.translated),
    }

    reader.close()?;
    Ok(())
}

fn cmd_bookmark(id: &str, page: usize, note: Option<String>, config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let pagination = library.pagination(id, &config.layout)?;
    let page = pagination.clamp(page.saturating_sub(1));

    if library
        .sessions()
        .toggle_bookmark(id, &pagination, page, note)
    {
        println!("Bookmarked page {}", page + 1);
    } else {
        println!("Removed bookmark on page {}", page + 1);
    }
    Ok(())
}

fn cmd_bookmarks(id: &str, config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let book = library.get(id)?;
    let pagination = library.pagination(id, &config.layout)?;
    let bookmarks = library.sessions().bookmarks(id);

    if bookmarks.is_empty() {
        println!("No bookmarks in {}.", book.title);
        return Ok(());
    }

    println!("{:<6} {:<17} NOTE", "PAGE", "CREATED");
    println!("{}", "-".repeat(60));
    for bookmark in bookmarks {
        println!(
            "{:<6} {:<17} {}",
            bookmark.page_in(&pagination) + 1,
            bookmark.created_at.format("%Y-%m-%d %H:%M"),
            bookmark.note.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
