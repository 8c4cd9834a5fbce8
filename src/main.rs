//! Main module for the Procwise CLI.
//!
//! Handles command parsing, configuration loading and dispatch.
//!
//! # Examples
//!
//! Asking a one-off question:
//!
//! ```sh
//! procwise ask "How do I upload a new asset?"
//! ```
//!
//! First-time setup:
//!
//! ```sh
//! procwise init
//! ```

use std::error::Error;
use std::fs;
use std::io::{BufRead, Write as IoWrite, stdout};
use std::path::Path;

use clap::Parser;
use crossterm::ExecutableCommand;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use procwise::commands::{Cli, Commands};
use procwise::config::{ProcwiseConfig, load_config};
use procwise::engine::SupportEngine;
use procwise::procedure::validate_definition;
use procwise::template::{ChatTemplate, load_template};
use procwise::{analytics::AnalyticsStore, config_dir};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        return init();
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml"),
    };
    debug!(path = %config_path.display(), "loading config");
    let config = load_config(config_path.to_str().ok_or("non-utf8 config path")?)?;

    match cli.command {
        Commands::Ask { question, template } => {
            let template = resolve_template(template.as_deref())?;
            let engine = SupportEngine::new(config, template)?;
            warm_index(&engine).await;
            println!("{}", engine.respond(&question).await);
        }
        Commands::Interactive { template } => {
            let template = resolve_template(template.as_deref())?;
            let engine = SupportEngine::new(config, template)?;
            warm_index(&engine).await;
            interactive_loop(&engine).await?;
        }
        Commands::Reindex => {
            let engine = SupportEngine::new(config, ChatTemplate::support_default())?;
            let loaded = engine.reload().await?;
            println!("Reindexed {loaded} process definitions.");
        }
        Commands::Validate { dir } => {
            let dir = dir.unwrap_or(config.processes_dir);
            let failures = validate_dir(&dir)?;
            if failures > 0 {
                eprintln!("{failures} definition file(s) failed validation.");
                std::process::exit(1);
            }
            println!("All definitions in {} are valid.", dir.display());
        }
        Commands::Stats => print_stats(&config)?,
        Commands::Init => unreachable!("handled above"),
    }

    Ok(())
}

fn resolve_template(name: Option<&str>) -> Result<ChatTemplate, Box<dyn Error>> {
    match name {
        Some(name) => Ok(load_template(name)?),
        None => Ok(ChatTemplate::support_default()),
    }
}

/// Build the vector index up front so the first question is not slow.
/// A rehydrated persistent index is kept as-is instead of re-embedding.
/// An unreachable embedding service only costs the semantic stage.
async fn warm_index(engine: &SupportEngine) {
    if let Err(err) = engine.ensure_indexed().await {
        warn!(%err, "could not build the vector index, keyword matching only");
    }
}

async fn interactive_loop(engine: &SupportEngine) -> Result<(), Box<dyn Error>> {
    println!("Assetflow support assistant. Type 'exit' to leave, '/reset' to start over.");
    let stdin = std::io::stdin();
    let mut out = stdout();

    loop {
        out.execute(SetForegroundColor(Color::Green))?;
        print!("You: ");
        out.flush()?;
        out.execute(ResetColor)?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                engine.reset_history().await;
                println!("History cleared.");
                continue;
            }
            _ => {}
        }

        let answer = engine.respond(line).await;
        out.execute(SetForegroundColor(Color::Blue))?;
        out.execute(SetAttribute(Attribute::Bold))?;
        println!("\n{answer}\n");
        out.execute(SetAttribute(Attribute::Reset))?;
        out.execute(ResetColor)?;
    }
    Ok(())
}

/// Check every `*.json` under `dir`, printing problems per file.
fn validate_dir(dir: &Path) -> Result<usize, Box<dyn Error>> {
    let mut failures = 0;
    let mut checked = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            checked += 1;
            let problems = match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(value) => validate_definition(&value),
                Err(err) => vec![err],
            };
            if problems.is_empty() {
                println!("ok   {}", path.display());
            } else {
                failures += 1;
                println!("FAIL {}", path.display());
                for problem in problems {
                    println!("     - {problem}");
                }
            }
        }
    }
    println!("Checked {checked} file(s).");
    Ok(failures)
}

fn print_stats(config: &ProcwiseConfig) -> Result<(), Box<dyn Error>> {
    let mut analytics = AnalyticsStore::open(&config.analytics_db_url)?;

    println!("Most requested processes:");
    let popular = analytics.popular_processes(10)?;
    if popular.is_empty() {
        println!("  (no matches recorded yet)");
    }
    for (id, count) in popular {
        println!("  {count:>5}  {id}");
    }

    println!("\nRecent unmatched queries:");
    let misses = analytics.recent_unmatched(10)?;
    if misses.is_empty() {
        println!("  (none)");
    }
    for query in misses {
        println!("  {query}");
    }
    Ok(())
}

/// Create the config directory with a starter config, template,
/// relationship table and one sample process definition.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    let processes_dir = config_dir.join("processes").join("asset_management");
    let templates_dir = config_dir.join("templates");
    info!(path = %config_dir.display(), "initializing configuration");
    fs::create_dir_all(&processes_dir)?;
    fs::create_dir_all(&templates_dir)?;

    let config = ProcwiseConfig {
        api_key: "CHANGEME".to_string(),
        api_base: "http://localhost:5001/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
        embedding_model: "text-embedding-3-small".to_string(),
        processes_dir: config_dir.join("processes"),
        relationships_path: Some(config_dir.join("relationships.yaml")),
        index_dir: Some(config_dir.join("index")),
        analytics_db_url: config_dir.join("analytics.db").to_string_lossy().into_owned(),
        narrate: false,
        similarity_threshold: 0.75,
        keyword_floor: 0.0,
        stop_words: procwise::config::default_stop_words(),
        max_tokens: 1024,
        temperature: 0.3,
        history_max_tokens: 2048,
        embed_timeout_secs: 15,
    };
    let config_path = config_dir.join("config.yaml");
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    println!("Wrote {}", config_path.display());

    let template_path = templates_dir.join("support.yaml");
    fs::write(
        &template_path,
        serde_yaml::to_string(&ChatTemplate::support_default())?,
    )?;
    println!("Wrote {}", template_path.display());

    let relationships_path = config_dir.join("relationships.yaml");
    fs::write(
        &relationships_path,
        "\
upload_asset:
  - process_id: tag_asset
    transition: \"Once your asset is uploaded, you can tag it for easier discovery.\"
    reason: \"most users tag assets right after uploading\"
default: []
",
    )?;
    println!("Wrote {}", relationships_path.display());

    let sample_path = processes_dir.join("upload_asset.json");
    fs::write(
        &sample_path,
        serde_json::to_string_pretty(&serde_json::json!({
            "title": "Upload an Asset",
            "description": "Add new files to your Assetflow library.",
            "keywords": ["upload", "add file", "import", "new asset"],
            "steps": [
                "Open the folder you want the asset to live in.",
                "Press the Upload button in the top toolbar.",
                "Drag your files into the drop zone, or browse for them.",
                "Press Start Upload and wait for the progress bar to finish."
            ],
            "prerequisites": ["Contributor role or above"],
            "notes": "Large video files may take several minutes to process."
        }))?,
    )?;
    println!("Wrote {}", sample_path.display());

    println!("\nEdit {} and set your API key, then run 'procwise ask'.", config_path.display());
    Ok(())
}
