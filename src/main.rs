use anyhow::Result;
use chapterflow::chapters::ChapterPipeline;
use chapterflow::cli::{Cli, Commands, ConfigAction, log_filter};
use chapterflow::config::Config;
use chapterflow::engine::{EngineConfig, EngineEvent, EngineObserver, NullObserver, StallReport};
use chapterflow::error::EngineError;
use chapterflow::replay::{ReplayOptions, ReplaySummary, Script, replay};
use chapterflow::sync::PositionSynchronizer;
use chapterflow::timeline::WordTimeline;
use clap::Parser;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Timeline { file } => {
            let config = load_config(cli.config.as_deref())?;
            handle_timeline(&file, &config, cli.json)?;
        }
        Commands::Locate { file, at } => {
            let config = load_config(cli.config.as_deref())?;
            handle_locate(&file, at, &config, cli.json)?;
        }
        Commands::Replay {
            file,
            tick,
            stall_at,
        } => {
            let config = load_config(cli.config.as_deref())?;
            handle_replay(&file, tick, stall_at, &config, cli.json, cli.quiet)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbose, quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/chapterflow/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top, then the result is validated.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        if !path.exists() {
            return Err(EngineError::ConfigFileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn build(file: &Path, config: &Config) -> Result<(ChapterPipeline, WordTimeline)> {
    let script = Script::load(file)?;
    let (pipeline, timeline, rejected) =
        script.build_timeline(EngineConfig::from(config).pipeline);
    for error in rejected {
        eprintln!("{} {}", "warning:".yellow(), error);
    }
    Ok((pipeline, timeline))
}

fn handle_timeline(file: &Path, config: &Config, as_json: bool) -> Result<()> {
    let (pipeline, timeline) = build(file, config)?;

    if as_json {
        let chapters: Vec<_> = pipeline
            .chapters()
            .map(|chapter| {
                json!({
                    "chapter": chapter,
                    "prefetch_threshold": pipeline.threshold_for(chapter),
                })
            })
            .collect();
        let output = json!({
            "chapters": chapters,
            "words": timeline.spans(),
            "total_duration": pipeline.total_duration(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{} chapters, {} words, {:.3}s",
        pipeline.chapter_count(),
        timeline.len(),
        pipeline.total_duration()
    );
    for chapter in pipeline.chapters() {
        let prefetch = match pipeline.threshold_for(chapter) {
            Some(t) => format!("prefetch at {t:.3}s"),
            None => "last".to_string(),
        };
        println!(
            "  {} {:>3}  {:>9.3}s .. {:>9.3}s  {:<22} {}",
            "chapter".bold(),
            chapter.number,
            chapter.start_offset,
            chapter.end_offset(),
            prefetch.cyan(),
            chapter.title.as_deref().unwrap_or("").dimmed()
        );
    }
    println!();
    for (index, word) in timeline.spans().iter().enumerate() {
        let marker = if word.is_marker() { "*" } else { " " };
        println!(
            "  [{:>5}] {:>9.3} .. {:>9.3} {} ch{:<3} {}",
            index,
            word.start,
            word.end,
            marker.yellow(),
            word.chapter_number,
            word.text
        );
    }
    Ok(())
}

fn handle_locate(file: &Path, at: f64, config: &Config, as_json: bool) -> Result<()> {
    let (pipeline, timeline) = build(file, config)?;
    let mut sync = PositionSynchronizer::new(EngineConfig::from(config).sync);
    sync.on_position_tick(at, &timeline);

    let word = sync
        .current_index()
        .and_then(|index| timeline.get(index).map(|span| (index, span)));
    let chapter = pipeline.chapter_at(at);

    if as_json {
        let output = json!({
            "position": at,
            "index": word.map(|(index, _)| index),
            "word": word.map(|(_, span)| span),
            "chapter": chapter.map(|c| c.number),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match word {
        Some((index, span)) => println!(
            "{:.3}s -> [{}] {} ({:.3} .. {:.3}, chapter {})",
            at,
            index,
            span.text.green().bold(),
            span.start,
            span.end,
            span.chapter_number
        ),
        None => println!("{:.3}s -> {}", at, "no word".dimmed()),
    }
    if chapter.is_none() && at >= pipeline.total_duration() {
        println!("{}", "position is past the received audio".yellow());
    }
    Ok(())
}

/// Prints engine events as they happen.
struct PrintObserver {
    json: bool,
}

impl EngineObserver for PrintObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "event not serializable"),
            }
            return;
        }
        match event {
            EngineEvent::WordChanged(word) => {
                println!("  {:>9.3}  {}", word.start, word.text)
            }
            EngineEvent::StateChanged(change) => {
                println!("{} {} -> {}", "state".cyan(), change.from, change.to.bold())
            }
            EngineEvent::ChapterBoundary { chapter_number } => {
                println!("{} {}", "chapter".bold(), chapter_number)
            }
            EngineEvent::ChapterAccepted(chapter) => println!(
                "{} chapter {} at {:.3}s ({} words)",
                "received".green(),
                chapter.number,
                chapter.start_offset,
                chapter.word_count
            ),
            EngineEvent::ChapterRequested { chapter_number } => {
                println!("{} chapter {}", "request".blue(), chapter_number)
            }
            EngineEvent::Stall(StallReport::Started { position }) => {
                println!("{} at {:?}", "stalled".yellow(), position)
            }
            EngineEvent::Stall(StallReport::Recovered { position }) => {
                println!("{} at {:?}", "recovered".green(), position)
            }
            EngineEvent::Stall(StallReport::Unrecovered { position }) => {
                println!("{} at {:.3}", "stall not recovered".red(), position)
            }
        }
    }
}

fn handle_replay(
    file: &Path,
    tick: Duration,
    stall_at: Option<f64>,
    config: &Config,
    as_json: bool,
    quiet: bool,
) -> Result<()> {
    let script = Script::load(file)?;
    let options = ReplayOptions {
        tick,
        stall_at,
        ..ReplayOptions::default()
    };
    let observer: Box<dyn EngineObserver> = if quiet {
        Box::new(NullObserver)
    } else {
        Box::new(PrintObserver { json: as_json })
    };

    let summary = replay(&script, EngineConfig::from(config), options, observer);
    print_summary(&summary, as_json)
}

fn print_summary(summary: &ReplaySummary, as_json: bool) -> Result<()> {
    if as_json {
        let output = json!({
            "final_state": summary.final_state,
            "final_position": summary.final_position,
            "virtual_elapsed_secs": summary.virtual_elapsed.as_secs_f64(),
            "words_highlighted": summary.words_highlighted(),
            "chapters_requested": summary.chapters_requested(),
            "stalls": summary.stalls(),
            "unrecovered_stalls": summary.unrecovered_stalls(),
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!();
    println!(
        "{} {} at {:.3}s after {} of virtual time",
        "finished:".bold(),
        summary.final_state,
        summary.final_position,
        humantime::format_duration(summary.virtual_elapsed)
    );
    println!(
        "  {} words, chapters requested {:?}, {} stall(s), {} unrecovered",
        summary.words_highlighted(),
        summary.chapters_requested(),
        summary.stalls(),
        summary.unrecovered_stalls()
    );
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
