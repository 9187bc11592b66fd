use anyhow::{bail, Context, Result};
use clap::Parser;
use newsletter_podcast_lib::cli::{Cli, Commands};
use newsletter_podcast_lib::commands::{self, CreateEpisodeRequest, ImportNewsletterRequest};
use newsletter_podcast_lib::config::Config;
use newsletter_podcast_lib::database::EpisodeStatus;
use newsletter_podcast_lib::{init_logging, AppState};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = Config::load(Some(cli.config.as_path()))?;
    let state = AppState::new(config)?;

    match cli.command {
        Commands::Generate {
            text,
            file,
            newsletter,
            poll_interval,
        } => {
            let text = match file {
                Some(path) => Some(read_source_file(&path)?),
                None => text,
            };
            generate(&state, text, newsletter, Duration::from_secs(poll_interval.max(1))).await?;
        }
        Commands::Status { id } => {
            print_json(&commands::get_episode(&state, &id).await?)?;
        }
        Commands::List => {
            print_json(&commands::list_episodes(&state).await?)?;
        }
        Commands::Audio { id } => {
            let path = commands::get_episode_audio(&state, &id).await?;
            println!("{}", path.display());
        }
        Commands::Import {
            file,
            sender,
            subject,
        } => {
            let content = read_source_file(&file)?;
            let newsletter = commands::import_newsletter(
                &state,
                ImportNewsletterRequest {
                    content,
                    sender,
                    subject,
                },
            )
            .await?;
            print_json(&newsletter)?;
        }
        Commands::Newsletters => {
            print_json(&commands::list_newsletters(&state).await?)?;
        }
        Commands::Reconcile => {
            let count = commands::reconcile_episodes(&state).await?;
            println!("{} episode(s) marked as errored", count);
        }
    }

    Ok(())
}

fn read_source_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Create an episode, then poll its record and print every status change
/// until it reaches a terminal status.
async fn generate(
    state: &AppState,
    text: Option<String>,
    newsletter_ids: Vec<String>,
    poll_interval: Duration,
) -> Result<()> {
    let meta = commands::create_episode(
        state,
        CreateEpisodeRequest {
            text,
            newsletter_ids,
        },
    )
    .await?;
    println!("Episode {}: {}", meta.id, meta.status);

    let mut last = (meta.status, meta.current_segment);
    let final_meta = loop {
        tokio::time::sleep(poll_interval).await;
        let detail = commands::get_episode(state, &meta.id).await?;
        let current = (detail.meta.status, detail.meta.current_segment);
        if current != last {
            match (detail.meta.status, detail.meta.total_segments) {
                (EpisodeStatus::GeneratingAudio, Some(total)) => println!(
                    "Episode {}: {} ({}/{})",
                    meta.id,
                    detail.meta.status,
                    detail.meta.current_segment.unwrap_or(0),
                    total
                ),
                _ => println!("Episode {}: {}", meta.id, detail.meta.status),
            }
            last = current;
        }
        if detail.meta.status.is_terminal() {
            break detail.meta;
        }
    };

    state.runner.wait().await;

    if final_meta.status == EpisodeStatus::Error {
        bail!(
            "Episode {} failed: {}",
            final_meta.id,
            final_meta.error.unwrap_or_default()
        );
    }

    println!("Title: {}", final_meta.title);
    println!("Duration: {:.1}s", final_meta.duration.unwrap_or(0.0));
    let audio = commands::get_episode_audio(state, &final_meta.id).await?;
    println!("Audio: {}", audio.display());
    Ok(())
}
