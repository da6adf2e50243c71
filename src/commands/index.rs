//! Index command - Build semantic search index

use anyhow::{Context, Result};
use colored::Colorize;

use bear_retrieval::Retriever;

/// Run index command
pub async fn run(retriever: &Retriever, status_only: bool, json: bool) -> Result<()> {
    if status_only {
        return show_status(retriever, json).await;
    }

    if !json {
        println!("{} Building search index...", "→".dimmed());
    }

    let start = std::time::Instant::now();
    let indexed = retriever
        .reindex()
        .await
        .context("Failed to rebuild the search index")?;
    let duration_ms = start.elapsed().as_millis();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "indexed": indexed,
                "duration_ms": duration_ms,
            })
        );
    } else {
        println!(
            "{} Indexed {} notes in {:.2}s",
            "✓".green().bold(),
            indexed.to_string().cyan(),
            duration_ms as f64 / 1000.0
        );
    }

    Ok(())
}

/// Show index status
async fn show_status(retriever: &Retriever, json: bool) -> Result<()> {
    let status = retriever.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Index Status".bold());
    println!();
    println!("  {} Capability: {:?}", "→".dimmed(), status.capability);
    println!("  {} Model: {}", "→".dimmed(), status.model_id);
    println!(
        "  {} {} notes in Bear",
        "→".dimmed(),
        status.note_count.to_string().cyan()
    );
    match status.indexed_notes {
        Some(count) => println!(
            "  {} {} notes indexed",
            "→".dimmed(),
            count.to_string().cyan()
        ),
        None => println!(
            "  {} Index not found. Run {} first.",
            "!".yellow().bold(),
            "bear-search index".cyan()
        ),
    }
    if let Some(built_at) = status.index_built_at {
        println!("  {} Last indexed: {}", "→".dimmed(), built_at);
    }

    Ok(())
}
