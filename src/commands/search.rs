//! Search command - semantic search with keyword fallback

use anyhow::Result;
use colored::Colorize;

use bear_retrieval::core::note::truncate;
use bear_retrieval::search::engine::DEFAULT_SEARCH_LIMIT;
use bear_retrieval::{Retriever, Strategy};

/// Run search command
pub async fn run(
    retriever: &Retriever,
    query: &str,
    limit: Option<usize>,
    keyword: bool,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let outcome = retriever.search(query, limit, !keyword).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if outcome.strategy == Strategy::Keyword && !keyword {
        println!(
            "{} Using keyword search (semantic index not available)",
            "!".yellow()
        );
        println!();
    }

    if outcome.hits.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}",
        "→".dimmed(),
        outcome.hits.len(),
        query.cyan()
    );
    println!();

    for (i, hit) in outcome.hits.iter().enumerate() {
        let label = match hit.score {
            Some(score) => {
                let score_str = format!("{:.2}", score);
                if score > 0.8 {
                    score_str.green()
                } else if score > 0.6 {
                    score_str.yellow()
                } else {
                    score_str.dimmed()
                }
            }
            None => hit.note.modified.format("%Y-%m-%d").to_string().dimmed(),
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            label,
            hit.note.title.cyan()
        );

        let preview = truncate(hit.note.body.trim(), 100).replace('\n', " ");
        if !preview.is_empty() {
            println!("   {}", preview.dimmed());
        }
        if !hit.note.tags.is_empty() {
            println!("   #{}", hit.note.tags.join(" #"));
        }
        println!();
    }

    Ok(())
}
