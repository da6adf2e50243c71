use anyhow::Result;
use colored::*;

use bear_retrieval::Retriever;

pub async fn run(retriever: &Retriever, json: bool) -> Result<()> {
    let tags = retriever.get_tags().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }

    println!("{}", "Bear Tags".bold());
    println!("{}", "=".repeat(60));
    for tag in &tags {
        println!("  #{}", tag.cyan());
    }
    println!();
    println!("Unique tags: {}", tags.len());

    Ok(())
}
