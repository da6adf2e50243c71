use std::path::Path;

use colored::Colorize;

pub fn print_install_instructions(config: Option<&Path>) {
    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "bear-search".to_string());

    let args = match config {
        Some(path) => format!(r#"["--config", "{}", "mcp"]"#, path.display()),
        None => r#"["mcp"]"#.to_string(),
    };

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(
        r#"{{
  "mcpServers": {{
    "bear-search": {{
      "command": "{}",
      "args": {}
    }}
  }}
}}"#,
        binary_path, args
    );
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Semantic or keyword note search", "bear_search".green());
    println!("  • {} - Get a note by identifier", "bear_get_note".green());
    println!("  • {} - List all tags", "bear_get_tags".green());
    println!("  • {} - Find notes by id/title fragment", "bear_find_by_partial".green());
    println!("  • {} - Rebuild the semantic index", "bear_reindex".green());
    println!("  • {} - Scored passages for context", "bear_retrieve_for_context".green());
}
