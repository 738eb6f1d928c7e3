use std::io::{self, Write};
use std::path::PathBuf;

use wayfinder_core::Config;

pub async fn run(explicit: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = super::config_path(explicit);

    if path.exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    Config::default().save(&path)?;
    println!("✓ Created config: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to point at your model server and MCP command", path.display());
    println!("  2. Run `wayfinder status` to verify the setup");
    println!("  3. Run `wayfinder chat` to start asking questions");

    Ok(())
}
