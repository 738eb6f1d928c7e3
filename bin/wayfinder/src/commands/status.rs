use std::path::PathBuf;

use wayfinder_agent::Assistant;

use super::Overrides;

pub async fn run(explicit: Option<PathBuf>) -> anyhow::Result<()> {
    let path = super::config_path(explicit.clone());
    let config = super::load_config(explicit, Overrides::default())?;

    println!("wayfinder status");
    println!("================");
    println!();
    println!(
        "Config:    {} {}",
        path.display(),
        if path.exists() { "✓" } else { "✗ (not found, using defaults)" }
    );

    let assistant = Assistant::new(&config);
    let connected = match assistant.initialize().await {
        Ok(()) => true,
        Err(e) => {
            println!("MCP:       ✗ {} ({})", config.transport.command, e);
            false
        }
    };

    let status = assistant.status().await;
    println!(
        "Backend:   {} {}",
        status.backend_url,
        if status.backend_available { "✓" } else { "✗ (unreachable)" }
    );
    println!("Model:     {}", status.model);
    if connected {
        println!(
            "MCP:       {} {}",
            config.transport.command,
            if status.transport_connected { "✓" } else { "✗" }
        );
    }
    println!("Catalog:   {}", status.capabilities.join(", "));

    assistant.shutdown().await;
    Ok(())
}
