use std::path::PathBuf;

use wayfinder_agent::Assistant;

use super::Overrides;

/// Print the local catalog, then what the running service reports.
pub async fn run(explicit: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(explicit, Overrides::default())?;
    let assistant = Assistant::new(&config);

    println!();
    println!("🔧 Catalog ({} capabilities)", assistant.catalog().entries().len());
    println!();
    for desc in assistant.catalog().entries() {
        let params: Vec<String> = desc
            .parameters
            .iter()
            .map(|p| if p.required { format!("{}*", p.name) } else { p.name.clone() })
            .collect();
        println!("     {:<18} {}", desc.name, desc.description);
        if !params.is_empty() {
            println!("     {:<18} params: {}", "", params.join(", "));
        }
    }
    println!();

    let remote = assistant.list_capabilities().await;
    if remote.is_empty() {
        println!("  Service offered no capabilities (is `{}` runnable?)", config.transport.command);
    } else {
        println!("  📡 Service ({})", remote.len());
        for cap in &remote {
            let desc = cap.description.as_deref().unwrap_or("");
            let short_desc: String = desc.chars().take(60).collect();
            let ellipsis = if desc.chars().count() > 60 { "..." } else { "" };
            let marker = if assistant.catalog().is_known(&cap.name) { " " } else { "?" };
            println!("   {} {:<22} {}{}", marker, cap.name, short_desc, ellipsis);
        }
    }
    println!();

    assistant.shutdown().await;
    Ok(())
}
