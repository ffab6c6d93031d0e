//! System statistics and health overview.
//!
//! Summarizes the vector collection, the configured providers, and the
//! audit ledger. Used by `vrag stats` to give confidence that ingestion
//! and queries are landing where expected.

use anyhow::Result;

use crate::audit::AuditLedger;
use crate::config::Config;
use crate::generation::create_generator;
use crate::index::open_index;

/// Run the stats command: gather collection and ledger state and print
/// a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let index = open_index(&config.index)?;
    let info = index.info().await?;

    println!("System Statistics:");
    println!("{}", "=".repeat(50));
    println!();
    println!("  Collection:   {} ({})", info.name, info.status);
    println!("  Points:       {}", info.point_count);
    println!("  Vectors:      {}", info.vector_count);
    println!();
    println!(
        "  Embedding:    {} ({} dims, {} provider)",
        config.embedding.model, config.embedding.dims, config.embedding.provider
    );

    if config.generation.provider == "disabled" {
        println!("  Generation:   disabled");
    } else {
        let generator = create_generator(&config.generation)?;
        let reachability = if generator.is_available().await {
            "available"
        } else {
            "unreachable"
        };
        println!(
            "  Generation:   {} ({} provider, {})",
            generator.model_name(),
            config.generation.provider,
            reachability
        );
    }

    let ledger = AuditLedger::open(&config.audit)?;
    let stats = ledger.statistics()?;

    println!();
    println!("  Audit log:    {}", config.audit.log_file.display());
    println!("  Events:       {}", stats.total_events);
    if !stats.by_category.is_empty() {
        println!("  By category:  {}", format_counts(&stats.by_category));
    }
    if !stats.by_type.is_empty() {
        println!("  By type:      {}", format_counts(&stats.by_type));
    }
    if let (Some(first), Some(last)) = (stats.first_event, stats.last_event) {
        println!(
            "  Span:         {} .. {}",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("{}", "=".repeat(50));
    Ok(())
}

fn format_counts(counts: &std::collections::BTreeMap<String, u64>) -> String {
    counts
        .iter()
        .map(|(name, count)| format!("{}={}", name, count))
        .collect::<Vec<_>>()
        .join(", ")
}
