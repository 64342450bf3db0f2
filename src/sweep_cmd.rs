//! `intake sweep`: run a keyword sweep and enqueue the resulting tasks.

use anyhow::{Context, Result};
use std::path::Path;

use crate::app::App;
use crate::ingest::{load_monitored_entities, ErrorPolicy, SweepReport};
use crate::models::MonitoredEntity;

pub async fn run_sweep(
    app: &mut App,
    source_types: &[String],
    entities_file: Option<&Path>,
    dry_run: bool,
    fail_fast: bool,
) -> Result<()> {
    let entities = match entities_file {
        Some(path) => read_entities(path)?,
        None => {
            let store = app.store()?;
            load_monitored_entities(
                &store,
                &app.config.store.entities_collection,
                app.config.store.page_size,
            )
            .await?
        }
    };

    let mut policy = if fail_fast {
        ErrorPolicy::fail_fast()
    } else {
        ErrorPolicy::continue_on_error()
    };
    let sweep = app.sweep();

    if dry_run {
        let output = sweep.collect(source_types, &entities, &mut policy).await?;
        println!("sweep {} (dry-run)", source_types.join(","));
        print_report(&output.report, policy.errors());
        for task in &output.tasks {
            println!(
                "  task {} trigger={} linked={}",
                &task.id[..12],
                task.trigger_entity_id().unwrap_or("-"),
                task.linked_entity_ids().join(",")
            );
        }
        return Ok(());
    }

    let store = app.store()?;
    let report = sweep
        .run(&store, source_types, &entities, &mut policy)
        .await?;

    println!("sweep {}", source_types.join(","));
    print_report(&report, policy.errors());
    println!("  tasks written: {}", report.write.written);
    println!("  write failures: {}", report.write.failed);
    println!("ok");
    Ok(())
}

fn read_entities(path: &Path) -> Result<Vec<MonitoredEntity>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entities file: {}", path.display()))?;
    let entities: Vec<MonitoredEntity> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entities file: {}", path.display()))?;
    Ok(entities)
}

fn print_report(report: &SweepReport, errors: usize) {
    println!("  sources queried: {}", report.sources_queried);
    println!("  sources skipped: {}", report.skipped_sources);
    println!("  chunks: {} ({} failed)", report.chunks_issued, report.chunks_failed);
    println!("  items fetched: {}", report.items_fetched);
    println!("  items dropped: {}", report.items_dropped);
    println!("  duplicates: {}", report.duplicates);
    println!("  tasks: {}", report.tasks_built);
    println!("  errors: {}", errors);
}
