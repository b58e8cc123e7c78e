use anyhow::{bail, Context, Result};
use std::{collections::BTreeMap, env};
use usage_core::{
    db::{save, Collection},
    domain::legacy::LegacyMeterStats,
};
use usage_service::{config::AppConfig, observability, store};

/// Seed meter documents from the flat-file statistics export, a JSON object
/// keyed by meter id.
///
/// Usage:
///   import_legacy_stats <json_file_path>
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: import_legacy_stats <json_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load()?;
    let store = store::connect(&cfg.store).await?;

    let contents = tokio::fs::read_to_string(file_path)
        .await
        .with_context(|| format!("failed to read {file_path}"))?;
    let stats: BTreeMap<String, LegacyMeterStats> = serde_json::from_str(&contents)?;

    let (mut imported, mut rejected) = (0usize, 0usize);
    for (meter_id, legacy) in stats {
        match legacy.into_document() {
            Ok(doc) => {
                save(&store, Collection::Meters, &meter_id, &doc).await?;
                imported += 1;
            }
            Err(e) => {
                tracing::warn!(%meter_id, error = %e, "skipping meter with invalid legacy stats");
                rejected += 1;
            }
        }
    }

    tracing::info!(imported, rejected, "legacy import finished");
    Ok(())
}
