use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::corpus::CorpusStore;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args
        .db_path
        .unwrap_or_else(|| args.cache_root.join("corpus.sqlite"));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "corpus database missing");
        return Ok(());
    }

    let store = CorpusStore::open(&db_path)?;
    let stats = store.stats()?;

    info!(
        path = %db_path.display(),
        total_problems = stats.total_problems,
        average_quality = stats.average_quality,
        "corpus status"
    );

    for (difficulty, count) in &stats.difficulty_distribution {
        info!(difficulty = %difficulty, count, "difficulty bucket");
    }
    for (topic, count) in &stats.topic_distribution {
        info!(topic = %topic, count, "topic bucket");
    }

    if let Some(latest) = store.entries()?.last() {
        info!(
            id = latest.id,
            question = %latest.question,
            quality_score = latest.quality_score,
            created_at = %latest.created_at,
            "latest stored problem"
        );
    }

    Ok(())
}
