use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{ProblemKind, RecoverArgs};
use crate::corpus::CorpusStore;
use crate::model::{GenerationHints, ProblemType};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::util::{ensure_directory, write_json_pretty};

pub fn run(args: RecoverArgs) -> Result<()> {
    let raw = read_input(&args)?;

    let hints = GenerationHints {
        problem_type: match args.problem_type {
            ProblemKind::MultipleChoice => ProblemType::MultipleChoice,
            ProblemKind::ShortAnswer => ProblemType::ShortAnswer,
        },
        expected_choice_count: args.choice_count,
        topic: args.topic.clone(),
        difficulty: args.difficulty.clone(),
        points: args.points,
    };

    let config = PipelineConfig {
        similarity_threshold: args.similarity_threshold,
        persist_threshold: args.persist_threshold,
        verify: !args.skip_verify,
        ..PipelineConfig::default()
    };

    ensure_directory(&args.cache_root)?;
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("corpus.sqlite"));
    let mut store = CorpusStore::open(&db_path)?;
    let pipeline = Pipeline::new(config)?;

    let record = pipeline.process(&raw, &hints, &mut store)?;

    info!(
        score = record.quality_score,
        duplicate = record.is_duplicate,
        warnings = record.warnings.len(),
        "recovery complete"
    );

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &record)?;
            info!(path = %path.display(), "wrote recovered record");
        }
        None => {
            let json = serde_json::to_string_pretty(&record)
                .context("failed to serialize recovered record")?;
            println!("{json}");
        }
    }

    Ok(())
}

fn read_input(args: &RecoverArgs) -> Result<String> {
    match &args.input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read raw input from stdin")?;
            Ok(buffer)
        }
    }
}
