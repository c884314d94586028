use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::answer::AnswerResolver;
use crate::choices::ChoiceNormalizer;
use crate::corpus::{CorpusStore, DEFAULT_PERSIST_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD};
use crate::mathtext::MathProtector;
use crate::model::{GenerationHints, ProblemRecord, ProblemType, VerificationReport};
use crate::recovery::RecoveryEngine;
use crate::score::{QualityScorer, ScoreWeights};
use crate::verify::MathVerifier;

/// Tuning knobs for one pipeline run. Thresholds and weights are empirical
/// constants carried as configuration rather than hard-wired.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub similarity_threshold: f64,
    pub persist_threshold: f64,
    pub verify: bool,
    pub weights: ScoreWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            persist_threshold: DEFAULT_PERSIST_THRESHOLD,
            verify: true,
            weights: ScoreWeights::default(),
        }
    }
}

/// The full recovery-and-validation pass: raw model output in, scored
/// `ProblemRecord` out. Total by construction; every stage degrades to a
/// usable value and records a warning instead of failing. Only the corpus
/// store can surface an error, and that means the store itself is broken.
pub struct Pipeline {
    config: PipelineConfig,
    protector: MathProtector,
    recovery: RecoveryEngine,
    choices: ChoiceNormalizer,
    answers: AnswerResolver,
    verifier: MathVerifier,
    scorer: QualityScorer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            protector: MathProtector::new().context("failed to build math protector")?,
            recovery: RecoveryEngine::new().context("failed to build recovery engine")?,
            choices: ChoiceNormalizer::new().context("failed to build choice normalizer")?,
            answers: AnswerResolver::new().context("failed to build answer resolver")?,
            verifier: MathVerifier::new().context("failed to build verifier")?,
            scorer: QualityScorer::new(config.weights).context("failed to build scorer")?,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process(
        &self,
        raw: &str,
        hints: &GenerationHints,
        store: &mut CorpusStore,
    ) -> Result<ProblemRecord> {
        debug!(problem_type = hints.problem_type.as_str(), "processing raw output");
        let draft = self.recovery.recover(raw, hints);
        let mut warnings = draft.warnings;

        // Free-response problems never carry options, so normalization is
        // skipped and the answer passes through verbatim. Anything the
        // model emitted anyway is dropped with a warning.
        let skip_choices = hints.problem_type == ProblemType::ShortAnswer;
        let choices = if skip_choices {
            if draft.raw_choices.is_some() {
                warnings.push("discarded choices emitted for a free-response problem".to_string());
            }
            Vec::new()
        } else {
            let (choices, choice_warnings) = self.choices.normalize(
                draft.raw_choices.as_ref(),
                &self.protector,
                hints.expected_choice_count,
            );
            warnings.extend(choice_warnings);
            choices
        };

        let (answer, answer_warnings) = self.answers.resolve(draft.raw_answer.as_ref(), &choices);
        warnings.extend(answer_warnings);

        let mut record = ProblemRecord {
            question: draft.question,
            choices,
            answer,
            solution: draft.solution,
            key_concepts: draft.key_concepts,
            topic: hints.topic.clone().or(draft.topic),
            difficulty: hints.difficulty.clone().or(draft.difficulty),
            points: hints.points.or(draft.points),
            quality_score: 0.0,
            is_duplicate: false,
            warnings,
        };

        let report = if self.config.verify {
            self.verifier.verify_record(&record)
        } else {
            VerificationReport::default()
        };
        debug!(
            equation = report.equation.as_str(),
            derivative = report.derivative.as_str(),
            integral = report.integral.as_str(),
            limit = report.limit.as_str(),
            attempted = report.attempted_count(),
            "verification complete"
        );
        for outcome in report.outcomes() {
            if outcome == crate::model::VerificationOutcome::VerifiedFalse {
                record.warn("a symbolic check refuted the stated answer");
                break;
            }
        }

        let assessment = self.scorer.assess(&record, &report);
        if assessment.solution.total < 40.0 {
            record.warn("solution prose scored poorly on structure and clarity");
        }
        if record.topic.is_none() {
            record.topic = assessment.topic.topics.first().map(|topic| topic.to_string());
        }
        if record.difficulty.is_none() {
            record.difficulty = Some(assessment.difficulty.rating.as_str().to_string());
        }

        let decision = store
            .gate(
                &record,
                assessment.base_score,
                self.scorer.weights().uniqueness,
                self.config.similarity_threshold,
                self.config.persist_threshold,
            )
            .context("persistence gate failed")?;

        record.quality_score = decision.final_score;
        record.is_duplicate = decision.is_duplicate;
        if decision.is_duplicate {
            if let Some(nearest) = decision.similar.first() {
                debug!(
                    id = nearest.id,
                    similarity = nearest.similarity,
                    question = %nearest.question,
                    "nearest stored duplicate"
                );
            }
            record.warn(format!(
                "near-duplicate of {} stored problem(s)",
                decision.similar.len()
            ));
        }

        info!(
            score = record.quality_score,
            duplicate = record.is_duplicate,
            persisted = decision.persisted,
            warnings = record.warnings.len(),
            "record processed"
        );

        Ok(record)
    }
}
