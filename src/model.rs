use serde::{Deserialize, Serialize};

/// Canonical structured problem produced by the recovery pipeline.
///
/// Invariant: when `choices` is non-empty it holds exactly five options and
/// `answer` is an exact textual member of it. `warnings` is append-only and
/// records every degradation applied while building the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub question: String,
    pub choices: Vec<String>,
    pub answer: String,
    pub solution: String,
    pub key_concepts: Vec<String>,
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<u32>,
    pub quality_score: f64,
    pub is_duplicate: bool,
    pub warnings: Vec<String>,
}

impl ProblemRecord {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProblemType {
    MultipleChoice,
    ShortAnswer,
}

impl ProblemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple-choice",
            Self::ShortAnswer => "short-answer",
        }
    }
}

/// Caller-supplied hints about the requested problem shape. Metadata fields
/// are copied onto the record as-is; `expected_choice_count` drives the
/// normalizer's pad/truncate target.
#[derive(Debug, Clone)]
pub struct GenerationHints {
    pub problem_type: ProblemType,
    pub expected_choice_count: usize,
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<u32>,
}

impl Default for GenerationHints {
    fn default() -> Self {
        Self {
            problem_type: ProblemType::MultipleChoice,
            expected_choice_count: 5,
            topic: None,
            difficulty: None,
            points: None,
        }
    }
}

/// Tri-state advisory outcome of one symbolic check.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    VerifiedTrue,
    VerifiedFalse,
    NotAttempted,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerifiedTrue => "verified-true",
            Self::VerifiedFalse => "verified-false",
            Self::NotAttempted => "not-attempted",
        }
    }

    pub fn from_equality(equal: Option<bool>) -> Self {
        match equal {
            Some(true) => Self::VerifiedTrue,
            Some(false) => Self::VerifiedFalse,
            None => Self::NotAttempted,
        }
    }
}

/// Per-record verification summary, consumed by the scorer and discarded.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub equation: VerificationOutcome,
    pub derivative: VerificationOutcome,
    pub integral: VerificationOutcome,
    pub limit: VerificationOutcome,
}

impl Default for VerificationReport {
    fn default() -> Self {
        Self {
            equation: VerificationOutcome::NotAttempted,
            derivative: VerificationOutcome::NotAttempted,
            integral: VerificationOutcome::NotAttempted,
            limit: VerificationOutcome::NotAttempted,
        }
    }
}

impl VerificationReport {
    pub fn outcomes(&self) -> [VerificationOutcome; 4] {
        [self.equation, self.derivative, self.integral, self.limit]
    }

    /// A record is treated as valid when no attempted check failed. A report
    /// where every check was skipped still counts as valid: verification is
    /// advisory and must never penalize prose the parser cannot read.
    pub fn overall_valid(&self) -> bool {
        !self
            .outcomes()
            .iter()
            .any(|outcome| *outcome == VerificationOutcome::VerifiedFalse)
    }

    pub fn attempted_count(&self) -> usize {
        self.outcomes()
            .iter()
            .filter(|outcome| **outcome != VerificationOutcome::NotAttempted)
            .count()
    }
}

/// Persisted corpus row. Created only by the persistence gate; never mutated
/// or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub quality_score: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub total_problems: i64,
    pub difficulty_distribution: Vec<(String, i64)>,
    pub topic_distribution: Vec<(String, i64)>,
    pub average_quality: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_outcome_labels_are_stable() {
        assert_eq!(VerificationOutcome::VerifiedTrue.as_str(), "verified-true");
        assert_eq!(
            VerificationOutcome::VerifiedFalse.as_str(),
            "verified-false"
        );
        assert_eq!(VerificationOutcome::NotAttempted.as_str(), "not-attempted");
    }

    #[test]
    fn report_with_only_skipped_checks_is_valid() {
        let report = VerificationReport::default();
        assert!(report.overall_valid());
        assert_eq!(report.attempted_count(), 0);
    }

    #[test]
    fn report_with_failed_check_is_invalid() {
        let report = VerificationReport {
            equation: VerificationOutcome::VerifiedFalse,
            ..VerificationReport::default()
        };
        assert!(!report.overall_valid());
        assert_eq!(report.attempted_count(), 1);
    }
}
