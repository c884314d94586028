use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::model::{ProblemRecord, VerificationReport};

/// Relative contribution of each quality signal to the aggregate score.
/// The values are empirical; callers may tune them.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub verification: f64,
    pub solution: f64,
    pub difficulty: f64,
    pub topic: f64,
    pub uniqueness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            verification: 30.0,
            solution: 25.0,
            difficulty: 20.0,
            topic: 15.0,
            uniqueness: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyRating {
    Easy,
    Medium,
    Hard,
}

impl DifficultyRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DifficultyAnalysis {
    pub score: f64,
    pub rating: DifficultyRating,
    pub confidence: f64,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopicAnalysis {
    pub topics: Vec<&'static str>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SolutionQuality {
    pub structure: f64,
    pub clarity: f64,
    pub completeness: f64,
    pub total: f64,
}

/// Everything the persistence gate needs except the uniqueness signal,
/// which only the corpus store can supply.
#[derive(Debug, Clone)]
pub struct QualityAssessment {
    pub base_score: f64,
    pub solution: SolutionQuality,
    pub difficulty: DifficultyAnalysis,
    pub topic: TopicAnalysis,
}

/// Scores solution prose on structure, clarity, and completeness, each on
/// a 0..=100 scale.
pub struct SolutionQualityChecker {
    step_marker_regex: Regex,
    sentence_split_regex: Regex,
    math_symbol_regex: Regex,
    non_prose_regex: Regex,
}

const KEY_IDEA_MARKERS: &[&str] = &["key idea", "idea", "point", "important", "observe"];
const CONCLUSION_MARKERS: &[&str] = &["therefore", "thus", "hence", "in conclusion", "note"];
const LONG_SENTENCE_CHARS: usize = 150;
const MIN_SOLUTION_CHARS: usize = 50;

impl SolutionQualityChecker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            step_marker_regex: Regex::new(r"(?i)\d+\.|[①②③④⑤⑥⑦⑧⑨⑩]|step\s*\d+|\[\d+\]")
                .context("failed to compile step marker regex")?,
            sentence_split_regex: Regex::new(r"[.!?]")
                .context("failed to compile sentence split regex")?,
            math_symbol_regex: Regex::new(r"[+\-*/=<>∫∑√π]")
                .context("failed to compile math symbol regex")?,
            non_prose_regex: Regex::new(r"[+\-*/=<>∫∑√π\d\s]")
                .context("failed to compile non-prose regex")?,
        })
    }

    pub fn analyze(&self, solution: &str) -> SolutionQuality {
        let structure = self.structure_score(solution);
        let clarity = self.clarity_score(solution);
        let completeness = self.completeness_score(solution);
        SolutionQuality {
            structure,
            clarity,
            completeness,
            total: structure * 0.4 + clarity * 0.3 + completeness * 0.3,
        }
    }

    /// Step markers, a stated key idea, and a conclusion each earn a share.
    fn structure_score(&self, solution: &str) -> f64 {
        let lowered = solution.to_lowercase();
        let mut score: f64 = 0.0;
        if self.step_marker_regex.is_match(solution) {
            score += 40.0;
        }
        if KEY_IDEA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            score += 30.0;
        }
        if CONCLUSION_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            score += 30.0;
        }
        score.min(100.0)
    }

    /// Starts from a base score and deducts for run-on sentences and for
    /// mixing glyph and ASCII operator spellings.
    fn clarity_score(&self, solution: &str) -> f64 {
        let mut score = 80.0;

        let long_sentences = self
            .sentence_split_regex
            .split(solution)
            .filter(|sentence| sentence.trim().chars().count() > LONG_SENTENCE_CHARS)
            .count();
        score -= long_sentences as f64 * 10.0;

        let mixed_multiplication = solution.contains('×') && solution.contains('*');
        let mixed_division = solution.contains('÷') && solution.contains('/');
        if mixed_multiplication || mixed_division {
            score -= 15.0;
        }

        score.max(0.0)
    }

    /// Penalizes terse solutions and a lopsided symbol-to-prose ratio.
    fn completeness_score(&self, solution: &str) -> f64 {
        let mut score: f64 = 80.0;

        if solution.trim().chars().count() < MIN_SOLUTION_CHARS {
            score -= 30.0;
        }

        let math_chars = self.math_symbol_regex.find_iter(solution).count() as f64;
        let prose_chars = self.non_prose_regex.replace_all(solution, "").chars().count() as f64;
        if prose_chars < math_chars * 0.5 {
            score -= 20.0;
        } else if math_chars < prose_chars * 0.1 {
            score -= 15.0;
        }

        score.max(0.0)
    }
}

/// Estimates how demanding a problem is from its prose length and the
/// mathematical machinery it exercises.
pub struct DifficultyAnalyzer {
    pattern_weights: Vec<(Regex, f64, &'static str)>,
}

const LONG_SOLUTION_WORDS: usize = 200;
const MEDIUM_SOLUTION_WORDS: usize = 100;
const HARD_VOCABULARY: &[&str] = &[
    "maximum",
    "minimum",
    "inverse function",
    "composite",
    "parameter",
    "conditional probability",
    "necessary and sufficient",
];
const PROOF_MARKERS: &[&str] = &["prove", "show that"];
const MEDIUM_THRESHOLD: f64 = 2.0;
const HARD_THRESHOLD: f64 = 4.0;

impl DifficultyAnalyzer {
    pub fn new() -> Result<Self> {
        let catalogue: [(&str, f64, &str); 8] = [
            (r"∫.*d[xt]", 1.2, "integral"),
            (r"lim.*(→|->)", 1.3, "limit"),
            (r"d/dx|f'", 1.0, "derivative"),
            (r"sin|cos|tan", 0.8, "trigonometry"),
            (r"log|ln", 0.7, "logarithm"),
            (r"√|sqrt", 0.5, "root"),
            (r"\^[3-9]", 1.1, "high-degree term"),
            (r"σ|μ|∑", 1.5, "statistics"),
        ];
        let mut pattern_weights = Vec::with_capacity(catalogue.len());
        for (pattern, weight, label) in catalogue {
            let regex = Regex::new(pattern)
                .with_context(|| format!("failed to compile difficulty pattern for {label}"))?;
            pattern_weights.push((regex, weight, label));
        }
        Ok(Self { pattern_weights })
    }

    pub fn analyze(&self, question: &str, solution: &str) -> DifficultyAnalysis {
        let mut score = 1.0;
        let mut factors = Vec::new();
        let combined = format!("{question} {solution}");
        let lowered = combined.to_lowercase();

        let solution_words = solution.split_whitespace().count();
        if solution_words > LONG_SOLUTION_WORDS {
            score += 1.5;
            factors.push(format!("long solution ({solution_words} words)"));
        } else if solution_words > MEDIUM_SOLUTION_WORDS {
            score += 0.8;
            factors.push(format!("medium solution ({solution_words} words)"));
        }

        for (regex, weight, label) in &self.pattern_weights {
            if regex.is_match(&combined) {
                score += weight;
                factors.push(format!("{label} (+{weight})"));
            }
        }

        for term in HARD_VOCABULARY {
            if lowered.contains(term) {
                score += 1.2;
                factors.push(format!("advanced vocabulary: {term}"));
            }
        }

        if PROOF_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            score += 2.0;
            factors.push("proof problem".to_string());
        }

        let rating = if score < MEDIUM_THRESHOLD {
            DifficultyRating::Easy
        } else if score < HARD_THRESHOLD {
            DifficultyRating::Medium
        } else {
            DifficultyRating::Hard
        };

        DifficultyAnalysis {
            score,
            rating,
            confidence: 0.8,
            factors,
        }
    }
}

/// Keyword families used to tag a question with its mathematical area.
const TOPIC_FAMILIES: &[(&str, &[&str])] = &[
    (
        "calculus",
        &[
            "derivative", "tangent", "rate of change", "f'", "d/dx", "integral", "∫", "area",
            "volume", "lim", "limit", "continuous",
        ],
    ),
    (
        "probability-statistics",
        &[
            "probability",
            "event",
            "sample space",
            "mean",
            "variance",
            "standard deviation",
            "σ",
            "μ",
            "combination",
            "permutation",
        ],
    ),
    (
        "geometry",
        &[
            "triangle", "circle", "line", "coordinate", "vector", "dot product", "sphere",
            "plane",
        ],
    ),
    (
        "algebra",
        &["equation", "polynomial", "factor", "inequality", "root"],
    ),
    (
        "sequences",
        &["sequence", "series", "recurrence", "arithmetic progression", "geometric progression"],
    ),
];

/// Tags a question with the topic families its keywords hit. No machinery
/// beyond substring matching; low confidence when nothing matches.
pub struct TopicClassifier;

impl TopicClassifier {
    pub fn classify(&self, question: &str) -> TopicAnalysis {
        let lowered = question.to_lowercase();
        let topics: Vec<&'static str> = TOPIC_FAMILIES
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|(family, _)| *family)
            .collect();
        let confidence = if topics.is_empty() { 0.3 } else { 0.9 };
        TopicAnalysis { topics, confidence }
    }
}

/// Aggregates every quality signal except uniqueness, which the corpus
/// store contributes at the persistence gate.
pub struct QualityScorer {
    solution_checker: SolutionQualityChecker,
    difficulty_analyzer: DifficultyAnalyzer,
    topic_classifier: TopicClassifier,
    weights: ScoreWeights,
}

impl QualityScorer {
    pub fn new(weights: ScoreWeights) -> Result<Self> {
        Ok(Self {
            solution_checker: SolutionQualityChecker::new()?,
            difficulty_analyzer: DifficultyAnalyzer::new()?,
            topic_classifier: TopicClassifier,
            weights,
        })
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    pub fn assess(&self, record: &ProblemRecord, report: &VerificationReport) -> QualityAssessment {
        let solution = self.solution_checker.analyze(&record.solution);
        let difficulty = self
            .difficulty_analyzer
            .analyze(&record.question, &record.solution);
        let topic = self.topic_classifier.classify(&record.question);

        let mut base_score = 0.0;
        if report.overall_valid() {
            base_score += self.weights.verification;
        }
        base_score += solution.total / 100.0 * self.weights.solution;
        base_score += difficulty.confidence * self.weights.difficulty;
        base_score += topic.confidence * self.weights.topic;

        debug!(
            base_score,
            solution_structure = solution.structure,
            solution_clarity = solution.clarity,
            solution_completeness = solution.completeness,
            difficulty = difficulty.rating.as_str(),
            difficulty_score = difficulty.score,
            difficulty_factors = difficulty.factors.len(),
            "quality assessed"
        );

        QualityAssessment {
            base_score,
            solution,
            difficulty,
            topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationOutcome;

    fn checker() -> SolutionQualityChecker {
        SolutionQualityChecker::new().expect("regexes compile")
    }

    const STRUCTURED_SOLUTION: &str = "1. The key idea is to factor the quadratic. \
        2. Set x^2 - 4 = (x-2)(x+2) = 0. \
        Therefore the positive root is x = 2.";

    #[test]
    fn structured_solution_earns_full_structure_score() {
        let quality = checker().analyze(STRUCTURED_SOLUTION);
        assert_eq!(quality.structure, 100.0);
    }

    #[test]
    fn unstructured_solution_earns_nothing_for_structure() {
        let quality = checker().analyze("just plug in numbers until it works somehow");
        assert_eq!(quality.structure, 0.0);
    }

    #[test]
    fn mixed_operator_spellings_cost_clarity() {
        let clean = checker().analyze("compute 2 * 3 and then 6 / 2 to finish the argument");
        let mixed = checker().analyze("compute 2 × 3 * 4 and then 6 ÷ 2 / 1 to finish it");
        assert_eq!(clean.clarity, 80.0);
        assert_eq!(mixed.clarity, 65.0);
    }

    #[test]
    fn short_solution_costs_completeness() {
        let quality = checker().analyze("x = 2");
        assert!(quality.completeness <= 50.0);
    }

    #[test]
    fn total_is_the_weighted_mix() {
        let quality = checker().analyze(STRUCTURED_SOLUTION);
        let expected = quality.structure * 0.4 + quality.clarity * 0.3 + quality.completeness * 0.3;
        assert!((quality.total - expected).abs() < 1e-9);
    }

    #[test]
    fn calculus_machinery_raises_difficulty() {
        let analyzer = DifficultyAnalyzer::new().expect("patterns compile");
        let easy = analyzer.analyze("What is 2 + 2?", "Add the numbers.");
        let hard = analyzer.analyze(
            "Evaluate ∫ x^3 dx and lim x→0 sin(x)/x, then prove the result.",
            "Use the power rule and the squeeze argument with sin and cos.",
        );
        assert_eq!(easy.rating, DifficultyRating::Easy);
        assert_eq!(hard.rating, DifficultyRating::Hard);
        assert!(hard.score > easy.score);
    }

    #[test]
    fn topic_classifier_tags_and_reports_confidence() {
        let classifier = TopicClassifier;
        let tagged = classifier.classify("Find the derivative of f(x) = x^2 at the tangent point");
        assert!(tagged.topics.contains(&"calculus"));
        assert_eq!(tagged.confidence, 0.9);

        let untagged = classifier.classify("A question about nothing in particular");
        assert!(untagged.topics.is_empty());
        assert_eq!(untagged.confidence, 0.3);
    }

    #[test]
    fn verified_record_outscores_unverified_twin() {
        let scorer = QualityScorer::new(ScoreWeights::default()).expect("scorer builds");
        let record = ProblemRecord {
            question: "Solve x^2 - 4 = 0 for the positive root.".to_string(),
            choices: vec!["1".into(), "2".into(), "3".into(), "4".into(), "5".into()],
            answer: "2".to_string(),
            solution: STRUCTURED_SOLUTION.to_string(),
            key_concepts: vec!["quadratic equations".to_string()],
            topic: None,
            difficulty: None,
            points: None,
            quality_score: 0.0,
            is_duplicate: false,
            warnings: Vec::new(),
        };

        let mut verified = VerificationReport::default();
        verified.equation = VerificationOutcome::VerifiedTrue;
        let mut refuted = VerificationReport::default();
        refuted.equation = VerificationOutcome::VerifiedFalse;

        let with_verification = scorer.assess(&record, &verified);
        let without = scorer.assess(&record, &refuted);
        assert!((with_verification.base_score - without.base_score - 30.0).abs() < 1e-9);
    }

    #[test]
    fn base_score_never_exceeds_the_non_uniqueness_budget() {
        let weights = ScoreWeights::default();
        let scorer = QualityScorer::new(weights).expect("scorer builds");
        let record = ProblemRecord {
            question: "Evaluate ∫ x dx from 0 to 1 for the area under the line.".to_string(),
            choices: Vec::new(),
            answer: "1/2".to_string(),
            solution: STRUCTURED_SOLUTION.to_string(),
            key_concepts: Vec::new(),
            topic: None,
            difficulty: None,
            points: None,
            quality_score: 0.0,
            is_duplicate: false,
            warnings: Vec::new(),
        };
        let mut report = VerificationReport::default();
        report.integral = VerificationOutcome::VerifiedTrue;

        let assessment = scorer.assess(&record, &report);
        let budget = weights.verification + weights.solution + weights.difficulty + weights.topic;
        assert!(assessment.base_score <= budget + 1e-9);
        assert!(assessment.base_score >= 0.0);
    }
}
