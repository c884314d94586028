pub mod expr;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::model::{ProblemRecord, VerificationOutcome, VerificationReport};
use expr::{Expr, LimitPoint, LimitValue};

/// Longest fragment worth handing to the formula parser. Anything longer is
/// prose, not a formula.
const MAX_FRAGMENT_CHARS: usize = 100;
/// Maximum tolerated share of non-Latin alphabetic characters before a
/// fragment is classified as natural-language commentary.
const MAX_NON_LATIN_FRACTION: f64 = 0.05;

const EQUATION_TOLERANCE: f64 = 1e-6;
const INTEGRAL_TOLERANCE: f64 = 1e-4;
const LIMIT_TOLERANCE: f64 = 1e-2;

/// One mathematical claim extracted from a record or supplied directly.
#[derive(Debug, Clone)]
pub enum Claim {
    /// An equation together with the value claimed to solve it.
    Equation { equation: String, solution: String },
    /// A function and its claimed derivative.
    Derivative { function: String, claimed: String },
    /// An integrand with a claimed result; `bounds` makes it definite.
    Integral {
        integrand: String,
        claimed: String,
        bounds: Option<(String, String)>,
    },
    /// A function, an approach point, and the claimed limit.
    Limit {
        function: String,
        point: String,
        claimed: String,
    },
}

/// Best-effort tri-state checker for the four claim shapes. Every parse or
/// evaluation failure degrades to `NotAttempted`, never to `VerifiedFalse`.
pub struct MathVerifier {
    sqrt_call_regex: Regex,
    sqrt_atom_regex: Regex,
    nonformula_regex: Regex,
    bare_call_regex: Regex,
    implicit_mul_regex: Regex,
    equation_span_regex: Regex,
    solution_prefix_regex: Regex,
    function_def_regex: Regex,
    derivative_marker_regex: Regex,
    integrand_regex: Regex,
    integral_marker_regex: Regex,
    bounds_regex: Regex,
    limit_regex: Regex,
}

impl MathVerifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sqrt_call_regex: Regex::new(r"√\s*\(")
                .context("failed to compile sqrt call regex")?,
            sqrt_atom_regex: Regex::new(r"√\s*([0-9]+(?:\.[0-9]+)?|x|pi|e)")
                .context("failed to compile sqrt atom regex")?,
            nonformula_regex: Regex::new(r"[^A-Za-z0-9+\-*/^(). ]")
                .context("failed to compile nonformula regex")?,
            bare_call_regex: Regex::new(r"\b(sin|cos|tan|ln|log|sqrt|exp)\s+([A-Za-z0-9]+)")
                .context("failed to compile bare call regex")?,
            implicit_mul_regex: Regex::new(r"([0-9])\s*([A-Za-z(])")
                .context("failed to compile implicit multiplication regex")?,
            // Formula characters only, so surrounding prose never leaks
            // into the extracted span. `x` is the engine's sole variable.
            equation_span_regex: Regex::new(r"([0-9x^+\-*/(). ]+=\s*[0-9x^+\-*/(). ]+)")
                .context("failed to compile equation span regex")?,
            solution_prefix_regex: Regex::new(r"^\s*x\s*=\s*")
                .context("failed to compile solution prefix regex")?,
            function_def_regex: Regex::new(r"f\(x\)\s*=\s*([^,;?]+)")
                .context("failed to compile function definition regex")?,
            derivative_marker_regex: Regex::new(r"(?i)derivative|differentiate|f'\(x\)")
                .context("failed to compile derivative marker regex")?,
            integrand_regex: Regex::new(r"∫([^d∫]+)d[xt]")
                .context("failed to compile integrand regex")?,
            integral_marker_regex: Regex::new(r"(?i)∫|integral|integrate")
                .context("failed to compile integral marker regex")?,
            bounds_regex: Regex::new(r"(?i)from\s+(\S+)\s+to\s+([^\s,;?]+)")
                .context("failed to compile bounds regex")?,
            limit_regex: Regex::new(r"(?i)lim[^a-wyz0-9]*x\s*(?:->|→)\s*([^\s)]+)\)?\s*(?:of\s+)?([^,;?]+)")
                .context("failed to compile limit regex")?,
        })
    }

    pub fn verify(&self, claim: &Claim) -> VerificationOutcome {
        match claim {
            Claim::Equation { equation, solution } => self.verify_equation(equation, solution),
            Claim::Derivative { function, claimed } => self.verify_derivative(function, claimed),
            Claim::Integral {
                integrand,
                claimed,
                bounds,
            } => self.verify_integral(integrand, claimed, bounds.as_ref()),
            Claim::Limit {
                function,
                point,
                claimed,
            } => self.verify_limit(function, point, claimed),
        }
    }

    /// Extracts whatever claims the question supports and checks each one.
    pub fn verify_record(&self, record: &ProblemRecord) -> VerificationReport {
        let question = record.question.as_str();
        let answer = record.answer.as_str();
        let mut report = VerificationReport::default();

        if answer.trim().is_empty() {
            return report;
        }

        let derivative_question = self.derivative_marker_regex.is_match(question);
        let integral_question = self.integral_marker_regex.is_match(question);
        let limit_question = question.to_ascii_lowercase().contains("lim");

        if derivative_question {
            if let Some(caps) = self.function_def_regex.captures(question) {
                report.derivative = self.verify_derivative(caps[1].trim(), answer);
            }
        } else if integral_question {
            if let Some(caps) = self.integrand_regex.captures(question) {
                let bounds = self
                    .bounds_regex
                    .captures(question)
                    .map(|bounds| (bounds[1].to_string(), bounds[2].to_string()));
                report.integral = self.verify_integral(caps[1].trim(), answer, bounds.as_ref());
            }
        } else if limit_question {
            if let Some(caps) = self.limit_regex.captures(question) {
                let point = caps[1].trim().to_string();
                let function = caps[2].trim().to_string();
                report.limit = self.verify_limit(&function, &point, answer);
            }
        } else if question.contains('=')
            && let Some(caps) = self.equation_span_regex.captures(question)
        {
            let solution = self.solution_prefix_regex.replace(answer, "");
            report.equation = self.verify_equation(caps[1].trim(), solution.trim());
        }

        report
    }

    fn verify_equation(&self, equation: &str, solution: &str) -> VerificationOutcome {
        let Some((left_raw, right_raw)) = equation.split_once('=') else {
            return VerificationOutcome::NotAttempted;
        };
        let (Some(left), Some(right)) = (self.prepare(left_raw), self.prepare(right_raw)) else {
            return VerificationOutcome::NotAttempted;
        };
        let Some(value) = self.constant_value(solution) else {
            return VerificationOutcome::NotAttempted;
        };

        match (left.eval(value), right.eval(value)) {
            (Some(lhs), Some(rhs)) => {
                let scale = 1.0 + lhs.abs().max(rhs.abs());
                if (lhs - rhs).abs() <= EQUATION_TOLERANCE * scale {
                    VerificationOutcome::VerifiedTrue
                } else {
                    VerificationOutcome::VerifiedFalse
                }
            }
            _ => VerificationOutcome::NotAttempted,
        }
    }

    fn verify_derivative(&self, function: &str, claimed: &str) -> VerificationOutcome {
        let (Some(function), Some(claimed)) = (self.prepare(function), self.prepare(claimed))
        else {
            return VerificationOutcome::NotAttempted;
        };
        let Some(actual) = function.differentiate() else {
            return VerificationOutcome::NotAttempted;
        };
        VerificationOutcome::from_equality(expr::equivalent(&actual, &claimed))
    }

    fn verify_integral(
        &self,
        integrand: &str,
        claimed: &str,
        bounds: Option<&(String, String)>,
    ) -> VerificationOutcome {
        let Some(integrand) = self.prepare(integrand) else {
            return VerificationOutcome::NotAttempted;
        };

        match bounds {
            Some((lower_raw, upper_raw)) => {
                let (Some(lower), Some(upper)) = (
                    self.constant_value(lower_raw),
                    self.constant_value(upper_raw),
                ) else {
                    return VerificationOutcome::NotAttempted;
                };
                let Some(actual) = expr::integrate_numeric(&integrand, lower, upper) else {
                    return VerificationOutcome::NotAttempted;
                };
                let Some(claimed) = self.constant_value(claimed) else {
                    return VerificationOutcome::NotAttempted;
                };
                let scale = 1.0 + actual.abs().max(claimed.abs());
                if (actual - claimed).abs() <= INTEGRAL_TOLERANCE * scale {
                    VerificationOutcome::VerifiedTrue
                } else {
                    VerificationOutcome::VerifiedFalse
                }
            }
            None => {
                // The integration constant makes direct comparison invalid;
                // compare the derivative of the claim against the integrand.
                let Some(claimed) = self.prepare(claimed) else {
                    return VerificationOutcome::NotAttempted;
                };
                let Some(claimed_derivative) = claimed.differentiate() else {
                    return VerificationOutcome::NotAttempted;
                };
                VerificationOutcome::from_equality(expr::equivalent(
                    &claimed_derivative,
                    &integrand,
                ))
            }
        }
    }

    fn verify_limit(&self, function: &str, point: &str, claimed: &str) -> VerificationOutcome {
        let Some(function) = self.prepare(function) else {
            return VerificationOutcome::NotAttempted;
        };
        let Some(point) = self.limit_point(point) else {
            return VerificationOutcome::NotAttempted;
        };
        let Some(claimed) = self.limit_value(claimed) else {
            return VerificationOutcome::NotAttempted;
        };
        let Some(actual) = expr::numeric_limit(&function, point) else {
            return VerificationOutcome::NotAttempted;
        };

        let matches = match (actual, claimed) {
            (LimitValue::Finite(actual), LimitValue::Finite(claimed)) => {
                let scale = 1.0 + claimed.abs();
                (actual - claimed).abs() <= LIMIT_TOLERANCE * scale
            }
            (LimitValue::PosInfinite, LimitValue::PosInfinite)
            | (LimitValue::NegInfinite, LimitValue::NegInfinite) => true,
            _ => false,
        };

        if matches {
            VerificationOutcome::VerifiedTrue
        } else {
            VerificationOutcome::VerifiedFalse
        }
    }

    /// Gate plus normalization plus parse. `None` marks a fragment the
    /// engine should not attempt.
    fn prepare(&self, fragment: &str) -> Option<Expr> {
        if !self.passes_gate(fragment) {
            let prefix: String = fragment.chars().take(40).collect();
            debug!(fragment = %prefix, "fragment gated out");
            return None;
        }
        let normalized = self.normalize_formula(fragment);
        if normalized.is_empty() {
            return None;
        }
        expr::parse(&normalized)
    }

    /// Rejects fragments that are prose rather than formulas: too long, or
    /// too many non-Latin alphabetic characters.
    fn passes_gate(&self, fragment: &str) -> bool {
        let total = fragment.chars().count();
        if total == 0 || total > MAX_FRAGMENT_CHARS {
            return false;
        }
        let non_latin = fragment
            .chars()
            .filter(|c| !c.is_ascii() && c.is_alphabetic())
            .count();
        (non_latin as f64 / total as f64) <= MAX_NON_LATIN_FRACTION
    }

    /// Ordered rewrite into the engine's grammar: unicode glyphs to named
    /// functions and constants, bare call arguments parenthesized, implicit
    /// digit-letter multiplication made explicit, everything else stripped.
    fn normalize_formula(&self, fragment: &str) -> String {
        let glyphs = fragment
            .replace('π', "pi")
            .replace('−', "-")
            .replace(['×', '·'], "*")
            .replace('÷', "/");
        let roots = self.sqrt_call_regex.replace_all(&glyphs, "sqrt(");
        let roots = self.sqrt_atom_regex.replace_all(&roots, "sqrt($1)");
        let ascii = self.nonformula_regex.replace_all(&roots, " ");
        let calls = self.bare_call_regex.replace_all(&ascii, "$1($2)");
        let products = self.implicit_mul_regex.replace_all(&calls, "$1*$2");
        crate::util::normalize_whitespace(&products)
    }

    /// Parses a fragment that must denote a constant.
    fn constant_value(&self, fragment: &str) -> Option<f64> {
        let expression = self.prepare(fragment)?;
        if expression.contains_var() {
            return None;
        }
        expression.eval(0.0)
    }

    fn limit_point(&self, point: &str) -> Option<LimitPoint> {
        match classify_infinity(point) {
            Some(true) => Some(LimitPoint::PosInfinity),
            Some(false) => Some(LimitPoint::NegInfinity),
            None => self.constant_value(point).map(LimitPoint::Finite),
        }
    }

    fn limit_value(&self, claimed: &str) -> Option<LimitValue> {
        match classify_infinity(claimed) {
            Some(true) => Some(LimitValue::PosInfinite),
            Some(false) => Some(LimitValue::NegInfinite),
            None => self.constant_value(claimed).map(LimitValue::Finite),
        }
    }
}

/// `Some(true)` for positive infinity spellings, `Some(false)` for negative
/// ones, `None` for anything finite.
fn classify_infinity(text: &str) -> Option<bool> {
    let trimmed = text.trim();
    let negative = trimmed.starts_with('-');
    let body = trimmed.trim_start_matches(['-', '+']).trim();
    let is_infinite = matches!(body, "∞" | "inf" | "infinity" | "oo" | "\\infty");
    is_infinite.then_some(!negative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationOutcome::{NotAttempted, VerifiedFalse, VerifiedTrue};

    fn verifier() -> MathVerifier {
        MathVerifier::new().expect("regexes compile")
    }

    #[test]
    fn equation_with_correct_solution_verifies_true() {
        let outcome = verifier().verify(&Claim::Equation {
            equation: "x^2 - 4 = 0".to_string(),
            solution: "2".to_string(),
        });
        assert_eq!(outcome, VerifiedTrue);
    }

    #[test]
    fn equation_with_wrong_solution_verifies_false() {
        let outcome = verifier().verify(&Claim::Equation {
            equation: "x^2 - 4 = 0".to_string(),
            solution: "3".to_string(),
        });
        assert_eq!(outcome, VerifiedFalse);
    }

    #[test]
    fn unparseable_equation_is_not_attempted() {
        let outcome = verifier().verify(&Claim::Equation {
            equation: "the product of two primes = something".to_string(),
            solution: "2".to_string(),
        });
        assert_eq!(outcome, NotAttempted);
    }

    #[test]
    fn correct_derivative_verifies_true() {
        let outcome = verifier().verify(&Claim::Derivative {
            function: "x^3".to_string(),
            claimed: "3x^2".to_string(),
        });
        assert_eq!(outcome, VerifiedTrue);
    }

    #[test]
    fn wrong_derivative_verifies_false() {
        let outcome = verifier().verify(&Claim::Derivative {
            function: "x^3".to_string(),
            claimed: "x^2".to_string(),
        });
        assert_eq!(outcome, VerifiedFalse);
    }

    #[test]
    fn definite_integral_is_checked_numerically() {
        let verifier = verifier();
        let claim = |claimed: &str| Claim::Integral {
            integrand: "x^2".to_string(),
            claimed: claimed.to_string(),
            bounds: Some(("0".to_string(), "3".to_string())),
        };
        assert_eq!(verifier.verify(&claim("9")), VerifiedTrue);
        assert_eq!(verifier.verify(&claim("8")), VerifiedFalse);
    }

    #[test]
    fn indefinite_integral_compares_derivatives() {
        let outcome = verifier().verify(&Claim::Integral {
            integrand: "2x".to_string(),
            claimed: "x^2".to_string(),
            bounds: None,
        });
        assert_eq!(outcome, VerifiedTrue);
    }

    #[test]
    fn limit_check_accepts_the_classic_ratio() {
        let outcome = verifier().verify(&Claim::Limit {
            function: "sin(x)/x".to_string(),
            point: "0".to_string(),
            claimed: "1".to_string(),
        });
        assert_eq!(outcome, VerifiedTrue);
    }

    #[test]
    fn limit_check_rejects_a_wrong_claim() {
        let outcome = verifier().verify(&Claim::Limit {
            function: "sin(x)/x".to_string(),
            point: "0".to_string(),
            claimed: "2".to_string(),
        });
        assert_eq!(outcome, VerifiedFalse);
    }

    #[test]
    fn divergent_limit_matches_claimed_infinity() {
        let outcome = verifier().verify(&Claim::Limit {
            function: "1/x^2".to_string(),
            point: "0".to_string(),
            claimed: "∞".to_string(),
        });
        assert_eq!(outcome, VerifiedTrue);
    }

    #[test]
    fn divergence_sign_must_match_the_claim() {
        // 1/x^2 blows up towards +∞ at 0, so a claimed -∞ is refuted.
        let outcome = verifier().verify(&Claim::Limit {
            function: "1/x^2".to_string(),
            point: "0".to_string(),
            claimed: "-∞".to_string(),
        });
        assert_eq!(outcome, VerifiedFalse);
    }

    #[test]
    fn long_fragments_are_gated_out() {
        let prose = "a ".repeat(80);
        let outcome = verifier().verify(&Claim::Derivative {
            function: prose,
            claimed: "1".to_string(),
        });
        assert_eq!(outcome, NotAttempted);
    }

    #[test]
    fn non_latin_heavy_fragment_is_gated_out() {
        let verifier = verifier();
        assert!(!verifier.passes_gate("함수의 극한값을 구하시오 x"));
        assert!(verifier.passes_gate("x^2 - 4"));
    }

    #[test]
    fn glyph_normalization_produces_engine_grammar() {
        let verifier = verifier();
        assert_eq!(verifier.normalize_formula("√(2x) × π"), "sqrt(2*x) * pi");
        assert_eq!(verifier.normalize_formula("2x ÷ 3"), "2*x / 3");
        assert_eq!(verifier.normalize_formula("sin 2"), "sin(2)");
    }

    #[test]
    fn record_extraction_checks_an_equation_question() {
        let record = ProblemRecord {
            question: "Solve the equation x^2 - 4 = 0 for the positive root.".to_string(),
            choices: vec![
                "1".to_string(),
                "2".to_string(),
                "3".to_string(),
                "4".to_string(),
                "5".to_string(),
            ],
            answer: "2".to_string(),
            solution: String::new(),
            key_concepts: Vec::new(),
            topic: None,
            difficulty: None,
            points: None,
            quality_score: 0.0,
            is_duplicate: false,
            warnings: Vec::new(),
        };
        let report = verifier().verify_record(&record);
        assert_eq!(report.equation, VerifiedTrue);
    }

    #[test]
    fn record_extraction_checks_a_derivative_question() {
        let record = ProblemRecord {
            question: "Find the derivative of f(x) = x^3".to_string(),
            choices: Vec::new(),
            answer: "3x^2".to_string(),
            solution: String::new(),
            key_concepts: Vec::new(),
            topic: None,
            difficulty: None,
            points: None,
            quality_score: 0.0,
            is_duplicate: false,
            warnings: Vec::new(),
        };
        let report = verifier().verify_record(&record);
        assert_eq!(report.derivative, VerifiedTrue);
        assert_eq!(report.equation, NotAttempted);
    }
}
