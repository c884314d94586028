use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Maps a raw `answer` field onto an exact member of the normalized
/// choices. Post-condition for non-empty choices: the returned answer is
/// always an element of `choices`.
pub struct AnswerResolver {
    bare_digit_regex: Regex,
    parenthesized_regex: Regex,
    fraction_regex: Regex,
    number_regex: Regex,
}

const CONTAINMENT_MIN_CHARS: usize = 2;

const ORDINAL_TABLE: &[(&str, usize)] = &[
    ("①", 0),
    ("②", 1),
    ("③", 2),
    ("④", 3),
    ("⑤", 4),
    ("1", 0),
    ("2", 1),
    ("3", 2),
    ("4", 3),
    ("5", 4),
    ("(1)", 0),
    ("(2)", 1),
    ("(3)", 2),
    ("(4)", 3),
    ("(5)", 4),
    ("1)", 0),
    ("2)", 1),
    ("3)", 2),
    ("4)", 3),
    ("5)", 4),
];

impl AnswerResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bare_digit_regex: Regex::new(r"^[1-5]$")
                .context("failed to compile bare digit regex")?,
            parenthesized_regex: Regex::new(r"^\(?[1-5]\)$")
                .context("failed to compile parenthesized ordinal regex")?,
            fraction_regex: Regex::new(r"^\s*(-?\d+)\s*/\s*(\d+)")
                .context("failed to compile fraction regex")?,
            number_regex: Regex::new(r"-?\d+\.?\d*").context("failed to compile number regex")?,
        })
    }

    pub fn resolve(&self, raw: Option<&Value>, choices: &[String]) -> (String, Vec<String>) {
        let mut warnings = Vec::new();
        let answer_text = raw.map(value_to_answer_text).unwrap_or_default();
        let answer = answer_text.trim();

        // Free-response problems carry the answer through as-is.
        if choices.is_empty() {
            if answer.is_empty() {
                warnings.push("answer empty for a free-response problem".to_string());
            }
            return (answer.to_string(), warnings);
        }

        if answer.is_empty() {
            warnings.push("answer unresolved; fell back to the first choice".to_string());
            return (choices[0].clone(), warnings);
        }

        // Exact membership wins over every classification below: a bare
        // digit that is itself a choice is that choice, not an ordinal.
        if let Some(found) = choices.iter().find(|choice| choice.as_str() == answer) {
            return (found.clone(), warnings);
        }

        if self.is_ordinal_form(answer) {
            return self.resolve_ordinal(answer, choices, warnings);
        }

        self.resolve_literal(answer, choices, warnings)
    }

    fn is_ordinal_form(&self, answer: &str) -> bool {
        self.bare_digit_regex.is_match(answer)
            || self.parenthesized_regex.is_match(answer)
            || ORDINAL_TABLE
                .iter()
                .any(|(form, _)| *form == answer && form.chars().all(|c| !c.is_ascii_digit()))
    }

    fn resolve_ordinal(
        &self,
        answer: &str,
        choices: &[String],
        mut warnings: Vec<String>,
    ) -> (String, Vec<String>) {
        let index = ORDINAL_TABLE
            .iter()
            .find(|(form, _)| *form == answer)
            .map(|(_, index)| *index)
            .or_else(|| {
                answer
                    .chars()
                    .find(|c| c.is_ascii_digit())
                    .and_then(|c| c.to_digit(10))
                    .filter(|digit| (1..=5).contains(digit))
                    .map(|digit| digit as usize - 1)
            });

        match index {
            Some(index) if index < choices.len() => {
                debug!(ordinal = answer, index, "answer resolved by ordinal");
                (choices[index].clone(), warnings)
            }
            _ => {
                warnings.push(format!(
                    "ordinal answer '{answer}' outside the choice range; fell back to the first choice"
                ));
                (choices[0].clone(), warnings)
            }
        }
    }

    fn resolve_literal(
        &self,
        answer: &str,
        choices: &[String],
        mut warnings: Vec<String>,
    ) -> (String, Vec<String>) {
        // Operator glyph normalization plus whitespace collapse.
        let normalized_answer = normalize_expression(answer);
        if let Some(found) = choices
            .iter()
            .find(|choice| normalize_expression(choice) == normalized_answer)
        {
            warnings.push(format!(
                "answer '{answer}' matched '{found}' after notation normalization"
            ));
            return (found.clone(), warnings);
        }

        // Leading numeric or fractional magnitude.
        if let Some(answer_value) = self.leading_magnitude(answer)
            && let Some(found) = choices.iter().find(|choice| {
                self.leading_magnitude(choice)
                    .is_some_and(|value| (value - answer_value).abs() < 1e-9)
            })
        {
            warnings.push(format!(
                "answer '{answer}' matched '{found}' by numeric value"
            ));
            return (found.clone(), warnings);
        }

        // Containment in either direction, last and only with enough
        // overlap that a single shared glyph cannot decide the match.
        if let Some(found) = choices.iter().find(|choice| {
            let normalized_choice = normalize_expression(choice);
            (normalized_choice.chars().count() >= CONTAINMENT_MIN_CHARS
                && normalized_answer.contains(&normalized_choice))
                || (normalized_answer.chars().count() >= CONTAINMENT_MIN_CHARS
                    && normalized_choice.contains(&normalized_answer))
        }) {
            warnings.push(format!("answer '{answer}' matched '{found}' by containment"));
            return (found.clone(), warnings);
        }

        warnings.push(format!(
            "answer '{answer}' not found among choices; fell back to the first choice"
        ));
        (choices[0].clone(), warnings)
    }

    fn leading_magnitude(&self, text: &str) -> Option<f64> {
        if let Some(caps) = self.fraction_regex.captures(text) {
            let numerator: f64 = caps[1].parse().ok()?;
            let denominator: f64 = caps[2].parse().ok()?;
            if denominator != 0.0 {
                return Some(numerator / denominator);
            }
        }

        self.number_regex
            .find(text)
            .and_then(|found| found.as_str().parse().ok())
    }
}

fn value_to_answer_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

/// Comparison form: no whitespace, ASCII operators, lowercase.
fn normalize_expression(expression: &str) -> String {
    expression
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '×' | '·' => '*',
            '÷' => '/',
            '（' => '(',
            '）' => ')',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> AnswerResolver {
        AnswerResolver::new().expect("regexes compile")
    }

    fn choices(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn resolve(raw: Value, options: &[&str]) -> (String, Vec<String>) {
        resolver().resolve(Some(&raw), &choices(options))
    }

    #[test]
    fn exact_member_is_kept() {
        let (answer, warnings) = resolve(json!("4"), &["3", "4", "5", "6", "7"]);
        assert_eq!(answer, "4");
        assert!(warnings.is_empty());
    }

    #[test]
    fn circled_glyph_maps_by_ordinal() {
        let (answer, _) = resolve(json!("②"), &["a", "b", "c", "d", "e"]);
        assert_eq!(answer, "b");
    }

    #[test]
    fn bare_digit_maps_by_ordinal_when_not_a_member() {
        let (answer, _) = resolve(json!("3"), &["2π", "3π", "4π", "5π", "6π"]);
        assert_eq!(answer, "4π");
    }

    #[test]
    fn bare_digit_that_is_a_member_stays_put() {
        // Membership is checked before ordinal classification, so `3`
        // means the choice `3` here, not the third slot.
        let (answer, warnings) = resolve(json!("3"), &["1", "2", "3", "4", "5"]);
        assert_eq!(answer, "3");
        assert!(warnings.is_empty());
    }

    #[test]
    fn parenthesized_ordinal_maps() {
        let (answer, _) = resolve(json!("(2)"), &["a", "b", "c", "d", "e"]);
        assert_eq!(answer, "b");
        let (answer, _) = resolve(json!("2)"), &["a", "b", "c", "d", "e"]);
        assert_eq!(answer, "b");
    }

    #[test]
    fn numeric_answer_value_is_coerced() {
        let (answer, _) = resolve(json!(2), &["a", "b", "c", "d", "e"]);
        assert_eq!(answer, "b");
    }

    #[test]
    fn glyph_normalization_matches() {
        let (answer, warnings) = resolve(json!("2 × 3"), &["2*3", "5", "6", "7", "8"]);
        assert_eq!(answer, "2*3");
        assert!(warnings.iter().any(|w| w.contains("normalization")));
    }

    #[test]
    fn fraction_matches_by_magnitude() {
        let (answer, _) = resolve(json!("1/2"), &["0.5", "0.25", "2", "4", "8"]);
        assert_eq!(answer, "0.5");
    }

    #[test]
    fn containment_needs_more_than_one_shared_glyph() {
        // `x = ab` carries no number, so containment decides; a lone
        // character like `a` is never enough to contain against.
        let (answer, warnings) = resolve(json!("x = ab"), &["ab", "cd", "ef", "gh", "ij"]);
        assert_eq!(answer, "ab");
        assert!(warnings.iter().any(|w| w.contains("containment")));
    }

    #[test]
    fn unmatched_literal_falls_back_to_first_choice() {
        let (answer, warnings) = resolve(json!("banana"), &["a", "b", "c", "d", "e"]);
        assert_eq!(answer, "a");
        assert!(warnings.iter().any(|w| w.contains("fell back")));
    }

    #[test]
    fn missing_answer_falls_back_to_first_choice() {
        let (answer, warnings) = resolver().resolve(None, &choices(&["a", "b", "c", "d", "e"]));
        assert_eq!(answer, "a");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn free_response_answer_passes_through() {
        let (answer, warnings) = resolver().resolve(Some(&json!("42")), &[]);
        assert_eq!(answer, "42");
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolved_answer_is_always_a_member() {
        let options = choices(&["2√3", "3√2", "√6", "6", "12"]);
        for raw in ["②", "7", "2*sqrt(3)", "", "6"] {
            let (answer, _) = resolver().resolve(Some(&json!(raw)), &options);
            assert!(options.contains(&answer), "answer {answer:?} for {raw:?}");
        }
    }
}
