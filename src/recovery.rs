use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{GenerationHints, ProblemType};

/// Field names the generation prompt asks for. Recovery only ever re-quotes
/// or reconstructs these; unknown keys ride along untouched.
const KNOWN_FIELDS: &[&str] = &[
    "question",
    "choices",
    "answer",
    "solution",
    "key_concepts",
    "topic",
    "difficulty",
    "points",
];

pub const DEFAULT_SOLUTION: &str = "No worked solution was provided.";
pub const DEFAULT_QUESTION: &str = "A question could not be recovered from the model output.";
pub const DEFAULT_CONCEPT: &str = "general mathematics";

/// Output of the recovery stage: structurally sound fields, with `choices`
/// and `answer` still in their raw parsed shape for the later stages.
#[derive(Debug, Clone)]
pub struct DraftRecord {
    pub question: String,
    pub raw_choices: Option<Value>,
    pub raw_answer: Option<Value>,
    pub solution: String,
    pub key_concepts: Vec<String>,
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<u32>,
    pub warnings: Vec<String>,
}

/// Turns raw model output into a `DraftRecord` through a monotonic ladder of
/// increasingly lossy strategies. `recover` is total: it never fails, it only
/// degrades.
pub struct RecoveryEngine {
    fence_regex: Regex,
    label_regex: Regex,
    comment_regex: Regex,
    block_fallback_regex: Regex,
    trailing_comma_regex: Regex,
    unquoted_key_regexes: Vec<(&'static str, Regex)>,
    single_quoted_key_regex: Regex,
    nan_regex: Regex,
    infinity_regex: Regex,
    undefined_regex: Regex,
    question_regex: Regex,
    choices_regex: Regex,
    answer_regex: Regex,
    solution_regex: Regex,
    concepts_regex: Regex,
    quoted_item_regex: Regex,
}

impl RecoveryEngine {
    pub fn new() -> Result<Self> {
        let mut unquoted_key_regexes = Vec::with_capacity(KNOWN_FIELDS.len());
        for field in KNOWN_FIELDS {
            let regex = Regex::new(&format!(r"([{{,]\s*){field}\s*:"))
                .with_context(|| format!("failed to compile key regex for {field}"))?;
            unquoted_key_regexes.push((*field, regex));
        }

        Ok(Self {
            fence_regex: Regex::new(r"```(?:json)?\s*")
                .context("failed to compile fence regex")?,
            label_regex: Regex::new(r"(?im)^\s*json[:\s]+")
                .context("failed to compile label regex")?,
            comment_regex: Regex::new(r"//[^\n]*")
                .context("failed to compile comment regex")?,
            block_fallback_regex: Regex::new(r"(?s)\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}")
                .context("failed to compile block fallback regex")?,
            trailing_comma_regex: Regex::new(r",(\s*[}\]])")
                .context("failed to compile trailing comma regex")?,
            unquoted_key_regexes,
            single_quoted_key_regex: Regex::new(
                r"'(question|choices|answer|solution|key_concepts|topic|difficulty|points)'\s*:",
            )
            .context("failed to compile single-quoted key regex")?,
            nan_regex: Regex::new(r"\bNaN\b").context("failed to compile NaN regex")?,
            infinity_regex: Regex::new(r"\bInfinity\b")
                .context("failed to compile Infinity regex")?,
            undefined_regex: Regex::new(r"\bundefined\b")
                .context("failed to compile undefined regex")?,
            question_regex: Regex::new(r#"(?i)"?question"?\s*:\s*["']([^"']+)["']"#)
                .context("failed to compile question regex")?,
            choices_regex: Regex::new(r#"(?i)"?choices"?\s*:\s*\[([^\]]+)\]"#)
                .context("failed to compile choices regex")?,
            answer_regex: Regex::new(r#"(?i)"?answer"?\s*:\s*["']([^"']+)["']"#)
                .context("failed to compile answer regex")?,
            solution_regex: Regex::new(r#"(?is)"?solution"?\s*:\s*["']([^"']+)["']"#)
                .context("failed to compile solution regex")?,
            concepts_regex: Regex::new(r#"(?i)"?key_concepts"?\s*:\s*\[([^\]]+)\]"#)
                .context("failed to compile key_concepts regex")?,
            quoted_item_regex: Regex::new(r#"["']([^"']+)["']"#)
                .context("failed to compile quoted item regex")?,
        })
    }

    pub fn recover(&self, raw: &str, hints: &GenerationHints) -> DraftRecord {
        let mut warnings = Vec::new();

        let cleaned = self.strip_markup(raw);

        if let Some(block) = self.extract_block(&cleaned) {
            let normalized = self.normalize_syntax(&block);
            match serde_json::from_str::<Value>(&normalized) {
                Ok(Value::Object(map)) => {
                    return self.complete_fields(map, hints, warnings);
                }
                Ok(other) => {
                    debug!(kind = other_kind(&other), "parsed a non-object json value");
                }
                Err(err) => {
                    debug!(error = %err, "normalized block did not parse");
                    if let Some(fixed) = self.targeted_fix(&normalized, &err)
                        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&fixed)
                    {
                        warnings.push(
                            "parsed only after re-quoting a field name near the parse error"
                                .to_string(),
                        );
                        return self.complete_fields(map, hints, warnings);
                    }
                }
            }
        } else {
            debug!("no object block found in model output");
        }

        if let Some(map) = self.reconstruct_from_patterns(raw) {
            warnings.push("record reconstructed field-by-field from raw text".to_string());
            return self.complete_fields(map, hints, warnings);
        }

        warn!("recovery exhausted; substituting placeholder problem");
        warnings.push("recovery exhausted; substituted a placeholder problem".to_string());
        self.fallback_record(hints, warnings)
    }

    /// Strategy 1: remove code fences, `JSON:` labels, and line comments.
    fn strip_markup(&self, text: &str) -> String {
        let without_fences = self.fence_regex.replace_all(text, "");
        let without_labels = self.label_regex.replace_all(&without_fences, "");
        let without_comments = self.comment_regex.replace_all(&without_labels, "");
        without_comments.trim().to_string()
    }

    /// Strategy 2: return the first balanced top-level `{...}` region. The
    /// scan is string-aware (unescaped quotes toggle string mode) and
    /// escape-aware (a backslash suppresses the next character).
    fn extract_block(&self, text: &str) -> Option<String> {
        let mut depth = 0_usize;
        let mut start = None;
        let mut in_string = false;
        let mut escape = false;

        for (index, ch) in text.char_indices() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => {
                    if start.is_none() {
                        start = Some(index);
                    }
                    depth += 1;
                }
                '}' if !in_string => {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0
                            && let Some(begin) = start
                        {
                            return Some(text[begin..index + ch.len_utf8()].to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        // Best effort when the depth scan never balanced.
        self.block_fallback_regex
            .find(text)
            .map(|found| found.as_str().to_string())
    }

    /// Strategy 3: ordered syntax repairs. Each transform is applied only to
    /// the spans it is safe in: structural fixes outside double-quoted
    /// strings, control-character escapes inside them.
    fn normalize_syntax(&self, text: &str) -> String {
        let step1 = self.strip_trailing_commas(text);
        let step2 = self.quote_known_fields(&step1);
        let step3 = self.double_quote_strings(&step2);
        let step4 = self.escape_controls_in_strings(&step3);
        self.replace_nonjson_literals(&step4)
    }

    fn strip_trailing_commas(&self, text: &str) -> String {
        map_outside_strings(text, |segment| {
            self.trailing_comma_regex
                .replace_all(segment, "$1")
                .into_owned()
        })
    }

    fn quote_known_fields(&self, text: &str) -> String {
        map_outside_strings(text, |segment| {
            let mut fixed = segment.to_string();
            for (field, regex) in &self.unquoted_key_regexes {
                fixed = regex
                    .replace_all(&fixed, format!("${{1}}\"{field}\":"))
                    .into_owned();
            }
            self.single_quoted_key_regex
                .replace_all(&fixed, "\"$1\":")
                .into_owned()
        })
    }

    fn double_quote_strings(&self, text: &str) -> String {
        map_outside_strings(text, |segment| segment.replace('\'', "\""))
    }

    fn escape_controls_in_strings(&self, text: &str) -> String {
        map_inside_strings(text, |segment| {
            segment
                .replace("\r\n", "\n")
                .replace('\r', "\n")
                .replace('\n', "\\n")
                .replace('\t', "\\t")
        })
    }

    fn replace_nonjson_literals(&self, text: &str) -> String {
        map_outside_strings(text, |segment| {
            let step = self.nan_regex.replace_all(segment, "null");
            let step = self.infinity_regex.replace_all(&step, "9999999");
            self.undefined_regex.replace_all(&step, "null").into_owned()
        })
    }

    /// Strategy 5: re-quote known field names on the line the parser
    /// complained about, then retry exactly once.
    fn targeted_fix(&self, text: &str, error: &serde_json::Error) -> Option<String> {
        let line_index = error.line().checked_sub(1)?;
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let line = lines.get_mut(line_index)?;

        let mut touched = false;
        for field in KNOWN_FIELDS {
            let quoted = format!("\"{field}\"");
            if line.contains(field) && !line.contains(&quoted) {
                *line = line.replacen(field, &quoted, 1);
                touched = true;
            }
        }

        if touched { Some(lines.join("\n")) } else { None }
    }

    /// Strategy 6: regex-extract each known field independently from the raw
    /// text. Worth assembling only when at least a question came back.
    fn reconstruct_from_patterns(&self, raw: &str) -> Option<Map<String, Value>> {
        let question = self
            .question_regex
            .captures(raw)
            .map(|caps| caps[1].trim().to_string())?;

        let mut map = Map::new();
        map.insert("question".to_string(), Value::String(question));

        if let Some(caps) = self.choices_regex.captures(raw) {
            let items: Vec<Value> = self
                .quoted_item_regex
                .captures_iter(&caps[1])
                .map(|item| Value::String(item[1].trim().to_string()))
                .collect();
            if !items.is_empty() {
                map.insert("choices".to_string(), Value::Array(items));
            }
        }

        if let Some(caps) = self.answer_regex.captures(raw) {
            map.insert(
                "answer".to_string(),
                Value::String(caps[1].trim().to_string()),
            );
        }

        if let Some(caps) = self.solution_regex.captures(raw) {
            map.insert(
                "solution".to_string(),
                Value::String(caps[1].trim().to_string()),
            );
        }

        if let Some(caps) = self.concepts_regex.captures(raw) {
            let items: Vec<Value> = self
                .quoted_item_regex
                .captures_iter(&caps[1])
                .map(|item| Value::String(item[1].trim().to_string()))
                .collect();
            if !items.is_empty() {
                map.insert("key_concepts".to_string(), Value::Array(items));
            }
        }

        Some(map)
    }

    /// Strategy 7: substitute fixed defaults for whatever is still missing
    /// and record a warning per substitution.
    fn complete_fields(
        &self,
        map: Map<String, Value>,
        hints: &GenerationHints,
        mut warnings: Vec<String>,
    ) -> DraftRecord {
        let question = match map.get("question").and_then(value_to_text) {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => {
                warnings.push("question missing; substituted a default".to_string());
                DEFAULT_QUESTION.to_string()
            }
        };

        let raw_choices = map
            .get("choices")
            .filter(|value| !value.is_null())
            .cloned();
        if raw_choices.is_none() && hints.problem_type == ProblemType::MultipleChoice {
            warnings.push("choices missing; synthetic options will be used".to_string());
        }

        let raw_answer = map.get("answer").filter(|value| !value.is_null()).cloned();
        if raw_answer.is_none() {
            warnings.push("answer missing; a fallback will be selected".to_string());
        }

        let solution = match map.get("solution").and_then(value_to_text) {
            Some(text) if !text.trim().is_empty() => clean_solution_text(&text),
            _ => {
                warnings.push("solution missing; substituted a default".to_string());
                DEFAULT_SOLUTION.to_string()
            }
        };

        let key_concepts = match map.get("key_concepts") {
            Some(value) => {
                let concepts = parse_key_concepts(value);
                if concepts.is_empty() {
                    warnings.push("key concepts unreadable; substituted a default".to_string());
                    vec![DEFAULT_CONCEPT.to_string()]
                } else {
                    concepts
                }
            }
            None => {
                warnings.push("key concepts missing; substituted a default".to_string());
                vec![DEFAULT_CONCEPT.to_string()]
            }
        };

        let topic = map.get("topic").and_then(value_to_text);
        let difficulty = map.get("difficulty").and_then(value_to_text);
        let points = map
            .get("points")
            .and_then(Value::as_u64)
            .map(|value| value as u32);

        DraftRecord {
            question,
            raw_choices,
            raw_answer,
            solution,
            key_concepts,
            topic,
            difficulty,
            points,
            warnings,
        }
    }

    /// Strategy 8: a fixed, self-contained stand-in problem. Deliberately
    /// answerable so downstream stages still have something coherent.
    fn fallback_record(&self, hints: &GenerationHints, warnings: Vec<String>) -> DraftRecord {
        let (raw_choices, raw_answer) = match hints.problem_type {
            ProblemType::MultipleChoice => (
                Some(serde_json::json!(["2", "3", "4", "5", "6"])),
                Some(Value::String("4".to_string())),
            ),
            ProblemType::ShortAnswer => (None, Some(Value::String("4".to_string()))),
        };

        DraftRecord {
            question: "If 2x + 3 = 11, what is the value of x?".to_string(),
            raw_choices,
            raw_answer,
            solution: "Step 1. Subtract 3 from both sides: 2x = 8. \
                       Step 2. Divide both sides by 2: x = 4. \
                       Therefore the value of x is 4."
                .to_string(),
            key_concepts: vec!["linear equations".to_string()],
            topic: None,
            difficulty: None,
            points: None,
            warnings,
        }
    }
}

fn other_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Undo the most common over-escaping in recovered solution text.
fn clean_solution_text(text: &str) -> String {
    let unescaped = text
        .replace("\\n", "\n")
        .replace("\\t", "  ")
        .replace("\\\"", "\"");
    let mut cleaned = unescaped.trim().to_string();
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned
}

fn parse_key_concepts(value: &Value) -> Vec<String> {
    let raw_items: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(value_to_text).collect(),
        Value::String(text) => text
            .split([',', ';', '\n'])
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    raw_items
        .iter()
        .map(|item| {
            item.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Splits `text` on unescaped double quotes and applies `transform` to the
/// segments outside string literals. Inside segments are re-emitted quoted
/// and untouched.
fn map_outside_strings(text: &str, transform: impl Fn(&str) -> String) -> String {
    rebuild_segments(text, &transform, &|segment| segment.to_string())
}

/// Counterpart of `map_outside_strings` for the content of string literals.
fn map_inside_strings(text: &str, transform: impl Fn(&str) -> String) -> String {
    rebuild_segments(text, &|segment| segment.to_string(), &transform)
}

fn rebuild_segments(
    text: &str,
    outside: &dyn Fn(&str) -> String,
    inside: &dyn Fn(&str) -> String,
) -> String {
    let mut result = String::with_capacity(text.len());
    let mut current = String::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in text.chars() {
        if in_string {
            if escape {
                current.push(ch);
                escape = false;
                continue;
            }
            if ch == '\\' {
                current.push(ch);
                escape = true;
                continue;
            }
            if ch == '"' {
                result.push('"');
                result.push_str(&inside(&current));
                result.push('"');
                current.clear();
                in_string = false;
                continue;
            }
            current.push(ch);
        } else if ch == '"' {
            result.push_str(&outside(&current));
            current.clear();
            in_string = true;
        } else {
            current.push(ch);
        }
    }

    if in_string {
        // Unterminated literal: close it rather than drop the tail.
        result.push('"');
        result.push_str(&inside(&current));
        result.push('"');
    } else {
        result.push_str(&outside(&current));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new().expect("regexes compile")
    }

    fn hints() -> GenerationHints {
        GenerationHints::default()
    }

    #[test]
    fn well_formed_input_passes_through_unchanged() {
        let raw = r#"{"question":"2+2=?","choices":["3","4","5","6","7"],"answer":"4","solution":"Add the numbers.","key_concepts":["addition"]}"#;
        let draft = engine().recover(raw, &hints());

        assert_eq!(draft.question, "2+2=?");
        assert_eq!(
            draft.raw_choices,
            Some(serde_json::json!(["3", "4", "5", "6", "7"]))
        );
        assert_eq!(draft.raw_answer, Some(Value::String("4".to_string())));
        assert_eq!(draft.solution, "Add the numbers.");
        assert_eq!(draft.key_concepts, vec!["addition"]);
        assert!(draft.warnings.is_empty());
    }

    #[test]
    fn unquoted_keys_and_trailing_comma_are_repaired() {
        let raw = r#"{question: "x", answer: "1",}"#;
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "x");
        assert_eq!(draft.raw_answer, Some(Value::String("1".to_string())));
    }

    #[test]
    fn fenced_block_with_label_is_stripped() {
        let raw = "JSON:\n```json\n{\"question\": \"q\", \"answer\": \"1\"}\n```";
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "q");
    }

    #[test]
    fn single_quoted_strings_are_converted() {
        let raw = "{'question': 'find x', 'answer': '3'}";
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "find x");
        assert_eq!(draft.raw_answer, Some(Value::String("3".to_string())));
    }

    #[test]
    fn bare_newline_inside_string_is_escaped() {
        let raw = "{\"question\": \"line one\nline two\", \"answer\": \"1\"}";
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "line one\nline two");
    }

    #[test]
    fn nonjson_literals_are_replaced() {
        let raw = r#"{"question": "q", "answer": "1", "points": NaN}"#;
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "q");
        assert_eq!(draft.points, None);
    }

    #[test]
    fn block_extraction_ignores_braces_inside_strings() {
        let engine = engine();
        let text = r#"noise {"question": "set {1, 2}", "answer": "1"} trailing"#;
        let block = engine.extract_block(text).expect("block found");
        assert!(block.starts_with('{') && block.ends_with('}'));
        assert!(block.contains("set {1, 2}"));
    }

    #[test]
    fn apostrophe_inside_double_quoted_string_survives() {
        let raw = r#"{"question": "what's f'(x)?", "answer": "2x"}"#;
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "what's f'(x)?");
    }

    #[test]
    fn reconstruction_assembles_a_minimal_record() {
        let raw = "The model said question: \"solve it\" and then answer: \"42\" and broke [ here";
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "solve it");
        assert_eq!(draft.raw_answer, Some(Value::String("42".to_string())));
        assert!(
            draft
                .warnings
                .iter()
                .any(|w| w.contains("reconstructed field-by-field"))
        );
    }

    #[test]
    fn gibberish_returns_placeholder_record() {
        let draft = engine().recover("complete nonsense without structure", &hints());
        assert_eq!(draft.question, "If 2x + 3 = 11, what is the value of x?");
        assert!(
            draft
                .warnings
                .iter()
                .any(|w| w.contains("recovery exhausted"))
        );
    }

    #[test]
    fn missing_fields_are_defaulted_with_warnings() {
        let raw = r#"{"question": "only a question"}"#;
        let draft = engine().recover(raw, &hints());
        assert_eq!(draft.question, "only a question");
        assert_eq!(draft.solution, DEFAULT_SOLUTION);
        assert_eq!(draft.key_concepts, vec![DEFAULT_CONCEPT]);
        assert!(draft.warnings.len() >= 3);
    }

    #[test]
    fn key_concepts_string_is_split_and_cleaned() {
        let parsed = parse_key_concepts(&Value::String(
            "1. derivatives, - extrema; composite functions".to_string(),
        ));
        assert_eq!(parsed, vec!["derivatives", "extrema", "composite functions"]);
    }

    #[test]
    fn trailing_comma_stage_leaves_string_content_alone() {
        let engine = engine();
        let fixed = engine.strip_trailing_commas(r#"{"a": "pairs like ,}", "b": 1,}"#);
        assert_eq!(fixed, r#"{"a": "pairs like ,}", "b": 1}"#);
    }
}
