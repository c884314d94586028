use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::mathtext::MathProtector;

pub const CIRCLED_ORDINALS: [char; 5] = ['①', '②', '③', '④', '⑤'];

/// Normalizes a raw `choices` field of unknown shape into exactly
/// `expected` canonical option strings. Math substrings are protected
/// before any delimiter-based splitting and restored afterwards.
pub struct ChoiceNormalizer {
    circled_split_regex: Regex,
    numbered_split_regex: Regex,
    leading_circled_regex: Regex,
    leading_numbered_regex: Regex,
    leading_dotted_regex: Regex,
    leading_bracket_regex: Regex,
}

impl ChoiceNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            circled_split_regex: Regex::new(r"[①②③④⑤]\s*([^①②③④⑤]+)")
                .context("failed to compile circled split regex")?,
            numbered_split_regex: Regex::new(r"\d+\)\s*([^,\n]+)")
                .context("failed to compile numbered split regex")?,
            leading_circled_regex: Regex::new(r"^[①②③④⑤]\s*")
                .context("failed to compile leading circled regex")?,
            leading_numbered_regex: Regex::new(r"^\d+\)\s*")
                .context("failed to compile leading numbered regex")?,
            // Requires whitespace after the dot so decimal options like
            // `3.5` keep their integer part.
            leading_dotted_regex: Regex::new(r"^\d+\.\s+")
                .context("failed to compile leading dotted regex")?,
            leading_bracket_regex: Regex::new(r"^[()\[\]]\s*")
                .context("failed to compile leading bracket regex")?,
        })
    }

    /// Returns exactly `expected` options plus the warnings accumulated
    /// while coercing, splitting, de-duplicating, padding, or truncating.
    pub fn normalize(
        &self,
        raw: Option<&Value>,
        protector: &MathProtector,
        expected: usize,
    ) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();

        let mut options = match raw {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => self.from_sequence(items),
            Some(Value::String(text)) => self.from_delimited_string(text, protector),
            Some(Value::Object(map)) => self.from_mapping(map),
            Some(other) => {
                warnings.push(format!(
                    "unsupported choices shape ({}); using synthetic options",
                    match other {
                        Value::Bool(_) => "bool",
                        Value::Number(_) => "number",
                        _ => "unknown",
                    }
                ));
                Vec::new()
            }
        };

        self.dedupe(&mut options, &mut warnings);
        self.canonicalize_count(&mut options, expected, &mut warnings);

        (options, warnings)
    }

    fn from_sequence(&self, items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                Value::String(text) => self.clean_option_text(text),
                Value::Number(number) => number.to_string(),
                Value::Object(map) => map
                    .get("value")
                    .or_else(|| map.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
                other => other.to_string(),
            })
            .collect()
    }

    /// Delimiter priority: circled glyphs, `n)` markers, commas, newlines;
    /// otherwise the whole string is one option.
    fn from_delimited_string(&self, text: &str, protector: &MathProtector) -> Vec<String> {
        let (protected, map) = protector.protect(text);
        let trimmed = protected.trim();

        // A stringified JSON array parses directly.
        if trimmed.starts_with('[')
            && let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed)
        {
            let restored: Vec<Value> = items
                .iter()
                .map(|item| match item {
                    Value::String(option) => Value::String(protector.restore(option, &map)),
                    other => other.clone(),
                })
                .collect();
            return self.from_sequence(&restored);
        }

        if CIRCLED_ORDINALS
            .iter()
            .any(|ordinal| protected.contains(*ordinal))
        {
            let matches: Vec<String> = self
                .circled_split_regex
                .captures_iter(&protected)
                .map(|caps| self.clean_option_text(&protector.restore(caps[1].trim(), &map)))
                .collect();
            if !matches.is_empty() {
                return matches;
            }
        }

        let numbered: Vec<String> = self
            .numbered_split_regex
            .captures_iter(&protected)
            .map(|caps| self.clean_option_text(&protector.restore(caps[1].trim(), &map)))
            .collect();
        if !numbered.is_empty() {
            return numbered;
        }

        if protected.contains(',') {
            return protected
                .split(',')
                .map(|part| self.clean_option_text(&protector.restore(part.trim(), &map)))
                .collect();
        }

        if protected.contains('\n') {
            return protected
                .split('\n')
                .filter(|part| !part.trim().is_empty())
                .map(|part| self.clean_option_text(&protector.restore(part.trim(), &map)))
                .collect();
        }

        vec![self.clean_option_text(&protector.restore(trimmed, &map))]
    }

    fn from_mapping(&self, map: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut options = Vec::new();
        for index in 1..=5 {
            let candidates = [
                index.to_string(),
                format!("choice{index}"),
                format!("option{index}"),
            ];
            for key in &candidates {
                if let Some(value) = map.get(key) {
                    let text = match value {
                        Value::String(text) => self.clean_option_text(text),
                        other => other.to_string(),
                    };
                    options.push(text);
                    break;
                }
            }
        }
        options
    }

    /// Strips leading ordinal markers and bracket noise from one option.
    fn clean_option_text(&self, text: &str) -> String {
        let step = self.leading_circled_regex.replace(text.trim(), "");
        let step = self.leading_numbered_regex.replace(&step, "");
        let step = self.leading_dotted_regex.replace(&step, "");
        let step = self.leading_bracket_regex.replace(&step, "");
        step.trim().to_string()
    }

    /// Colliding options get apostrophe-suffixed variants so the answer
    /// resolver can still point at a unique member.
    fn dedupe(&self, options: &mut [String], warnings: &mut Vec<String>) {
        let mut seen: Vec<String> = Vec::new();
        for option in options.iter_mut() {
            if seen.contains(option) {
                let original = option.clone();
                while seen.contains(option) {
                    option.push('\'');
                }
                warnings.push(format!("duplicate option '{original}' disambiguated"));
            }
            seen.push(option.clone());
        }
    }

    fn canonicalize_count(
        &self,
        options: &mut Vec<String>,
        expected: usize,
        warnings: &mut Vec<String>,
    ) {
        // Empty slots become synthetic labels before the count fix-up.
        let empty_slots: Vec<usize> = options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.trim().is_empty())
            .map(|(index, _)| index)
            .collect();
        for index in empty_slots {
            let label = synthetic_label(index, options);
            options[index] = label;
            warnings.push(format!("empty option at position {} replaced", index + 1));
        }

        if options.len() > expected {
            warnings.push(format!(
                "{} options supplied; truncated to {expected}",
                options.len()
            ));
            options.truncate(expected);
        }

        if options.len() < expected {
            warnings.push(format!(
                "{} options supplied; padded to {expected}",
                options.len()
            ));
            while options.len() < expected {
                let label = synthetic_label(options.len(), options);
                options.push(label);
            }
        }
    }
}

/// A numeric label that does not collide with any existing option.
fn synthetic_label(index: usize, existing: &[String]) -> String {
    let mut label = (index + 1).to_string();
    while existing.contains(&label) {
        label.push('\'');
    }
    label
}
