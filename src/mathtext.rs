use anyhow::{Context, Result};
use regex::Regex;

/// Placeholder -> original math substring mapping for one protect call.
pub type TokenMap = Vec<(String, String)>;

/// Shields math-shaped substrings from line- and delimiter-oriented text
/// transforms. Every matched span is swapped for a `__TAG_n__` placeholder
/// before splitting/quote-fixing runs, and swapped back afterwards.
pub struct MathProtector {
    patterns: Vec<(Regex, &'static str)>,
}

impl MathProtector {
    pub fn new() -> Result<Self> {
        let catalogue: &[(&str, &str)] = &[
            // Fractions
            (r"\\frac\{[^}]+\}\{[^}]+\}", "FRAC"),
            (r"\d+/\d+", "FRAC"),
            // Radicals
            (r"\\sqrt\{[^}]+\}", "SQRT"),
            (r"√\([^)]+\)", "SQRT"),
            (r"√\d+", "SQRT"),
            // Exponentials and logarithms
            (r"e\^[^\s,\]]+", "EXP"),
            (r"ln\s*\([^)]+\)", "LOG"),
            (r"log_?\d*\s*\([^)]+\)", "LOG"),
            // Trig calls
            (r"(?:sin|cos|tan|sec|csc|cot)\s*\([^)]+\)", "TRIG"),
            (r"(?:sin|cos|tan)\^\d+\s*[^,\s\]]+", "TRIG"),
            // Integrals and derivatives
            (r"\\int[^}]*\}", "INT"),
            (r"∫[^d]+d[a-z]", "INT"),
            (r"d/d[a-z]\s*\([^)]+\)", "DERIV"),
            // Limits
            (r"lim_\{[^}]+\}", "LIM"),
            (r"\\lim[^}]+\}", "LIM"),
            // Constants
            (r"π", "PI"),
            (r"\\pi", "PI"),
            (r"∞", "INF"),
            (r"\\infty", "INF"),
            // Vector/matrix blocks
            (r"(?s)\\begin\{[^}]+\}.*?\\end\{[^}]+\}", "MATRIX"),
            (r"\\vec\{[^}]+\}", "VECTOR"),
        ];

        let mut patterns = Vec::with_capacity(catalogue.len());
        for (pattern, tag) in catalogue {
            let regex = Regex::new(pattern)
                .with_context(|| format!("failed to compile math pattern for {tag}"))?;
            patterns.push((regex, *tag));
        }

        Ok(Self { patterns })
    }

    /// Replaces every catalogued math span with a unique placeholder.
    /// Unmatched patterns are simply left untouched; the operation is pure.
    pub fn protect(&self, text: &str) -> (String, TokenMap) {
        let mut protected = text.to_string();
        let mut map = TokenMap::new();
        let mut counter = 0_usize;

        for (regex, tag) in &self.patterns {
            loop {
                let Some(found) = regex.find(&protected) else {
                    break;
                };
                let original = found.as_str().to_string();
                let placeholder = format!("__{tag}_{counter}__");
                counter += 1;
                protected.replace_range(found.range(), &placeholder);
                map.push((placeholder, original));
            }
        }

        (protected, map)
    }

    pub fn restore(&self, text: &str, map: &TokenMap) -> String {
        let mut restored = text.to_string();
        for (placeholder, original) in map {
            restored = restored.replace(placeholder, original);
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector() -> MathProtector {
        MathProtector::new().expect("catalogue compiles")
    }

    #[test]
    fn protect_and_restore_round_trips() {
        let protector = protector();
        let text = "① e^x + 1, ② ln(x-1), ③ √(2x), ④ 3/4, ⑤ π";
        let (protected, map) = protector.protect(text);

        assert!(!protected.contains("e^x"));
        assert!(!protected.contains("ln(x-1)"));
        assert!(!protected.contains("π"));
        assert_eq!(map.len(), 5);

        assert_eq!(protector.restore(&protected, &map), text);
    }

    #[test]
    fn fraction_survives_comma_split_under_protection() {
        let protector = protector();
        let text = "1/2, 3/4";
        let (protected, map) = protector.protect(text);

        let parts: Vec<String> = protected
            .split(',')
            .map(|part| protector.restore(part.trim(), &map))
            .collect();

        assert_eq!(parts, vec!["1/2", "3/4"]);
    }

    #[test]
    fn integral_span_is_shielded() {
        let protector = protector();
        let (protected, map) = protector.protect("compute ∫ x^2 dx now");
        assert!(!protected.contains('∫'));
        assert!(protector.restore(&protected, &map).contains("∫ x^2 dx"));
    }

    #[test]
    fn plain_text_is_untouched() {
        let protector = protector();
        let (protected, map) = protector.protect("no math here");
        assert_eq!(protected, "no math here");
        assert!(map.is_empty());
    }

    #[test]
    fn placeholders_are_collision_free() {
        let protector = protector();
        let (_, map) = protector.protect("π and π and ∞");
        let mut placeholders: Vec<&String> = map.iter().map(|(p, _)| p).collect();
        placeholders.sort();
        placeholders.dedup();
        assert_eq!(placeholders.len(), map.len());
    }
}
