//! Advisory checks over generated and refactored code. These never block.

use kiln_core::SafetyValidation;
use regex::Regex;

use crate::{RuleSet, RuleTarget, Severity};

const MAX_LINE_DIVERGENCE: f64 = 0.5;
const STRUCTURAL_KEYWORDS: &[&str] = &["export", "function", "class", "return", "throw"];

/// Scan generated code against the `Code` rules
pub fn check_code(rules: &RuleSet, code: &str) -> SafetyValidation {
    let mut validation = SafetyValidation::safe();
    for rule in rules.matching(RuleTarget::Code, code) {
        validation = validation.with_warning(format!(
            "Generated code contains {} [{}]",
            rule.description, rule.severity
        ));
        if rule.severity == Severity::Critical {
            validation = validation.with_recommendation(format!(
                "Review the {} before applying this code",
                rule.description
            ));
        }
    }
    validation
}

fn count_keyword(code: &str, keyword: &str) -> usize {
    Regex::new(&format!(r"\b{}\b", regex::escape(keyword)))
        .map(|re| re.find_iter(code).count())
        .unwrap_or(0)
}

/// Compare a refactoring against its original
pub fn check_refactoring(original: &str, refactored: &str) -> SafetyValidation {
    let mut validation = SafetyValidation::safe();

    let before = original.lines().count();
    let after = refactored.lines().count();
    if before > 0 {
        let divergence = (after as f64 - before as f64).abs() / before as f64;
        if divergence > MAX_LINE_DIVERGENCE {
            validation = validation
                .with_warning(format!(
                    "Line count changed by {:.0}% ({} -> {})",
                    divergence * 100.0,
                    before,
                    after
                ))
                .with_recommendation("Verify the refactoring preserves all behavior");
        }
    }

    for keyword in STRUCTURAL_KEYWORDS {
        if count_keyword(original, keyword) > 0 && count_keyword(refactored, keyword) == 0 {
            validation = validation.with_warning(format!(
                "Refactored code no longer contains '{}'",
                keyword
            ));
        }
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_calls_are_advisory() {
        let rules = RuleSet::builtin().unwrap();
        let result = check_code(
            &rules,
            "const cp = require('child_process');\neval(input);\nconst apiKey = \"sk-12345678\";",
        );
        assert!(result.safe);
        assert!(result.warnings.iter().any(|w| w.contains("eval")));
        assert!(result.warnings.iter().any(|w| w.contains("child_process")));
        assert!(result.warnings.iter().any(|w| w.contains("credential")));
        assert!(!result.recommendations.is_empty());
    }

    #[test]
    fn test_infinite_loop_warning() {
        let rules = RuleSet::builtin().unwrap();
        let result = check_code(&rules, "while (true) { poll(); }");
        assert!(result.safe);
        assert!(result.warnings.iter().any(|w| w.contains("infinite loop")));
    }

    #[test]
    fn test_clean_code() {
        let rules = RuleSet::builtin().unwrap();
        let result = check_code(&rules, "fn add(a: i32, b: i32) -> i32 { a + b }");
        assert!(result.safe);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_refactor_line_divergence() {
        let original = "a\nb\nc\nd\n";
        let result = check_refactoring(original, "a\n");
        assert!(result.safe);
        assert!(result.warnings[0].contains("Line count changed"));

        let result = check_refactoring(original, "a\nb\nc\n");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_refactor_lost_keywords() {
        let original = "export function f() {\n  if (!x) throw new Error();\n  return 1;\n}";
        let refactored = "export const f = () => {\n  if (!x) fail();\n  1;\n}";
        let result = check_refactoring(original, refactored);
        assert!(result.safe);
        for lost in ["function", "return", "throw"] {
            assert!(result.warnings.iter().any(|w| w.contains(lost)), "{}", lost);
        }
        assert!(!result.warnings.iter().any(|w| w.contains("'export'")));
    }
}
