//! Data-driven safety rule table

use kiln_core::config::SafetyConfig;
use kiln_core::{KilnError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a rule is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// Shell command lines
    Command,
    /// File paths touched by delete/replace
    SensitivePath,
    /// Generated source code
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Case-insensitive substring or a compiled regex
#[derive(Debug, Clone)]
pub enum RulePattern {
    Substring(String),
    Regex(Regex),
}

impl RulePattern {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Substring(needle) => text.to_lowercase().contains(&needle.to_lowercase()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

/// One entry in the rule table
#[derive(Debug, Clone)]
pub struct SafetyRule {
    pub id: String,
    pub description: String,
    pub pattern: RulePattern,
    pub target: RuleTarget,
    pub severity: Severity,
    /// Blocking rules turn a match into `safe = false`
    pub blocking: bool,
}

impl SafetyRule {
    pub fn substring(
        id: impl Into<String>,
        target: RuleTarget,
        needle: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            pattern: RulePattern::Substring(needle.into()),
            target,
            severity: Severity::Critical,
            blocking: true,
        }
    }

    pub fn regex(
        id: impl Into<String>,
        target: RuleTarget,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        let re = Regex::new(pattern)
            .map_err(|e| KilnError::Config(format!("Invalid pattern for rule {}: {}", id, e)))?;
        Ok(Self {
            id,
            description: description.into(),
            pattern: RulePattern::Regex(re),
            target,
            severity: Severity::Critical,
            blocking: true,
        })
    }

    /// Downgrade to a non-blocking rule of the given severity
    pub fn advisory(mut self, severity: Severity) -> Self {
        self.blocking = false;
        self.severity = severity;
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.matches(text)
    }
}

const DANGEROUS_COMMANDS: &[(&str, &str)] = &[
    ("rm -rf", "recursive forced delete"),
    ("rm -fr", "recursive forced delete"),
    ("rm -r /", "recursive delete from filesystem root"),
    ("del /f", "forced delete"),
    ("rmdir /s", "recursive directory delete"),
    ("mkfs", "filesystem format"),
    ("dd if=", "raw disk write"),
    ("shred ", "disk wipe"),
    ("wipefs", "disk wipe"),
    ("> /dev/sd", "raw disk write"),
    (":(){ :|:& };:", "fork bomb"),
    ("chmod -r 777 /", "recursive permission change on root"),
];

const SENSITIVE_PATHS: &[&str] = &[
    ".env",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.lock",
    "poetry.lock",
    "go.sum",
    ".ssh",
    "id_rsa",
    "secrets",
    "credentials",
    ".npmrc",
    ".pypirc",
];

/// The rule table consulted by [`crate::RuleBasedPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<SafetyRule>,
}

impl RuleSet {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules
    pub fn builtin() -> Result<Self> {
        let mut rules = Vec::new();

        for (i, (needle, what)) in DANGEROUS_COMMANDS.iter().enumerate() {
            rules.push(SafetyRule::substring(
                format!("command.dangerous.{}", i),
                RuleTarget::Command,
                *needle,
                format!("{} ({})", needle.trim(), what),
            ));
        }
        rules.push(SafetyRule::regex(
            "command.format-drive",
            RuleTarget::Command,
            r"(?i)\bformat\s+[a-z]:",
            "format (drive format)",
        )?);
        rules.push(
            SafetyRule::regex(
                "command.recursive-glob",
                RuleTarget::Command,
                r"\*\*|/\*|\s\*(\s|$)",
                "glob-style recursive pattern",
            )?
            .advisory(Severity::Warning),
        );

        rules.push(SafetyRule::regex(
            "path.vcs-metadata",
            RuleTarget::SensitivePath,
            r"(^|[/\\])\.git([/\\]|$)",
            ".git (version control metadata)",
        )?);
        for (i, needle) in SENSITIVE_PATHS.iter().enumerate() {
            rules.push(SafetyRule::substring(
                format!("path.sensitive.{}", i),
                RuleTarget::SensitivePath,
                *needle,
                format!("{} (sensitive file)", needle),
            ));
        }

        for (id, pattern, description) in [
            ("code.eval", r"\beval\s*\(", "eval() call"),
            ("code.exec", r"\bexec(Sync)?\s*\(", "exec() call"),
            ("code.child-process", r"child_process", "child_process shell-out"),
            ("code.system", r"\b(os\.)?system\s*\(", "system() shell-out"),
            ("code.subprocess", r"\bsubprocess\.", "subprocess shell-out"),
            (
                "code.network-require",
                r#"require\s*\(\s*['"](http|https|net|dgram|tls)['"]\s*\)"#,
                "dynamic require of network module",
            ),
            (
                "code.dynamic-require",
                r#"require\s*\(\s*[^'"\s)]"#,
                "dynamic require with computed module name",
            ),
        ] {
            rules.push(
                SafetyRule::regex(id, RuleTarget::Code, pattern, description)?
                    .advisory(Severity::Critical),
            );
        }
        rules.push(
            SafetyRule::regex(
                "code.credential",
                RuleTarget::Code,
                r#"(?i)\b(password|passwd|secret|api[_-]?key|access[_-]?token|token)\b\s*[:=]\s*['"][^'"]{4,}['"]"#,
                "hardcoded credential",
            )?
            .advisory(Severity::Critical),
        );
        for (id, pattern) in [
            ("code.infinite-while", r"\bwhile\s*\(\s*(true|1)\s*\)"),
            ("code.infinite-for", r"\bfor\s*\(\s*;\s*;\s*\)"),
            ("code.infinite-while-py", r"\bwhile\s+True\s*:"),
        ] {
            rules.push(
                SafetyRule::regex(id, RuleTarget::Code, pattern, "possible infinite loop")?
                    .advisory(Severity::Warning),
            );
        }

        Ok(Self { rules })
    }

    /// Built-in rules plus the user's additions
    pub fn from_config(config: &SafetyConfig) -> Result<Self> {
        let mut set = Self::builtin()?;
        for (i, cmd) in config.extra_dangerous_commands.iter().enumerate() {
            set.add(SafetyRule::substring(
                format!("command.custom.{}", i),
                RuleTarget::Command,
                cmd.clone(),
                format!("{} (configured)", cmd),
            ));
        }
        for (i, path) in config.extra_sensitive_paths.iter().enumerate() {
            set.add(SafetyRule::substring(
                format!("path.custom.{}", i),
                RuleTarget::SensitivePath,
                path.clone(),
                format!("{} (configured)", path),
            ));
        }
        Ok(set)
    }

    pub fn add(&mut self, rule: SafetyRule) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: SafetyRule) -> Self {
        self.add(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules for `target` that match `text`, in table order
    pub fn matching<'a>(
        &'a self,
        target: RuleTarget,
        text: &'a str,
    ) -> impl Iterator<Item = &'a SafetyRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.target == target && r.matches(text))
    }

    /// First blocking rule for `target` that matches `text`
    pub fn first_blocking<'a>(
        &'a self,
        target: RuleTarget,
        text: &'a str,
    ) -> Option<&'a SafetyRule> {
        self.matching(target, text).find(|r| r.blocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_compile() {
        let set = RuleSet::builtin().unwrap();
        assert!(!set.is_empty());
    }

    #[test]
    fn test_dangerous_commands() {
        let set = RuleSet::builtin().unwrap();
        let rule = set.first_blocking(RuleTarget::Command, "rm -rf /tmp/x").unwrap();
        assert!(rule.description.contains("rm -rf"));
        assert!(set.first_blocking(RuleTarget::Command, "FORMAT C:").is_some());
        assert!(set.first_blocking(RuleTarget::Command, "npm run format").is_none());
        assert!(set.first_blocking(RuleTarget::Command, "cargo test").is_none());
    }

    #[test]
    fn test_glob_is_advisory() {
        let set = RuleSet::builtin().unwrap();
        assert!(set.first_blocking(RuleTarget::Command, "ls src/**").is_none());
        assert_eq!(set.matching(RuleTarget::Command, "ls src/**").count(), 1);
        assert_eq!(set.matching(RuleTarget::Command, "ls src").count(), 0);
    }

    #[test]
    fn test_git_metadata_but_not_gitignore() {
        let set = RuleSet::builtin().unwrap();
        assert!(set
            .first_blocking(RuleTarget::SensitivePath, "/repo/.git/config")
            .is_some());
        assert!(set
            .first_blocking(RuleTarget::SensitivePath, "/repo/.gitignore")
            .is_none());
    }

    #[test]
    fn test_custom_rules_from_config() {
        let config = SafetyConfig {
            extra_dangerous_commands: vec!["terraform destroy".to_string()],
            extra_sensitive_paths: vec!["deploy/prod.yaml".to_string()],
            ..SafetyConfig::default()
        };
        let set = RuleSet::from_config(&config).unwrap();
        assert!(set
            .first_blocking(RuleTarget::Command, "terraform destroy -auto-approve")
            .is_some());
        assert!(set
            .first_blocking(RuleTarget::SensitivePath, "/w/deploy/prod.yaml")
            .is_some());
    }

    #[test]
    fn test_table_is_extensible() {
        let set = RuleSet::new().with_rule(SafetyRule::substring(
            "custom",
            RuleTarget::Command,
            "curl",
            "network access",
        ));
        assert_eq!(set.len(), 1);
        assert!(set.first_blocking(RuleTarget::Command, "CURL example.com").is_some());
    }
}
