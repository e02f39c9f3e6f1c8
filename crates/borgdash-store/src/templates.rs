//! Built-in starting points for a new configuration file.

use serde::Serialize;

/// A named configuration template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub content: &'static str,
}

const BASIC: ConfigTemplate = ConfigTemplate {
    name: "basic",
    description: "Basic backup configuration",
    content: "\
repositories:
  - path: /path/to/repository
    label: my-backup

storage:
  compression: lz4
  encryption: repokey

retention:
  keep_daily: 7
  keep_weekly: 4
  keep_monthly: 6

consistency:
  checks:
    - repository
    - archives
  check_last: 3
",
};

const ENCRYPTED: ConfigTemplate = ConfigTemplate {
    name: "encrypted",
    description: "Encrypted backup configuration",
    content: "\
repositories:
  - path: /path/to/encrypted/repository
    label: encrypted-backup

storage:
  compression: zstd
  encryption: repokey-blake2

retention:
  keep_daily: 7
  keep_weekly: 4
  keep_monthly: 12
  keep_yearly: 3

consistency:
  checks:
    - repository
    - archives
  check_last: 3
",
};

const MINIMAL: ConfigTemplate = ConfigTemplate {
    name: "minimal",
    description: "Minimal backup configuration",
    content: "\
repositories:
  - path: /path/to/repository

storage:
  compression: lz4

retention:
  keep_daily: 7
",
};

/// All built-in templates.
pub fn builtin() -> &'static [ConfigTemplate] {
    &[BASIC, ENCRYPTED, MINIMAL]
}

/// Look up a built-in template by name.
pub fn find(name: &str) -> Option<&'static ConfigTemplate> {
    builtin().iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{validate, ConfigDocument};

    #[test]
    fn test_templates_parse_and_validate() {
        for template in builtin() {
            let doc = ConfigDocument::parse(template.content)
                .unwrap_or_else(|e| panic!("{} does not parse: {e}", template.name));
            let report = validate(&doc);
            assert!(report.is_valid(), "{}: {:?}", template.name, report.errors);
            assert!(report.warnings.is_empty(), "{}: {:?}", template.name, report.warnings);
        }
    }

    #[test]
    fn test_find() {
        assert_eq!(find("minimal").map(|t| t.name), Some("minimal"));
        assert!(find("nonexistent").is_none());
        assert_eq!(builtin().len(), 3);
    }
}
