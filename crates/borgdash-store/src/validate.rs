//! Structural validation of borgmatic configuration documents.
//!
//! Validation never fails; every problem is collected into a
//! [`ValidationReport`] so the caller can show all of them at once. Errors
//! make the document unusable for the backup tool; warnings flag deprecated
//! or suspicious settings.

use crate::document::value_kind;
use crate::ConfigDocument;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

/// Compression algorithms understood by borg (`zstd,10` style levels allowed).
const COMPRESSION_ALGORITHMS: &[&str] = &["none", "lz4", "zstd", "zlib", "lzma", "auto", "obfuscate"];

/// Repository encryption modes accepted by `borg init` / `borg rcreate`.
const ENCRYPTION_MODES: &[&str] = &[
    "none",
    "authenticated",
    "authenticated-blake2",
    "repokey",
    "repokey-blake2",
    "keyfile",
    "keyfile-blake2",
    "repokey-aes-ocb",
    "repokey-chacha20-poly1305",
    "repokey-blake2-aes-ocb",
    "repokey-blake2-chacha20-poly1305",
    "keyfile-aes-ocb",
    "keyfile-chacha20-poly1305",
    "keyfile-blake2-aes-ocb",
    "keyfile-blake2-chacha20-poly1305",
];

const CONSISTENCY_CHECKS: &[&str] = &["repository", "archives", "data", "extract", "spot", "disabled"];

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    // Sections
    "location",
    "storage",
    "retention",
    "consistency",
    "hooks",
    "output",
    // Source and repository options
    "repositories",
    "source_directories",
    "source_directories_must_exist",
    "working_directory",
    "one_file_system",
    "numeric_ids",
    "atime",
    "ctime",
    "birthtime",
    "read_special",
    "flags",
    "files_cache",
    "local_path",
    "remote_path",
    "patterns",
    "patterns_from",
    "exclude_patterns",
    "exclude_from",
    "exclude_caches",
    "exclude_if_present",
    "exclude_nodump",
    "keep_exclude_tags",
    "borgmatic_source_directory",
    "user_runtime_directory",
    "user_state_directory",
    // Storage options
    "encryption_passcommand",
    "encryption_passphrase",
    "checkpoint_interval",
    "checkpoint_volume",
    "chunker_params",
    "compression",
    "upload_rate_limit",
    "upload_buffer_size",
    "retries",
    "retry_wait",
    "temporary_directory",
    "ssh_command",
    "borg_base_directory",
    "borg_config_directory",
    "borg_cache_directory",
    "borg_files_cache_ttl",
    "borg_security_directory",
    "borg_keys_directory",
    "umask",
    "lock_wait",
    "archive_name_format",
    "extra_borg_options",
    "match_archives",
    "relocated_repo_access_is_ok",
    "unknown_unencrypted_repo_access_is_ok",
    "check_i_know_what_i_am_doing",
    // Flat retention and consistency options
    "keep_within",
    "keep_secondly",
    "keep_minutely",
    "keep_hourly",
    "keep_daily",
    "keep_weekly",
    "keep_monthly",
    "keep_3monthly",
    "keep_13weekly",
    "keep_yearly",
    "prefix",
    "checks",
    "check_repositories",
    "check_last",
    // Output and hooks
    "color",
    "constants",
    "commands",
    "before_actions",
    "before_backup",
    "before_prune",
    "before_compact",
    "before_check",
    "before_extract",
    "before_everything",
    "after_actions",
    "after_backup",
    "after_prune",
    "after_compact",
    "after_check",
    "after_extract",
    "after_everything",
    "on_error",
    "postgresql_databases",
    "mariadb_databases",
    "mysql_databases",
    "mongodb_databases",
    "sqlite_databases",
    "healthchecks",
    "cronitor",
    "cronhub",
    "pagerduty",
    "ntfy",
    "apprise",
    "uptime_kuma",
    "loki",
    "zabbix",
    "monitoring_verbosity",
];

/// Problems found in a configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable.
    pub errors: Vec<String>,
    /// Deprecated or suspicious settings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Whether the document has no errors. Warnings are allowed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validate a parsed document.
pub fn validate(document: &ConfigDocument) -> ValidationReport {
    let mut report = ValidationReport::default();
    let root = document.as_mapping();

    check_top_level_keys(root, &mut report);
    check_repositories(root, &mut report);
    check_retention(root, &mut report);
    check_storage(root, &mut report);
    check_consistency(root, &mut report);

    report
}

/// Validate YAML text. Parse failures are reported as errors with the
/// line and column where parsing stopped.
pub fn validate_text(text: &str) -> ValidationReport {
    match ConfigDocument::parse(text) {
        Ok(document) => validate(&document),
        Err(e) => ValidationReport {
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        },
    }
}

fn check_top_level_keys(root: &Mapping, report: &mut ValidationReport) {
    for key in root.keys() {
        match key.as_str() {
            Some(name) if KNOWN_TOP_LEVEL_KEYS.contains(&name) => {}
            Some(name) => report.warning(format!("unknown top-level option '{name}'")),
            None => report.error(format!("top-level keys must be strings, found {}", value_kind(key))),
        }
    }

    if root.contains_key("location") {
        report.warning(
            "the 'location' section is deprecated; move its options to the top level",
        );
    }
}

fn check_repositories(root: &Mapping, report: &mut ValidationReport) {
    let repositories = root.get("repositories").or_else(|| {
        root.get("location")
            .and_then(Value::as_mapping)
            .and_then(|location| location.get("repositories"))
    });

    let Some(repositories) = repositories else {
        report.error("missing required option 'repositories'");
        return;
    };

    let Some(entries) = repositories.as_sequence() else {
        report.error(format!(
            "'repositories' must be a list, found {}",
            value_kind(repositories)
        ));
        return;
    };

    if entries.is_empty() {
        report.warning("no repositories configured; backups will not run");
        return;
    }

    let mut seen = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let path = match entry {
            Value::String(path) => {
                report.warning(format!(
                    "repositories[{index}]: plain string entries are deprecated; use '- path: {path}'"
                ));
                Some(path.as_str())
            }
            Value::Mapping(fields) => match fields.get("path") {
                Some(Value::String(path)) => Some(path.as_str()),
                Some(other) => {
                    report.error(format!(
                        "repositories[{index}].path must be a string, found {}",
                        value_kind(other)
                    ));
                    None
                }
                None => {
                    report.error(format!("repositories[{index}]: missing required option 'path'"));
                    None
                }
            },
            other => {
                report.error(format!(
                    "repositories[{index}] must be a mapping with a 'path', found {}",
                    value_kind(other)
                ));
                None
            }
        };

        match path.map(str::trim) {
            Some("") => report.error(format!("repositories[{index}].path must not be empty")),
            Some(path) if !seen.insert(path.to_string()) => {
                report.warning(format!("repository '{path}' is listed more than once"))
            }
            _ => {}
        }
    }
}

fn check_retention(root: &Mapping, report: &mut ValidationReport) {
    let Some(retention) = root.get("retention") else {
        report.warning("no 'retention' section; old archives will never be pruned");
        return;
    };

    let Some(retention) = retention.as_mapping() else {
        report.error(format!(
            "'retention' must be a mapping, found {}",
            value_kind(retention)
        ));
        return;
    };

    let mut has_policy = false;
    let mut has_invalid = false;
    for (key, value) in retention {
        let Some(key) = key.as_str() else {
            continue;
        };
        if key == "keep_within" {
            match value.as_str() {
                Some(within) if !within.trim().is_empty() => has_policy = true,
                _ => {
                    has_invalid = true;
                    report.error("retention.keep_within must be a duration such as '2d'");
                }
            }
            continue;
        }
        if !key.starts_with("keep_") {
            continue;
        }
        match value.as_u64() {
            Some(count) => has_policy |= count > 0,
            None => {
                has_invalid = true;
                report.error(format!(
                    "retention.{key} must be a non-negative integer, found {}",
                    describe(value)
                ));
            }
        }
    }

    if !has_policy && !has_invalid {
        report.error("'retention' must set at least one positive keep_* option");
    }
}

fn check_storage(root: &Mapping, report: &mut ValidationReport) {
    let Some(storage) = root.get("storage") else {
        return;
    };
    let Some(storage) = storage.as_mapping() else {
        report.error(format!(
            "'storage' must be a mapping, found {}",
            value_kind(storage)
        ));
        return;
    };

    if let Some(compression) = storage.get("compression") {
        let algorithm = compression
            .as_str()
            .map(|spec| spec.split(',').next().unwrap_or(spec).trim());
        match algorithm {
            Some(algorithm) if COMPRESSION_ALGORITHMS.contains(&algorithm) => {}
            _ => report.warning(format!(
                "unknown compression '{}'; expected one of {}",
                describe(compression),
                COMPRESSION_ALGORITHMS.join(", ")
            )),
        }
    }

    if let Some(encryption) = storage.get("encryption") {
        match encryption.as_str() {
            Some(mode) if ENCRYPTION_MODES.contains(&mode) => {}
            _ => report.warning(format!("unknown encryption mode '{}'", describe(encryption))),
        }
    }
}

fn check_consistency(root: &Mapping, report: &mut ValidationReport) {
    let Some(consistency) = root.get("consistency") else {
        return;
    };
    let Some(consistency) = consistency.as_mapping() else {
        report.error(format!(
            "'consistency' must be a mapping, found {}",
            value_kind(consistency)
        ));
        return;
    };

    if let Some(checks) = consistency.get("checks") {
        match checks.as_sequence() {
            Some(checks) => {
                for check in checks {
                    // Either `- repository` or `- name: repository`
                    let name = check
                        .as_str()
                        .or_else(|| check.get("name").and_then(Value::as_str));
                    match name {
                        Some(name) if CONSISTENCY_CHECKS.contains(&name) => {}
                        _ => report.warning(format!(
                            "unknown consistency check '{}'",
                            describe(check)
                        )),
                    }
                }
            }
            None => report.error("consistency.checks must be a list"),
        }
    }

    if let Some(check_last) = consistency.get("check_last") {
        if !check_last.as_u64().is_some_and(|n| n > 0) {
            report.error(format!(
                "consistency.check_last must be a positive integer, found {}",
                describe(check_last)
            ));
        }
    }
}

/// Short rendering of a scalar for messages.
fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => value_kind(other).to_string(),
    }
}
