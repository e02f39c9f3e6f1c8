//! Config file command handlers.
//!
//! Handles showing, editing, validating and initializing the config file.

use anyhow::{bail, Context};
use borgdash_store::{validate_text, ConfigStore, ValidationReport};
use serde_yaml::Value;
use std::io::Read;
use std::path::Path;

/// Print the config file.
pub async fn show_config(store: &ConfigStore, path: &Path, raw: bool, json: bool) -> anyhow::Result<()> {
    if raw {
        let text = store.read_text(path).await?;
        print!("{text}");
        return Ok(());
    }

    let document = store.read(path, true).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print!("{}", document.to_yaml()?);
    }
    Ok(())
}

/// Print one top-level section.
pub async fn get_section(
    store: &ConfigStore,
    path: &Path,
    section: &str,
    json: bool,
) -> anyhow::Result<()> {
    let Some(value) = store.get_section(path, section).await? else {
        bail!("Section not found: {section}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", serde_yaml::to_string(&value)?);
    }
    Ok(())
}

/// Replace one top-level section with a YAML value.
pub async fn set_section(
    store: &ConfigStore,
    path: &Path,
    section: &str,
    value: &str,
    no_backup: bool,
) -> anyhow::Result<()> {
    let value: Value = serde_yaml::from_str(value)
        .with_context(|| format!("Value for '{section}' is not valid YAML"))?;

    let document = if no_backup {
        store
            .update(path, false, |document| {
                document.set(section, value);
            })
            .await?
    } else {
        store.update_section(path, section, value).await?
    };

    println!("Updated section '{}' in {}", section, path.display());
    let report = store.validate(&document);
    if !report.warnings.is_empty() || !report.errors.is_empty() {
        eprintln!();
        print_report(&report);
    }
    Ok(())
}

/// Replace the config file with the contents of `input` (`-` for stdin).
///
/// The new content is validated first and refused on errors unless `force`.
pub async fn write_config(
    store: &ConfigStore,
    path: &Path,
    input: &Path,
    force: bool,
    no_backup: bool,
) -> anyhow::Result<()> {
    let text = read_input(input)?;

    let report = validate_text(&text);
    if !report.is_valid() {
        print_report(&report);
        if !force {
            bail!(
                "Refusing to write invalid configuration ({} errors); use --force to override",
                report.errors.len()
            );
        }
    }

    store.write_text(path, &text, !no_backup).await?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Validate the config file, or `file` if given. Fails if there are errors.
pub async fn validate_config(
    store: &ConfigStore,
    path: &Path,
    file: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let text = match file {
        Some(file) => read_input(file)?,
        None => store.read_text(path).await?,
    };
    let report = validate_text(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_valid() && report.warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        print_report(&report);
    }

    if !report.is_valid() {
        bail!("Configuration is invalid ({} errors)", report.errors.len());
    }
    Ok(())
}

/// List the built-in templates, or print one.
pub fn show_templates(store: &ConfigStore, name: Option<&str>) -> anyhow::Result<()> {
    match name {
        Some(name) => {
            let Some(template) = borgdash_store::template(name) else {
                bail!("Unknown template: {name}");
            };
            print!("{}", template.content);
        }
        None => {
            println!("{:<12} {}", "NAME", "DESCRIPTION");
            println!("{}", "-".repeat(60));
            for template in store.templates() {
                println!("{:<12} {}", template.name, template.description);
            }
        }
    }
    Ok(())
}

/// Create the config file from a template.
///
/// An existing file is only replaced with `force`, and is backed up first.
pub async fn init_config(
    store: &ConfigStore,
    path: &Path,
    template: &str,
    force: bool,
) -> anyhow::Result<()> {
    let Some(template) = borgdash_store::template(template) else {
        bail!("Unknown template: {template}");
    };

    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to check {}", path.display()))?;
    if exists && !force {
        bail!(
            "{} already exists; use --force to replace it",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    store.write_text(path, template.content, true).await?;
    println!(
        "Created {} from the '{}' template",
        path.display(),
        template.name
    );
    Ok(())
}

/// Print validation errors and warnings to stderr.
pub fn print_report(report: &ValidationReport) {
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))
}
