//! README synthesis from manifest metadata

use chrono::{DateTime, Utc};
use kiln_core::Result;
use kiln_workspace::{directory_listing, Manifest};
use std::path::Path;

const LISTING_DEPTH: usize = 2;
const MAX_LISTING_ENTRIES: usize = 200;

/// Build a README for the project at `root`
pub fn synthesize_readme(root: &Path, generated_at: DateTime<Utc>) -> Result<String> {
    let manifest = Manifest::load(root)?;
    let fallback_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "Project".to_string());

    let name = manifest
        .as_ref()
        .and_then(|m| m.name.clone())
        .unwrap_or(fallback_name);
    let mut out = format!("# {}\n\n", name);

    if let Some(description) = manifest.as_ref().and_then(|m| m.description.as_deref()) {
        out.push_str(description);
        out.push_str("\n\n");
    }

    if let Some(manifest) = &manifest {
        if !manifest.scripts.is_empty() {
            out.push_str("## Scripts\n\n| Script | Command |\n|---|---|\n");
            for (script, command) in &manifest.scripts {
                out.push_str(&format!("| `{}` | `{}` |\n", script, command));
            }
            out.push('\n');
        }

        if !manifest.dependencies.is_empty() {
            out.push_str("## Dependencies\n\n");
            for dep in &manifest.dependencies {
                out.push_str(&format!("- {}\n", dep));
            }
            out.push('\n');
        }

        if !manifest.dev_dependencies.is_empty() {
            out.push_str("## Development dependencies\n\n");
            for dep in &manifest.dev_dependencies {
                out.push_str(&format!("- {}\n", dep));
            }
            out.push('\n');
        }
    }

    let listing = directory_listing(root, LISTING_DEPTH);
    if !listing.is_empty() {
        out.push_str("## Project structure\n\n```\n");
        for entry in listing.iter().take(MAX_LISTING_ENTRIES) {
            out.push_str(entry);
            out.push('\n');
        }
        if listing.len() > MAX_LISTING_ENTRIES {
            out.push_str(&format!("... {} more\n", listing.len() - MAX_LISTING_ENTRIES));
        }
        out.push_str("```\n\n");
    }

    out.push_str(&format!(
        "---\n_Generated by kiln on {}_\n",
        generated_at.to_rfc3339()
    ));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_readme_from_package_json() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"shop","description":"Online shop","scripts":{"start":"node ."},"dependencies":{"express":"4"}}"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.js"), "").unwrap();

        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let readme = synthesize_readme(dir.path(), at).unwrap();

        assert!(readme.starts_with("# shop\n\nOnline shop\n"));
        assert!(readme.contains("| `start` | `node .` |"));
        assert!(readme.contains("- express"));
        assert!(readme.contains("src/index.js"));
        assert!(readme.ends_with("_Generated by kiln on 2026-01-02T03:04:05+00:00_\n"));
    }

    #[test]
    fn test_readme_without_manifest_uses_directory_name() {
        let dir = TempDir::new().unwrap();
        let readme = synthesize_readme(dir.path(), Utc::now()).unwrap();
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(readme.starts_with(&format!("# {}\n", dir_name)));
        assert!(!readme.contains("## Scripts"));
    }
}
