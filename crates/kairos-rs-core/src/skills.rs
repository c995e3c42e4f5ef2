//! Markdown skill files that extend the system prompt.
//!
//! Each skill is `<root>/<name>.md` with YAML front matter carrying `name`
//! and `description`, followed by free-form instructions.

use crate::error::KairosCoreError;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-]").expect("skill name regex should compile"));

/// Parsed front matter for a skill file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// A skill loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub body: String,
    pub path: PathBuf,
}

/// Directory of skill files.
#[derive(Debug, Clone)]
pub struct SkillLibrary {
    root: PathBuf,
}

impl SkillLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write (or overwrite) a skill file and return its path.
    pub fn create(
        &self,
        name: &str,
        description: &str,
        body: &str,
    ) -> Result<PathBuf, KairosCoreError> {
        let safe_name = sanitize_name(name);
        if safe_name.trim_matches('_').is_empty() {
            return Err(KairosCoreError::Skill(format!(
                "skill name {name:?} has no usable characters"
            )));
        }
        fs::create_dir_all(&self.root)?;
        let frontmatter = SkillFrontmatter {
            name: Some(safe_name.clone()),
            description: Some(description.trim().to_string()),
        };
        let yaml = serde_yaml::to_string(&frontmatter)
            .map_err(|err| KairosCoreError::Skill(err.to_string()))?;
        let path = self.root.join(format!("{safe_name}.md"));
        fs::write(&path, format!("---\n{yaml}---\n\n{}\n", body.trim()))?;
        info!("created skill (name={}, path={})", safe_name, path.display());
        Ok(path)
    }

    /// All readable skills, sorted by file name. Unreadable files are skipped.
    pub fn list(&self) -> Vec<Skill> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        let mut skills = Vec::new();
        for path in paths {
            match load_skill(&path) {
                Ok(Some(skill)) => skills.push(skill),
                Ok(None) => debug!("skipping empty skill (path={})", path.display()),
                Err(err) => warn!("failed to load skill (path={}, err={})", path.display(), err),
            }
        }
        skills
    }

    /// `## Skills` prompt section, or an empty string when there are none.
    pub fn render_section(&self) -> String {
        let skills = self.list();
        if skills.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Skills\n");
        for skill in skills {
            out.push_str(&format!("\n### {}\n\n{}\n", skill.name, skill.body));
        }
        out
    }
}

/// Lower-case and replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    UNSAFE_NAME_CHARS
        .replace_all(&name.trim().to_lowercase(), "_")
        .into_owned()
}

fn load_skill(path: &Path) -> Result<Option<Skill>, KairosCoreError> {
    let contents = fs::read_to_string(path)?;
    let (frontmatter, body) = split_frontmatter(&contents)?;
    let body = body.trim().to_string();
    if body.is_empty() {
        return Ok(None);
    }
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(Some(Skill {
        name: frontmatter
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(stem),
        description: frontmatter.description.unwrap_or_default(),
        body,
        path: path.to_path_buf(),
    }))
}

/// Split YAML front matter from the Markdown body.
fn split_frontmatter(contents: &str) -> Result<(SkillFrontmatter, String), KairosCoreError> {
    let mut lines = contents.lines();
    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return Ok((SkillFrontmatter::default(), contents.to_string())),
    }

    let mut yaml_lines = Vec::new();
    let mut found_delimiter = false;
    for line in lines.by_ref() {
        if line.trim() == "---" {
            found_delimiter = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !found_delimiter {
        return Err(KairosCoreError::Skill(
            "unterminated front matter".to_string(),
        ));
    }
    let frontmatter = serde_yaml::from_str(&yaml_lines.join("\n"))
        .map_err(|err| KairosCoreError::Skill(err.to_string()))?;
    Ok((frontmatter, lines.collect::<Vec<_>>().join("\n")))
}
