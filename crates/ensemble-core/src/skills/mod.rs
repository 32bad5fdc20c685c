//! Skill catalog.
//!
//! A skill is a directory with a `SKILL.md` whose front-matter declares
//! `name`, `description` and optional `allowed-tools`. The catalog indexes
//! front-matter at startup; full bodies load on demand through `get_skill`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::debug;

/// An indexed skill. `body` holds the markdown after the front-matter.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub allowed_tools: Vec<String>,
    pub body: String,
    pub dir: PathBuf,
}

impl Skill {
    /// Parse a SKILL.md document. Front-matter is a `---` fenced block of
    /// `key: value` lines; `allowed-tools` is a comma-separated list.
    pub fn parse(content: &str, dir: PathBuf) -> Result<Self> {
        let rest = content
            .strip_prefix("---")
            .ok_or_else(|| anyhow!("SKILL.md missing front-matter in {dir:?}"))?;
        let end = rest
            .find("\n---")
            .ok_or_else(|| anyhow!("unterminated front-matter in {dir:?}"))?;
        let front = &rest[..end];
        let body = rest[end + 4..].trim_start().to_string();

        let mut name = None;
        let mut description = None;
        let mut allowed_tools = Vec::new();

        for line in front.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" => name = Some(value.to_string()),
                "description" => description = Some(value.to_string()),
                "allowed-tools" => {
                    allowed_tools = value
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                _ => {}
            }
        }

        Ok(Self {
            name: name.ok_or_else(|| anyhow!("skill missing name in {dir:?}"))?,
            description: description.unwrap_or_default(),
            allowed_tools,
            body,
            dir,
        })
    }
}

/// Startup-indexed catalog of skills.
#[derive(Debug, Default, Clone)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    /// Index every subdirectory of `dir` that carries a SKILL.md. Missing
    /// directory means an empty catalog, not an error.
    pub fn load(dir: &Path) -> Self {
        let mut skills = Vec::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Self { skills },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let skill_file = path.join("SKILL.md");
            let Ok(content) = fs::read_to_string(&skill_file) else {
                continue;
            };
            match Skill::parse(&content, path.clone()) {
                Ok(skill) => {
                    debug!("indexed skill {} from {:?}", skill.name, path);
                    skills.push(skill);
                }
                Err(e) => debug!("skipping skill at {path:?}: {e}"),
            }
        }

        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Self { skills }
    }

    pub fn list(&self) -> &[Skill] {
        &self.skills
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Load a skill's full body by name.
    pub fn load_skill(&self, name: &str) -> Result<String> {
        let skill = self
            .skills
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("unknown skill: {name}"))?;
        Ok(skill.body.clone())
    }
}
