//! Structured system prompt assembly.
//!
//! [`PromptBuilder::build`] composes the system message from a typed config
//! in a fixed section order, each section wrapped in its own XML-style tag or
//! markdown header and joined by blank lines. Identical inputs produce
//! byte-identical output, the datetime section excepted.

use std::path::Path;

use chrono::{FixedOffset, Utc};

use crate::skills::Skill;

/// Typed configuration for the system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub role: Option<String>,
    pub instructions: Vec<String>,
    pub expected_output: Option<String>,
    pub markdown: bool,
    pub add_datetime: bool,
    pub add_workspace_info: bool,
    /// `UTC` or a fixed `UTC±HH:MM` offset; anything else formats as UTC.
    pub timezone: String,
    pub additional_context: Option<String>,
    pub additional_information: Vec<String>,
    /// (tag, content) pairs emitted as markdown headers in insertion order.
    pub custom_sections: Vec<(String, String)>,
}

impl PromptConfig {
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

pub struct PromptBuilder;

impl PromptBuilder {
    /// Assemble the system prompt. Pure apart from the clock read when
    /// `add_datetime` is set.
    pub fn build(
        config: &PromptConfig,
        tool_instructions: &[String],
        skills: &[Skill],
        workspace_dir: &Path,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(name) = &config.name {
            sections.push(format!("# {name}\n"));
        }
        if let Some(description) = &config.description {
            sections.push(description.clone());
        }
        if let Some(role) = &config.role {
            sections.push(format!("<your_role>\n{role}\n</your_role>"));
        }
        if !config.instructions.is_empty() {
            sections.push(bullet_section("instructions", &config.instructions));
        }
        if config.markdown {
            sections.push(markdown_section());
        }
        if !tool_instructions.is_empty() {
            let mut section = String::from("<tool_usage_guidelines>");
            for instruction in tool_instructions {
                section.push('\n');
                section.push_str(instruction);
            }
            section.push_str("\n</tool_usage_guidelines>");
            sections.push(section);
        }
        if !skills.is_empty() {
            sections.push(skills_section(skills));
        }
        if let Some(expected) = &config.expected_output {
            sections.push(format!(
                "<expected_output>\n{}\n</expected_output>",
                expected.trim()
            ));
        }
        if config.add_workspace_info {
            sections.push(format!(
                "<workspace_info>\nCurrent working directory: `{}`\nAll relative file paths are resolved relative to this directory.\n</workspace_info>",
                workspace_dir.display()
            ));
        }
        if config.add_datetime {
            sections.push(datetime_section(&config.timezone));
        }
        if !config.additional_information.is_empty() {
            sections.push(bullet_section(
                "additional_information",
                &config.additional_information,
            ));
        }
        for (tag, content) in &config.custom_sections {
            sections.push(format!("## {tag}\n\n{content}"));
        }
        if let Some(context) = &config.additional_context {
            sections.push(context.clone());
        }

        sections.join("\n\n")
    }
}

fn bullet_section(tag: &str, items: &[String]) -> String {
    let mut section = format!("<{tag}>");
    if items.len() == 1 {
        section.push('\n');
        section.push_str(&items[0]);
    } else {
        for item in items {
            section.push_str("\n- ");
            section.push_str(item);
        }
    }
    section.push_str(&format!("\n</{tag}>"));
    section
}

fn markdown_section() -> String {
    "<output_format>\n\
     Use markdown formatting to improve readability:\n\
     - Use headers (##, ###) to organize sections\n\
     - Use bullet points and numbered lists\n\
     - Use code blocks for code snippets\n\
     - Use **bold** for emphasis\n\
     </output_format>"
        .to_string()
}

fn skills_section(skills: &[Skill]) -> String {
    let mut section = String::from("## Available Skills\n");
    for skill in skills {
        section.push_str(&format!("\n- {}: {}", skill.name, skill.description));
    }
    section.push_str(
        "\n\nCall the `get_skill` tool with a skill name to load its full content before relying on it.",
    );
    section
}

fn datetime_section(timezone: &str) -> String {
    let now = Utc::now();
    let formatted = match parse_fixed_offset(timezone) {
        Some(offset) => now
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string(),
        None if timezone.is_empty() || timezone == "UTC" => {
            now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
        }
        // Unknown named zones format as UTC with the identifier echoed.
        None => format!("{} ({timezone})", now.format("%Y-%m-%d %H:%M:%S UTC")),
    };
    format!("<current_datetime>\n{formatted}\n</current_datetime>")
}

/// Parse `UTC+HH:MM` / `UTC-HH:MM` style offsets.
fn parse_fixed_offset(timezone: &str) -> Option<FixedOffset> {
    let rest = timezone.strip_prefix("UTC")?;
    if rest.is_empty() {
        return None;
    }
    let sign = match rest.as_bytes().first() {
        Some(b'+') => 1,
        Some(b'-') => -1,
        _ => return None,
    };
    let (hours, minutes) = rest[1..].split_once(':')?;
    let seconds = sign * (hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60);
    FixedOffset::east_opt(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workspace() -> PathBuf {
        PathBuf::from("/tmp/workspace")
    }

    fn full_config() -> PromptConfig {
        PromptConfig {
            name: Some("helper".into()),
            description: Some("A helpful agent.".into()),
            role: Some("You answer questions.".into()),
            instructions: vec!["Think step by step".into(), "Be brief".into()],
            expected_output: Some("One paragraph".into()),
            markdown: true,
            add_datetime: false,
            add_workspace_info: true,
            timezone: "UTC".into(),
            additional_context: Some("final context".into()),
            additional_information: vec!["Extra fact".into()],
            custom_sections: vec![("Conventions".into(), "snake_case".into())],
        }
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let prompt = PromptBuilder::build(
            &full_config(),
            &["Use echo for echoing.".to_string()],
            &[],
            &workspace(),
        );

        let order = [
            "# helper",
            "A helpful agent.",
            "<your_role>",
            "<instructions>",
            "<output_format>",
            "<tool_usage_guidelines>",
            "<expected_output>",
            "<workspace_info>",
            "<additional_information>",
            "## Conventions",
            "final context",
        ];
        let mut cursor = 0;
        for marker in order {
            let at = prompt[cursor..]
                .find(marker)
                .unwrap_or_else(|| panic!("missing or out of order: {marker}"));
            cursor += at;
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let config = full_config();
        let a = PromptBuilder::build(&config, &[], &[], &workspace());
        let b = PromptBuilder::build(&config, &[], &[], &workspace());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_config_produces_no_sections() {
        let config = PromptConfig::default();
        let prompt = PromptBuilder::build(&config, &[], &[], &workspace());
        assert!(prompt.is_empty());
    }

    #[test]
    fn single_instruction_is_not_bulleted() {
        let section = bullet_section("instructions", &["only one".to_string()]);
        assert_eq!(section, "<instructions>\nonly one\n</instructions>");
        let two = bullet_section("instructions", &["a".to_string(), "b".to_string()]);
        assert!(two.contains("\n- a"));
    }

    #[test]
    fn skills_section_lists_and_points_at_get_skill() {
        let skills = vec![Skill {
            name: "pdf".into(),
            description: "Work with PDFs".into(),
            allowed_tools: Vec::new(),
            body: String::new(),
            dir: PathBuf::new(),
        }];
        let prompt = PromptBuilder::build(
            &PromptConfig::with_description("x"),
            &[],
            &skills,
            &workspace(),
        );
        assert!(prompt.contains("## Available Skills"));
        assert!(prompt.contains("- pdf: Work with PDFs"));
        assert!(prompt.contains("`get_skill`"));
    }

    #[test]
    fn fixed_offset_parses() {
        assert!(parse_fixed_offset("UTC+05:30").is_some());
        assert!(parse_fixed_offset("UTC-08:00").is_some());
        assert!(parse_fixed_offset("Asia/Shanghai").is_none());
        assert!(parse_fixed_offset("UTC").is_none());
    }
}
