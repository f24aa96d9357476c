use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::broker::RequestBroker;
use crate::constants;
use crate::gemini::CompletionTransport;
use crate::planner::{slugify, PlanEntry, ProjectPlan};
use crate::templates::Templates;

const GENERATED_TYPES: &[&str] = &["html", "css", "javascript", "js", "json"];

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Parent directory that receives one sub-directory per project
    pub projects_dir: PathBuf,
    /// Pause after each model-generated file, to stay under free-tier rate limits
    pub api_delay: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from(constants::PROJECTS_DIR.as_str()),
            api_delay: Duration::from_millis(constants::API_DELAY_MS),
        }
    }
}

/// What happened to each plan entry, by entry name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GenerationReport {
    pub project_path: PathBuf,
    pub generated: Vec<String>,
    pub fallbacks: Vec<String>,
    pub directories: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn should_generate(file_type: &str) -> bool {
    GENERATED_TYPES.contains(&file_type.to_lowercase().as_str())
}

/// Relative, non-empty, and never climbing out of the project root.
pub fn is_safe_relative(name: &str) -> bool {
    !name.trim().is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn specific_requirements(file_type: &str, plan: &ProjectPlan) -> String {
    match file_type.to_lowercase().as_str() {
        "html" => "\
- Use semantic HTML5 elements
- Include proper meta tags for mobile
- Link to styles.css and script.js appropriately
- Add accessibility features (alt texts, ARIA labels)
- Modern structure with header, main, footer if applicable"
            .to_string(),
        "css" => "\
- Use CSS Grid and Flexbox for layouts
- Implement CSS custom properties (variables)
- Add smooth transitions and hover effects
- Make it fully responsive (mobile-first)
- Use modern CSS features (clamp, min/max, etc.)
- Include loading states and micro-animations"
            .to_string(),
        "javascript" | "js" => format!(
            "\
- Use modern ES6+ syntax
- Implement all planned features: {}
- Add proper error handling and validation
- Include smooth animations and transitions
- Make it interactive and user-friendly
- Use async/await for any asynchronous operations
- Add proper event listeners and cleanup",
            plan.features.join(", ")
        ),
        "json" => "\
- Valid JSON format
- Include all necessary configuration
- Follow JSON best practices"
            .to_string(),
        _ => "- Follow modern development best practices".to_string(),
    }
}

pub fn file_prompt(entry: &PlanEntry, file_type: &str, plan: &ProjectPlan) -> String {
    format!(
        r#"
Generate {} code for a {} project.

File: {}
Purpose: {}
Features to implement: {}

Requirements:
- Modern, clean, and responsive design
- Follow best practices for {}
- Make it production-ready
- Include comments for complex parts

{}

Return ONLY the code, no explanations or markdown formatting.
"#,
        file_type.to_uppercase(),
        plan.description,
        entry.name,
        entry.description,
        plan.features.join(", "),
        file_type,
        specific_requirements(file_type, plan)
    )
}

/// Pull the code out of a model response: the first fenced block if there
/// is one, else (for HTML) the `<!DOCTYPE ... </html>` span, else the whole
/// response trimmed.
pub fn extract_code(content: &str, file_type: &str) -> String {
    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        if let Some(end) = after.find("```") {
            let block = &after[..end];
            // Drop the info string (`html`, `js title=app.js`, ...) on the opening fence line
            let body = match block.find('\n') {
                Some(nl) if is_info_string(&block[..nl]) => &block[nl + 1..],
                _ => block,
            };
            return body.trim().to_string();
        }
    }

    if file_type.eq_ignore_ascii_case("html") {
        // ASCII lowercasing keeps byte offsets intact
        let lower = content.to_ascii_lowercase();
        if let (Some(start), Some(end)) = (lower.find("<!doctype"), lower.rfind("</html>")) {
            if end > start {
                return content[start..end + "</html>".len()].to_string();
            }
        }
    }

    content.trim().to_string()
}

fn is_info_string(line: &str) -> bool {
    match line.split_whitespace().next() {
        None => true,
        Some(lang) => lang
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '#' | '.')),
    }
}

pub fn file_tree(entries: &[PlanEntry]) -> String {
    let mut tree = String::new();
    for (index, entry) in entries.iter().enumerate() {
        let connector = if index + 1 == entries.len() { "└── " } else { "├── " };
        let marker = if entry.is_directory() { "[dir] " } else { "" };
        tree.push_str(&format!("{}{}{}\n", connector, marker, entry.name));
    }
    tree
}

pub fn progress_line(step: usize, total: usize, message: &str) -> String {
    let percentage = if total == 0 {
        100
    } else {
        ((step as f64 / total as f64) * 100.0).round() as usize
    };
    let filled = (percentage / 5).min(20);
    format!(
        "[{}{}] {}% - {}",
        "█".repeat(filled),
        "░".repeat(20 - filled),
        percentage,
        message
    )
}

pub struct FileGenerator<'a, T> {
    broker: &'a RequestBroker<T>,
    templates: Templates,
    config: GeneratorConfig,
}

impl<'a, T: CompletionTransport> FileGenerator<'a, T> {
    pub fn new(broker: &'a RequestBroker<T>, config: GeneratorConfig) -> Result<Self> {
        let templates = Templates::new().context("Failed to load fallback templates")?;
        Ok(Self {
            broker,
            templates,
            config,
        })
    }

    /// Write every entry of `plan` under `<projects_dir>/<projectName>`,
    /// plus package.json, README.md and .gitignore. Files the model cannot
    /// produce get template content instead; only filesystem errors abort.
    #[instrument(skip(self, plan), fields(project = %plan.project_name))]
    pub async fn generate_project(&self, plan: &ProjectPlan) -> Result<GenerationReport> {
        let dir_name = if is_safe_relative(&plan.project_name) {
            plan.project_name.clone()
        } else {
            warn!("Unsafe project name {:?}, using a slug instead", plan.project_name);
            slugify(&plan.project_name)
        };
        let project_path = self.config.projects_dir.join(dir_name);

        fs::create_dir_all(&project_path)
            .await
            .with_context(|| format!("Failed to create project directory {}", project_path.display()))?;
        info!("Created project directory {}", project_path.display());

        let mut report = GenerationReport {
            project_path: project_path.clone(),
            ..Default::default()
        };

        // Directories first; the sort is stable so plan order is kept within each group
        let mut entries = plan.file_structure.clone();
        entries.sort_by_key(|entry| !entry.is_directory());

        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            let step = index + 1;

            if !is_safe_relative(&entry.name) {
                warn!("Skipping plan entry with unsafe path {:?}", entry.name);
                report.skipped.push(entry.name.clone());
                continue;
            }

            if entry.is_directory() {
                println!("{}", progress_line(step, total, &format!("Creating directory: {}", entry.name)));
                match fs::create_dir_all(project_path.join(&entry.name)).await {
                    Ok(()) => report.directories.push(entry.name.clone()),
                    Err(e) => warn!("Could not create directory {}: {}", entry.name, e),
                }
                continue;
            }

            println!("{}", progress_line(step, total, &format!("Generating file: {}", entry.name)));
            match self.generate_file(&project_path, entry, plan).await {
                Ok(true) => {
                    report.generated.push(entry.name.clone());
                    if step < total {
                        tokio::time::sleep(self.config.api_delay).await;
                    }
                }
                Ok(false) => {
                    self.write_fallback(&project_path, entry, plan).await?;
                    report.fallbacks.push(entry.name.clone());
                }
                Err(e) => {
                    warn!("Failed to generate {}: {:#}", entry.name, e);
                    self.write_fallback(&project_path, entry, plan).await?;
                    report.fallbacks.push(entry.name.clone());
                }
            }
        }

        self.write_metadata(&project_path, plan).await?;
        Ok(report)
    }

    /// Returns `Ok(false)` when the entry's type is not one the model writes.
    async fn generate_file(&self, project_path: &Path, entry: &PlanEntry, plan: &ProjectPlan) -> Result<bool> {
        let file_type = match entry.file_type.as_deref() {
            Some(file_type) if should_generate(file_type) => file_type,
            _ => return Ok(false),
        };

        let response = self
            .broker
            .fetch_completion(&file_prompt(entry, file_type, plan))
            .await?;
        let content = extract_code(&response, file_type);

        write_file(&project_path.join(&entry.name), &content).await?;
        debug!(file = %entry.name, bytes = content.len(), "Wrote generated file");
        Ok(true)
    }

    async fn write_fallback(&self, project_path: &Path, entry: &PlanEntry, plan: &ProjectPlan) -> Result<()> {
        let content = self
            .templates
            .fallback_for(entry, plan)
            .with_context(|| format!("Failed to render fallback for {}", entry.name))?;
        write_file(&project_path.join(&entry.name), &content).await?;
        warn!("Created fallback: {}", entry.name);
        Ok(())
    }

    async fn write_metadata(&self, project_path: &Path, plan: &ProjectPlan) -> Result<()> {
        let dependencies: serde_json::Map<String, serde_json::Value> = plan
            .dependencies
            .iter()
            .map(|dep| (dep.clone(), json!("latest")))
            .collect();

        let package = json!({
            "name": plan.project_name,
            "version": "1.0.0",
            "description": plan.description,
            "main": "index.html",
            "scripts": {
                "start": "open index.html",
                "dev": "live-server .",
                "build": "echo 'Build script here'"
            },
            "keywords": plan.features,
            "author": "blueprint",
            "dependencies": dependencies,
            "devDependencies": {}
        });

        write_file(&project_path.join("package.json"), &serde_json::to_string_pretty(&package)?).await?;

        let readme = self
            .templates
            .readme(plan, &file_tree(&plan.file_structure))
            .context("Failed to render README.md")?;
        write_file(&project_path.join("README.md"), &readme).await?;

        let gitignore = self.templates.gitignore().context("Failed to render .gitignore")?;
        write_file(&project_path.join(".gitignore"), &gitignore).await?;

        info!("Created project metadata (package.json, README.md, .gitignore)");
        Ok(())
    }
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_generate() {
        assert!(should_generate("HTML"));
        assert!(should_generate("js"));
        assert!(should_generate("json"));
        assert!(!should_generate("markdown"));
        assert!(!should_generate("svg"));
    }

    #[test]
    fn test_is_safe_relative() {
        assert!(is_safe_relative("index.html"));
        assert!(is_safe_relative("src/components/auth/Login.js"));
        assert!(is_safe_relative("./assets"));
        assert!(!is_safe_relative(""));
        assert!(!is_safe_relative("../escape.js"));
        assert!(!is_safe_relative("src/../../escape.js"));
        assert!(!is_safe_relative("/etc/passwd"));
    }

    #[test]
    fn test_extract_code_from_fenced_block() {
        let response = "Here you go:\n```javascript\nconst x = 1;\nconsole.log(x);\n```\nEnjoy!";
        assert_eq!(extract_code(response, "javascript"), "const x = 1;\nconsole.log(x);");
    }

    #[test]
    fn test_extract_code_without_language_tag() {
        let response = "```\nbody { margin: 0; }\n```";
        assert_eq!(extract_code(response, "css"), "body { margin: 0; }");
    }

    #[test]
    fn test_extract_code_drops_padded_info_string() {
        assert_eq!(
            extract_code("```html \n<p>Hi</p>\n```", "html"),
            "<p>Hi</p>"
        );
        assert_eq!(
            extract_code("```js title=app.js\nrun();\n```", "javascript"),
            "run();"
        );
    }

    #[test]
    fn test_extract_code_html_document() {
        let response = "Sure!\n<!DOCTYPE html>\n<html><body>Hi</body></html>\nThanks";
        assert_eq!(
            extract_code(response, "html"),
            "<!DOCTYPE html>\n<html><body>Hi</body></html>"
        );
    }

    #[test]
    fn test_extract_code_plain() {
        assert_eq!(extract_code("  {\"a\": 1}\n", "json"), "{\"a\": 1}");
    }

    #[test]
    fn test_file_tree() {
        let entries = vec![
            PlanEntry::directory("assets", "Static"),
            PlanEntry::file("index.html", "html", "Main"),
        ];
        assert_eq!(file_tree(&entries), "├── [dir] assets\n└── index.html\n");
        assert_eq!(file_tree(&[]), "");
    }

    #[test]
    fn test_progress_line() {
        assert_eq!(
            progress_line(1, 4, "Generating file: a.js"),
            format!("[{}{}] 25% - Generating file: a.js", "█".repeat(5), "░".repeat(15))
        );
        assert!(progress_line(4, 4, "done").starts_with(&format!("[{}] 100%", "█".repeat(20))));
    }

    #[test]
    fn test_file_prompt_mentions_features() {
        let plan = crate::planner::fallback_plan("timer");
        let entry = PlanEntry::file("script.js", "javascript", "Main functionality");
        let prompt = file_prompt(&entry, "javascript", &plan);
        assert!(prompt.contains("Generate JAVASCRIPT code for a timer project."));
        assert!(prompt.contains("File: script.js"));
        assert!(prompt.contains("Implement all planned features: Core functionality, Responsive design, Modern UI"));
    }
}
