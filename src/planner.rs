use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument, warn};

use crate::broker::RequestBroker;
use crate::error::PlanError;
use crate::gemini::CompletionTransport;

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Directory,
}

// Anything that is not a directory is written as a file; a missing, null
// or unrecognised `type` must not cost us the rest of the plan.
impl<'de> Deserialize<'de> for EntryKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = Option::<String>::deserialize(deserializer)?;
        Ok(match kind {
            Some(kind) if kind.eq_ignore_ascii_case("directory") => EntryKind::Directory,
            _ => EntryKind::File,
        })
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One item of a plan's file structure. Names are paths relative to the
/// project root and may be nested, e.g. `src/components/auth/Login.js`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

impl PlanEntry {
    pub fn file(name: &str, file_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::File,
            file_type: Some(file_type.to_string()),
            description: description.to_string(),
        }
    }

    pub fn directory(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Directory,
            file_type: None,
            description: description.to_string(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPlan {
    pub project_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tech_stack: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_structure: Vec<PlanEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub architecture: String,
}

pub fn planning_prompt(description: &str) -> String {
    format!(
        r#"
You are an expert software architect. Create a detailed project plan for: "{}"

Respond with a JSON object containing:
{{
  "projectName": "kebab-case-name",
  "description": "Brief description",
  "features": ["feature1", "feature2", ...],
  "techStack": ["html", "css", "javascript"],
  "fileStructure": [
    {{"name": "index.html", "type": "file", "fileType": "html", "description": "Main HTML file"}},
    {{"name": "styles.css", "type": "file", "fileType": "css", "description": "Styling"}},
    {{"name": "script.js", "type": "file", "fileType": "javascript", "description": "Main functionality"}},
    {{"name": "assets", "type": "directory", "description": "Static assets folder"}},
    {{"name": "components", "type": "directory", "description": "Reusable components"}}
  ],
  "dependencies": ["any external libraries needed"],
  "architecture": "Brief explanation of how components work together"
}}

For complex projects, include nested directory structures like:
{{"name": "src/components/auth", "type": "directory", "description": "Authentication components"}},
{{"name": "src/components/auth/Login.js", "type": "file", "fileType": "javascript", "description": "Login component"}}

Make it modern, responsive, and feature-complete. Focus on clean code and good UX.
"#,
        description
    )
}

/// Lowercase, whitespace runs to `-`, then keep only `[a-z0-9-]`.
pub fn slugify(description: &str) -> String {
    let slug: String = description
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Parse the first `{` .. last `}` span of an LLM response as a plan.
pub fn parse_plan(response: &str) -> Result<ProjectPlan, PlanError> {
    let start = response.find('{').ok_or(PlanError::MissingJson)?;
    let end = response.rfind('}').ok_or(PlanError::MissingJson)?;
    if end < start {
        return Err(PlanError::MissingJson);
    }
    Ok(serde_json::from_str(&response[start..=end])?)
}

pub fn fallback_plan(description: &str) -> ProjectPlan {
    ProjectPlan {
        project_name: slugify(description),
        description: description.to_string(),
        features: vec![
            "Core functionality".to_string(),
            "Responsive design".to_string(),
            "Modern UI".to_string(),
        ],
        tech_stack: vec!["html".to_string(), "css".to_string(), "javascript".to_string()],
        file_structure: vec![
            PlanEntry::file("index.html", "html", "Main HTML file"),
            PlanEntry::file("styles.css", "css", "Styling"),
            PlanEntry::file("script.js", "javascript", "Main functionality"),
            PlanEntry::directory("assets", "Static assets folder"),
        ],
        dependencies: Vec::new(),
        architecture: "Simple single-page application".to_string(),
    }
}

pub fn render_plan(plan: &ProjectPlan) -> String {
    let rule = "━".repeat(50);
    let mut out = String::new();

    out.push_str(&format!("\nPROJECT PLAN\n{}\n", rule));
    out.push_str(&format!("Project: {}\n", plan.project_name));
    out.push_str(&format!("Description: {}\n", plan.description));

    out.push_str("\nFeatures:\n");
    for feature in &plan.features {
        out.push_str(&format!("  • {}\n", feature));
    }

    out.push_str("\nTech Stack:\n");
    for tech in &plan.tech_stack {
        out.push_str(&format!("  • {}\n", tech.to_uppercase()));
    }

    out.push_str("\nFile Structure:\n");
    for entry in &plan.file_structure {
        let marker = if entry.is_directory() { "[dir] " } else { "[file]" };
        out.push_str(&format!("  {} {} - {}\n", marker, entry.name, entry.description));
    }

    if !plan.dependencies.is_empty() {
        out.push_str("\nDependencies:\n");
        for dep in &plan.dependencies {
            out.push_str(&format!("  • {}\n", dep));
        }
    }

    out.push_str(&format!("\nArchitecture: {}\n{}\n", plan.architecture, rule));
    out
}

pub struct ProjectPlanner<'a, T> {
    broker: &'a RequestBroker<T>,
}

impl<'a, T: CompletionTransport> ProjectPlanner<'a, T> {
    pub fn new(broker: &'a RequestBroker<T>) -> Self {
        Self { broker }
    }

    /// Ask the model for a plan. Never fails: any error yields the canned
    /// fallback plan for `description`.
    #[instrument(skip(self))]
    pub async fn create_plan(&self, description: &str) -> ProjectPlan {
        match self.request_plan(description).await {
            Ok(plan) => {
                debug!(project = %plan.project_name, "Received project plan");
                plan
            }
            Err(e) => {
                warn!("Planning failed, using fallback plan: {}", e);
                fallback_plan(description)
            }
        }
    }

    async fn request_plan(&self, description: &str) -> Result<ProjectPlan, PlanError> {
        let response = self
            .broker
            .fetch_completion(&planning_prompt(description))
            .await?;
        parse_plan(&response)
    }
}
