// Fallback file content, rendered with minijinja when the model cannot
// produce a file (or the file type is not one we ask the model for).

use std::path::Path;

use minijinja::{context, AutoEscape, Environment};

use crate::error::TemplateError;
use crate::planner::{PlanEntry, ProjectPlan};

const TEMPLATES: &[(&str, &str)] = &[
    ("index.html", include_str!("../templates/index.html")),
    ("styles.css", include_str!("../templates/styles.css")),
    ("script.js", include_str!("../templates/script.js")),
    ("README.md", include_str!("../templates/README.md")),
    ("gitignore", include_str!("../templates/gitignore")),
    ("generic.js", include_str!("../templates/generic.js")),
    ("generic.css", include_str!("../templates/generic.css")),
    ("generic.md", include_str!("../templates/generic.md")),
    ("generic.txt", include_str!("../templates/generic.txt")),
];

pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        // Only the page template is markup; JS/CSS/Markdown are emitted verbatim.
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".html") {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, TemplateError> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }

    /// Content for `entry` when no generated content is available: the
    /// template for its declared file type, else a generic one chosen by
    /// file extension.
    pub fn fallback_for(&self, entry: &PlanEntry, plan: &ProjectPlan) -> Result<String, TemplateError> {
        let by_type = match entry.file_type.as_deref() {
            Some("html") => Some("index.html"),
            Some("css") => Some("styles.css"),
            Some("javascript") => Some("script.js"),
            _ => None,
        };

        let name = match by_type {
            Some(name) => name,
            None => {
                let ext = Path::new(&entry.name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase());
                match ext.as_deref() {
                    Some("js") => "generic.js",
                    Some("css") => "generic.css",
                    Some("html") => "index.html",
                    Some("json") => return Ok("{}".to_string()),
                    Some("md") => "generic.md",
                    _ => "generic.txt",
                }
            }
        };

        self.render(name, context! { plan => plan, file => entry })
    }

    pub fn readme(&self, plan: &ProjectPlan, tree: &str) -> Result<String, TemplateError> {
        self.render("README.md", context! { plan => plan, tree => tree })
    }

    pub fn gitignore(&self) -> Result<String, TemplateError> {
        self.render("gitignore", context! {})
    }
}
