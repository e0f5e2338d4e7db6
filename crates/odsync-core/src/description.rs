//! Dataset description rendering.
//!
//! A dataset's description lists the titles of its resources. The layout comes
//! from a Handlebars template receiving `{ "title": ..., "resources": [titles] }`.

use std::path::Path;

use handlebars::{Handlebars, no_escape};
use serde::Serialize;

use crate::error::AppError;

const TEMPLATE_NAME: &str = "description";

/// Built-in template, Markdown output.
pub const DEFAULT_TEMPLATE: &str = "{{#if resources}}This dataset groups the following tables:
{{#each resources}}
- {{this}}
{{/each}}
{{else}}No table is currently published for this topic.
{{/if}}";

#[derive(Serialize)]
struct DescriptionContext<'a> {
    title: &'a str,
    resources: &'a [String],
}

/// Renders dataset descriptions from resource titles.
#[derive(Debug, Clone)]
pub struct DescriptionRenderer {
    handlebars: Handlebars<'static>,
}

impl DescriptionRenderer {
    /// Renderer using [`DEFAULT_TEMPLATE`].
    pub fn new() -> Result<Self, AppError> {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    /// Renderer using a custom template string.
    pub fn with_template(template: &str) -> Result<Self, AppError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Output is Markdown, not HTML.
        handlebars.register_escape_fn(no_escape);
        handlebars
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| AppError::TemplateError(format!("Invalid description template: {e}")))?;
        Ok(Self { handlebars })
    }

    /// Renderer using a template file.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read description template '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::with_template(&template)
    }

    /// Renders the description of a dataset.
    pub fn render(&self, title: &str, resource_titles: &[String]) -> Result<String, AppError> {
        let context = DescriptionContext {
            title,
            resources: resource_titles,
        };
        self.handlebars
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| AppError::TemplateError(format!("Error rendering description: {e}")))
    }
}
