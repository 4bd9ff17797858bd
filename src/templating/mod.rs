//! Record templating.
//!
//! A [`RecordTemplate`] turns one record into an HTML fragment. The default
//! implementation is [`HandlebarsTemplate`], which registers the formatting and
//! comparison helpers documented in [`helpers`]. [`wrap_document`] turns a fragment
//! into the full document handed to the renderer.

mod document;
pub mod helpers;

use handlebars::Handlebars;
use quire_source::Record;
use thiserror::Error;

pub use document::{PAGE_BREAK, wrap_document};

#[derive(Error, Debug, Clone)]
pub enum TemplateError {
    #[error("Template does not compile: {0}")]
    Compile(String),

    #[error("Template rendering failed: {0}")]
    Render(String),
}

/// Renders a record into markup. Shared by every job of a run.
pub trait RecordTemplate: Send + Sync {
    fn render(&self, record: &Record) -> Result<String, TemplateError>;
}

const TEMPLATE_NAME: &str = "record";

/// A compiled Handlebars template with the quire helpers registered.
pub struct HandlebarsTemplate {
    registry: Handlebars<'static>,
}

impl HandlebarsTemplate {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        // Missing fields render as empty strings.
        registry.set_strict_mode(false);
        helpers::register(&mut registry);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| TemplateError::Compile(e.to_string()))?;
        Ok(Self { registry })
    }
}

impl RecordTemplate for HandlebarsTemplate {
    fn render(&self, record: &Record) -> Result<String, TemplateError> {
        self.registry
            .render(TEMPLATE_NAME, record)
            .map_err(|e| TemplateError::Render(e.to_string()))
    }
}
