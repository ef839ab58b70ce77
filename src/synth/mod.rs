//! Synthesis seam.
//!
//! The composed stack is handed to a [`Synthesizer`], which turns the
//! resource graph into a deployable document. [`TemplateSynthesizer`] renders
//! a CloudFormation-shaped JSON template; [`TemplateQuery`] reads one back.

pub mod query;
pub mod template;

pub use query::TemplateQuery;
pub use template::TemplateSynthesizer;

use crate::core::error::{ComposeError, Result};
use crate::core::stack::ComposedStack;
use indexmap::IndexMap;

/// External synthesis engine.
pub trait Synthesizer {
    fn synthesize(&self, stack: &ComposedStack) -> Result<SynthesizedStack>;
}

/// Result of synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedStack {
    pub stack_name: String,
    pub template: serde_json::Value,
    /// Rendered stack outputs, by name
    pub outputs: IndexMap<String, serde_json::Value>,
}

impl SynthesizedStack {
    pub fn query(&self) -> TemplateQuery<'_> {
        TemplateQuery::new(&self.template)
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.template)
            .map_err(|e| ComposeError::Synthesis(format!("JSON serialize error: {}", e)))
    }

    /// File name the CLI writes the template to.
    pub fn file_name(&self) -> String {
        format!("{}.template.json", self.stack_name)
    }
}
