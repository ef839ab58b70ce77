//! Read-only inspection of a synthesized template.

use serde_json::Value;

/// Query over a template's resources and outputs.
#[derive(Debug, Clone, Copy)]
pub struct TemplateQuery<'a> {
    template: &'a Value,
}

impl<'a> TemplateQuery<'a> {
    pub fn new(template: &'a Value) -> Self {
        Self { template }
    }

    pub fn resource(&self, logical_id: &str) -> Option<&'a Value> {
        self.template.get("Resources")?.get(logical_id)
    }

    pub fn resource_type(&self, logical_id: &str) -> Option<&'a str> {
        self.resource(logical_id)?.get("Type")?.as_str()
    }

    pub fn properties(&self, logical_id: &str) -> Option<&'a Value> {
        self.resource(logical_id)?.get("Properties")
    }

    /// A nested property by dotted path; numeric segments index arrays,
    /// e.g. `LoadBalancers.0.ContainerPort`.
    pub fn property(&self, logical_id: &str, path: &str) -> Option<&'a Value> {
        let mut current = self.properties(logical_id)?;
        for segment in path.split('.') {
            current = match current {
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Logical ids of every resource of `kind`, in template order.
    pub fn ids_of_type(&self, kind: &str) -> Vec<&'a str> {
        let Some(Value::Object(resources)) = self.template.get("Resources") else {
            return Vec::new();
        };
        resources
            .iter()
            .filter(|(_, r)| r.get("Type").and_then(Value::as_str) == Some(kind))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// First resource of `kind` whose logical id starts with `prefix`.
    pub fn find(&self, prefix: &str, kind: &str) -> Option<&'a str> {
        self.ids_of_type(kind)
            .into_iter()
            .find(|id| id.starts_with(prefix))
    }

    pub fn output(&self, name: &str) -> Option<&'a Value> {
        self.template.get("Outputs")?.get(name)?.get("Value")
    }
}
