//! Template resolution and deployment ordering.
//!
//! Resolves `{{params.key}}` and `{{stack.name}}` templates in container
//! environment values. Orders the resource graph for deployment with Kahn's
//! algorithm and deterministic (alphabetical) tie-breaking.

use super::error::{ComposeError, Result};
use super::graph::ResourceGraph;
use super::types::yaml_value_to_string;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
    stack_name: &str,
) -> std::result::Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if let Some(field) = key.strip_prefix("stack.") {
            match field {
                "name" => stack_name.to_string(),
                _ => return Err(format!("unknown stack field: {}", field)),
            }
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Topological deployment order of the graph's resources.
///
/// A resource comes after everything it depends on. Ties are broken
/// alphabetically so the order is stable across runs.
pub fn deployment_order(graph: &ResourceGraph) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in graph.nodes() {
        in_degree.insert(&node.logical_id, 0);
        dependents.insert(&node.logical_id, Vec::new());
    }

    for node in graph.nodes() {
        for dep in &node.depends_on {
            let Some(list) = dependents.get_mut(dep.as_str()) else {
                return Err(ComposeError::UnknownDependency {
                    resource: node.logical_id.clone(),
                    dependency: dep.clone(),
                });
            };
            list.push(&node.logical_id);
            *in_degree.entry(&node.logical_id).or_insert(0) += 1;
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(dependent);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != graph.len() {
        let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let cycle_members: Vec<&str> = graph
            .nodes()
            .map(|n| n.logical_id.as_str())
            .filter(|id| !ordered.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        return Err(ComposeError::DependencyCycle(cycle_members.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{GraphNode, ResourceSpec, Token};
    use crate::resources::compute::ComputeCluster;

    fn node(id: &str, deps: &[&str]) -> GraphNode {
        GraphNode {
            logical_id: id.to_string(),
            path: id.to_string(),
            spec: ResourceSpec::Cluster(ComputeCluster {
                vpc: Token::reference("Vpc"),
            }),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn graph(nodes: Vec<GraphNode>) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        for n in nodes {
            graph.add(n).unwrap();
        }
        graph
    }

    #[test]
    fn test_resolver_params() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), serde_yaml_ng::Value::String("X".to_string()));
        params.insert("b".to_string(), serde_yaml_ng::Value::Number(7.into()));
        let result = resolve_template("{{params.a}}-{{ params.b }}", &params, "s").unwrap();
        assert_eq!(result, "X-7");
    }

    #[test]
    fn test_resolver_stack_name() {
        let result = resolve_template("{{stack.name}}-db", &HashMap::new(), "strapi").unwrap();
        assert_eq!(result, "strapi-db");
    }

    #[test]
    fn test_resolver_errors() {
        let params = HashMap::new();
        assert!(resolve_template("{{params.x}}", &params, "s")
            .unwrap_err()
            .contains("unknown param"));
        assert!(resolve_template("{{stack.region}}", &params, "s")
            .unwrap_err()
            .contains("unknown stack field"));
        assert!(resolve_template("{{machine.a.addr}}", &params, "s")
            .unwrap_err()
            .contains("unknown template variable"));
        assert!(resolve_template("{{params.x", &params, "s")
            .unwrap_err()
            .contains("unclosed"));
    }

    #[test]
    fn test_resolver_literal_passthrough() {
        let result = resolve_template("plain value", &HashMap::new(), "s").unwrap();
        assert_eq!(result, "plain value");
    }

    #[test]
    fn test_resolver_order_linear() {
        let g = graph(vec![node("c", &["b"]), node("b", &["a"]), node("a", &[])]);
        assert_eq!(deployment_order(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_resolver_order_alphabetical_ties() {
        let g = graph(vec![node("beta", &[]), node("alpha", &[])]);
        assert_eq!(deployment_order(&g).unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_resolver_order_diamond() {
        let g = graph(vec![
            node("bottom", &["left", "right"]),
            node("right", &["top"]),
            node("left", &["top"]),
            node("top", &[]),
        ]);
        assert_eq!(
            deployment_order(&g).unwrap(),
            vec!["top", "left", "right", "bottom"]
        );
    }

    #[test]
    fn test_resolver_order_cycle() {
        let g = graph(vec![node("a", &["b"]), node("b", &["a"]), node("c", &[])]);
        match deployment_order(&g) {
            Err(ComposeError::DependencyCycle(members)) => assert_eq!(members, "a, b"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_resolver_order_unknown_dependency() {
        let g = graph(vec![node("a", &["ghost"])]);
        assert!(matches!(
            deployment_order(&g),
            Err(ComposeError::UnknownDependency { ref dependency, .. }) if dependency == "ghost"
        ));
    }
}
