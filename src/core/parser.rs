//! YAML parsing and validation.
//!
//! Parses stackweave.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack, prefix and container names must be usable in logical names
//! - At least one container, each with a non-empty image source
//! - Proxied stacks need a proxy container
//! - Connection endpoints and the service target must exist

use super::types::*;
use std::path::Path;

/// Endpoints a connection may name.
pub const CONNECTION_ENDPOINTS: [&str; 5] =
    ["service", "database", "storage", "load_balancer", "public"];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stackweave.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stackweave.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut error = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        error(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.is_empty() {
        error("name must not be empty".to_string());
    } else if !is_identifier(&config.name) {
        error(format!(
            "name '{}' may only contain letters, digits, '-' and '_'",
            config.name
        ));
    }

    if let Some(prefix) = &config.prefix {
        let starts_with_letter = prefix.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        if !starts_with_letter || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            error(format!(
                "prefix '{}' must be alphanumeric and start with a letter",
                prefix
            ));
        }
    }

    if config.containers.is_empty() {
        error("at least one container is required".to_string());
    }

    for (name, container) in &config.containers {
        if !is_identifier(name) {
            error(format!("container name '{}' is not a valid identifier", name));
        }
        match &container.image {
            ImageSource::Build { build } if build.trim().is_empty() => {
                error(format!("container '{}' has an empty build context", name));
            }
            ImageSource::Registry { registry, tag, .. }
                if registry.trim().is_empty() || tag.trim().is_empty() =>
            {
                error(format!(
                    "container '{}' needs a registry reference and tag",
                    name
                ));
            }
            _ => {}
        }
        for port in &container.ports {
            if port.port() == 0 {
                error(format!("container '{}' maps port 0", name));
            }
            if port.protocol() == Protocol::All {
                error(format!(
                    "container '{}' port {} must be tcp or udp",
                    name,
                    port.port()
                ));
            }
        }
        if let Some(path) = &container.mount_path {
            if !path.starts_with('/') {
                error(format!(
                    "container '{}' mount_path '{}' must be absolute",
                    name, path
                ));
            }
        }
    }

    if config.topology == Topology::Proxied
        && !config.containers.is_empty()
        && !config
            .containers
            .values()
            .any(|c| c.role == ContainerRole::Proxy)
    {
        error("proxied topology requires a container with role 'proxy'".to_string());
    }

    if config.service.listener_port == 0 {
        error("service.listener_port must not be 0".to_string());
    }
    if let Some(target) = &config.service.target {
        if !config.containers.contains_key(&target.container) {
            error(format!(
                "service target references unknown container '{}'",
                target.container
            ));
        }
    }

    for (i, conn) in config.connections.iter().enumerate() {
        for endpoint in [&conn.from, &conn.to] {
            if !CONNECTION_ENDPOINTS.contains(&endpoint.as_str()) {
                error(format!(
                    "connection {} references unknown endpoint '{}'",
                    i, endpoint
                ));
            }
        }
        if conn.from == conn.to {
            error(format!("connection {} connects '{}' to itself", i, conn.from));
        }
        if conn.port == Some(0) {
            error(format!("connection {} uses port 0", i));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: strapi
containers:
  Strapi:
    image: { build: ./strapi }
    ports: [1337]
  Nginx:
    role: proxy
    image: { build: ./nginx }
    ports: [80]
"#;

    fn messages(config: &StackConfig) -> Vec<String> {
        validate_config(config)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_parser_valid() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.name, "strapi");
        let errors = messages(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_parser_bad_version() {
        let mut config = parse_config(VALID).unwrap();
        config.version = "2.0".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("version")));
    }

    #[test]
    fn test_parser_collects_all_errors() {
        let mut config = parse_config(VALID).unwrap();
        config.version = "0.1".to_string();
        config.name = String::new();
        config.service.listener_port = 0;
        assert_eq!(messages(&config).len(), 3);
    }

    #[test]
    fn test_parser_no_containers() {
        let yaml = r#"
version: "1.0"
name: empty
containers: {}
"#;
        let config = parse_config(yaml).unwrap();
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("at least one container")));
    }

    #[test]
    fn test_parser_proxied_needs_proxy() {
        let yaml = r#"
version: "1.0"
name: solo
containers:
  App:
    image: { registry: example/app, tag: "1.0" }
    ports: [80]
"#;
        let config = parse_config(yaml).unwrap();
        assert!(messages(&config).iter().any(|m| m.contains("role 'proxy'")));

        let direct = yaml.replace("name: solo", "name: solo\ntopology: direct");
        let config = parse_config(&direct).unwrap();
        assert!(messages(&config).is_empty());
    }

    #[test]
    fn test_parser_unknown_connection_endpoint() {
        let yaml = format!(
            "{}connections:\n  - {{ from: service, to: cache }}\n  - {{ from: database, to: database }}\n",
            VALID
        );
        let config = parse_config(&yaml).unwrap();
        let errors = messages(&config);
        assert!(errors.iter().any(|m| m.contains("unknown endpoint 'cache'")));
        assert!(errors.iter().any(|m| m.contains("to itself")));
    }

    #[test]
    fn test_parser_default_connections() {
        let config = parse_config(VALID).unwrap();
        let pairs: Vec<_> = config
            .connections
            .iter()
            .map(|c| (c.from.as_str(), c.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("service", "database"), ("service", "storage")]);
    }

    #[test]
    fn test_parser_unknown_service_target() {
        let yaml = format!("{}service:\n  target: {{ container: Ghost }}\n", VALID);
        let config = parse_config(&yaml).unwrap();
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("unknown container 'Ghost'")));
    }

    #[test]
    fn test_parser_bad_names() {
        let mut config = parse_config(VALID).unwrap();
        config.prefix = Some("9lives".to_string());
        config.name = "my stack".to_string();
        let errors = messages(&config);
        assert!(errors.iter().any(|m| m.contains("prefix")));
        assert!(errors.iter().any(|m| m.contains("name 'my stack'")));
    }

    #[test]
    fn test_parser_relative_mount_path() {
        let mut config = parse_config(VALID).unwrap();
        config.containers["Strapi"].mount_path = Some("srv".to_string());
        assert!(messages(&config).iter().any(|m| m.contains("absolute")));
    }

    #[test]
    fn test_parser_port_protocol_all() {
        let yaml = VALID.replace("ports: [80]", "ports: [{ port: 80, protocol: all }]");
        let config = parse_config(&yaml).unwrap();
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("port 80 must be tcp or udp")));

        let udp = VALID.replace("ports: [80]", "ports: [{ port: 80, protocol: udp }]");
        let config = parse_config(&udp).unwrap();
        assert!(messages(&config).is_empty());
    }

    #[test]
    fn test_parser_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackweave.yaml");
        std::fs::write(&path, VALID).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "strapi");
    }

    #[test]
    fn test_parser_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_config_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_parser_invalid_yaml() {
        let result = parse_config("not: [valid: yaml: {{");
        assert!(result.is_err());
    }
}
