//! CLI subcommands: init, validate, plan, synth.

use crate::core::{graph, parser, stack, types};
use crate::resources::permissions::GrantTarget;
use crate::synth::{Synthesizer, TemplateSynthesizer};
use clap::{Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackweave project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Starting topology
        #[arg(long, value_enum, default_value_t = Variant::Proxied)]
        variant: Variant,
    },

    /// Validate stackweave.yaml
    Validate {
        /// Path to stackweave.yaml
        #[arg(short, long, default_value = "stackweave.yaml")]
        file: PathBuf,
    },

    /// Show the composed resources in deployment order and the derived permissions
    Plan {
        /// Path to stackweave.yaml
        #[arg(short, long, default_value = "stackweave.yaml")]
        file: PathBuf,
    },

    /// Write the synthesized template
    Synth {
        /// Path to stackweave.yaml
        #[arg(short, long, default_value = "stackweave.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "out")]
        out: PathBuf,
    },
}

/// Project skeleton written by `init`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// Application and reverse proxy built from local contexts
    Proxied,
    /// Single application image from a registry
    Direct,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path, variant } => cmd_init(&path, variant),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file } => cmd_plan(&file),
        Commands::Synth { file, out } => cmd_synth(&file, &out),
    }
}

const PROXIED_TEMPLATE: &str = r#"version: "1.0"
name: my-app
description: "Managed by stackweave"
topology: proxied

params:
  app_env: production

network:
  max_azs: 2
  cidr_mask: 24
  nat: gateway
  nat_gateways: 2

database:
  default_database_name: AppDatabase
  scaling:
    min_capacity: 2
    max_capacity: 16
    auto_pause_minutes: 0
  deletion_protection: false

containers:
  App:
    role: app
    image: { build: ./app }
    ports: [1337]
    environment:
      NODE_ENV: "{{params.app_env}}"
  Nginx:
    role: proxy
    image: { build: ./nginx }
    ports: [80]

service:
  public: true
  listener_port: 80

connections:
  - { from: service, to: database }
  - { from: service, to: storage }
"#;

const DIRECT_TEMPLATE: &str = r#"version: "1.0"
name: my-app
description: "Managed by stackweave"
topology: direct

database:
  default_database_name: AppDatabase
  deletion_protection: true

containers:
  App:
    image: { registry: my-org/my-app, tag: latest }
    ports: [80]

service:
  public: true
  listener_port: 80
"#;

fn cmd_init(path: &Path, variant: Variant) -> Result<(), String> {
    let config_path = path.join("stackweave.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = match variant {
        Variant::Proxied => PROXIED_TEMPLATE,
        Variant::Direct => DIRECT_TEMPLATE,
    };
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stackweave project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} ({} topology, {} containers, {} connections)",
            config.name,
            config.topology,
            config.containers.len(),
            config.connections.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a config file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::StackConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn cmd_plan(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let composed = stack::compose(&config).map_err(|e| e.to_string())?;
    print_plan(&composed);
    Ok(())
}

fn grant_target(target: &GrantTarget) -> String {
    match target {
        GrantTarget::Resource(t) => t.to_string(),
        GrantTarget::Repository(name) => format!("repository/{}", name),
        GrantTarget::Any => "*".to_string(),
    }
}

/// Display a composed stack to stdout.
fn print_plan(composed: &stack::ComposedStack) {
    println!(
        "Planning: {} ({} resources)",
        composed.name,
        composed.order.len()
    );
    println!();
    for id in &composed.order {
        if let Some(node) = composed.graph.get(id) {
            println!("  + {} ({})", id, node.spec.kind());
        }
    }

    println!();
    println!("Security rules:");
    for rule in &composed.permissions.rules {
        println!("  {}", rule);
    }

    println!();
    println!("Grants:");
    for grant in &composed.permissions.grants {
        println!(
            "  {} -> {} on {}",
            grant.principal,
            grant.actions.join(", "),
            grant_target(&grant.target)
        );
    }

    let outputs: Vec<(&String, &graph::Output)> = composed.graph.outputs().iter().collect();
    if !outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (name, output) in outputs {
            println!("  {} = {}", name, output.value);
        }
    }

    println!();
    println!(
        "Plan: {} resources, {} security rules, {} grants.",
        composed.order.len(),
        composed.permissions.rules.len(),
        composed.permissions.grants.len()
    );
}

fn cmd_synth(file: &Path, out: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let composed = stack::compose(&config).map_err(|e| e.to_string())?;
    let synthesized = TemplateSynthesizer::new()
        .synthesize(&composed)
        .map_err(|e| e.to_string())?;

    std::fs::create_dir_all(out)
        .map_err(|e| format!("cannot create {}: {}", out.display(), e))?;
    let path = out.join(synthesized.file_name());
    let json = synthesized.to_pretty_json().map_err(|e| e.to_string())?;
    std::fs::write(&path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;

    println!("Synthesized: {}", path.display());
    for (name, value) in &synthesized.outputs {
        println!("  Output {} = {}", name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let file = dir.join("stackweave.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_cli_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        cmd_init(&sub, Variant::Proxied).unwrap();
        assert!(sub.join("stackweave.yaml").exists());
    }

    #[test]
    fn test_cli_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), Variant::Direct).unwrap();
        let err = cmd_init(dir.path(), Variant::Direct).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_cli_init_templates_validate() {
        for template in [PROXIED_TEMPLATE, DIRECT_TEMPLATE] {
            let config = parser::parse_config(template).unwrap();
            assert!(parser::validate_config(&config).is_empty());
            stack::compose(&config).unwrap();
        }
    }

    #[test]
    fn test_cli_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), PROXIED_TEMPLATE);
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_cli_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(
            dir.path(),
            "version: \"2.0\"\nname: bad\ncontainers: {}\n",
        );
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("2 validation error(s)"));
    }

    #[test]
    fn test_cli_plan() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), PROXIED_TEMPLATE);
        cmd_plan(&file).unwrap();
    }

    #[test]
    fn test_cli_plan_composition_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = PROXIED_TEMPLATE.replace("cidr_mask: 24", "cidr_mask: 30");
        let file = write_config(dir.path(), &yaml);
        let err = cmd_plan(&file).unwrap_err();
        assert!(err.contains("/30"));
    }

    #[test]
    fn test_cli_synth_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), DIRECT_TEMPLATE);
        let out = dir.path().join("out");
        cmd_synth(&file, &out).unwrap();
        let written = std::fs::read_to_string(out.join("my-app.template.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert!(value["Outputs"]["LoadBalancerDnsName"].is_object());
    }

    #[test]
    fn test_cli_synth_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_synth(&dir.path().join("nope.yaml"), &dir.path().join("out")).unwrap_err();
        assert!(err.contains("failed to read"));
    }
}
