//! Arm registry loaded from YAML and routed against

use orchestrator::config::OrchestratorConfig;
use orchestrator::router::{ArmRegistry, HealthStatus};
use orchestrator::OrchestratorError;
use std::collections::BTreeSet;
use std::fs;

fn tags(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_yaml_registry_with_include_and_env() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("shared.yaml"),
        r#"
arms:
  - arm_id: reviewer
    capability_tags: [review]
    cost_tier: 1
    endpoint: http://reviewer.local
"#,
    )
    .unwrap();
    std::env::set_var("REGISTRY_TEST_CODER_URL", "http://coder.internal:9001");
    let path = dir.path().join("arms.yaml");
    fs::write(
        &path,
        r#"
$include: shared.yaml
arms:
  - arm_id: coder
    capability_tags: [code, python]
    cost_tier: 2
    endpoint: ${REGISTRY_TEST_CODER_URL:http://localhost:9001}
  - arm_id: cheap-coder
    capability_tags: [code]
    cost_tier: 1
    endpoint: ${REGISTRY_TEST_UNSET_URL:http://localhost:9002}
"#,
    )
    .unwrap();

    let registry = ArmRegistry::from_yaml_file(&path).unwrap();
    // Lists are replaced, not concatenated, by the file's own keys
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get("coder").unwrap().endpoint, "http://coder.internal:9001");
    assert_eq!(registry.get("cheap-coder").unwrap().endpoint, "http://localhost:9002");

    assert_eq!(registry.route(&tags(&["code"])).unwrap().arm_id, "cheap-coder");
    assert_eq!(registry.route(&tags(&["code", "python"])).unwrap().arm_id, "coder");

    registry.set_health("cheap-coder", HealthStatus::Degraded);
    assert_eq!(registry.route(&tags(&["code"])).unwrap().arm_id, "coder");

    let err = registry.route(&tags(&["review"])).unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapableArm(_)));
}

#[test]
fn test_invalid_entries_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arms.yaml");
    fs::write(
        &path,
        "arms:\n  - arm_id: coder\n    capability_tags: [code]\n    cost_tier: 9\n    endpoint: http://x\n",
    )
    .unwrap();

    let err = ArmRegistry::from_yaml_file(&path).unwrap_err();
    assert!(matches!(err, OrchestratorError::Config(_)));
    assert!(err.to_string().contains("cost_tier"));
    assert!(ArmRegistry::from_yaml_file(dir.path().join("missing.yaml")).is_err());
}

#[test]
fn test_config_combines_file_and_inline_arms() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("arms.yaml");
    fs::write(
        &yaml,
        "arms:\n  - arm_id: coder\n    capability_tags: [code]\n    cost_tier: 3\n    endpoint: http://coder\n",
    )
    .unwrap();

    let toml = format!(
        r#"
[arms]
registry_path = "{}"

[[arms.static]]
arm_id = "validator"
capability_tags = ["validate"]
cost_tier = 1
endpoint = "http://validator"
"#,
        yaml.display()
    );
    let config = OrchestratorConfig::from_toml(&toml).unwrap();
    let registry = config.arms.build_registry().unwrap();

    let ids: Vec<String> = registry.snapshot().iter().map(|a| a.arm_id.clone()).collect();
    assert_eq!(ids, ["coder", "validator"]);
}
