//! Integration tests for the CLI interface
//!
//! Exercises the binary end to end against declaration files on disk:
//! planning, applying, teardown, state inspection and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PIPELINE_YAML: &str = r#"
stacks:
  - name: network
    parameters:
      - name: cidr
        type: string
    resources:
      - name: vpc
        kind: network/vpc
        config:
          cidr: "${param.cidr}"
      - name: subnets
        kind: network/subnet
        config:
          primary: 10.0.1.0/24
          secondary: 10.0.2.0/24
    outputs:
      - name: subnet_id
        type: string
        value: subnets.id
      - name: subnet2_id
        type: string
        value: subnets.secondary
  - name: compute
    parameters:
      - name: subnet_id
        type: string
    resources:
      - name: sg
        kind: compute/security-group
        config:
          ingress: 10.0.0.0/16
      - name: instance
        kind: compute/instance
        config:
          subnet: "${param.subnet_id}"
    outputs:
      - name: security_group_id
        type: string
        value: sg.id
  - name: database
    parameters:
      - name: security_group_id
        type: string
      - name: subnet2_id
        type: string
    resources:
      - name: db
        kind: database/instance
        config:
          engine: postgres
          subnet: "${param.subnet2_id}"
          security_group: "${param.security_group_id}"
    outputs:
      - name: endpoint
        type: string
        value: db.id
bindings:
  - stack: network
    parameter: cidr
    value: 10.0.0.0/16
  - stack: compute
    parameter: subnet_id
    from: network.subnet_id
  - stack: database
    parameter: security_group_id
    from: compute.security_group_id
  - stack: database
    parameter: subnet2_id
    from: network.subnet2_id
"#;

struct Workspace {
    temp: TempDir,
    declarations: PathBuf,
}

impl Workspace {
    fn new(content: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let declarations = temp.path().join("deploy.yaml");
        std::fs::write(&declarations, content).unwrap();
        Self { temp, declarations }
    }

    fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    fn cmd(&self, subcommand: &str) -> Command {
        let mut cmd = Command::cargo_bin("stratus").unwrap();
        cmd.arg(subcommand)
            .arg(&self.declarations)
            .arg("--state-dir")
            .arg(self.state_dir());
        cmd
    }
}

fn state_records(dir: &Path) -> usize {
    let Ok(graphs) = std::fs::read_dir(dir) else {
        return 0;
    };
    graphs
        .filter_map(|g| g.ok())
        .flat_map(|g| std::fs::read_dir(g.path()).into_iter().flatten())
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
        .count()
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("stratus").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("state"));
}

#[test]
fn test_invalid_subcommand_fails() {
    let mut cmd = Command::cargo_bin("stratus").unwrap();
    cmd.arg("not-a-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_plan_shows_pending_creates() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("3 change(s) pending"));
}

#[test]
fn test_plan_json_is_machine_readable() {
    let ws = Workspace::new(PIPELINE_YAML);
    let output = ws.cmd("plan").arg("--json").output().unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = plan["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["stack"], "network");
    assert_eq!(entries[0]["action"], "create");
}

#[test]
fn test_apply_then_replan_is_idempotent() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("applied"))
        .stdout(predicate::str::contains("succeeded"));
    assert_eq!(state_records(&ws.state_dir()), 3);

    ws.cmd("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    ws.cmd("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("no-op"));
}

#[test]
fn test_param_override_forces_update() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("apply").assert().success();

    ws.cmd("plan")
        .arg("--param")
        .arg("network.cidr=172.16.0.0/12")
        .assert()
        .success()
        .stdout(predicate::str::contains("update"));
}

#[test]
fn test_destroy_removes_all_state() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("apply").assert().success();
    assert_eq!(state_records(&ws.state_dir()), 3);

    ws.cmd("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));
    assert_eq!(state_records(&ws.state_dir()), 0);

    ws.cmd("state")
        .assert()
        .failure(); // `state` needs a subcommand
}

#[test]
fn test_state_list_and_show() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("apply").assert().success();

    let mut list = Command::cargo_bin("stratus").unwrap();
    list.arg("state")
        .arg("list")
        .arg(&ws.declarations)
        .arg("--state-dir")
        .arg(ws.state_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("applied"));

    let mut show = Command::cargo_bin("stratus").unwrap();
    show.arg("state")
        .arg("show")
        .arg(&ws.declarations)
        .arg("network")
        .arg("--state-dir")
        .arg(ws.state_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("subnet_id"));

    let mut missing = Command::cargo_bin("stratus").unwrap();
    missing
        .arg("state")
        .arg("show")
        .arg(&ws.declarations)
        .arg("ghost")
        .arg("--state-dir")
        .arg(ws.state_dir())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No state recorded"));
}

#[test]
fn test_unresolved_binding_exits_2_before_any_apply() {
    let broken = PIPELINE_YAML.replace("from: compute.security_group_id", "from: missing.output");
    let ws = Workspace::new(&broken);

    ws.cmd("apply")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("graph validation"));
    assert_eq!(state_records(&ws.state_dir()), 0);
}

#[test]
fn test_unknown_active_stack_exits_2() {
    let ws = Workspace::new(PIPELINE_YAML);
    ws.cmd("plan")
        .arg("--active")
        .arg("ghost")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not declared"));
}

#[test]
fn test_malformed_declarations_exit_2() {
    let ws = Workspace::new("stacks: [not, valid, stacks]");
    ws.cmd("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse"));
}

#[test]
fn test_missing_file_exits_2() {
    let temp = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("stratus").unwrap();
    cmd.arg("plan")
        .arg(temp.path().join("nope.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to read"));
}
