//! End-to-end tests of the command-line front end and its exit codes

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TREE: &str = r#"
<opsa-mef name="TwoTrain">
  <define-fault-tree name="TwoTrain">
    <define-gate name="TopEvent">
      <and><gate name="TrainOne"/><gate name="TrainTwo"/></and>
    </define-gate>
    <define-gate name="TrainOne">
      <or><basic-event name="PumpOne"/><basic-event name="ValveOne"/></or>
    </define-gate>
    <define-gate name="TrainTwo">
      <or><basic-event name="PumpTwo"/><basic-event name="ValveTwo"/></or>
    </define-gate>
  </define-fault-tree>
</opsa-mef>
"#;

const PROBABILITIES: &str = r#"
<opsa-mef>
  <model-data>
    <define-basic-event name="PumpOne"><float value="0.7"/></define-basic-event>
    <define-basic-event name="PumpTwo"><float value="0.7"/></define-basic-event>
    <define-basic-event name="ValveOne"><float value="0.5"/></define-basic-event>
    <define-basic-event name="ValveTwo"><float value="0.5"/></define-basic-event>
  </model-data>
</opsa-mef>
"#;

fn write_inputs(dir: &TempDir) -> (String, String) {
    let tree = dir.path().join("two_train.xml");
    let prob = dir.path().join("two_train_probs.xml");
    fs::write(&tree, TREE).unwrap();
    fs::write(&prob, PROBABILITIES).unwrap();
    (
        tree.to_string_lossy().into_owned(),
        prob.to_string_lossy().into_owned(),
    )
}

#[test]
fn analysis_report_goes_to_stdout() {
    let dir = TempDir::new().unwrap();
    let (tree, prob) = write_inputs(&dir);
    Command::cargo_bin("canopy")
        .unwrap()
        .args(["--input-file", &tree, "--prob-file", &prob, "--seed", "1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("<sum-of-products top-event=\"TopEvent\" products=\"4\"")
                .and(predicate::str::contains("<literal name=\"PumpOne\"/>"))
                .and(predicate::str::contains("<uncertainty")),
        );
}

#[test]
fn positional_arguments_are_input_then_probabilities() {
    let dir = TempDir::new().unwrap();
    let (tree, prob) = write_inputs(&dir);
    Command::cargo_bin("canopy")
        .unwrap()
        .args([&tree, &prob])
        .assert()
        .success()
        .stdout(predicate::str::contains("products=\"4\""));
}

#[test]
fn graph_only_skips_analyses() {
    let dir = TempDir::new().unwrap();
    let (tree, prob) = write_inputs(&dir);
    Command::cargo_bin("canopy")
        .unwrap()
        .args(["--graph-only", &tree, &prob])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn missing_input_file_is_an_io_failure() {
    Command::cargo_bin("canopy")
        .unwrap()
        .arg("no_such_file.xml")
        .assert()
        .code(2);
}

#[test]
fn truncated_xml_is_an_io_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.xml");
    fs::write(&path, "<opsa-mef><define-fault-tree name=\"T\">").unwrap();
    Command::cargo_bin("canopy")
        .unwrap()
        .arg(path.to_string_lossy().as_ref())
        .assert()
        .code(2);
}

#[test]
fn invalid_ccf_schedule_is_a_validation_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad_phi.xml");
    fs::write(
        &path,
        r#"
        <opsa-mef>
          <define-CCF-group name="Pumps" model="phi-factor">
            <members>
              <basic-event name="A"/>
              <basic-event name="B"/>
              <basic-event name="C"/>
            </members>
            <distribution><float value="0.01"/></distribution>
            <factors>
              <factor level="1"><float value="0.5"/></factor>
              <factor level="2"><float value="0.3"/></factor>
              <factor level="3"><float value="0.1"/></factor>
            </factors>
          </define-CCF-group>
        </opsa-mef>
        "#,
    )
    .unwrap();
    Command::cargo_bin("canopy")
        .unwrap()
        .arg(path.to_string_lossy().as_ref())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("sum to 1"));
}

#[test]
fn every_fault_tree_top_event_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pair.xml");
    fs::write(
        &path,
        r#"
        <opsa-mef name="Pair">
          <define-fault-tree name="TwoTrain">
            <define-gate name="TopEvent">
              <and><gate name="TrainOne"/><gate name="TrainTwo"/></and>
            </define-gate>
            <define-gate name="TrainOne">
              <or><basic-event name="PumpOne"/><basic-event name="ValveOne"/></or>
            </define-gate>
            <define-gate name="TrainTwo">
              <or><basic-event name="PumpTwo"/><basic-event name="ValveTwo"/></or>
            </define-gate>
          </define-fault-tree>
          <define-fault-tree name="Standby">
            <define-gate name="StandbyFails">
              <or><basic-event name="DieselOne"/><basic-event name="DieselTwo"/></or>
            </define-gate>
          </define-fault-tree>
          <model-data>
            <define-basic-event name="PumpOne"><float value="0.7"/></define-basic-event>
            <define-basic-event name="PumpTwo"><float value="0.7"/></define-basic-event>
            <define-basic-event name="ValveOne"><float value="0.5"/></define-basic-event>
            <define-basic-event name="ValveTwo"><float value="0.5"/></define-basic-event>
            <define-basic-event name="DieselOne"><float value="0.1"/></define-basic-event>
            <define-basic-event name="DieselTwo"><float value="0.2"/></define-basic-event>
          </model-data>
        </opsa-mef>
        "#,
    )
    .unwrap();
    Command::cargo_bin("canopy")
        .unwrap()
        .args(["--trials", "0", path.to_string_lossy().as_ref()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("<sum-of-products top-event=\"TopEvent\"")
                .and(predicate::str::contains(
                    "<sum-of-products top-event=\"StandbyFails\" products=\"2\"",
                )),
        );
}

#[test]
fn report_can_be_written_to_a_file() {
    let dir = TempDir::new().unwrap();
    let (tree, prob) = write_inputs(&dir);
    let out = dir.path().join("report.xml");
    Command::cargo_bin("canopy")
        .unwrap()
        .args([
            "--output",
            out.to_string_lossy().as_ref(),
            "--trials",
            "0",
            &tree,
            &prob,
        ])
        .assert()
        .success();
    let report = fs::read_to_string(&out).unwrap();
    assert!(report.contains("<report>"));
    assert!(!report.contains("<uncertainty"));
}
