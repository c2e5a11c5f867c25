use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn nullflow() -> Command {
    let binary = std::env::var("CARGO_BIN_EXE_nullflow").unwrap_or_else(|_| {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("nullflow");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    Command::new(binary)
}

fn run_with_input(contents: &str, extra: &[&str]) -> (Output, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("program.json");
    fs::write(&input, contents).expect("write input");
    let output = nullflow()
        .arg("--input")
        .arg(&input)
        .args(extra)
        .output()
        .expect("run nullflow");
    (output, dir)
}

const NULL_ARGUMENT_PROGRAM: &str = r#"{
  "classes": [{
    "name": "com/example/ClassA",
    "source_file": "src/main/java/com/example/ClassA.java",
    "methods": [
      {
        "name": "methodOne",
        "descriptor": "()V",
        "is_static": true,
        "body": [
          {"kind": "expr", "span": {"start_line": 5, "start_column": 9},
           "expr": {"kind": "call", "owner": "com/example/ClassA", "name": "methodTwo",
                    "descriptor": "(Ljava/lang/Object;)V", "args": [{"kind": "null"}]}},
          {"kind": "return"}
        ]
      },
      {
        "name": "methodTwo",
        "descriptor": "(Ljava/lang/Object;)V",
        "is_static": true,
        "params": [{"name": "varOne", "annotations": ["NonNull"]}]
      }
    ]
  }]
}"#;

#[test]
fn nullflow_exits_non_zero_on_missing_input() {
    let output = nullflow()
        .arg("--input")
        .arg("missing.json")
        .output()
        .expect("run nullflow");

    assert!(!output.status.success());
}

#[test]
fn nullflow_exits_non_zero_on_malformed_input() {
    let (output, _dir) = run_with_input(r#"{"classes": [{"name": 1}]}"#, &[]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("classes[0].name"), "{stderr}");
}

#[test]
fn nullflow_exits_non_zero_on_read_of_undeclared_local() {
    let program = r#"{
  "classes": [{
    "name": "com/example/ClassA",
    "methods": [{
      "name": "methodOne",
      "descriptor": "()Ljava/lang/Object;",
      "body": [{"kind": "return", "value": {"kind": "local", "name": "varMissing"}}]
    }]
  }]
}"#;
    let (output, _dir) = run_with_input(program, &[]);

    assert!(!output.status.success());
}

#[test]
fn violations_do_not_change_the_exit_code() {
    let (output, _dir) = run_with_input(NULL_ARGUMENT_PROGRAM, &[]);

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let sarif: serde_json::Value = serde_json::from_slice(&output.stdout).expect("SARIF json");
    let results = sarif["runs"][0]["results"].as_array().expect("results");
    assert_eq!(1, results.len());
    assert_eq!("NULLNESS_CONTRACT", results[0]["ruleId"]);
    assert_eq!(
        "Definitely null `null` passed to @NonNull parameter 1 of com/example/ClassA.methodTwo(Ljava/lang/Object;)V",
        results[0]["message"]["text"]
    );
    let region = &results[0]["locations"][0]["physicalLocation"]["region"];
    assert_eq!(5, region["startLine"]);
    assert_eq!(9, region["startColumn"]);
}

#[test]
fn sarif_and_guards_are_written_to_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let sarif_path = dir.path().join("out.sarif");
    let guards_path = dir.path().join("guards.json");
    let (output, _input_dir) = run_with_input(
        NULL_ARGUMENT_PROGRAM,
        &[
            "--output",
            sarif_path.to_str().expect("utf-8 path"),
            "--guards",
            guards_path.to_str().expect("utf-8 path"),
        ],
    );

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let sarif: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&sarif_path).expect("read SARIF"))
            .expect("SARIF json");
    assert_eq!("2.1.0", sarif["version"]);
    let guards: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&guards_path).expect("read guards"))
            .expect("guards json");
    let kinds: Vec<&str> = guards
        .as_array()
        .expect("guards array")
        .iter()
        .filter_map(|guard| guard["kind"].as_str())
        .collect();
    assert_eq!(vec!["argument"], kinds);
}
