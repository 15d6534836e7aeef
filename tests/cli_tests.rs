use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const BINARY_NAME: &str = "mustache-vm";

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--bin", BINARY_NAME, "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn run_cli_with_stdin(args: &[&str], stdin_input: &str) -> std::process::Output {
    let mut cmd = Command::new("cargo")
        .args(["run", "--bin", BINARY_NAME, "--"])
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .expect("Failed to spawn command");

    if let Some(stdin) = cmd.stdin.as_mut() {
        stdin
            .write_all(stdin_input.as_bytes())
            .expect("Failed to write to stdin");
    }

    cmd.wait_with_output().expect("Failed to read stdout")
}

fn create_temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file
}

#[test]
fn test_inline_template_with_stdin_data() {
    let output = run_cli_with_stdin(&["Hello, {{name}}!"], r#"{"name": "world"}"#);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Hello, world!"
    );
}

#[test]
fn test_data_file_option() {
    let data_file = create_temp_file(r#"{"name": "Ada"}"#);
    let output = run_cli(&[
        "{{name}}",
        "--data",
        data_file.path().to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Ada");
}

#[test]
fn test_template_file_option() {
    let template_file = create_temp_file("{{greeting}}, {{name}}!");
    let output = run_cli_with_stdin(
        &["--template-file", template_file.path().to_str().unwrap()],
        r#"{"greeting": "Hi", "name": "there"}"#,
    );
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Hi, there!"
    );
}

#[test]
fn test_section_over_array() {
    let output = run_cli_with_stdin(
        &["{{#items}}{{.}},{{/items}}"],
        r#"{"items": ["a", "b", "c"]}"#,
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "a,b,c,");
}

#[test]
fn test_debug_flag_emits_stderr_trace() {
    let output = run_cli_with_stdin(&["--debug", "{{name}}"], r#"{"name": "x"}"#);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "x");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DEBUG:"));
}

#[test]
fn test_dump_program_flag() {
    let output = run_cli_with_stdin(&["--dump-program", "hi {{name}}"], "{}");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("WRITE_TEXT"));
    assert!(stdout.contains("WRITE_ARG"));
}

#[test]
fn test_partial_dir_flag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("greet.mustache"), "hi {{name}}").unwrap();
    let output = run_cli_with_stdin(
        &["--partial-dir", dir.path().to_str().unwrap(), "{{>greet}}"],
        r#"{"name": "Ada"}"#,
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hi Ada");
}

#[test]
fn test_invalid_template_syntax_fails() {
    let output = run_cli_with_stdin(&["{{unclosed"], "{}");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_nonexistent_template_file_fails() {
    let output = run_cli(&["--template-file", "/nonexistent/file.mustache"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_template_argument_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TEMPLATE or --template-file"));
}

#[test]
fn test_empty_data_object_defaults_missing_names_to_empty() {
    let output = run_cli_with_stdin(&["[{{missing}}]"], "");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[]");
}

#[test]
fn test_help_flag() {
    let output = run_cli(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}
