use std::io::Write;

use assert_cmd::Command;

fn veld() -> Command {
    Command::cargo_bin("veld").expect("binary builds")
}

#[test]
fn runs_inline_code() {
    veld()
        .args(["-e", "echo 1 + 2;"])
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn runs_a_script_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".veld")
        .tempfile()
        .expect("temp file");
    writeln!(file, "var x = 20;\necho x * 2 + 2;").expect("write");
    veld()
        .arg(file.path())
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn compile_errors_exit_nonzero() {
    veld()
        .args(["-e", "var 1 = 2;"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("error"));
}

#[test]
fn runtime_errors_exit_nonzero() {
    veld()
        .args(["-e", "throw Exception(\"bad\");"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unhandled Exception"));
}

#[test]
fn caught_exceptions_exit_zero() {
    veld()
        .args([
            "-e",
            "try { throw Exception(\"x\"); } catch (Exception e) { echo \"ok\"; }",
        ])
        .assert()
        .success()
        .stdout("ok\n");
}

#[test]
fn dump_only_prints_disassembly() {
    veld()
        .args(["--dump-only", "-e", "echo 1;"])
        .assert()
        .success()
        .stdout(predicates::str::contains("pushconst"));
}

#[test]
fn missing_script_reports_and_fails() {
    veld()
        .arg("definitely-not-a-real-file.veld")
        .assert()
        .failure();
}

#[test]
fn unknown_option_exits_with_usage_status() {
    veld().arg("--bogus").assert().code(2);
}

#[test]
fn imports_resolve_relative_script_modules() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("mathy.veld"), "var answer = 42;\n").expect("module");
    std::fs::write(
        dir.path().join("main.veld"),
        "var m = import \"mathy\";\necho m.answer;\n",
    )
    .expect("main");
    veld()
        .current_dir(dir.path())
        .arg("main.veld")
        .assert()
        .success()
        .stdout("42\n");
}
