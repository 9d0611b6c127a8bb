//! Integration tests for the `modhost` binary

#![allow(deprecated)]

use std::path::PathBuf;

use assert_cmd::Command;
use modhost_kernel::{FieldDecl, Scope, TypeDescriptor};
use modhost_runtime::PackageBuilder;
use predicates::str::contains;
use serde_json::Value;
use tempfile::{TempDir, tempdir};

fn hello_package(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("hello.mpk");
    PackageBuilder::new("demo.Hello")
        .version("1.2.0")
        .exports(&["demo.Greeter"])
        .with_type(
            TypeDescriptor::class("demo.Hello")
                .with_component(Scope::Prototype)
                .with_field(FieldDecl::identifier("id"))
                .with_field(FieldDecl::injected("greeter", "demo.Greeter", true))
                .with_execute("describe"),
        )
        .with_type(
            TypeDescriptor::class("demo.Greeter")
                .with_component(Scope::Singleton)
                .with_field(FieldDecl::identifier("id")),
        )
        .write_to(&path)
        .expect("write package");
    path
}

fn modhost() -> Command {
    let mut cmd = Command::cargo_bin("modhost").expect("modhost bin");
    cmd.env_remove("MODHOST_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn inspect_json_lists_manifest_and_types() {
    let dir = tempdir().expect("tempdir");
    let path = hello_package(&dir);

    let output = modhost()
        .arg("inspect")
        .arg(&path)
        .arg("--output")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: Value = serde_json::from_slice(&output).expect("valid json output");
    assert_eq!(value["entry_point"], "demo.Hello");
    assert_eq!(value["version"], "1.2.0");
    assert_eq!(value["exports"], serde_json::json!(["demo.Greeter"]));
    assert_eq!(value["digest"].as_str().map(str::len), Some(64));

    let types = value["types"].as_array().expect("types array");
    let names: Vec<&str> = types.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"demo.Hello"));
    assert!(names.contains(&"demo.Greeter"));
    let greeter = types.iter().find(|t| t["name"] == "demo.Greeter").unwrap();
    assert_eq!(greeter["scope"], "singleton");
}

#[test]
fn inspect_text_output() {
    let dir = tempdir().expect("tempdir");
    let path = hello_package(&dir);

    modhost()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("demo.Hello"))
        .stdout(contains("component(singleton)"));
}

#[test]
fn inspect_rejects_non_archive() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("junk.mpk");
    std::fs::write(&path, b"not a zip").unwrap();

    modhost().arg("inspect").arg(&path).assert().failure();
}

#[test]
fn run_executes_entry_point() {
    let dir = tempdir().expect("tempdir");
    let path = hello_package(&dir);

    modhost()
        .arg("run")
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("demo.Hello {"))
        .stdout(contains("greeter"));
}

#[test]
fn run_reports_missing_entry_point() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("headless.mpk");
    PackageBuilder::without_entry_point()
        .with_type(TypeDescriptor::class("demo.Lost").with_execute("describe"))
        .write_to(&path)
        .unwrap();

    modhost()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("Plugin-Class"));
}

#[test]
fn watch_rejects_missing_directory() {
    let dir = tempdir().expect("tempdir");

    modhost()
        .arg("watch")
        .arg(dir.path().join("nowhere"))
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}
