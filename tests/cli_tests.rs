use classenhance::codegen::defs::access_flags::*;
use classenhance::codegen::ClassFile;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

mod common;
use common::ClassBuilder;

const METADATA: &str = r#"{
  "classes": [
    { "name": "p.Person", "members": [ { "name": "age", "descriptor": "I" } ] },
    {
      "name": "p.Order",
      "identity": { "type": "application" },
      "members": [ { "name": "id", "descriptor": "J", "primary_key": true } ]
    }
  ]
}"#;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_classenhance"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn setup(root: &Path) {
    fs::create_dir_all(root.join("in/p")).unwrap();
    fs::write(root.join("metadata.json"), METADATA).unwrap();
    let person = ClassBuilder::new("p/Person")
        .field(ACC_PRIVATE, "age", "I")
        .default_constructor()
        .getter("getAge", "p/Person", "age", "I")
        .build();
    fs::write(root.join("in/p/Person.class"), person).unwrap();
    fs::write(root.join("in/p/Plain.class"), ClassBuilder::new("p/Plain").default_constructor().build()).unwrap();
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn enhance_walks_a_directory_into_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);

    let out = run(&[
        "enhance",
        path(&root.join("in")),
        "--metadata",
        path(&root.join("metadata.json")),
        "--output",
        path(&root.join("out")),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let person = fs::read(root.join("out/p/Person.class")).unwrap();
    let class = ClassFile::parse(&person).unwrap();
    assert!(class.implements("javax/jdo/spi/PersistenceCapable"));
    assert_eq!(fs::read(root.join("out/p/Plain.class")).unwrap(), fs::read(root.join("in/p/Plain.class")).unwrap());
    // inputs are untouched when an output directory is given
    assert!(!ClassFile::parse(&fs::read(root.join("in/p/Person.class")).unwrap())
        .unwrap()
        .implements("javax/jdo/spi/PersistenceCapable"));

    let validate = run(&[
        "validate",
        path(&root.join("out/p/Person.class")),
        "--metadata",
        path(&root.join("metadata.json")),
    ]);
    assert!(validate.status.success());
    assert!(String::from_utf8_lossy(&validate.stdout).contains("Person.class: enhanced"));
}

#[test]
fn validate_fails_on_unenhanced_classes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);

    let out = run(&[
        "validate",
        path(&root.join("in/p/Person.class")),
        "--metadata",
        path(&root.join("metadata.json")),
    ]);
    assert!(!out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("not enhanced"));
    assert!(stdout.contains("jdoGetage"), "{}", stdout);
}

#[test]
fn unknown_options_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);

    let out = run(&[
        "enhance",
        path(&root.join("in")),
        "--metadata",
        path(&root.join("metadata.json")),
        "--option",
        "enhancer.bogus=true",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("enhancer.bogus"));
}

#[test]
fn keygen_writes_the_key_class() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);

    let out = run(&[
        "keygen",
        "--metadata",
        path(&root.join("metadata.json")),
        "--class",
        "p.Order",
        "--output",
        path(&root.join("keys")),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let class = ClassFile::parse(&fs::read(root.join("keys/p/Order_PK.class")).unwrap()).unwrap();
    assert_eq!(class.name().unwrap(), "p/Order_PK");
    assert!(class.find_field("id").is_some());
}

#[test]
fn validate_skips_classes_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);

    let out = run(&[
        "enhance",
        path(&root.join("in")),
        "--metadata",
        path(&root.join("metadata.json")),
        "--output",
        path(&root.join("out")),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    // out/ now holds the enhanced Person next to the untouched Plain
    let validate = run(&["validate", path(&root.join("out")), "--metadata", path(&root.join("metadata.json"))]);
    let stdout = String::from_utf8_lossy(&validate.stdout);
    assert!(validate.status.success(), "{}", stdout);
    assert!(stdout.contains("Person.class: enhanced"), "{}", stdout);
    assert!(stdout.contains("Plain.class: not persistent, skipped"), "{}", stdout);
}

#[test]
fn key_class_lands_in_the_package_directory_for_a_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);
    let order = ClassBuilder::new("p/Order").field(ACC_PRIVATE, "id", "J").default_constructor().build();
    fs::write(root.join("in/p/Order.class"), order).unwrap();

    let out = run(&[
        "enhance",
        path(&root.join("in/p/Order.class")),
        "--metadata",
        path(&root.join("metadata.json")),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(root.join("in/p/Order_PK.class").is_file());
    assert!(!root.join("in/p/p").exists());
}
