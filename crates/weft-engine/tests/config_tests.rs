//! Loading configuration files and building pipelines from them

mod common;

use common::{array_list, collections};
use std::borrow::Cow;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use weft_bytecode::ClassFile;
use weft_engine::{ConfigError, LoaderId, TransformPipeline, WeaverConfig, WeavingMode};

const TOML: &str = r#"
runtime_class = "demo.runtime.Flags"
verify_output = true

[[advice]]
name = "list-add"
class_name = "java.util.List"
method_name = "add"
parameter_types = [".."]
return_type = "boolean"
capture_nested = false

[[advice.callbacks]]
role = "on_before"
owner = "demo.ListProbe"
method = "before"
parameters = [
    { binding = "method_name", type = "java.lang.String" },
    { binding = "argument_array", type = "java.lang.Object[]" },
]
"#;

const JSON: &str = r#"{
    "mode": "disabled",
    "excluded_prefixes": ["weft.", "demo.internal."],
    "advice": [
        {
            "class_name": "java.util.ArrayList",
            "method_name": "size",
            "callbacks": [
                { "role": "on_after", "owner": "demo.SizeProbe", "method": "after" }
            ]
        }
    ]
}"#;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_toml_config_drives_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = WeaverConfig::from_file(&write(&dir, "weft.toml", TOML)).unwrap();
    assert_eq!(config.mode, WeavingMode::Enabled);
    assert_eq!(config.excluded_prefixes, vec!["weft.".to_string()]);

    let pipeline = TransformPipeline::from_config(&config, Arc::new(collections())).unwrap();
    let original = array_list().encode().unwrap();
    let out = pipeline.transform(Some(LoaderId(2)), "java.util.ArrayList", &original);
    let woven = ClassFile::decode(&out).unwrap();

    // Only the overload returning boolean matches
    assert!(woven.find_method("add$weft$original", "(Ljava/lang/Object;)Z").is_some());
    assert!(woven.find_method("add$weft$original", "(ILjava/lang/Object;)V").is_none());
    assert!(woven.constant_pool.iter().any(|(_, c)| matches!(
        c,
        weft_bytecode::Constant::Utf8(text) if text == "demo/runtime/Flags"
    )));
}

#[test]
fn test_json_config() {
    let dir = TempDir::new().unwrap();
    let config = WeaverConfig::from_file(&write(&dir, "weft.json", JSON)).unwrap();
    assert_eq!(config.mode, WeavingMode::Disabled);
    assert_eq!(config.advice.len(), 1);

    let pipeline = TransformPipeline::from_config(&config, Arc::new(collections())).unwrap();
    let original = array_list().encode().unwrap();
    assert!(matches!(
        pipeline.transform(None, "java.util.ArrayList", &original),
        Cow::Borrowed(_)
    ));
    pipeline.enable();
    assert!(matches!(
        pipeline.transform(None, "java.util.ArrayList", &original),
        Cow::Owned(_)
    ));
}

#[test]
fn test_config_errors() {
    let dir = TempDir::new().unwrap();
    let yaml = write(&dir, "weft.yaml", "mode: enabled");
    assert!(matches!(WeaverConfig::from_file(&yaml), Err(ConfigError::UnsupportedFormat(_))));

    let broken = write(&dir, "broken.toml", "[[advice]]\nclass_name = 3");
    assert!(matches!(WeaverConfig::from_file(&broken), Err(ConfigError::Toml(_))));

    let missing = dir.path().join("absent.json");
    assert!(matches!(WeaverConfig::from_file(&missing), Err(ConfigError::Io(_))));

    let invalid = write(
        &dir,
        "invalid.json",
        r#"{ "advice": [{ "class_name": "a", "method_name": "b", "callbacks": [
            { "role": "on_after", "owner": "demo.P", "method": "x", "return_type": "int" }
        ] }] }"#,
    );
    let config = WeaverConfig::from_file(&invalid).unwrap();
    let result = TransformPipeline::from_config(&config, Arc::new(collections()));
    assert!(matches!(result, Err(ConfigError::Declaration(_))));
}
