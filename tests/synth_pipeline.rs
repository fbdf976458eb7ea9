//! End-to-end synthesis of a throwaway project through the public API.
//!
//! No function has a `requirements.txt`, so bundling never spawns a command;
//! the shell runner is used only to prove that.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use thumbstack::bundle::{BundlePolicy, ShellRunner};
use thumbstack::config::{self, AppConfig, CONFIG_FILE};
use thumbstack::outputs::UNAVAILABLE;
use thumbstack::platform::HostOs;
use thumbstack::synth::{self, SynthOptions, SynthResult};

fn setup_project(root: &Path, stack_toml: &str) {
    for name in ["resize", "list", "presign"] {
        let dir = root.join("lambdas").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("handler.py"),
            format!("def handler(event, context):\n    return \"{name}\"\n"),
        )
        .unwrap();
    }
    fs::create_dir_all(root.join("website")).unwrap();
    fs::write(root.join(CONFIG_FILE), stack_toml).unwrap();
}

fn synthesize(root: &Path) -> (AppConfig, SynthResult) {
    let config = config::load_config(&root.join(CONFIG_FILE)).unwrap();
    let result = synth::run(
        &config,
        &SynthOptions {
            root: root.to_path_buf(),
            use_cache: true,
            write: true,
        },
        HostOs::Linux,
        &ShellRunner,
        &BundlePolicy::standard(),
        None,
    )
    .unwrap();
    (config, result)
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn position(order: &[Value], address: &str) -> usize {
    order
        .iter()
        .position(|a| a == address)
        .unwrap_or_else(|| panic!("{address} not in order"))
}

#[test]
fn backend_stack_document_is_ordered_and_complete() {
    let tmp = TempDir::new().unwrap();
    setup_project(
        tmp.path(),
        r#"
[failure]
email = "ops@example.com"
maximum_retry_attempts = 1
"#,
    );
    let (_, result) = synthesize(tmp.path());

    let doc = read_json(
        &result
            .out_dir
            .join("stacks/iac-assignment-backend/cdk.tf.json"),
    );
    let order = doc["//"]["metadata"]["order"].as_array().unwrap();
    assert!(
        position(order, "aws_sns_topic.failed-resize-topic")
            < position(order, "aws_lambda_function.resize")
    );
    assert!(
        position(order, "aws_lambda_permission.images-invoke-resize")
            < position(order, "aws_s3_bucket_notification.images")
    );

    let subscription = &doc["resource"]["aws_sns_topic_subscription"]["failed-resize-topic-email"];
    assert_eq!(subscription["protocol"], json!("email"));
    assert_eq!(subscription["endpoint"], json!("ops@example.com"));

    let resize = &doc["resource"]["aws_lambda_function"]["resize"];
    let asset = result.assets.get("resize").unwrap();
    assert_eq!(resize["source_code_hash"], json!(asset.hash));
    assert!(Path::new(resize["filename"].as_str().unwrap()).exists());

    let invoke = &doc["resource"]["aws_lambda_function_event_invoke_config"]["resize-invoke-config"];
    assert_eq!(invoke["maximum_retry_attempts"], json!(1));

    assert_eq!(
        doc["output"]["LIST_url"]["value"],
        json!("${aws_lambda_function_url.list.function_url}")
    );
    assert!(doc["data"]["aws_ssm_parameter"]
        .get("localstack-thumbnail-app-buckets-images")
        .is_some());
    assert_eq!(
        doc["terraform"]["required_providers"]["aws"]["source"],
        json!("hashicorp/aws")
    );
}

#[test]
fn frontend_without_website_carries_sentinel() {
    let tmp = TempDir::new().unwrap();
    setup_project(tmp.path(), "[website]\nenabled = false\n");
    let (_, result) = synthesize(tmp.path());

    let doc = read_json(
        &result
            .out_dir
            .join("stacks/iac-assignment-frontend/cdk.tf.json"),
    );
    assert_eq!(doc["output"]["localstack_url"]["value"], json!(UNAVAILABLE));
    let env = &doc["resource"]["local_file"]["env"];
    assert_eq!(
        env["content"],
        json!(format!("S3_BUCKET_FRONTEND={UNAVAILABLE}\n"))
    );
    assert!(doc["resource"].get("aws_s3_bucket").is_none());
}

#[test]
fn unchanged_project_resynthesizes_identically() {
    let tmp = TempDir::new().unwrap();
    setup_project(tmp.path(), "");
    let (_, first) = synthesize(tmp.path());
    let backend_path = first
        .out_dir
        .join("stacks/iac-assignment-backend/cdk.tf.json");
    let before = fs::read_to_string(&backend_path).unwrap();

    let (_, second) = synthesize(tmp.path());
    let after = fs::read_to_string(&backend_path).unwrap();

    assert_eq!(before, after);
    assert_eq!(second.changes.unchanged, 3);
    assert_eq!(second.changes.new, 0);
}

#[test]
fn dangling_function_aborts_before_writing() {
    let tmp = TempDir::new().unwrap();
    setup_project(tmp.path(), "[functions]\nauxiliary = [\"list\", \"thumbnails\"]\n");
    let config = config::load_config(&tmp.path().join(CONFIG_FILE)).unwrap();
    let err = synth::run(
        &config,
        &SynthOptions {
            root: tmp.path().to_path_buf(),
            use_cache: true,
            write: true,
        },
        HostOs::Linux,
        &ShellRunner,
        &BundlePolicy::standard(),
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("thumbnails"));
    assert!(!tmp.path().join("cdktf.out/stacks").exists());
}
