//! CLI output formatting for the synthesis pipeline.
//!
//! # Output Format
//!
//! ## Bundle
//!
//! ```text
//! 001 resize 3f1a9c0e (changed)
//!     dependencies installed
//! 002 list 88c2d1b7 (unchanged)
//! ```
//!
//! ## Synthesize
//!
//! ```text
//! iac-assignment-backend (17 resources)
//!     001 aws_s3_bucket.images
//!     002 aws_s3_bucket.resized
//!     ...
//!     Outputs
//!         LIST_url = ${aws_lambda_function_url.list.function_url}
//! ```
//!
//! ## Write
//!
//! ```text
//! iac-assignment-backend → cdktf.out/stacks/iac-assignment-backend/cdk.tf.json
//! ```
//!
//! ## Errors
//!
//! ```text
//! Error: Bundling failed: Command failed in lambdas/resize (exit code 1): pip install ...
//! --- stdout ---
//! Collecting Pillow
//! --- stderr ---
//! ERROR: No matching distribution found
//! ```
//!
//! # Architecture
//!
//! Each event has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::bundle::short_hash;
use crate::outputs::OutputValue;
use crate::synth::{PipelineEvent, SynthResult};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn output_lines(outputs: &[(String, OutputValue)], depth: usize) -> Vec<String> {
    if outputs.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("{}Outputs", indent(depth))];
    for (name, value) in outputs {
        lines.push(format!("{}{} = {}", indent(depth + 1), name, value));
    }
    lines
}

// ============================================================================
// Pipeline events
// ============================================================================

/// Format a single pipeline progress event as display lines.
pub fn format_pipeline_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::AssetBundled {
            index,
            name,
            hash,
            status,
            installed,
        } => {
            let mut lines = vec![format!(
                "{} {} {} ({})",
                format_index(*index),
                name,
                short_hash(hash),
                status
            )];
            if *installed {
                lines.push(format!("{}dependencies installed", indent(1)));
            }
            lines
        }
        PipelineEvent::StackSynthesized {
            name,
            order,
            outputs,
        } => {
            let mut lines = vec![format!("{} ({} resources)", name, order.len())];
            for (i, address) in order.iter().enumerate() {
                lines.push(format!("{}{} {}", indent(1), format_index(i + 1), address));
            }
            lines.extend(output_lines(outputs, 1));
            lines
        }
        PipelineEvent::StackWritten { name, path } => {
            vec![format!("{} \u{2192} {}", name, path.display())]
        }
    }
}

/// Print a pipeline event to stdout.
pub fn print_pipeline_event(event: &PipelineEvent) {
    for line in format_pipeline_event(event) {
        println!("{}", line);
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Format the end-of-run summary: asset changes, buckets and every output.
pub fn format_summary(result: &SynthResult) -> Vec<String> {
    let mut lines = vec![format!("Assets: {}", result.changes)];
    if !result.buckets.is_empty() {
        lines.push(format!("Buckets: {}", result.buckets.join(", ")));
    }
    for stack in result.stacks() {
        let outputs: Vec<(String, OutputValue)> = stack
            .outputs
            .iter()
            .map(|o| (o.name.clone(), o.value.clone()))
            .collect();
        if outputs.is_empty() {
            continue;
        }
        lines.push(stack.name.clone());
        lines.extend(output_lines(&outputs, 1));
    }
    lines
}

/// Print the run summary to stdout.
pub fn print_summary(result: &SynthResult) {
    for line in format_summary(result) {
        println!("{}", line);
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Format a fatal error for the operator. Captured command output is kept
/// line for line, never escaped.
pub fn format_error(err: &dyn std::error::Error) -> Vec<String> {
    format!("Error: {err}").lines().map(String::from).collect()
}

/// Print a fatal error to stderr.
pub fn print_error(err: &dyn std::error::Error) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}
