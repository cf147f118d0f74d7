//! Prompt assembly for first-attempt and retry generation requests.
//!
//! The first attempt carries the problem statement, any image references,
//! and the code skeleton. Retries carry the previous artifact plus
//! structured failure diagnostics instead of the skeleton — the model must
//! patch its own prior attempt, not start over from the template.

use crate::bridge::EvalResult;
use crate::workbench::TaskContent;

/// User prompt for the first generation attempt.
pub fn first_attempt_prompt(task: &TaskContent, skeleton: &str) -> String {
    let mut parts = vec![
        "## Task".to_string(),
        "Complete the begin/end regions of the code template below, guided by the study material."
            .to_string(),
        String::new(),
        "## Study material".to_string(),
        non_empty(&task.text),
        String::new(),
    ];

    if !task.images.is_empty() {
        parts.push("## Referenced images".to_string());
        for url in &task.images {
            parts.push(format!("- {}", url));
        }
        parts.push(String::new());
    }

    parts.push("## Code template (fill in the begin/end regions)".to_string());
    parts.push("```".to_string());
    parts.push(non_empty(skeleton));
    parts.push("```".to_string());
    parts.push(String::new());
    parts.push("## Output".to_string());
    parts.push(
        "Emit the COMPLETE file with the regions filled in, from the first line to the last."
            .to_string(),
    );

    parts.join("\n")
}

/// User prompt for a retry attempt, built around the failure diagnostics.
pub fn retry_prompt(task: &TaskContent, previous_code: &str, eval: Option<&EvalResult>) -> String {
    let parts = vec![
        "## Task".to_string(),
        "Your previous submission failed evaluation. Fix the code using the failure details below."
            .to_string(),
        String::new(),
        "## Study material (original requirements)".to_string(),
        non_empty(&task.text),
        String::new(),
        failure_details(eval),
        String::new(),
        "## Your previous submission".to_string(),
        "```".to_string(),
        non_empty(previous_code),
        "```".to_string(),
        String::new(),
        "## Output".to_string(),
        "Emit the corrected COMPLETE file. Compare expected and actual output carefully to locate the defect."
            .to_string(),
    ];
    parts.join("\n")
}

fn failure_details(eval: Option<&EvalResult>) -> String {
    let Some(eval) = eval else {
        return "## Evaluation outcome\nThe submission failed evaluation.".to_string();
    };

    let mut lines = vec!["## Evaluation failure details".to_string()];
    for (i, case) in eval.test_sets.iter().enumerate() {
        if eval.test_sets.len() > 1 {
            lines.push(format!("### Test case {}", i + 1));
        }
        lines.push(format!(
            "- Compilation: {}",
            if case.compiled() { "succeeded" } else { "FAILED" }
        ));
        lines.push("- Expected output:".to_string());
        lines.push("```".to_string());
        lines.push(non_empty(case.output.as_deref().unwrap_or("")));
        lines.push("```".to_string());
        lines.push("- Actual output:".to_string());
        lines.push("```".to_string());
        lines.push(non_empty(case.actual_output.as_deref().unwrap_or("")));
        lines.push("```".to_string());
    }
    if eval.test_sets.is_empty() {
        lines.push(format!(
            "- Errors reported: {}",
            eval.sets_error_count.unwrap_or(-1)
        ));
    }
    if let Some(compile_output) = &eval.last_compile_output {
        lines.push(format!("- Compiler/runtime output: {}", compile_output));
    }
    lines.join("\n")
}

fn non_empty(text: &str) -> String {
    if text.trim().is_empty() {
        "(empty)".to_string()
    } else {
        text.to_string()
    }
}
