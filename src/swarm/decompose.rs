// Task decomposition — prompt template plus the strict parser that turns
// model output into a validated subtask array. Parsing is a sum-typed
// boundary: bad output becomes CoreError::Decomposition, never a panic.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Capability, Strategy, TaskMode};
use serde_json::Value;

/// Default instruction given to the decomposition model. `{{task}}` is
/// replaced with the caller's description.
const DECOMPOSE_TEMPLATE: &str = "\
Break the following task into 2-6 subtasks.

Task: {{task}}

Return ONLY a JSON array. Each entry must be an object with:
  \"description\": what the subtask does (required)
  \"capability\": one of coding, reasoning, long-context, creative, review, \
classification, extraction, simple-reasoning, multimodal (default: reasoning)
  \"mode\": \"inline\" or \"agent\" (default: inline)
  \"depends_on\": array of earlier subtask indices this one needs (default: [])

Dependencies may only reference earlier entries. No prose, no code fences.";

/// One validated decomposition entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskSpec {
    pub description: String,
    pub capability: Capability,
    pub mode: TaskMode,
    pub depends_on: Vec<usize>,
    pub strategy: Option<Strategy>,
}

/// Render the decomposition prompt, honouring a caller-supplied template.
pub fn build_decompose_prompt(task_description: &str, template: Option<&str>) -> String {
    template
        .unwrap_or(DECOMPOSE_TEMPLATE)
        .replace("{{task}}", task_description)
}

/// Parse model output into subtasks.
///
/// Tolerates fenced code blocks and prose around the array, then turns
/// strict: non-array, empty array, a missing description, or an invalid
/// dependency index all reject the whole decomposition.
pub fn parse_subtasks(raw: &str) -> CoreResult<Vec<SubtaskSpec>> {
    let trimmed = strip_code_fence(raw.trim());

    let start = trimmed
        .find('[')
        .ok_or_else(|| CoreError::Decomposition("no JSON array in output".into()))?;
    let end = trimmed
        .rfind(']')
        .filter(|e| *e > start)
        .ok_or_else(|| CoreError::Decomposition("no JSON array in output".into()))?;

    let parsed: Value = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| CoreError::Decomposition(format!("invalid JSON: {}", e)))?;
    let entries = parsed
        .as_array()
        .ok_or_else(|| CoreError::Decomposition("output is not an array".into()))?;
    if entries.is_empty() {
        return Err(CoreError::Decomposition("empty subtask array".into()));
    }

    let mut subtasks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let description = entry["description"]
            .as_str()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                CoreError::Decomposition(format!("subtask {} missing description", index))
            })?
            .to_string();

        let capability = entry["capability"]
            .as_str()
            .and_then(Capability::parse)
            .unwrap_or(Capability::Reasoning);
        let mode = entry["mode"]
            .as_str()
            .and_then(TaskMode::parse)
            .unwrap_or(TaskMode::Inline);
        let strategy = entry["strategy"].as_str().and_then(Strategy::parse);

        let mut depends_on = Vec::new();
        if let Some(deps) = entry["depends_on"].as_array() {
            for dep in deps {
                let dep_index = dep.as_u64().ok_or_else(|| {
                    CoreError::Decomposition(format!(
                        "subtask {} has non-integer dependency {}",
                        index, dep
                    ))
                })? as usize;
                if dep_index >= entries.len() || dep_index >= index {
                    return Err(CoreError::Decomposition(format!(
                        "subtask {} has invalid dependency index {}",
                        index, dep_index
                    )));
                }
                depends_on.push(dep_index);
            }
        }

        subtasks.push(SubtaskSpec {
            description,
            capability,
            mode,
            depends_on,
            strategy,
        });
    }
    Ok(subtasks)
}

/// Pull the inner text out of a ``` fence, if the output is wrapped in one.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag on the opening line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.rfind("```").map(|end| &body[..end]).unwrap_or(body).trim()
}
