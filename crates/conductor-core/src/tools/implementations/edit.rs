//! Edit tool - Ordered search/replace edits applied through change staging

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::tools::registry::Tool;
use crate::tools::staging::{apply_replacements, PendingChange};
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct EditTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    edits: Vec<EditFragment>,
}

#[derive(Deserialize)]
struct EditFragment {
    search: String,
    replace: String,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of each search fragment, in order. Fails if no fragment matches. Returns a unified diff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "edits": {
                    "type": "array",
                    "description": "Ordered search/replace fragments",
                    "items": {
                        "type": "object",
                        "properties": {
                            "search": {
                                "type": "string",
                                "description": "Exact text to find (first occurrence is replaced)"
                            },
                            "replace": {
                                "type": "string",
                                "description": "Replacement text"
                            }
                        },
                        "required": ["search", "replace"]
                    }
                }
            },
            "required": ["file_path", "edits"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.edits.is_empty() {
            return ToolResult::invalid_parameters("At least one edit is required");
        }

        let path = ctx.resolve_path(&params.file_path);
        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", params.file_path));
        }

        let current = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let replacements: Vec<(String, String)> = params
            .edits
            .into_iter()
            .map(|e| (e.search, e.replace))
            .collect();

        let (new_content, not_found) = match apply_replacements(&current, &replacements) {
            Ok(result) => result,
            Err(e) => {
                return ToolResult::error_with_data(
                    "not_found",
                    format!("None of the search fragments were found: {}", e),
                    Some(json!({
                        "fragment_indices": e.indices,
                        "fragments": e.fragments
                    })),
                );
            }
        };

        let warnings: Vec<String> = not_found
            .iter()
            .map(|&i| format!("Search fragment {} not found, skipped", i))
            .collect();

        let Some(change) = PendingChange::propose(
            &path,
            Some(current),
            new_content,
            format!("edit {}", params.file_path),
        ) else {
            return ToolResult::success_data_with(
                json!({
                    "message": "No changes (replacements produced identical content)",
                    "file_path": path.display().to_string()
                }),
                warnings,
                None,
            );
        };

        let applied = replacements.len() - not_found.len();
        if let Err(e) = change.apply() {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        info!(path = %path.display(), applied, "edited file");

        ToolResult::success_data_with(
            json!({
                "message": format!("Applied {} of {} edits", applied, replacements.len()),
                "file_path": path.display().to_string()
            }),
            warnings,
            Some(change.diff),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_applies_fragments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn old_name() {}\n").unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = EditTool
            .execute(
                json!({
                    "file_path": "f.rs",
                    "edits": [{"search": "old_name", "replace": "new_name"}]
                }),
                &ctx,
            )
            .await;
        assert!(!result.is_error);

        let content = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert_eq!(content, "fn new_name() {}\n");

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert!(parsed["diff"].as_str().unwrap().contains("-fn old_name"));
    }

    #[tokio::test]
    async fn test_edit_all_fragments_missing_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "content\n").unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = EditTool
            .execute(
                json!({
                    "file_path": "f.txt",
                    "edits": [
                        {"search": "missing one", "replace": "x"},
                        {"search": "missing two", "replace": "y"}
                    ]
                }),
                &ctx,
            )
            .await;
        assert!(result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_found");
        assert_eq!(parsed["data"]["fragment_indices"], json!([0, 1]));

        let content = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(content, "content\n");
    }

    #[tokio::test]
    async fn test_edit_partial_miss_warns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "hello world\n").unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = EditTool
            .execute(
                json!({
                    "file_path": "f.txt",
                    "edits": [
                        {"search": "hello", "replace": "hi"},
                        {"search": "absent", "replace": "x"}
                    ]
                }),
                &ctx,
            )
            .await;
        assert!(!result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["message"], "Applied 1 of 2 edits");
        assert!(parsed["warnings"][0]
            .as_str()
            .unwrap()
            .contains("fragment 1"));
    }
}
