//! Write tool - Create or overwrite files through change staging

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::tools::registry::Tool;
use crate::tools::staging::PendingChange;
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct WriteTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. Creates parent directories if needed. Returns a unified diff of the change."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.file_path);

        let old_content = if path.exists() {
            if !path.is_file() {
                return ToolResult::error(format!("Path is not a file: {}", path.display()));
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(s) => Some(s),
                Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
            }
        } else {
            None
        };

        let Some(change) = PendingChange::propose(
            &path,
            old_content,
            params.content,
            format!("write {}", params.file_path),
        ) else {
            return ToolResult::success_data(json!({
                "message": "No changes (content identical)",
                "file_path": path.display().to_string()
            }));
        };

        let created = change.is_new_file();
        if let Err(e) = change.apply() {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        info!(path = %path.display(), created, "wrote file");

        ToolResult::success_data_with(
            json!({
                "message": format!(
                    "Successfully wrote {} lines",
                    change.new_content.lines().count()
                ),
                "bytes_written": change.new_content.len(),
                "file_path": path.display().to_string(),
                "created": created
            }),
            Vec::new(),
            Some(change.diff),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_new_file_returns_diff() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = WriteTool
            .execute(
                json!({"file_path": "new/deep/file.txt", "content": "hello\n"}),
                &ctx,
            )
            .await;
        assert!(!result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["created"], true);
        assert!(parsed["diff"].as_str().unwrap().contains("+hello"));

        let written = std::fs::read_to_string(dir.path().join("new/deep/file.txt")).unwrap();
        assert_eq!(written, "hello\n");
    }

    #[tokio::test]
    async fn test_write_identical_content_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "same\n").unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = WriteTool
            .execute(json!({"file_path": "f.txt", "content": "same\n"}), &ctx)
            .await;
        assert!(!result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["message"], "No changes (content identical)");
        assert!(parsed.get("diff").is_none());
    }
}
