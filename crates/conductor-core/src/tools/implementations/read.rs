//! Read tool - Read file contents

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_LINE_LIMIT: usize = 2000;

pub struct ReadTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents. Supports line offset/limit for large files. Detects binary files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.file_path);

        if !path.exists() {
            return ToolResult::error(format!("File not found: {}", params.file_path));
        }
        if !path.is_file() {
            return ToolResult::error(format!("Path is not a file: {}", path.display()));
        }

        let content = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        // Check for binary
        let check_len = content.len().min(8192);
        if content[..check_len].contains(&0) {
            let size = content.len();
            return ToolResult::success_data(json!({
                "content": format!("Binary file: {} ({} bytes)", path.display(), size),
                "total_lines": 0,
                "lines_returned": 0
            }));
        }

        let content = match String::from_utf8(content) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("File is not valid UTF-8: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let start = params.offset.unwrap_or(1).saturating_sub(1);
        let limit = params.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let end = (start + limit).min(total_lines);

        if start >= total_lines && start > 0 {
            return ToolResult::error(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total_lines
            ));
        }

        let content = lines[start.min(end)..end].join("\n");

        ToolResult::success_data(json!({
            "content": content,
            "total_lines": total_lines,
            "lines_returned": end - start,
            "start_line": start + 1
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "hello.txt"}), &ctx)
            .await;
        assert!(!result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["total_lines"], 3);
        assert_eq!(parsed["data"]["content"], "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "nope.txt"}), &ctx)
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_read_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "empty.txt"}), &ctx)
            .await;
        assert!(!result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "");
        assert_eq!(parsed["data"]["total_lines"], 0);
    }

    #[tokio::test]
    async fn test_read_empty_file_with_offset_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "empty.txt", "offset": 2}), &ctx)
            .await;
        assert!(result.is_error);

        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert!(parsed["error"]["message"]
            .as_str()
            .unwrap()
            .contains("beyond file length"));
    }

    #[tokio::test]
    async fn test_read_offset_past_end_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.txt");
        std::fs::write(&path, "only\n").unwrap();

        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "short.txt", "offset": 5}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_read_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nums.txt");
        std::fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();

        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ReadTool
            .execute(json!({"file_path": "nums.txt", "offset": 2, "limit": 2}), &ctx)
            .await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "2\n3");
        assert_eq!(parsed["data"]["start_line"], 2);
    }
}
