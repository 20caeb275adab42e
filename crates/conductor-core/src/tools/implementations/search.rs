//! Search tool - Regex search across workspace files, honoring gitignore

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_RESULTS_CAP: usize = 1000;
const MAX_LINE_DISPLAY: usize = 500;

pub struct SearchTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Respects .gitignore. Returns matching lines as path:line:text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: working directory)"
                },
                "max_results": {
                    "type": "number",
                    "description": "Maximum number of matching lines to return (default: 100)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let regex = match Regex::new(&params.pattern) {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::invalid_parameters(format!("Invalid regex: {}", e));
            }
        };

        let root = params
            .path
            .as_deref()
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.working_dir.clone());

        if !root.exists() {
            return ToolResult::error(format!("Path not found: {}", root.display()));
        }

        let max_results = params
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .min(MAX_RESULTS_CAP);

        // File walking and matching are blocking; run off the async thread.
        let search_root = root.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut files_scanned = 0usize;
            let mut truncated = false;

            let walker = WalkBuilder::new(&search_root)
                .hidden(true)
                .git_ignore(true)
                .build();

            'walk: for entry in walker.flatten() {
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    continue;
                }

                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                files_scanned += 1;

                let display = entry
                    .path()
                    .strip_prefix(&search_root)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();

                for (line_no, line) in content.lines().enumerate() {
                    if !regex.is_match(line) {
                        continue;
                    }

                    if matches.len() >= max_results {
                        truncated = true;
                        break 'walk;
                    }

                    let shown = if line.len() > MAX_LINE_DISPLAY {
                        let cut = floor_char_boundary(line, MAX_LINE_DISPLAY);
                        format!("{}...", &line[..cut])
                    } else {
                        line.to_string()
                    };
                    matches.push(format!("{}:{}:{}", display, line_no + 1, shown));
                }
            }

            (matches, files_scanned, truncated)
        })
        .await;

        let (matches, files_scanned, truncated) = match result {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Search task failed: {}", e)),
        };

        ToolResult::success_data(json!({
            "matches": matches,
            "match_count": matches.len(),
            "files_scanned": files_scanned,
            "truncated": truncated
        }))
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
