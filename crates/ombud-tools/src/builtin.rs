// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in local tools.

use anyhow::bail;
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use serde_json::{json, Value};

use ombud_model::{AgentMessage, MessagePart, PartSource, Role};

use crate::{optional_str_arg, require_str_arg, Directive, Tool, ToolCall, ToolContext, ToolResult};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Reports the current UTC datetime.
#[derive(Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Return the current datetime in UTC (default format %Y-%m-%dT%H:%M:%SZ)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": ["string", "null"],
                    "description": "strftime format string.",
                }
            },
            "required": ["format"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let fmt = optional_str_arg(&call.args, "format")
            .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string());
        let items: Vec<Item> = StrftimeItems::new(&fmt).collect();
        if items.iter().any(|i| matches!(i, Item::Error)) {
            bail!("invalid strftime format string");
        }
        let timestamp = Utc::now().format_with_items(items.into_iter()).to_string();
        Ok(ToolResult::ok_json(&call.id, json!({ "timestamp": timestamp })))
    }
}

/// Attaches a managed file to the conversation.
///
/// Emits an append-message directive carrying the file as a message part;
/// the runtime materializes the file content when the directive is applied.
/// Must be registered trusted to have any effect.
#[derive(Default)]
pub struct AttachFileTool;

#[async_trait]
impl Tool for AttachFileTool {
    fn name(&self) -> &str {
        "attach_file"
    }

    fn description(&self) -> &str {
        "Attach a file from the managed files area to the conversation so the model can read it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the managed files root.",
                },
                "description": {
                    "type": ["string", "null"],
                    "description": "Optional caption shown alongside the attachment.",
                }
            },
            "required": ["path", "description"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let path = require_str_arg(&call.args, "path")?;
        let caption = optional_str_arg(&call.args, "description");

        let filename = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
        let mime = mime_for(&filename);

        let mut parts = Vec::new();
        if let Some(text) = &caption {
            parts.push(MessagePart::text(text.clone()));
        }
        let source = PartSource::ManagedFile { path: path.clone() };
        if mime.map_or(false, |m| m.starts_with("image/")) {
            parts.push(MessagePart::Image {
                source,
                mime: mime.map(str::to_string),
            });
        } else {
            parts.push(MessagePart::File {
                source,
                mime: mime.map(str::to_string),
                filename: Some(filename),
            });
        }

        let message = AgentMessage {
            role: Role::User,
            parts,
            tool_name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            source_tool: None,
        };
        Ok(ToolResult::directive(
            &call.id,
            Directive::AppendMessage { message },
        ))
    }
}

fn mime_for(filename: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        "csv" => Some("text/csv"),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use regex::Regex;
    use serde_json::json;

    use super::*;
    use crate::ToolPayload;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "call-1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn current_datetime_default_format() {
        let tool = CurrentTimeTool;
        let out = tool
            .execute(&call("current_datetime", json!({ "format": null })), &ToolContext::default())
            .await
            .unwrap();
        let ts = out.payload.as_json().unwrap()["timestamp"].as_str().unwrap().to_string();
        let re = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").unwrap();
        assert!(re.is_match(&ts), "unexpected timestamp: {ts}");
    }

    #[tokio::test]
    async fn current_datetime_custom_format() {
        let tool = CurrentTimeTool;
        let out = tool
            .execute(&call("current_datetime", json!({ "format": "%Y" })), &ToolContext::default())
            .await
            .unwrap();
        let ts = out.payload.as_json().unwrap()["timestamp"].as_str().unwrap();
        assert_eq!(ts.len(), 4);
    }

    #[tokio::test]
    async fn current_datetime_rejects_invalid_format() {
        let tool = CurrentTimeTool;
        let err = tool
            .execute(&call("current_datetime", json!({ "format": "%Q%Z%%%" })), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid strftime"));
    }

    #[tokio::test]
    async fn attach_file_emits_image_part_for_png() {
        let tool = AttachFileTool;
        let out = tool
            .execute(
                &call("attach_file", json!({ "path": "charts/q3.png", "description": "Q3 chart" })),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        let ToolPayload::Directive(Directive::AppendMessage { message }) = &out.payload else {
            panic!("expected a directive payload");
        };
        assert_eq!(message.role, Role::User);
        assert_eq!(message.parts.len(), 2);
        assert!(matches!(
            &message.parts[1],
            MessagePart::Image { source: PartSource::ManagedFile { path }, .. } if path == "charts/q3.png"
        ));
    }

    #[tokio::test]
    async fn attach_file_emits_file_part_with_filename() {
        let tool = AttachFileTool;
        let out = tool
            .execute(
                &call("attach_file", json!({ "path": "reports/summary.pdf", "description": null })),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        let Some(Directive::AppendMessage { message }) = out.payload.as_directive() else {
            panic!("expected a directive payload");
        };
        assert!(matches!(
            &message.parts[0],
            MessagePart::File { filename: Some(f), mime: Some(m), .. }
                if f == "summary.pdf" && m == "application/pdf"
        ));
    }

    #[tokio::test]
    async fn attach_file_requires_path() {
        let tool = AttachFileTool;
        let err = tool
            .execute(&call("attach_file", json!({ "description": "x" })), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
