//! Image analysis tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sketchflow::analysis::{flowchart_from_tree, WorkflowAnalysis};
use crate::sketchflow::history::HistoryStore;
use crate::sketchflow::session::{FilePurpose, FileType, UploadedFile};
use crate::sketchflow::subagent::{ClassifiedFile, Subagent};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolError, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::uploads::{annotations_path, load_annotations, save_annotations};

type ToolOutput = Result<Value, Box<dyn Error + Send + Sync>>;

fn missing_image_response() -> Value {
    json!({
        "success": true,
        "session_id": "",
        "analysis": WorkflowAnalysis::missing_image(),
        "flowchart": {"nodes": [], "edges": []},
    })
}

fn build_response(session_id: &str, data: Value) -> Value {
    if data.get("message").is_some() && data.get("analysis").is_none() && data.get("tree").is_none()
    {
        return json!({
            "success": true,
            "session_id": session_id,
            "message": data.get("message").cloned().unwrap_or_default(),
            "analysis": WorkflowAnalysis::default(),
            "flowchart": {"nodes": [], "edges": []},
        });
    }
    let flowchart = flowchart_from_tree(data.get("tree").unwrap_or(&Value::Null));
    let workflow_analysis = json!({
        "variables": data.get("variables").cloned().unwrap_or(json!([])),
        "outputs": data.get("outputs").cloned().unwrap_or(json!([])),
        "tree": data.get("tree").cloned().unwrap_or(json!({})),
        "doubts": data.get("doubts").cloned().unwrap_or(json!([])),
        "reasoning": data.get("reasoning").cloned().unwrap_or(json!("")),
        "guidance": data.get("guidance").cloned().unwrap_or(json!([])),
    });
    json!({
        "success": true,
        "session_id": session_id,
        "analysis": data,
        "flowchart": flowchart,
        "workflow_analysis": workflow_analysis,
    })
}

/// Analyze uploaded workflow files with the subagent.
pub struct AnalyzeWorkflowTool {
    data_dir: PathBuf,
    history: Arc<dyn HistoryStore>,
    subagent: Arc<Subagent>,
}

impl AnalyzeWorkflowTool {
    pub fn new(data_dir: PathBuf, history: Arc<dyn HistoryStore>, subagent: Arc<Subagent>) -> Self {
        Self {
            data_dir,
            history,
            subagent,
        }
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(raw)
        }
    }

    /// Most recently modified file in the uploads directory.
    fn latest_uploaded_file(&self) -> Option<(PathBuf, FileType)> {
        let uploads_dir = self.data_dir.join("uploads");
        let entries = fs::read_dir(&uploads_dir).ok()?;
        let mut candidates: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                    Some("png") | Some("jpg") | Some("jpeg") | Some("webp") | Some("gif")
                        | Some("bmp") | Some("pdf")
                )
            })
            .filter_map(|path| {
                let modified = path.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            })
            .collect();
        candidates.sort_by_key(|(_, modified)| *modified);
        let (path, _) = candidates.pop()?;
        let file_type = if path.extension().and_then(|e| e.to_str()) == Some("pdf") {
            FileType::Pdf
        } else {
            FileType::Image
        };
        Some((path, file_type))
    }

    async fn analyze_followup(
        &self,
        session_id: &str,
        feedback: &str,
        ctx: &ToolContext,
    ) -> ToolOutput {
        let files = self.history.session_files(session_id).await;
        let Some(stored) = files.first() else {
            return Err(Box::new(ToolError::InvalidParameters(format!(
                "Unknown session_id: {}",
                session_id
            ))));
        };
        let image_path = self.resolve_path(stored);
        if !image_path.exists() {
            return Ok(missing_image_response());
        }
        let annotations = load_annotations(&image_path);
        let data = self
            .subagent
            .analyze(
                &image_path,
                file_type_of(&image_path),
                session_id,
                Some(feedback),
                &annotations,
                ctx.stream.clone(),
                ctx.cancel.clone(),
            )
            .await?;
        Ok(build_response(session_id, data))
    }

    async fn analyze_single(&self, ctx: &ToolContext) -> ToolOutput {
        let Some((image_path, file_type)) = self.latest_uploaded_file() else {
            return Ok(missing_image_response());
        };
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let stored = image_path
            .strip_prefix(&self.data_dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| image_path.to_string_lossy().to_string());
        self.history.create_session(&session_id, vec![stored]).await;
        let annotations = load_annotations(&image_path);
        let data = self
            .subagent
            .analyze(
                &image_path,
                file_type,
                &session_id,
                None,
                &annotations,
                ctx.stream.clone(),
                ctx.cancel.clone(),
            )
            .await?;
        Ok(build_response(&session_id, data))
    }

    async fn analyze_multi(
        &self,
        uploaded_files: &[UploadedFile],
        classifications: &[Value],
        ctx: &ToolContext,
    ) -> ToolOutput {
        let mut classified: Vec<ClassifiedFile> = Vec::new();
        for cls in classifications {
            let file_ref = cls.get("id").and_then(Value::as_str).unwrap_or("");
            let purpose = cls
                .get("purpose")
                .and_then(Value::as_str)
                .map(FilePurpose::parse)
                .unwrap_or(FilePurpose::Flowchart);
            // Match by id first, then fall back to name (the LLM sometimes
            // echoes file names instead of ids).
            let file_info = uploaded_files
                .iter()
                .find(|f| f.id == file_ref)
                .or_else(|| uploaded_files.iter().find(|f| f.name == file_ref));
            let Some(file_info) = file_info else {
                log::warn!("File classification references unknown id/name: {}", file_ref);
                continue;
            };
            let abs_path = self.resolve_path(&file_info.path);
            if !abs_path.exists() {
                log::warn!("Classified file not found: {}", abs_path.display());
                continue;
            }
            classified.push(ClassifiedFile {
                id: file_ref.to_string(),
                name: file_info.name.clone(),
                abs_path,
                file_type: file_info.file_type,
                purpose,
            });
        }

        if classified.is_empty() {
            return Ok(missing_image_response());
        }

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let stored: Vec<String> = classified
            .iter()
            .map(|f| f.abs_path.to_string_lossy().to_string())
            .collect();
        self.history.create_session(&session_id, stored).await;

        let data = self
            .subagent
            .analyze_multi(&classified, &session_id, ctx.stream.clone(), ctx.cancel.clone())
            .await?;
        Ok(build_response(&session_id, data))
    }
}

fn file_type_of(path: &Path) -> FileType {
    if path.extension().and_then(|e| e.to_str()) == Some("pdf") {
        FileType::Pdf
    } else {
        FileType::Image
    }
}

#[async_trait]
impl WorkflowTool for AnalyzeWorkflowTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "analyze_workflow",
            "Analyze the uploaded workflow files. Returns JSON with variables, outputs, a \
             tree, and doubts, plus a session_id. Use session_id + feedback to refine a prior \
             analysis. For multiple uploads, pass 'files' with per-file purposes first. If no \
             file has been uploaded, the tool will report that.",
        )
        .with_parameter(ToolParameter::new(
            "session_id",
            ToolParameterType::String,
            "Optional session id to continue a prior analysis.",
        ))
        .with_parameter(ToolParameter::new(
            "feedback",
            ToolParameterType::String,
            "Optional feedback to refine the analysis.",
        ))
        .with_parameter(ToolParameter::new(
            "files",
            ToolParameterType::Array,
            "Classifications for uploaded files ({id, purpose}). Required for multi-file analysis.",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        ctx.cancel.check("analyze_workflow before execution")?;
        let session_id = args.get("session_id").and_then(Value::as_str);
        let feedback = args.get("feedback").and_then(Value::as_str);
        let classifications = args.get("files").and_then(Value::as_array).cloned();
        let uploaded_files = ctx.session.lock().await.uploaded_files.clone();

        if let Some(session_id) = session_id.filter(|s| !s.is_empty()) {
            let Some(feedback) = feedback.filter(|f| !f.is_empty()) else {
                return Err(Box::new(ToolError::InvalidParameters(
                    "feedback is required when continuing a session with session_id".to_string(),
                )));
            };
            return self.analyze_followup(session_id, feedback, ctx).await;
        }

        if let Some(classifications) = classifications.filter(|c| !c.is_empty()) {
            if !uploaded_files.is_empty() {
                return self
                    .analyze_multi(&uploaded_files, &classifications, ctx)
                    .await;
            }
        }

        self.analyze_single(ctx).await
    }
}

/// Return the most recent stored analysis for canvas rendering.
pub struct PublishLatestAnalysisTool {
    history: Arc<dyn HistoryStore>,
}

impl PublishLatestAnalysisTool {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl WorkflowTool for PublishLatestAnalysisTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "publish_latest_analysis",
            "Load the most recent workflow analysis and return it for rendering on the canvas.",
        )
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolOutput {
        match self.history.latest_analysis().await {
            Some((session_id, analysis)) => {
                let flowchart = flowchart_from_tree(analysis.get("tree").unwrap_or(&Value::Null));
                Ok(json!({
                    "success": true,
                    "session_id": session_id,
                    "analysis": analysis,
                    "flowchart": flowchart,
                }))
            }
            None => Ok(json!({
                "success": true,
                "session_id": "",
                "analysis": {
                    "variables": [],
                    "outputs": [],
                    "tree": {},
                    "doubts": [
                        "No analysis found. Ask the user to upload an image and run workflow analysis."
                    ],
                },
                "flowchart": {"nodes": [], "edges": []},
            })),
        }
    }
}

/// Place a question dot on an uploaded image.
pub struct AddImageQuestionTool {
    data_dir: PathBuf,
}

impl AddImageQuestionTool {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[async_trait]
impl WorkflowTool for AddImageQuestionTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "add_image_question",
            "Place a question dot on the user's workflow image at specific coordinates. Use \
             this when you have a question about a specific part of the image.",
        )
        .with_parameter(
            ToolParameter::new(
                "image_name",
                ToolParameterType::String,
                "The name of the uploaded image file (e.g. diagram.png).",
            )
            .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "x",
                ToolParameterType::Integer,
                "The X coordinate on the image where the question applies.",
            )
            .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "y",
                ToolParameterType::Integer,
                "The Y coordinate on the image where the question applies.",
            )
            .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "question",
                ToolParameterType::String,
                "The specific question you want to ask the user.",
            )
            .required(),
        )
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutput {
        let image_name = args.get("image_name").and_then(Value::as_str).unwrap_or("");
        let question = args.get("question").and_then(Value::as_str).unwrap_or("");
        let x = args.get("x").and_then(Value::as_i64);
        let y = args.get("y").and_then(Value::as_i64);
        if image_name.is_empty() || question.is_empty() || x.is_none() || y.is_none() {
            return Err(Box::new(ToolError::InvalidParameters(
                "image_name, x, y, and question are required".to_string(),
            )));
        }
        let (x, y) = (x.unwrap(), y.unwrap());

        let image_path = {
            let path = Path::new(image_name);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.data_dir.join("uploads").join(image_name)
            }
        };
        let mut annotations = load_annotations(&image_path);

        // Same question within a 10px radius counts as already placed.
        let is_duplicate = annotations.iter().any(|a| {
            a.get("type").and_then(Value::as_str) == Some("question")
                && a.get("question").and_then(Value::as_str) == Some(question)
                && (a.get("x").and_then(Value::as_i64).unwrap_or(0) - x).abs() < 10
                && (a.get("y").and_then(Value::as_i64).unwrap_or(0) - y).abs() < 10
        });

        if !is_duplicate {
            annotations.push(json!({
                "id": &uuid::Uuid::new_v4().simple().to_string()[..8],
                "type": "question",
                "x": x,
                "y": y,
                "question": question,
                "status": "pending",
            }));
            save_annotations(&image_path, &annotations)?;
        }

        log::info!(
            "Added image question to {} at ({}, {}): {}",
            image_name,
            x,
            y,
            question
        );

        Ok(json!({
            "success": true,
            "action": "question_added",
            "annotations": annotations,
            "annotations_path": annotations_path(&image_path).to_string_lossy(),
        }))
    }
}
