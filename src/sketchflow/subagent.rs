//! Image-analysis subagent.
//!
//! Converts uploaded flowchart images and PDFs into a structured analysis
//! `{variables, outputs, tree, doubts, reasoning, guidance}` through one or
//! more LLM calls, with per-session history so follow-up feedback turns
//! continue against the same image set.
//!
//! Multi-file runs are two-phase: every guidance-bearing file (`guidance`
//! or `mixed` purpose) is processed first with a one-call guidance
//! extraction, and only after all of those complete does the single
//! combined analysis call run with the accumulated guidance injected into
//! its prompt. The ordering is deliberate and observable through the
//! request tags (`extract_guidance` strictly before `analyze_multi`).

use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sketchflow::analysis::{normalize_analysis, GuidanceNote};
use crate::sketchflow::cancellation::{CancelToken, Cancelled};
use crate::sketchflow::client_wrapper::{
    BoxError, CallOptions, ChatMessage, ClientWrapper, ContentBlock, DeltaCallback, MessageContent,
};
use crate::sketchflow::history::HistoryStore;
use crate::sketchflow::session::{FilePurpose, FileType};
use crate::sketchflow::uploads::file_to_data_url;

/// A classified file resolved to an absolute path.
#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub id: String,
    pub name: String,
    pub abs_path: PathBuf,
    pub file_type: FileType,
    pub purpose: FilePurpose,
}

const ANALYSIS_PROMPT: &str = r#"Analyze this workflow diagram.

Return ONLY a JSON object with this structure:
{
  "variables": [
    {"id": "var_name_type", "name": "...", "type": "int|float|bool|string|enum|date", "description": "..."}
  ],
  "outputs": [
    {"name": "...", "description": "..."}
  ],
  "tree": {
    "start": {
      "id": "start",
      "type": "start",
      "label": "Start",
      "children": [
        {
          "id": "n1",
          "type": "decision",
          "label": "exact text from diagram",
          "input_ids": ["var_name_type"],
          "edge_label": "Yes|No|label from diagram",
          "condition": {
            "input_id": "var_name_type",
            "comparator": "gte|gt|lte|lt|eq|enum_eq|is_true|is_false",
            "value": 0
          },
          "children": [
            {
              "id": "n2",
              "type": "output",
              "label": "exact text from diagram",
              "edge_label": "Yes",
              "children": []
            }
          ]
        }
      ]
    }
  },
  "doubts": [
    "question or ambiguity 1"
  ]
}

Rules:

Variables:
- Each variable is a data value the workflow needs to make decisions.
- Every variable "id" is computed as: var_{slug(name)}_{type}
  - slug: lowercase, replace non-alphanumeric with underscores, collapse repeats.
- Declare every variable that any decision node evaluates. If a node checks a numeric
  threshold, declare a float/int variable for it.

Outputs:
- List every distinct terminal outcome that appears in the diagram.
- Each output name must match a leaf node label in the tree.

Node types:
- "start": single entry point, always the root.
- "decision": a branching point with 2+ children. MUST include a "condition" object.
- "action": an intermediate processing step with exactly one child.
- "output": a terminal endpoint. If a node is the final step in any path with nothing
  after it, it MUST be type "output" with children: [].

Conditions on decision nodes:
- Every decision node MUST have a "condition" with "input_id", "comparator", and "value"
  (omit value for is_true/is_false).
- Derive condition thresholds from the edge labels on the branches.
- For multi-way splits (3+ branches from one point), chain binary decisions.

Tree structure:
- A single rooted tree starting at tree.start.
- Only decision nodes may have multiple children.
- Outputs MUST be leaf nodes (children: []).
- Every node id must be unique across the tree.
- edge_label: use the exact text from the diagram's branch labels.

Cycles and loops:
- If the diagram contains loops (arrows pointing back to earlier steps), do NOT
  duplicate subtrees. Represent the loop endpoint as an output node and note the loop
  in "doubts".

Labels:
- Use exact text from the diagram for all labels.
- If there are no doubts, return "doubts": [].

Return JSON only, no extra text.

Once you've received clarifications via feedback, adjust the analysis accordingly,
preserving ids by recomputing them deterministically from name + type. Respond only
with the updated JSON object."#;

const GUIDANCE_PROMPT: &str = r#"This file contains guidance material (sticky notes, legends, margin text, or
documentation) rather than, or in addition to, a flowchart.

Extract every piece of side information that could influence how the flowchart should
be interpreted. Return ONLY a JSON array:
[
  {"text": "the guidance statement", "location": "where it appears", "category": "definition|constraint|legend|note"}
]

Return an empty array [] if there is no guidance content."#;

/// Stateful subagent with persisted per-session chat history.
pub struct Subagent {
    client: Arc<dyn ClientWrapper>,
    history: Arc<dyn HistoryStore>,
}

impl Subagent {
    pub fn new(client: Arc<dyn ClientWrapper>, history: Arc<dyn HistoryStore>) -> Self {
        Self { client, history }
    }

    /// Analyze a single file, or continue a prior session with feedback.
    pub async fn analyze(
        &self,
        image_path: &Path,
        file_type: FileType,
        session_id: &str,
        feedback: Option<&str>,
        annotations: &[Value],
        stream: Option<DeltaCallback>,
        cancel: CancelToken,
    ) -> Result<Value, BoxError> {
        cancel.check("subagent before analysis").map_err(boxed)?;
        log::info!(
            "Subagent analyze session_id={} file={} feedback={}",
            session_id,
            image_path.display(),
            feedback.is_some()
        );

        let history_messages = self.history.list_messages(session_id).await;
        let is_followup = !history_messages.is_empty() && feedback.is_some();
        let wants_json = feedback.map(wants_json_output).unwrap_or(false);

        let system = ChatMessage::system("You extract structured data from workflow images.");
        let user = if is_followup {
            ChatMessage::user(format!(
                "You are in a follow-up discussion. Answer the user's question plainly. \
                 Do NOT return JSON unless the user explicitly asks to regenerate the full JSON. \
                 If the user asks for regeneration, return ONLY the full JSON object in the \
                 original format.\n\nUser feedback: {}",
                feedback.unwrap_or_default()
            ))
        } else {
            let data_url = file_to_data_url(image_path)?;
            let mut prompt = ANALYSIS_PROMPT.to_string();
            if !annotations.is_empty() {
                prompt.push_str("\n\nExisting annotations on the image (answered questions take precedence):\n");
                prompt.push_str(&serde_json::to_string(annotations)?);
            }
            ChatMessage {
                role: crate::sketchflow::client_wrapper::Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text { text: prompt },
                    file_block(&data_url, file_type),
                ]),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }
        };

        let mut messages = vec![system];
        for message in &history_messages {
            let role = if message.role == "assistant" {
                crate::sketchflow::client_wrapper::Role::Assistant
            } else {
                crate::sketchflow::client_wrapper::Role::User
            };
            messages.push(ChatMessage {
                role,
                content: MessageContent::Text(message.content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        messages.push(user);

        let opts = CallOptions::new("subagent", if is_followup { "analyze_followup" } else { "analyze" })
            .with_cancel(cancel.clone());
        let completion = match &stream {
            Some(on_delta) => {
                self.client
                    .complete_stream(&messages, &opts, on_delta.clone())
                    .await?
            }
            None => self.client.complete(&messages, &opts).await?,
        };
        cancel.check("subagent after LLM call").map_err(boxed)?;
        let raw = completion.text.trim().to_string();
        if raw.is_empty() {
            return Err("LLM returned an empty response.".into());
        }

        if is_followup && !wants_json {
            return Ok(json!({"message": raw}));
        }

        let mut data = self.parse_json(&raw, &messages, &cancel).await?;
        if !completion.thinking.is_empty() {
            data["reasoning"] = json!(completion.thinking);
        }
        let data = normalize_analysis(data);
        cancel.check("subagent before persisting history").map_err(boxed)?;

        if !is_followup {
            self.history
                .add_message(session_id, "user", ANALYSIS_PROMPT)
                .await;
        }
        if let Some(feedback) = feedback {
            self.history.add_message(session_id, "user", feedback).await;
        }
        self.history
            .add_message(session_id, "assistant", &serde_json::to_string(&data)?)
            .await;
        self.history.store_analysis(session_id, data.clone()).await;
        Ok(data)
    }

    /// Two-phase multi-file analysis.
    pub async fn analyze_multi(
        &self,
        classified_files: &[ClassifiedFile],
        session_id: &str,
        stream: Option<DeltaCallback>,
        cancel: CancelToken,
    ) -> Result<Value, BoxError> {
        cancel.check("subagent before multi-file analysis").map_err(boxed)?;

        // Phase 1: guidance extraction. Every guidance-bearing file
        // completes before the analysis call below starts.
        let mut guidance: Vec<GuidanceNote> = Vec::new();
        for file in classified_files {
            if !matches!(file.purpose, FilePurpose::Guidance | FilePurpose::Mixed) {
                continue;
            }
            cancel.check("subagent guidance extraction").map_err(boxed)?;
            let data_url = file_to_data_url(&file.abs_path)?;
            let notes = self
                .extract_guidance(&data_url, file.file_type, &cancel)
                .await;
            log::info!(
                "Guidance extraction file={} notes={}",
                file.name,
                notes.len()
            );
            guidance.extend(notes);
        }

        // Phase 2: one combined analysis call over all flowchart content.
        let mut prompt = ANALYSIS_PROMPT.to_string();
        if !guidance.is_empty() {
            prompt.push_str("\n\nGuidance extracted from the accompanying material (apply it when interpreting the diagram):\n");
            for note in &guidance {
                prompt.push_str(&format!(
                    "- {} [{} | {}]\n",
                    note.text, note.location, note.category
                ));
            }
        }
        let mut blocks = vec![ContentBlock::Text { text: prompt }];
        for file in classified_files {
            if !matches!(file.purpose, FilePurpose::Flowchart | FilePurpose::Mixed) {
                continue;
            }
            let data_url = file_to_data_url(&file.abs_path)?;
            blocks.push(match file.file_type {
                FileType::Image => ContentBlock::ImageUrl { url: data_url },
                FileType::Pdf => ContentBlock::DocumentUrl { url: data_url },
            });
        }

        let messages = vec![
            ChatMessage::system("You extract structured data from workflow images."),
            ChatMessage {
                role: crate::sketchflow::client_wrapper::Role::User,
                content: MessageContent::Blocks(blocks),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
        ];

        let opts = CallOptions::new("subagent", "analyze_multi").with_cancel(cancel.clone());
        let completion = match &stream {
            Some(on_delta) => {
                self.client
                    .complete_stream(&messages, &opts, on_delta.clone())
                    .await?
            }
            None => self.client.complete(&messages, &opts).await?,
        };
        cancel.check("subagent after multi-file LLM call").map_err(boxed)?;
        let raw = completion.text.trim().to_string();
        if raw.is_empty() {
            return Err("LLM returned an empty response.".into());
        }

        let mut data = self.parse_json(&raw, &messages, &cancel).await?;
        if !completion.thinking.is_empty() {
            data["reasoning"] = json!(completion.thinking);
        }
        data["guidance"] = serde_json::to_value(&guidance)?;
        let data = normalize_analysis(data);

        self.history
            .add_message(session_id, "user", ANALYSIS_PROMPT)
            .await;
        self.history
            .add_message(session_id, "assistant", &serde_json::to_string(&data)?)
            .await;
        self.history.store_analysis(session_id, data.clone()).await;
        Ok(data)
    }

    /// One-call guidance extraction. Non-blocking: parse failures and LLM
    /// errors yield an empty list so a bad guidance file never sinks the
    /// whole analysis.
    pub async fn extract_guidance(
        &self,
        data_url: &str,
        file_type: FileType,
        cancel: &CancelToken,
    ) -> Vec<GuidanceNote> {
        let messages = vec![
            ChatMessage::system("You extract side information from workflow documents."),
            ChatMessage {
                role: crate::sketchflow::client_wrapper::Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text {
                        text: GUIDANCE_PROMPT.to_string(),
                    },
                    file_block(data_url, file_type),
                ]),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
        ];
        let opts = CallOptions::new("subagent", "extract_guidance").with_cancel(cancel.clone());
        let raw = match self.client.complete(&messages, &opts).await {
            Ok(completion) => completion.text,
            Err(err) => {
                log::warn!("Guidance extraction failed: {}", err);
                return Vec::new();
            }
        };
        let cleaned = strip_code_fences(&raw);
        let Ok(value) = serde_json::from_str::<Value>(&cleaned) else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .map(|t| !t.is_empty())
                    .unwrap_or(false)
            })
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }

    /// Parse the model's JSON, with one strict-instruction retry.
    async fn parse_json(
        &self,
        raw: &str,
        messages: &[ChatMessage],
        cancel: &CancelToken,
    ) -> Result<Value, BoxError> {
        if let Some(parsed) = try_parse_object(raw) {
            return Ok(parsed);
        }
        log::warn!("Initial JSON parse failed, attempting recovery");

        cancel.check("subagent before JSON retry").map_err(boxed)?;
        let mut retry_messages = messages.to_vec();
        retry_messages.push(ChatMessage::user("Return ONLY valid JSON. No extra text."));
        let opts = CallOptions::new("subagent", "json_retry").with_cancel(cancel.clone());
        let retry = self.client.complete(&retry_messages, &opts).await?;
        let retry_raw = retry.text.trim().to_string();
        if retry_raw.is_empty() {
            return Err("LLM returned an empty response on retry.".into());
        }
        match try_parse_object(&retry_raw) {
            Some(parsed) => Ok(parsed),
            None => {
                log::error!("Retry JSON parse failed");
                Err(format!("Invalid JSON from LLM: {}", retry_raw).into())
            }
        }
    }
}

fn boxed(err: Cancelled) -> BoxError {
    Box::new(err)
}

fn file_block(data_url: &str, file_type: FileType) -> ContentBlock {
    match file_type {
        FileType::Image => ContentBlock::ImageUrl {
            url: data_url.to_string(),
        },
        FileType::Pdf => ContentBlock::DocumentUrl {
            url: data_url.to_string(),
        },
    }
}

/// True when feedback asks for a regenerated JSON analysis rather than a
/// conversational answer.
pub fn wants_json_output(feedback: &str) -> bool {
    let text = feedback.to_lowercase();
    const TRIGGERS: [&str; 7] = [
        "regenerate json",
        "return json",
        "full json",
        "output json",
        "produce json",
        "updated json",
        "json object",
    ];
    TRIGGERS.iter().any(|t| text.contains(t))
}

/// Strip markdown code fences around a JSON payload.
pub fn strip_code_fences(text: &str) -> String {
    let stripped = text.trim();
    if stripped.starts_with("```") && stripped.ends_with("```") {
        let inner = stripped.trim_matches('`').trim();
        if let Some(rest) = inner
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("json"))
            .map(|_| &inner[4..])
        {
            return rest.trim().to_string();
        }
        return inner.to_string();
    }
    stripped.to_string()
}

/// Tolerant object parse: code fences first, then a prefix decode starting
/// at the first `{` so trailing prose does not break recovery.
pub fn try_parse_object(text: &str) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = cleaned.find('{')?;
    let mut iter = serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
    match iter.next() {
        Some(Ok(value)) if value.is_object() => Some(value),
        _ => None,
    }
}
