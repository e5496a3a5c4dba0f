//! Prompt composition for the orchestrator.

use crate::sketchflow::analysis::GuidanceNote;
use crate::sketchflow::session::{FilePurpose, UploadedFile};

/// Inputs that shape one turn's system prompt.
#[derive(Debug, Default)]
pub struct SystemPromptInputs<'a> {
    pub last_session_id: Option<&'a str>,
    /// Files were attached to this turn even if the upload list has not
    /// been registered yet.
    pub has_files: bool,
    pub uploaded_files: &'a [UploadedFile],
    pub allow_tools: bool,
    /// Accumulated subagent reasoning; appended as an "Analysis Context"
    /// section only when non-empty.
    pub reasoning: &'a str,
    pub guidance: &'a [GuidanceNote],
}

/// Compose the orchestrator system prompt for one turn.
pub fn build_system_prompt(inputs: &SystemPromptInputs<'_>) -> String {
    let mut system = String::from(
        "You are the orchestrator for a system that ingests flowchart images and converts \
         them into structured, executable workflows. Mission: help users understand, refine, \
         and evolve their flowcharts; be proactive and helpful; only perform analysis or \
         modifications through tools when explicitly requested or confirmed. Core rules: do \
         not edit workflow JSON directly; all changes go through tool calls. Prefer \
         clarifying questions before any modification. Tool use policy: tools are required \
         for analyzing uploaded files or applying workflow changes; plain text is fine for \
         discussion and guidance. After tool results are provided, respond in plain text \
         only; do not request additional tool calls unless required. Do not show raw tool \
         JSON to the user; summarize ONLY variables, outputs, and doubts from the tool \
         result. Decision flow: if the user explicitly asks to analyze a file, apply \
         changes, add/update/remove nodes, connect nodes, or generate structured data, call \
         the matching tool. If ambiguous, ask clarifying questions first. For continued \
         analysis sessions, reuse the session_id and send feedback instead of re-running \
         image analysis. Interaction style: concise, friendly, solution-oriented. Error \
         handling: if a tool fails or returns incomplete data, explain what is missing, \
         propose remedies, and ask how to proceed.",
    );

    if let Some(session_id) = inputs.last_session_id {
        system.push_str(&format!(
            " Current analyze_workflow session_id: {}.",
            session_id
        ));
    }

    if !inputs.uploaded_files.is_empty() {
        system.push_str(&format!(
            " The user has uploaded {} file(s); analyze_workflow will use them.",
            inputs.uploaded_files.len()
        ));
        let unclassified = inputs
            .uploaded_files
            .iter()
            .filter(|f| f.purpose == FilePurpose::Unclassified)
            .count();
        if unclassified > 1 {
            system.push_str(
                " Multiple uploaded files are unclassified. Before analysis, call \
                 analyze_workflow with a 'files' array classifying each file's purpose as \
                 'flowchart', 'guidance', or 'mixed'.",
            );
        }
    } else if inputs.has_files {
        system.push_str(
            " The user has uploaded a file; analyze_workflow will use the latest upload.",
        );
    }

    if !inputs.guidance.is_empty() {
        system.push_str("\n\nGuidance notes extracted from the uploaded material:");
        for note in inputs.guidance {
            system.push_str(&format!(
                "\n- {} [{} | {}]",
                note.text, note.location, note.category
            ));
        }
    }

    if !inputs.reasoning.is_empty() {
        system.push_str("\n\nAnalysis Context (the image analyst's reasoning so far):\n");
        system.push_str(inputs.reasoning);
    }

    if !inputs.allow_tools {
        system.push_str(
            " Tools are disabled for this response. Do NOT call tools; respond in plain \
             text only.",
        );
    }

    system
}
