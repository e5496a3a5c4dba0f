//! Analysis payloads produced by the image-analysis subagent.
//!
//! A [`WorkflowAnalysis`] bundles the semantic extraction of one or more
//! flowchart images: the unified variable list, declared outputs, the raw
//! node tree, open doubts, the model's accumulated reasoning, and guidance
//! notes pulled from non-flowchart portions of the uploads.
//!
//! The tree itself is carried as raw JSON (the canvas owns its rendering),
//! but [`normalize_analysis`] and [`flowchart_from_tree`] traverse it to
//! keep variable references consistent and to project it onto nodes/edges.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::sketchflow::workflow::{generate_variable_id, slugify, VariableSource};

/// A guidance note extracted from sticky notes, legends, or margin text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceNote {
    pub text: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub category: String,
}

/// Structured result of a subagent analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    #[serde(default)]
    pub variables: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub tree: Value,
    #[serde(default)]
    pub doubts: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub guidance: Vec<GuidanceNote>,
}

impl WorkflowAnalysis {
    /// The "please upload an image" analysis returned when an analyze
    /// request arrives without any uploaded file. Not an error: it keeps
    /// the LLM loop productive.
    pub fn missing_image() -> Self {
        Self {
            doubts: vec!["User hasn't uploaded image, ask them to upload image.".to_string()],
            tree: Value::Object(Map::new()),
            ..Self::default()
        }
    }
}

/// Normalize a raw analysis object in place:
///
/// - deduplicate variables by `slug(name):type`, recording a doubt for
///   each duplicate removed;
/// - recompute deterministic variable ids;
/// - restrict tree `input_ids` to ids that survived normalization.
pub fn normalize_analysis(mut analysis: Value) -> Value {
    let Some(obj) = analysis.as_object_mut() else {
        return analysis;
    };

    let raw_variables = match obj.get("variables").and_then(Value::as_array) {
        Some(list) => list.clone(),
        None => Vec::new(),
    };

    let mut normalized: Vec<Value> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();

    for raw in raw_variables {
        let Some(var) = raw.as_object() else { continue };
        let name = var
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let var_type = var
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if name.is_empty() || var_type.is_empty() {
            continue;
        }
        let key = format!("{}:{}", slugify(&name), var_type);
        if !seen.insert(key) {
            duplicates.push(name);
            continue;
        }
        let mut item = var.clone();
        item.insert("name".into(), json!(name));
        item.insert("type".into(), json!(var_type));
        item.insert(
            "id".into(),
            json!(generate_variable_id(&name, &var_type, VariableSource::Input)),
        );
        if !item.contains_key("source") {
            item.insert("source".into(), json!("input"));
        }
        normalized.push(Value::Object(item));
    }

    let valid_ids: HashSet<String> = normalized
        .iter()
        .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();

    obj.insert("variables".into(), Value::Array(normalized));

    if !duplicates.is_empty() {
        let mut doubts = obj
            .get("doubts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for name in duplicates {
            doubts.push(json!(format!("Duplicate variable removed: {}", name)));
        }
        obj.insert("doubts".into(), Value::Array(doubts));
    }

    if let Some(tree) = obj.get_mut("tree") {
        if let Some(start) = tree.get_mut("start") {
            restrict_input_ids(start, &valid_ids);
        }
    }

    analysis
}

fn restrict_input_ids(node: &mut Value, valid_ids: &HashSet<String>) {
    let Some(obj) = node.as_object_mut() else { return };
    if let Some(input_ids) = obj.get("input_ids").cloned() {
        let filtered: Vec<Value> = match input_ids {
            Value::String(single) => {
                if valid_ids.contains(&single) {
                    vec![json!(single)]
                } else {
                    vec![]
                }
            }
            Value::Array(items) => items
                .into_iter()
                .filter(|item| {
                    item.as_str().map(|s| valid_ids.contains(s)).unwrap_or(false)
                })
                .collect(),
            _ => vec![],
        };
        obj.insert("input_ids".into(), Value::Array(filtered));
    }
    if let Some(children) = obj.get_mut("children").and_then(Value::as_array_mut) {
        for child in children {
            restrict_input_ids(child, valid_ids);
        }
    }
}

/// Project an analysis tree onto canvas `{nodes, edges}`.
///
/// Tree node types map to canvas types (`action` → `process`, `output` →
/// `end`); positions are zeroed and left to the front-end auto-layout.
pub fn flowchart_from_tree(tree: &Value) -> Value {
    let empty = json!({"nodes": [], "edges": []});
    let Some(start) = tree.get("start").and_then(Value::as_object) else {
        return empty;
    };

    let mut nodes: Vec<Value> = Vec::new();
    let mut edges: Vec<Value> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack: Vec<Map<String, Value>> = vec![start.clone()];

    while let Some(node) = stack.pop() {
        let Some(node_id) = node.get("id").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        if !seen.insert(node_id.clone()) {
            continue;
        }
        let raw_type = node
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("process");
        let node_type = match raw_type {
            "action" => "process",
            "output" => "end",
            other => other,
        };
        let label = node
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or(&node_id);
        nodes.push(json!({
            "id": node_id,
            "type": node_type,
            "label": label,
            "x": 0,
            "y": 0,
        }));

        if let Some(children) = node.get("children").and_then(Value::as_array) {
            for child in children {
                let Some(child_obj) = child.as_object() else { continue };
                let Some(child_id) = child_obj.get("id").and_then(Value::as_str) else {
                    continue;
                };
                edges.push(json!({
                    "id": format!("{}->{}", node_id, child_id),
                    "from": node_id,
                    "to": child_id,
                    "label": child_obj.get("edge_label").and_then(Value::as_str).unwrap_or(""),
                }));
                stack.push(child_obj.clone());
            }
        }
    }

    json!({"nodes": nodes, "edges": edges})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dedups_and_rewrites_ids() {
        let analysis = json!({
            "variables": [
                {"name": "BMI", "type": "number"},
                {"name": "bmi ", "type": "number"},
                {"name": "Age", "type": "int"},
            ],
            "doubts": [],
            "tree": {"start": {"id": "start", "input_ids": ["var_bmi_number", "var_ghost_int"], "children": []}},
        });
        let normalized = normalize_analysis(analysis);
        let variables = normalized["variables"].as_array().unwrap();
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0]["id"], "var_bmi_number");
        assert_eq!(variables[1]["id"], "var_age_int");
        let doubts = normalized["doubts"].as_array().unwrap();
        assert!(doubts
            .iter()
            .any(|d| d.as_str().unwrap().contains("Duplicate variable removed")));
        let input_ids = normalized["tree"]["start"]["input_ids"].as_array().unwrap();
        assert_eq!(input_ids.len(), 1);
        assert_eq!(input_ids[0], "var_bmi_number");
    }

    #[test]
    fn flowchart_projection_maps_types_and_edge_labels() {
        let tree = json!({
            "start": {
                "id": "start", "type": "start", "label": "Start",
                "children": [{
                    "id": "n1", "type": "decision", "label": "BMI >= 30?", "edge_label": "",
                    "children": [
                        {"id": "n2", "type": "output", "label": "Obese", "edge_label": "Yes", "children": []},
                        {"id": "n3", "type": "action", "label": "Recheck", "edge_label": "No", "children": []}
                    ]
                }]
            }
        });
        let flowchart = flowchart_from_tree(&tree);
        let nodes = flowchart["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 4);
        let n2 = nodes.iter().find(|n| n["id"] == "n2").unwrap();
        assert_eq!(n2["type"], "end");
        let n3 = nodes.iter().find(|n| n["id"] == "n3").unwrap();
        assert_eq!(n3["type"], "process");
        let edges = flowchart["edges"].as_array().unwrap();
        assert!(edges.iter().any(|e| e["id"] == "n1->n2" && e["label"] == "Yes"));
    }

    #[test]
    fn missing_image_analysis_has_single_doubt() {
        let analysis = WorkflowAnalysis::missing_image();
        assert_eq!(analysis.doubts.len(), 1);
        assert!(analysis.doubts[0].contains("upload"));
    }
}
