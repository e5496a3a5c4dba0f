//! Python code generation.
//!
//! Compiles a validated workflow into an executable Python function: typed
//! parameters for every input variable, `if`/`else` chains for decisions,
//! and `return` statements for end nodes. The generated function's
//! parameter list mirrors the input-variable list element-wise, which is
//! what the execution interpreter (an external collaborator) relies on.

use serde_json::Value;
use std::collections::HashMap;

use super::{slugify, Condition, Edge, Node, NodeType, OutputSpec, Variable, VariableSource};

/// Codegen options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub include_docstring: bool,
    pub include_main: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            include_docstring: true,
            include_main: false,
        }
    }
}

/// Generated source plus non-fatal findings.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub code: String,
    pub warnings: Vec<String>,
}

/// Map an internal variable type to a Python annotation.
fn py_type(var_type: &str) -> &'static str {
    match var_type {
        "int" => "int",
        "float" | "number" => "float",
        "bool" => "bool",
        _ => "str",
    }
}

/// Render a JSON value as a Python literal.
fn py_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{:?}", s),
        other => format!("{:?}", other.to_string()),
    }
}

/// Render a decision condition as a Python expression.
fn condition_expr(
    condition: &Condition,
    variables: &[Variable],
) -> Result<String, String> {
    let variable = variables
        .iter()
        .find(|v| v.id == condition.input_id)
        .ok_or_else(|| format!("Condition references unknown variable '{}'", condition.input_id))?;
    let name = slugify(&variable.name);
    let value = condition.value.as_ref().map(py_literal);
    let value2 = condition.value2.as_ref().map(py_literal);
    let require = |v: &Option<String>| -> Result<String, String> {
        v.clone()
            .ok_or_else(|| format!("Comparator '{}' requires a value", condition.comparator))
    };
    Ok(match condition.comparator.as_str() {
        "eq" | "str_eq" | "enum_eq" | "date_eq" => format!("{} == {}", name, require(&value)?),
        "neq" | "str_neq" | "enum_neq" => format!("{} != {}", name, require(&value)?),
        "lt" | "date_before" => format!("{} < {}", name, require(&value)?),
        "lte" => format!("{} <= {}", name, require(&value)?),
        "gt" | "date_after" => format!("{} > {}", name, require(&value)?),
        "gte" => format!("{} >= {}", name, require(&value)?),
        "within_range" | "date_between" => format!(
            "{} <= {} <= {}",
            require(&value)?,
            name,
            require(&value2)?
        ),
        "is_true" => name,
        "is_false" => format!("not {}", name),
        "str_contains" => format!("{} in {}", require(&value)?, name),
        "str_starts_with" => format!("{}.startswith({})", name, require(&value)?),
        "str_ends_with" => format!("{}.endswith({})", name, require(&value)?),
        other => return Err(format!("Unknown comparator '{}'", other)),
    })
}

/// Turn an output template into an f-string, rewriting `{Name}`
/// placeholders to the slugified parameter names.
fn template_to_fstring(template: &str, variables: &[Variable]) -> String {
    let mut by_lower: HashMap<String, String> = HashMap::new();
    for variable in variables {
        by_lower.insert(variable.name.trim().to_lowercase(), slugify(&variable.name));
    }
    let mut rewritten = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rewritten.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                let slug = by_lower
                    .get(&name.trim().to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| slugify(name));
                rewritten.push('{');
                rewritten.push_str(&slug);
                rewritten.push('}');
                rest = &after[close + 1..];
            }
            None => {
                rewritten.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    rewritten.push_str(rest);
    format!("f{:?}", rewritten)
}

struct Codegen<'a> {
    variables: &'a [Variable],
    node_by_id: HashMap<&'a str, &'a Node>,
    outgoing: HashMap<&'a str, Vec<&'a Edge>>,
    lines: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> Codegen<'a> {
    fn push(&mut self, indent: usize, line: impl Into<String>) {
        self.lines.push(format!("{}{}", "    ".repeat(indent), line.into()));
    }

    fn successor(&self, node_id: &str, label: Option<&str>) -> Option<&'a Node> {
        let edges = self.outgoing.get(node_id)?;
        let edge = match label {
            Some(label) => edges.iter().find(|e| e.label.eq_ignore_ascii_case(label))?,
            None => edges.first()?,
        };
        self.node_by_id.get(edge.to.as_str()).copied()
    }

    fn emit_node(&mut self, node: &'a Node, indent: usize) -> Result<(), String> {
        match node.node_type {
            NodeType::Start => match self.successor(&node.id, None) {
                Some(next) => self.emit_node(next, indent),
                None => {
                    self.push(indent, "return None");
                    self.warnings
                        .push("Start node has no outgoing edge".to_string());
                    Ok(())
                }
            },
            NodeType::Process => {
                self.push(indent, format!("# {}", node.label));
                match self.successor(&node.id, None) {
                    Some(next) => self.emit_node(next, indent),
                    None => {
                        self.warnings.push(format!(
                            "Process node '{}' has no outgoing edge",
                            node.label
                        ));
                        self.push(indent, "return None");
                        Ok(())
                    }
                }
            }
            NodeType::Subprocess => {
                let output_variable = node
                    .output_variable
                    .as_deref()
                    .map(slugify)
                    .unwrap_or_else(|| "subflow_result".to_string());
                let subworkflow = node.subworkflow_id.as_deref().unwrap_or("unknown");
                let mapping = node
                    .input_mapping
                    .as_ref()
                    .map(|m| {
                        m.iter()
                            .map(|(parent, child)| {
                                format!("{:?}: {}", child, slugify(parent))
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                self.push(indent, format!("# subflow: {}", node.label));
                self.push(
                    indent,
                    format!(
                        "{} = run_subworkflow({:?}, {{{}}})",
                        output_variable, subworkflow, mapping
                    ),
                );
                self.warnings.push(format!(
                    "Subprocess node '{}' compiles to a run_subworkflow() call; provide the runtime binding",
                    node.label
                ));
                match self.successor(&node.id, None) {
                    Some(next) => self.emit_node(next, indent),
                    None => {
                        self.push(indent, format!("return {}", output_variable));
                        Ok(())
                    }
                }
            }
            NodeType::Decision => {
                let condition = node
                    .condition
                    .as_ref()
                    .ok_or_else(|| format!("Decision node '{}' has no condition", node.label))?;
                let expr = condition_expr(condition, self.variables)?;
                let true_branch = self
                    .successor(&node.id, Some("true"))
                    .ok_or_else(|| format!("Decision node '{}' has no 'true' branch", node.label))?;
                let false_branch = self
                    .successor(&node.id, Some("false"))
                    .ok_or_else(|| format!("Decision node '{}' has no 'false' branch", node.label))?;
                self.push(indent, format!("if {}:", expr));
                self.emit_node(true_branch, indent + 1)?;
                self.push(indent, "else:");
                self.emit_node(false_branch, indent + 1)
            }
            NodeType::End => {
                let expr = if let Some(value) = &node.output_value {
                    py_literal(value)
                } else if node
                    .output_template
                    .as_deref()
                    .map(|t| !t.is_empty())
                    .unwrap_or(false)
                {
                    template_to_fstring(node.output_template.as_deref().unwrap(), self.variables)
                } else {
                    format!("{:?}", node.label)
                };
                self.push(indent, format!("return {}", expr));
                Ok(())
            }
        }
    }
}

/// Compile the workflow into Python source.
#[allow(clippy::too_many_arguments)]
pub fn compile_workflow_to_python(
    nodes: &[Node],
    edges: &[Edge],
    variables: &[Variable],
    outputs: &[OutputSpec],
    workflow_name: &str,
    output_type: &str,
    options: &CompileOptions,
) -> Result<CompileResult, String> {
    let start = nodes
        .iter()
        .find(|n| n.node_type == NodeType::Start)
        .ok_or("Workflow has no start node")?;

    let inputs: Vec<&Variable> = variables
        .iter()
        .filter(|v| v.source == VariableSource::Input)
        .collect();
    let params: Vec<String> = inputs
        .iter()
        .map(|v| format!("{}: {}", slugify(&v.name), py_type(&v.var_type)))
        .collect();

    let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in edges {
        outgoing.entry(edge.from.as_str()).or_default().push(edge);
    }

    let function_name = {
        let slug = slugify(workflow_name);
        if slug.is_empty() {
            "workflow".to_string()
        } else {
            slug
        }
    };

    let mut generator = Codegen {
        variables,
        node_by_id: nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
        outgoing,
        lines: Vec::new(),
        warnings: Vec::new(),
    };

    generator.push(
        0,
        format!(
            "def {}({}) -> {}:",
            function_name,
            params.join(", "),
            py_type(output_type)
        ),
    );
    if options.include_docstring {
        generator.push(1, "\"\"\"Generated from the workflow canvas.");
        if !inputs.is_empty() {
            generator.push(1, "");
            generator.push(1, "Args:");
            for variable in &inputs {
                let description = variable.description.as_deref().unwrap_or("");
                generator.push(
                    2,
                    format!("{}: {}", slugify(&variable.name), description).trim_end().to_string(),
                );
            }
        }
        if !outputs.is_empty() {
            generator.push(1, "");
            generator.push(1, "Returns:");
            for output in outputs {
                generator.push(2, format!("{} ({})", output.name, output.output_type));
            }
        }
        generator.push(1, "\"\"\"");
    }
    generator.emit_node(start, 1)?;

    if options.include_main {
        let example_args: Vec<String> = inputs
            .iter()
            .map(|v| match v.var_type.as_str() {
                "int" => "0".to_string(),
                "float" | "number" => "0.0".to_string(),
                "bool" => "False".to_string(),
                _ => "\"\"".to_string(),
            })
            .collect();
        generator.push(0, "");
        generator.push(0, "");
        generator.push(0, "if __name__ == \"__main__\":");
        generator.push(
            1,
            format!("print({}({}))", function_name, example_args.join(", ")),
        );
    }

    Ok(CompileResult {
        code: generator.lines.join("\n"),
        warnings: generator.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variable(name: &str, var_type: &str) -> Variable {
        Variable {
            id: super::super::generate_variable_id(name, var_type, VariableSource::Input),
            name: name.into(),
            var_type: var_type.into(),
            source: VariableSource::Input,
            description: None,
            range: None,
            enum_values: None,
        }
    }

    fn bmi_workflow() -> (Vec<Node>, Vec<Edge>, Vec<Variable>) {
        let variables = vec![variable("BMI", "float")];
        let mut decision = Node::new("d1", NodeType::Decision, "BMI >= 30?");
        decision.condition = Some(Condition {
            input_id: variables[0].id.clone(),
            comparator: "gte".into(),
            value: Some(json!(30)),
            value2: None,
        });
        let mut obese = Node::new("e1", NodeType::End, "Obese");
        obese.output_template = Some("Obese".into());
        let mut healthy = Node::new("e2", NodeType::End, "Healthy");
        healthy.output_template = Some("".into());
        let nodes = vec![
            Node::new("s1", NodeType::Start, "Start"),
            decision,
            obese,
            healthy,
        ];
        let edges = vec![
            Edge::new("s1", "d1", ""),
            Edge::new("d1", "e1", "true"),
            Edge::new("d1", "e2", "false"),
        ];
        (nodes, edges, variables)
    }

    #[test]
    fn signature_lists_input_variables_with_python_types() {
        let (nodes, edges, variables) = bmi_workflow();
        let result = compile_workflow_to_python(
            &nodes,
            &edges,
            &variables,
            &[],
            "BMI",
            "string",
            &CompileOptions::default(),
        )
        .unwrap();
        assert!(result.code.starts_with("def bmi(bmi: float) -> str:"));
        assert!(result.code.contains("if bmi >= 30:"));
        assert!(result.code.contains("return f\"Obese\""));
        assert!(result.code.contains("return \"Healthy\""));
    }

    #[test]
    fn within_range_renders_chained_comparison() {
        let variables = vec![variable("Age", "int")];
        let condition = Condition {
            input_id: variables[0].id.clone(),
            comparator: "within_range".into(),
            value: Some(json!(18)),
            value2: Some(json!(65)),
        };
        let expr = condition_expr(&condition, &variables).unwrap();
        assert_eq!(expr, "18 <= age <= 65");
    }

    #[test]
    fn template_placeholders_map_to_slugs() {
        let variables = vec![variable("Patient Age", "int")];
        let rendered = template_to_fstring("Age is {Patient Age}", &variables);
        assert_eq!(rendered, "f\"Age is {patient_age}\"");
    }

    #[test]
    fn missing_branch_is_an_error() {
        let (nodes, mut edges, variables) = bmi_workflow();
        edges.retain(|e| e.label != "false");
        let err = compile_workflow_to_python(
            &nodes,
            &edges,
            &variables,
            &[],
            "BMI",
            "string",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert!(err.contains("no 'false' branch"));
    }

    #[test]
    fn include_main_appends_example_invocation() {
        let (nodes, edges, variables) = bmi_workflow();
        let result = compile_workflow_to_python(
            &nodes,
            &edges,
            &variables,
            &[],
            "BMI",
            "string",
            &CompileOptions {
                include_docstring: false,
                include_main: true,
            },
        )
        .unwrap();
        assert!(result.code.contains("if __name__ == \"__main__\":"));
        assert!(result.code.contains("print(bmi(0.0))"));
    }
}
