//! Static registry of ExprPredictor tools.
//!
//! The registry is a fixed, compiled-in table built once at startup and
//! shared read-only for the life of the process. Concurrent lookups need
//! no locking because nothing mutates the table after construction.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::BridgeConfig;
use crate::invoker::EngineCommand;
use crate::schema::{FieldSpec, FieldType, InputSchema};

/// Expected shape of a tool's result document.
///
/// Extraction only accepts a JSON fragment that carries every listed field;
/// an empty list accepts any JSON object.
#[derive(Debug, Clone, Copy)]
pub struct OutputShape {
    pub required: &'static [&'static str],
}

impl OutputShape {
    pub const fn requiring(required: &'static [&'static str]) -> Self {
        Self { required }
    }

    /// Check that a parsed fragment satisfies this shape.
    pub fn matches(&self, value: &Value) -> bool {
        match value.as_object() {
            Some(map) => self.required.iter().all(|field| map.contains_key(*field)),
            None => false,
        }
    }
}

/// Template for turning a validated argument set into an engine command.
///
/// The argument vector is always passed literally to the process — never
/// through a shell — and the validated argument mapping is serialized to
/// the engine's stdin.
#[derive(Debug, Clone, Copy)]
pub struct InvocationTemplate {
    /// Fixed arguments appended after `--tool <name>`.
    pub extra_args: &'static [&'static str],
    /// Serialize the argument mapping as JSON on the engine's stdin.
    pub arguments_on_stdin: bool,
}

impl InvocationTemplate {
    pub const DEFAULT: Self = Self {
        extra_args: &[],
        arguments_on_stdin: true,
    };

    /// Resolve this template into a concrete command for one call.
    pub fn resolve(
        &self,
        config: &BridgeConfig,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> EngineCommand {
        let mut args = vec!["--tool".to_string(), tool_name.to_string()];
        args.extend(self.extra_args.iter().map(|a| a.to_string()));

        let stdin = if self.arguments_on_stdin {
            Some(Value::Object(arguments.clone()).to_string())
        } else {
            None
        };

        EngineCommand {
            program: config.resolved_engine_path(),
            args,
            working_dir: config.working_dir.clone(),
            stdin,
        }
    }
}

/// A named operation backed by the external ExprPredictor engine.
#[derive(Debug, Clone, Copy)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub summary: &'static str,
    pub input: &'static [FieldSpec],
    pub output: OutputShape,
    pub invocation: InvocationTemplate,
}

impl ToolDefinition {
    /// Serialized schema document for `getSchema`.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name,
            description: self.summary,
            input_schema: InputSchema::from_fields(self.input),
        }
    }

    /// Short listing entry for `listTools`.
    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name,
            description: self.summary,
        }
    }
}

/// Listing entry returned by `listTools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: &'static str,
    pub description: &'static str,
}

/// Full schema document returned by `getSchema`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

const OBJ_FUNC_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("maxBindingWts", FieldType::NumberSequence).non_empty(),
    FieldSpec::required("txpEffects", FieldType::NumberSequence).non_empty(),
    FieldSpec::required("repEffects", FieldType::NumberSequence).non_empty(),
    FieldSpec::required("basalTxp", FieldType::Number),
];

const GET_FREE_PARS_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("parameters", FieldType::Object),
    FieldSpec::required("coopMat", FieldType::Object),
    FieldSpec::required("actIndicators", FieldType::Sequence),
    FieldSpec::required("repIndicators", FieldType::Sequence),
];

const TRAIN_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("initialParameters", FieldType::Object),
    FieldSpec::required("trainingData", FieldType::Object),
    FieldSpec::optional("options", FieldType::Object),
];

const PREDICT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("parameters", FieldType::Object),
    FieldSpec::required("sequences", FieldType::Sequence).non_empty(),
    FieldSpec::optional("conditions", FieldType::Sequence),
];

const PAR_LOAD_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("filename", FieldType::String),
    FieldSpec::required("coopMat", FieldType::Object),
    FieldSpec::required("repIndicators", FieldType::Sequence),
];

const PREDICT_EXPR_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("sites", FieldType::Sequence).non_empty(),
    FieldSpec::required("length", FieldType::Integer),
    FieldSpec::required("factorConcentrations", FieldType::NumberSequence).non_empty(),
];

/// The compiled-in tool table, in listing order.
const BUILTIN_TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "expr_predictor_obj_func",
        summary: "Compute objective function value for ExprPredictor with given parameters",
        input: OBJ_FUNC_FIELDS,
        output: OutputShape::requiring(&["objFuncValue"]),
        invocation: InvocationTemplate::DEFAULT,
    },
    ToolDefinition {
        name: "expr_par_get_free_pars",
        summary: "Extract free parameters from ExprPar object",
        input: GET_FREE_PARS_FIELDS,
        output: OutputShape::requiring(&["freePars"]),
        invocation: InvocationTemplate::DEFAULT,
    },
    ToolDefinition {
        name: "expr_predictor_train",
        summary: "Train ExprPredictor model with given data",
        input: TRAIN_FIELDS,
        output: OutputShape::requiring(&["trainedParameters"]),
        invocation: InvocationTemplate::DEFAULT,
    },
    ToolDefinition {
        name: "expr_predictor_predict",
        summary: "Predict expression values using trained ExprPredictor",
        input: PREDICT_FIELDS,
        output: OutputShape::requiring(&["predictions"]),
        invocation: InvocationTemplate::DEFAULT,
    },
    ToolDefinition {
        name: "expr_par_load",
        summary: "Load ExprPar parameters from file",
        input: PAR_LOAD_FIELDS,
        output: OutputShape::requiring(&["parameters"]),
        invocation: InvocationTemplate::DEFAULT,
    },
    ToolDefinition {
        name: "expr_func_predict_expr",
        summary: "Predict expression using ExprFunc",
        input: PREDICT_EXPR_FIELDS,
        output: OutputShape::requiring(&["expression"]),
        invocation: InvocationTemplate::DEFAULT,
    },
];

/// Registry of all available tools.
///
/// Built once at startup, immutable thereafter.
pub struct ToolRegistry {
    tools: &'static [ToolDefinition],
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Construct the registry from the compiled-in tool table.
    pub fn builtin() -> Self {
        Self::from_table(BUILTIN_TOOLS)
    }

    fn from_table(tools: &'static [ToolDefinition]) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name, i))
            .collect();
        Self { tools, index }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// List all tools in registration order.
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools.iter().map(ToolDefinition::summary).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
