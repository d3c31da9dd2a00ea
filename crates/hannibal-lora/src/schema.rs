//! Node definition exposed to the host
//!
//! Describes the node's inputs and outputs so a host UI can render it.

use crate::block_spec::DEFAULT_BLOCKS_SPEC;
use serde::{Deserialize, Serialize};

/// Registered class name of the node
pub const NODE_CLASS: &str = "HannibalLoraLoader";

/// Name shown in the host's node menu
pub const NODE_DISPLAY_NAME: &str = "Hannibal LoRA Loader";

/// Menu category
pub const NODE_CATEGORY: &str = "loaders/hannibal";

pub const STRENGTH_DEFAULT: f64 = 1.0;
pub const STRENGTH_MIN: f64 = -10.0;
pub const STRENGTH_MAX: f64 = 10.0;
pub const STRENGTH_STEP: f64 = 0.01;

/// Full description of the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub class_name: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    /// Entry point the host invokes
    pub function: String,
    pub output_node: bool,
    pub inputs: Vec<InputSpec>,
    pub return_types: Vec<String>,
    pub return_names: Vec<String>,
    pub version: String,
}

/// A single node input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub required: bool,
    #[serde(flatten)]
    pub kind: InputKind,
}

/// Widget type of an input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputKind {
    /// Model handle from an upstream node
    Model,
    /// Choice among fixed options
    Combo { options: Vec<String> },
    Float {
        default: f64,
        min: f64,
        max: f64,
        step: f64,
        display: String,
    },
    String { default: String, multiline: bool },
}

impl NodeDefinition {
    /// Definition of the LoRA loader node, offering `loras` in its dropdown
    pub fn lora_loader(loras: Vec<String>) -> Self {
        Self {
            class_name: NODE_CLASS.to_string(),
            display_name: NODE_DISPLAY_NAME.to_string(),
            category: NODE_CATEGORY.to_string(),
            description: format!(
                "Loads a LoRA restricted to selected transformer blocks (e.g. '{DEFAULT_BLOCKS_SPEC}')."
            ),
            function: "load_lora".to_string(),
            output_node: false,
            inputs: vec![
                InputSpec::required("model", InputKind::Model),
                InputSpec::required("lora_name", InputKind::Combo { options: loras }),
                InputSpec::required(
                    "strength",
                    InputKind::Float {
                        default: STRENGTH_DEFAULT,
                        min: STRENGTH_MIN,
                        max: STRENGTH_MAX,
                        step: STRENGTH_STEP,
                        display: "number".to_string(),
                    },
                ),
                InputSpec::required(
                    "blocks_spec",
                    InputKind::String {
                        default: DEFAULT_BLOCKS_SPEC.to_string(),
                        multiline: false,
                    },
                ),
            ],
            return_types: vec!["MODEL".to_string()],
            return_names: vec!["model".to_string()],
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Look up an input by name
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl InputSpec {
    fn required(name: &str, kind: InputKind) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            kind,
        }
    }
}
