//! Immutable registry of tool contracts.
//!
//! Built once at startup and passed by reference. It is the single source of
//! truth for what the planner may see and what the controller may execute.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::{Value, json};

use crate::core::types::Phase;
use crate::error::AgentError;
use crate::tools::ToolName;
use crate::tools::catalog::{self, ContractSpec, ToolCategory};

pub struct ToolContract {
    pub name: ToolName,
    pub category: ToolCategory,
    pub description: &'static str,
    pub inputs_schema: Value,
    pub outputs_schema: Value,
    pub allowed_phases: Vec<Phase>,
    pub forbidden_phases: Vec<Phase>,
    pub dependencies: Vec<&'static str>,
    pub side_effects: Vec<&'static str>,
    pub safety_rules: Vec<&'static str>,
    pub internal: bool,
    pub read_only: bool,
    validator: Validator,
}

impl fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContract")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("allowed_phases", &self.allowed_phases)
            .field("forbidden_phases", &self.forbidden_phases)
            .field("internal", &self.internal)
            .finish_non_exhaustive()
    }
}

impl ToolContract {
    fn compile(spec: ContractSpec) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&spec.inputs_schema)
            .with_context(|| format!("compile input schema for {}", spec.name))?;
        Ok(Self {
            name: spec.name,
            category: spec.category,
            description: spec.description,
            inputs_schema: spec.inputs_schema,
            outputs_schema: spec.outputs_schema,
            allowed_phases: spec.allowed_phases.to_vec(),
            forbidden_phases: spec.forbidden_phases.to_vec(),
            dependencies: spec.dependencies.to_vec(),
            side_effects: spec.side_effects.to_vec(),
            safety_rules: spec.safety_rules.to_vec(),
            internal: spec.internal,
            read_only: spec.read_only,
            validator,
        })
    }

    /// The controller may execute this tool during `phase`.
    pub fn permits(&self, phase: Phase) -> bool {
        self.allowed_phases.contains(&phase) && !self.forbidden_phases.contains(&phase)
    }

    /// The planner may see this tool during `phase`.
    pub fn visible_in(&self, phase: Phase) -> bool {
        !self.internal && self.permits(phase)
    }

    pub fn check_arguments(&self, args: &Value) -> Result<(), AgentError> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(args)
            .map(|err| err.to_string())
            .collect();
        if messages.is_empty() {
            return Ok(());
        }
        Err(AgentError::SchemaViolation(format!(
            "{} arguments: {}",
            self.name,
            messages.join("; ")
        )))
    }

    /// Contract rendering shown to the planner and printed by the CLI.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "category": self.category,
            "description": self.description,
            "inputs_schema": self.inputs_schema,
            "outputs_schema": self.outputs_schema,
            "dependencies": self.dependencies,
            "side_effects": self.side_effects,
            "safety_rules": self.safety_rules,
            "read_only": self.read_only,
        })
    }
}

#[derive(Debug)]
pub struct ToolRegistry {
    contracts: BTreeMap<ToolName, ToolContract>,
}

impl ToolRegistry {
    /// Registry with the builtin catalog.
    pub fn new() -> Result<Self> {
        Self::from_specs(catalog::builtin())
    }

    pub fn from_specs(specs: Vec<ContractSpec>) -> Result<Self> {
        let mut contracts = BTreeMap::new();
        for spec in specs {
            let contract = ToolContract::compile(spec)?;
            contracts.insert(contract.name, contract);
        }
        Ok(Self { contracts })
    }

    pub fn fetch(&self, name: &str) -> Option<&ToolContract> {
        let name: ToolName = name.parse().ok()?;
        self.contracts.get(&name)
    }

    pub fn contract(&self, name: ToolName) -> Option<&ToolContract> {
        self.contracts.get(&name)
    }

    /// Look up `name` and check `args` against its input schema.
    pub fn validate(&self, name: &str, args: &Value) -> Result<&ToolContract, AgentError> {
        let contract = self
            .fetch(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        contract.check_arguments(args)?;
        Ok(contract)
    }

    /// Contracts visible to the planner in `phase`, keyed by tool name.
    pub fn tools_for_phase(&self, phase: Phase) -> BTreeMap<&'static str, &ToolContract> {
        self.contracts
            .values()
            .filter(|contract| contract.visible_in(phase))
            .map(|contract| (contract.name.as_str(), contract))
            .collect()
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ToolContract> {
        self.contracts.values()
    }
}
