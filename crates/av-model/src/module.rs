use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModuleDefinitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleClass {
    Plausibility,
    Scanner,
    Exploit,
    ParamScanner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    Standalone,
    Rpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    Run,
    Check,
}

/// Where `ModulesForVuln`/`ModuleDescriptor` definitions were loaded from, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DescriptorSource {
    pub path: String,
}

/// The dynamically-typed `argument` field of a `ParamValueNode`: a literal string, an
/// integer, or an embedded module reference (only meaningful for `SCANNER` nodes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamArgument {
    Int(i64),
    ModuleRef(Box<ModuleRef>),
    Text(String),
}

impl ParamArgument {
    pub fn as_text(&self) -> String {
        match self {
            ParamArgument::Text(s) => s.clone(),
            ParamArgument::Int(i) => i.to_string(),
            ParamArgument::ModuleRef(m) => m.name.clone(),
        }
    }
}

/// A node in the recursive parameter-value tree. Strategy nodes (`EXTRACT`/`ASSEMBLE`/`EXISTS`)
/// combine nested `input`; source nodes (`EVENT_DATA`/`ARF_ARG`/`RANDOM`/`SCANNER`) are leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValueNode {
    pub method: ParamMethod,
    pub argument: ParamArgument,
    pub name: Option<String>,
    pub input: Option<ParamInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamMethod {
    Extract,
    Assemble,
    Exists,
    EventData,
    ArfArg,
    Random,
    Scanner,
}

impl ParamMethod {
    pub fn is_strategy(&self) -> bool {
        matches!(
            self,
            ParamMethod::Extract | ParamMethod::Assemble | ParamMethod::Exists
        )
    }
}

/// Strategy `input` may be a single node (`EXTRACT`) or a list (`ASSEMBLE`/`EXISTS`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamInput {
    Single(Box<ParamValueNode>),
    Many(Vec<ParamValueNode>),
}

impl ParamInput {
    pub fn as_slice(&self) -> Vec<&ParamValueNode> {
        match self {
            ParamInput::Single(n) => vec![n.as_ref()],
            ParamInput::Many(ns) => ns.iter().collect(),
        }
    }
}

impl ParamValueNode {
    /// Validates the "source nodes carry no input, strategy nodes must" invariant from §3.
    pub fn validate(&self) -> Result<(), ModuleDefinitionError> {
        let ok = if self.method.is_strategy() {
            self.input.is_some()
        } else {
            self.input.is_none()
        };
        if ok {
            Ok(())
        } else {
            Err(ModuleDefinitionError::MalformedInputArity(format!(
                "{:?}",
                self.method
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "defaultValue")]
    pub default_value: Option<String>,
    pub value: Option<ParamValueNode>,
    #[serde(default = "default_true")]
    pub configurable: bool,
}

fn default_true() -> bool {
    true
}

impl Param {
    pub fn validate(&self) -> Result<(), ModuleDefinitionError> {
        if self.value.is_none() && self.default_value.is_none() {
            return Err(ModuleDefinitionError::ParamMissingValue(self.name.clone()));
        }
        if let Some(v) = &self.value {
            v.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuccessStrategy {
    Output,
    Session,
    ExitCode,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub strategy: SuccessStrategy,
    /// The verdict this criterion carries when its strategy matches — declared by the
    /// module author, not implied by the strategy (a module may define e.g. an `OUTPUT`
    /// criterion whose match means "not vulnerable", `conclusion: false`).
    pub conclusion: bool,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStrategy {
    Extract,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCriterion {
    pub strategy: ResultStrategy,
    /// `EXTRACT`: the regex. `SUCCESS`: `[yesValue, noValue?]`.
    pub argument: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub class: ModuleClass,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub path: Option<String>,
    #[serde(rename = "execMode")]
    pub exec_mode: Option<ExecMode>,
    #[serde(default)]
    pub parameters: Vec<Param>,
    #[serde(rename = "payloadParameters", default)]
    pub payload_parameters: Vec<Param>,
    #[serde(default)]
    pub success: Vec<SuccessCriterion>,
    pub result: Option<ResultCriterion>,
    #[serde(default)]
    pub source: DescriptorSource,
}

impl ModuleDescriptor {
    /// Runs the §3 `ModuleDescriptor` invariants; called once at repository-load time.
    pub fn validate(&self) -> Result<(), ModuleDefinitionError> {
        if self.module_type == ModuleType::Rpc && self.path.is_none() {
            return Err(ModuleDefinitionError::RpcMissingPath(self.name.clone()));
        }
        if self.class == ModuleClass::Exploit
            && self.module_type == ModuleType::Rpc
            && self.exec_mode == Some(ExecMode::Check)
        {
            return Err(ModuleDefinitionError::ExploitRpcCheckRejected(
                self.name.clone(),
            ));
        }
        if self.module_type == ModuleType::Standalone
            && self
                .success
                .iter()
                .any(|c| c.strategy == SuccessStrategy::Session)
        {
            return Err(ModuleDefinitionError::StandaloneSessionSuccess(
                self.name.clone(),
            ));
        }
        for p in &self.parameters {
            p.validate()?;
        }
        for p in &self.payload_parameters {
            p.validate()?;
        }
        Ok(())
    }

    /// `execMode` is advisory-only for STANDALONE modules (§3); this resolves the
    /// effective mode without mutating the descriptor.
    pub fn effective_exec_mode(&self) -> Option<ExecMode> {
        if self.module_type == ModuleType::Standalone {
            None
        } else {
            self.exec_mode
        }
    }
}

/// A per-binding override of a module's parameters/success/result, identified by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Param>,
    #[serde(rename = "payloadParameters", default)]
    pub payload_parameters: Vec<Param>,
    #[serde(default)]
    pub success: Vec<SuccessCriterion>,
    pub result: Option<ResultCriterion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesForVuln {
    pub cves: Vec<String>,
    #[serde(default)]
    pub plausibility: Vec<ModuleRef>,
    #[serde(default)]
    pub scanners: Vec<ModuleRef>,
    #[serde(default)]
    pub exploits: Vec<ModuleRef>,
}

impl ModulesForVuln {
    pub fn validate(&self) -> Result<(), ModuleDefinitionError> {
        if self.cves.is_empty() {
            return Err(ModuleDefinitionError::NoBoundCves);
        }
        if self.scanners.is_empty() && self.exploits.is_empty() {
            return Err(ModuleDefinitionError::NoScannerOrExploit(
                self.cves.clone(),
            ));
        }
        Ok(())
    }

    pub fn matches_any_cve(&self, cves: &[String]) -> bool {
        self.cves.iter().any(|c| cves.contains(c))
    }
}

/// Flattened CLI-argument bag, as consumed by `ARF_ARG` parameter sources.
pub type CliArgs = BTreeMap<String, Value>;
