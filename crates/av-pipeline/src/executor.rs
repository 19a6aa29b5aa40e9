use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use av_exec::ExecutionBackend;
use av_io::{address_in_any_subnet, InternalSubnet};
use av_model::{
    CliArgs, Event, ExecDetails, ModuleDescriptor, ModuleRef, ModuleType, Param, ParamEvalError,
    ResultStrategy,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::param_eval::{EvaluatedParam, ParamEvaluator, ScannerResolver};
use crate::prompt::Prompter;

/// Nested `SCANNER` invocations are bounded to prevent an accidentally-cyclic module
/// repository from recursing indefinitely.
const MAX_SCANNER_DEPTH: u32 = 8;

/// C5: dispatches module executions to the right `ExecutionBackend`, resolves parameters
/// via C2, and evaluates module success via C4.
pub struct ModuleExecutor {
    containers: Arc<dyn ExecutionBackend>,
    rpc: Arc<dyn ExecutionBackend>,
    internal_subnets: Vec<InternalSubnet>,
    prompter: Arc<dyn Prompter>,
    manual_mode: bool,
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleExecutor {
    pub fn new(
        containers: Arc<dyn ExecutionBackend>,
        rpc: Arc<dyn ExecutionBackend>,
        internal_subnets: Vec<InternalSubnet>,
        prompter: Arc<dyn Prompter>,
        manual_mode: bool,
        modules: Vec<ModuleDescriptor>,
    ) -> Self {
        Self {
            containers,
            rpc,
            internal_subnets,
            prompter,
            manual_mode,
            modules: modules.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    fn backend_for(&self, module_type: ModuleType) -> &Arc<dyn ExecutionBackend> {
        match module_type {
            ModuleType::Standalone => &self.containers,
            ModuleType::Rpc => &self.rpc,
        }
    }

    /// Merges a descriptor's declared parameters with a binding's overrides by name; an
    /// override entry fully replaces the descriptor entry of the same name (§4.2, no deep
    /// merge of the node tree).
    fn merge_params(descriptor_params: &[Param], overrides: &[Param]) -> Vec<Param> {
        let mut merged: BTreeMap<String, Param> = descriptor_params
            .iter()
            .cloned()
            .map(|p| (p.name.clone(), p))
            .collect();
        for over in overrides {
            merged.insert(over.name.clone(), over.clone());
        }
        merged.into_values().collect()
    }

    async fn resolve_params(
        &self,
        params: &[Param],
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
    ) -> Result<BTreeMap<String, String>, ParamEvalError> {
        let mut resolved = BTreeMap::new();
        for param in params {
            let value = match &param.value {
                Some(node) => match ParamEvaluator::eval(node, event, cli_args, depth, self).await {
                    Ok(EvaluatedParam { value, .. }) => {
                        if self.manual_mode && param.configurable {
                            self.prompt_for_override(param, &value).await?
                        } else {
                            value
                        }
                    }
                    Err(e) => {
                        if param.configurable && self.manual_mode {
                            warn!(param = %param.name, error = %e, "automatic evaluation failed, prompting operator");
                            self.prompt_required(param).await?
                        } else {
                            return Err(e);
                        }
                    }
                },
                None => {
                    let default = param
                        .default_value
                        .clone()
                        .ok_or_else(|| ParamEvalError::MissingKey(param.name.clone()))?;
                    if self.manual_mode && param.configurable {
                        self.prompt_for_override(param, &default).await?
                    } else {
                        default
                    }
                }
            };

            resolved.insert(param.name.clone(), value);
        }
        Ok(resolved)
    }

    /// Offers a successfully-evaluated value for manual override: enter accepts the
    /// current value, `?` reveals the description (§4.2).
    async fn prompt_for_override(&self, param: &Param, current: &str) -> Result<String, ParamEvalError> {
        loop {
            let message = format!("{} [{}] (? for help): ", param.name, current);
            let answer = self.prompter.prompt(&message).await;
            let trimmed = answer.trim();
            if trimmed == "?" {
                let description = param.description.as_deref().unwrap_or("no description available");
                debug!(param = %param.name, description, "parameter help requested");
                continue;
            }
            if trimmed.is_empty() {
                return Ok(current.to_string());
            }
            return Ok(trimmed.to_string());
        }
    }

    /// Prompts for a value the automatic evaluator could not produce: `?` reveals the
    /// description, but unlike `prompt_for_override` there is no current value to fall
    /// back on, so empty input is rejected and the prompt repeats (§4.2).
    async fn prompt_required(&self, param: &Param) -> Result<String, ParamEvalError> {
        loop {
            let message = format!("{} (required, ? for help): ", param.name);
            let answer = self.prompter.prompt(&message).await;
            let trimmed = answer.trim();
            if trimmed == "?" {
                let description = param.description.as_deref().unwrap_or("no description available");
                debug!(param = %param.name, description, "parameter help requested");
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }
            return Ok(trimmed.to_string());
        }
    }

    /// Executes one module and evaluates its success (C4/C5, §4.4-§4.5). Permission denials
    /// and execution errors are "uncritical" (§7): they are folded into the returned
    /// `ExecDetails` rather than propagated, so the calling class loop keeps going.
    pub async fn exec_and_evaluate(
        &self,
        descriptor: &ModuleDescriptor,
        module_ref: Option<&ModuleRef>,
        event: &Event,
        cli_args: &CliArgs,
        timeout: Duration,
    ) -> ExecDetails {
        if !address_in_any_subnet(&event.dst.address, &self.internal_subnets) {
            warn!(dst = %event.dst, module = %descriptor.name, "destination outside authorized subnets, skipping");
            return ExecDetails::new(&descriptor.name, "executor")
                .with_error(format!("{} is outside the authorized internal subnets", event.dst));
        }

        let merged_params = match module_ref {
            Some(m) => Self::merge_params(&descriptor.parameters, &m.parameters),
            None => descriptor.parameters.clone(),
        };
        let resolved_params = match self.resolve_params(&merged_params, event, cli_args, 0).await {
            Ok(p) => p,
            Err(e) => return ExecDetails::new(&descriptor.name, "executor").with_error(e.to_string()),
        };

        let backend = self.backend_for(descriptor.module_type);
        let mut details = match backend.run(descriptor, &resolved_params, timeout).await {
            Ok(d) => d,
            Err(e) => return ExecDetails::new(&descriptor.name, "executor").with_error(e.to_string()),
        };

        let overrides = module_ref.map(|m| m.success.as_slice()).unwrap_or(&[]);
        let evaluated = crate::success::ModuleSuccessEvaluator::evaluate(
            overrides,
            &descriptor.success,
            details.output.as_deref(),
            details.session.as_deref(),
            details.exit_code,
        );
        match evaluated {
            Some((criterion, success)) => {
                details.matched_criterion = Some(criterion);
                details.module_success = Some(success);
                details.exec_success = true;
            }
            None => {
                details.module_success = None;
                details.exec_success = false;
            }
        }
        details
    }

    /// Drives a `PARAM_SCANNER`-class module end-to-end and applies its `ResultCriterion`
    /// (EXTRACT/SUCCESS) to produce the scalar a dependent parameter needs (§4.1, §4.6).
    async fn exec_and_resolve(
        &self,
        descriptor: &ModuleDescriptor,
        module_ref: &ModuleRef,
        event: &Event,
        cli_args: &CliArgs,
    ) -> Result<String, ParamEvalError> {
        let timeout = Duration::from_secs(av_io::Config::DEFAULT_TIMEOUT_SECS);
        let details = self
            .exec_and_evaluate(descriptor, Some(module_ref), event, cli_args, timeout)
            .await;

        if !details.exec_success {
            return Err(ParamEvalError::ScannerProducedNothing(descriptor.name.clone()));
        }

        let criterion = module_ref
            .result
            .as_ref()
            .or(descriptor.result.as_ref())
            .ok_or_else(|| ParamEvalError::ScannerProducedNothing(descriptor.name.clone()))?;

        match criterion.strategy {
            ResultStrategy::Extract => {
                let pattern = criterion
                    .argument
                    .first()
                    .ok_or_else(|| ParamEvalError::NoRegexMatch { pattern: String::new() })?;
                let output = details
                    .output
                    .as_deref()
                    .ok_or_else(|| ParamEvalError::ScannerProducedNothing(descriptor.name.clone()))?;
                let regex = Regex::new(pattern).map_err(|_| ParamEvalError::NoRegexMatch {
                    pattern: pattern.clone(),
                })?;
                let captures = regex
                    .captures(output)
                    .ok_or_else(|| ParamEvalError::NoRegexMatch { pattern: pattern.clone() })?;
                captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .ok_or_else(|| ParamEvalError::NoRegexMatch { pattern: pattern.clone() })
            }
            ResultStrategy::Success => {
                let yes_value = criterion
                    .argument
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "true".to_string());
                let no_value = criterion.argument.get(1).cloned().unwrap_or_default();
                match details.module_success {
                    Some(true) => Ok(yes_value),
                    Some(false) => Ok(no_value),
                    None => Err(ParamEvalError::ScannerProducedNothing(descriptor.name.clone())),
                }
            }
        }
    }
}

#[async_trait]
impl ScannerResolver for ModuleExecutor {
    async fn resolve(
        &self,
        module_ref: &ModuleRef,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
    ) -> Result<String, ParamEvalError> {
        if depth > MAX_SCANNER_DEPTH {
            return Err(ParamEvalError::ScannerProducedNothing(module_ref.name.clone()));
        }
        let descriptor = self
            .modules
            .get(&module_ref.name)
            .ok_or_else(|| ParamEvalError::ScannerProducedNothing(module_ref.name.clone()))?;
        self.exec_and_resolve(descriptor, module_ref, event, cli_args).await
    }
}
