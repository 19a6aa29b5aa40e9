use async_trait::async_trait;
use av_model::{
    CliArgs, Event, ModuleRef, ParamArgument, ParamEvalError, ParamInput, ParamMethod, ParamValueNode,
};
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// The recursion target for `SCANNER`-sourced parameters: a nested C5 invocation (§4.1).
/// Implemented by `ModuleExecutor`; kept as a trait here so this module never depends on
/// the executor module, breaking the otherwise-mutual C2/C5 recursion at the type level.
#[async_trait]
pub trait ScannerResolver: Send + Sync {
    async fn resolve(
        &self,
        module_ref: &ModuleRef,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
    ) -> Result<String, ParamEvalError>;
}

#[derive(Debug, Clone)]
pub struct EvaluatedParam {
    pub name: Option<String>,
    pub value: String,
}

/// Recursively resolves a `ParamValueNode` to a concrete scalar (C2, §4.1).
pub struct ParamEvaluator;

impl ParamEvaluator {
    pub async fn eval(
        node: &ParamValueNode,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
        resolver: &dyn ScannerResolver,
    ) -> Result<EvaluatedParam, ParamEvalError> {
        debug!(depth, method = ?node.method, "evaluating parameter node");
        let value = match &node.method {
            ParamMethod::Extract => Self::eval_extract(node, event, cli_args, depth, resolver).await?,
            ParamMethod::Assemble => Self::eval_assemble(node, event, cli_args, depth, resolver).await?,
            ParamMethod::Exists => Self::eval_exists(node, event, cli_args, depth, resolver).await?,
            ParamMethod::EventData => Self::eval_event_data(node, event)?,
            ParamMethod::ArfArg => Self::eval_arf_arg(node, cli_args)?,
            ParamMethod::Random => Self::eval_random(node)?,
            ParamMethod::Scanner => {
                let module_ref = match &node.argument {
                    ParamArgument::ModuleRef(m) => m.as_ref(),
                    other => {
                        return Err(ParamEvalError::UnknownMethod(format!(
                            "SCANNER argument must be a module reference, got {other:?}"
                        )))
                    }
                };
                resolver.resolve(module_ref, event, cli_args, depth + 1).await?
            }
        };
        Ok(EvaluatedParam {
            name: node.name.clone(),
            value,
        })
    }

    async fn eval_extract(
        node: &ParamValueNode,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
        resolver: &dyn ScannerResolver,
    ) -> Result<String, ParamEvalError> {
        let input = match &node.input {
            Some(ParamInput::Single(inner)) => inner,
            _ => {
                return Err(ParamEvalError::UnknownMethod(
                    "EXTRACT requires a single input node".to_string(),
                ))
            }
        };
        let resolved = Box::pin(Self::eval(input, event, cli_args, depth + 1, resolver)).await?;
        let pattern = node.argument.as_text();
        let regex = Regex::new(&pattern)
            .map_err(|_| ParamEvalError::NoRegexMatch { pattern: pattern.clone() })?;
        let captures = regex
            .captures(&resolved.value)
            .ok_or_else(|| ParamEvalError::NoRegexMatch { pattern: pattern.clone() })?;
        let group = captures
            .get(1)
            .ok_or_else(|| ParamEvalError::NoRegexMatch { pattern })?;
        Ok(group.as_str().trim().to_string())
    }

    async fn eval_assemble(
        node: &ParamValueNode,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
        resolver: &dyn ScannerResolver,
    ) -> Result<String, ParamEvalError> {
        let inputs = match &node.input {
            Some(input) => input.as_slice(),
            None => {
                return Err(ParamEvalError::UnknownMethod(
                    "ASSEMBLE requires input nodes".to_string(),
                ))
            }
        };

        let mut template = node.argument.as_text();
        for input in inputs {
            let resolved = Box::pin(Self::eval(input, event, cli_args, depth + 1, resolver)).await?;
            let hole_name = resolved
                .name
                .clone()
                .ok_or_else(|| ParamEvalError::MissingHole("<unnamed>".to_string()))?;
            let hole = format!("{{{hole_name}}}");
            if !template.contains(&hole) {
                return Err(ParamEvalError::MissingHole(hole_name));
            }
            template = template.replace(&hole, &resolved.value);
        }
        Ok(template)
    }

    async fn eval_exists(
        node: &ParamValueNode,
        event: &Event,
        cli_args: &CliArgs,
        depth: u32,
        resolver: &dyn ScannerResolver,
    ) -> Result<String, ParamEvalError> {
        let inputs = match &node.input {
            Some(input) => input.as_slice(),
            None => Vec::new(),
        };
        for input in inputs {
            match Box::pin(Self::eval(input, event, cli_args, depth + 1, resolver)).await {
                Ok(resolved) if !resolved.value.trim().is_empty() => return Ok(resolved.value),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "EXISTS input failed, continuing to next candidate");
                    continue;
                }
            }
        }
        let fallback = node.argument.as_text();
        if fallback.trim().is_empty() {
            Err(ParamEvalError::ExhaustedWithNoFallback)
        } else {
            Ok(fallback)
        }
    }

    fn eval_event_data(node: &ParamValueNode, event: &Event) -> Result<String, ParamEvalError> {
        let path = node.argument.as_text();
        if let Some(v) = event.raw.get(&path) {
            return Ok(value_to_string(v));
        }
        let mut current: &Value = &Value::Object(
            event
                .raw
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let owned;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Err(ParamEvalError::MissingKey(path.clone())),
            }
        }
        owned = current.clone();
        Ok(value_to_string(&owned))
    }

    fn eval_arf_arg(node: &ParamValueNode, cli_args: &CliArgs) -> Result<String, ParamEvalError> {
        let name = node.argument.as_text();
        cli_args
            .get(&name)
            .map(value_to_string)
            .ok_or_else(|| ParamEvalError::MissingKey(name))
    }

    fn eval_random(node: &ParamValueNode) -> Result<String, ParamEvalError> {
        let kind = node.argument.as_text();
        match kind.as_str() {
            "port" => {
                let port: u16 = rand::thread_rng().gen_range(49152..=65535);
                Ok(port.to_string())
            }
            "password" => {
                const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                let mut rng = rand::thread_rng();
                let password: String = (0..20)
                    .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                    .collect();
                Ok(password)
            }
            other => Err(ParamEvalError::UnknownMethod(format!("RANDOM({other})"))),
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_model::{EventId, Host};
    use std::collections::BTreeMap;

    struct NeverScanner;
    #[async_trait]
    impl ScannerResolver for NeverScanner {
        async fn resolve(&self, _: &ModuleRef, _: &Event, _: &CliArgs, _: u32) -> Result<String, ParamEvalError> {
            Err(ParamEvalError::ScannerProducedNothing("unused".into()))
        }
    }

    fn event() -> Event {
        let mut raw = BTreeMap::new();
        raw.insert("banner".to_string(), Value::String("Apache/2.4.41 (Ubuntu)".to_string()));
        raw.insert(
            "nested".to_string(),
            serde_json::json!({ "inner": { "value": "deep" } }),
        );
        Event {
            id: EventId(1),
            src: Host::new("10.0.0.1".parse().unwrap(), 1),
            dst: Host::new("10.0.0.2".parse().unwrap(), 80),
            cves: vec!["CVE-2021-1234".into()],
            timestamp: chrono::Utc::now(),
            raw,
        }
    }

    fn event_data_node(path: &str) -> ParamValueNode {
        ParamValueNode {
            method: ParamMethod::EventData,
            argument: ParamArgument::Text(path.to_string()),
            name: Some("x".to_string()),
            input: None,
        }
    }

    #[tokio::test]
    async fn event_data_flat_key_lookup() {
        let node = event_data_node("banner");
        let result = ParamEvaluator::eval(&node, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        assert_eq!(result.value, "Apache/2.4.41 (Ubuntu)");
    }

    #[tokio::test]
    async fn event_data_nested_dotted_path() {
        let node = event_data_node("nested.inner.value");
        let result = ParamEvaluator::eval(&node, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        assert_eq!(result.value, "deep");
    }

    #[tokio::test]
    async fn event_data_missing_key_fails() {
        let node = event_data_node("does.not.exist");
        let err = ParamEvaluator::eval(&node, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap_err();
        assert!(matches!(err, ParamEvalError::MissingKey(_)));
    }

    #[tokio::test]
    async fn extract_returns_trimmed_capture_group() {
        let extract = ParamValueNode {
            method: ParamMethod::Extract,
            argument: ParamArgument::Text(r"Apache/([\d.]+)".to_string()),
            name: None,
            input: Some(ParamInput::Single(Box::new(event_data_node("banner")))),
        };
        let result = ParamEvaluator::eval(&extract, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        assert_eq!(result.value, "2.4.41");
    }

    #[tokio::test]
    async fn exists_returns_first_nonempty_input() {
        let failing = event_data_node("does.not.exist");
        let present = event_data_node("banner");
        let exists = ParamValueNode {
            method: ParamMethod::Exists,
            argument: ParamArgument::Text("fallback".to_string()),
            name: None,
            input: Some(ParamInput::Many(vec![failing, present])),
        };
        let result = ParamEvaluator::eval(&exists, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        assert_eq!(result.value, "Apache/2.4.41 (Ubuntu)");
    }

    #[tokio::test]
    async fn exists_falls_back_to_literal_when_all_exhausted() {
        let failing = event_data_node("does.not.exist");
        let exists = ParamValueNode {
            method: ParamMethod::Exists,
            argument: ParamArgument::Text("default-value".to_string()),
            name: None,
            input: Some(ParamInput::Many(vec![failing])),
        };
        let result = ParamEvaluator::eval(&exists, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        assert_eq!(result.value, "default-value");
    }

    #[tokio::test]
    async fn random_port_is_in_dynamic_range() {
        let node = ParamValueNode {
            method: ParamMethod::Random,
            argument: ParamArgument::Text("port".to_string()),
            name: None,
            input: None,
        };
        let result = ParamEvaluator::eval(&node, &event(), &CliArgs::new(), 0, &NeverScanner)
            .await
            .unwrap();
        let port: u32 = result.value.parse().unwrap();
        assert!((49152..=65535).contains(&port));
    }
}
