use thiserror::Error;

/// Per-module parameter resolution failure (C2).
#[derive(Debug, Error)]
pub enum ParamEvalError {
    #[error("unknown parameter method: {0}")]
    UnknownMethod(String),
    #[error("missing source key: {0}")]
    MissingKey(String),
    #[error("regex '{pattern}' matched no group in input")]
    NoRegexMatch { pattern: String },
    #[error("scanner-sourced parameter '{0}' produced no result")]
    ScannerProducedNothing(String),
    #[error("assemble template references unknown hole '{0}'")]
    MissingHole(String),
    #[error("no input resolved and no fallback literal supplied")]
    ExhaustedWithNoFallback,
}

/// Raised when a loaded `ModuleDescriptor`/`Param`/`ModulesForVuln` violates a schema invariant.
#[derive(Debug, Error)]
pub enum ModuleDefinitionError {
    #[error("module '{0}': type=RPC requires a path")]
    RpcMissingPath(String),
    #[error("module '{0}': class=EXPLOIT, type=RPC, execMode=CHECK is rejected at load time")]
    ExploitRpcCheckRejected(String),
    #[error("module '{0}': STANDALONE modules may not declare a SESSION success strategy")]
    StandaloneSessionSuccess(String),
    #[error("param '{0}': must declare a value or a default value")]
    ParamMissingValue(String),
    #[error("param value node must have input iff its method is a strategy (node: {0:?})")]
    MalformedInputArity(String),
    #[error("ModulesForVuln must bind at least one CVE")]
    NoBoundCves,
    #[error("ModulesForVuln '{0:?}' must bind at least one scanner or exploit module")]
    NoScannerOrExploit(Vec<String>),
    #[error("no ModulesForVuln binding matches event CVEs {0:?}")]
    NoMatchingBinding(Vec<String>),
    #[error("{1} ModulesForVuln bindings match event CVEs {0:?}, expected exactly one")]
    AmbiguousBinding(Vec<String>, usize),
}

#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("failed to parse module descriptor at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse vuln binding at {path}: {source}")]
    ParseVuln {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Definition(#[from] ModuleDefinitionError),
    #[error("io error reading module repository: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ModuleExecutionError {
    #[error("container exited with non-zero code {0} and descriptor does not use EXIT_CODE success")]
    NonZeroExit(i64),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("param evaluation failed: {0}")]
    Param(#[from] ParamEvalError),
    #[error(transparent)]
    Timeout(#[from] ModuleTimeoutError),
}

#[derive(Debug, Error)]
#[error("module execution exceeded its timeout budget")]
pub struct ModuleTimeoutError;

#[derive(Debug, Error)]
#[error("event destination {0} is outside the authorized internal subnets")]
pub struct VerificationPermissionError(pub String);

#[derive(Debug, Error)]
pub enum BackendConnectionError {
    #[error("docker connection failed: {0}")]
    Docker(String),
    #[error("rpc connection failed: {0}")]
    Rpc(String),
    #[error("authentication failed")]
    AuthenticationFailed,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger connection failed: {0}")]
    Connection(String),
    #[error("ledger operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Error)]
pub enum ArgumentValidationError {
    #[error("argument validation failed: {0}")]
    Invalid(String),
}

/// Unifying error for call sites that don't care which component failed.
#[derive(Debug, Error)]
pub enum AvError {
    #[error(transparent)]
    ParamEval(#[from] ParamEvalError),
    #[error(transparent)]
    ModuleDefinition(#[from] ModuleDefinitionError),
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),
    #[error(transparent)]
    ModuleExecution(#[from] ModuleExecutionError),
    #[error(transparent)]
    ModuleTimeout(#[from] ModuleTimeoutError),
    #[error(transparent)]
    VerificationPermission(#[from] VerificationPermissionError),
    #[error(transparent)]
    BackendConnection(#[from] BackendConnectionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    ArgumentValidation(#[from] ArgumentValidationError),
}

impl AvError {
    /// "Uncritical" errors (§7): timeouts and permission denials never abort the event,
    /// they're folded into `ExecDetails` as a failed-but-expected outcome.
    pub fn is_uncritical(&self) -> bool {
        matches!(
            self,
            AvError::ModuleTimeout(_) | AvError::VerificationPermission(_)
        )
    }
}
