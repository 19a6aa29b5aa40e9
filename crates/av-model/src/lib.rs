//! Typed data model for the attack-verification engine (C1): module descriptors, the
//! recursive parameter-value tree, execution results, and the verdict algebra (C7).

pub mod cve;
pub mod error;
pub mod exec;
pub mod host;
pub mod module;
pub mod verdict;

pub use error::{
    ArgumentValidationError, AvError, BackendConnectionError, LedgerError, ModuleDefinitionError,
    ModuleExecutionError, ModuleLoadError, ModuleTimeoutError, ParamEvalError,
    VerificationPermissionError,
};
pub use exec::{ClassOutcome, ClassResult, ExecDetails};
pub use host::{Event, EventId, Host};
pub use module::{
    CliArgs, DescriptorSource, ExecMode, ModuleClass, ModuleDescriptor, ModuleRef, ModuleType,
    ModulesForVuln, Param, ParamArgument, ParamInput, ParamMethod, ParamValueNode, ResultCriterion,
    ResultStrategy, SuccessCriterion, SuccessStrategy,
};
pub use verdict::{
    aggregate_verdict, ClassResults, Confidence, HostState, Plausibility, Verdict,
    VerificationRecord, VulnerabilityState,
};
