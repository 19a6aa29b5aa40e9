use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use av_model::{ExecDetails, ModuleDescriptor, ModuleExecutionError};

/// Uniform interface both execution back-ends satisfy (§4.3, §9 design note). `run` owns all
/// resources for the duration of the call and guarantees release on every exit path.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        params: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError>;
}
