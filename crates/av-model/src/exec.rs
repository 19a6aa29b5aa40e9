use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::module::SuccessCriterion;

/// The outcome of aggregating a class's per-module `moduleSuccess` values (§4.6).
/// `Unknown` is the `⊥` case: no module in the class technically succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassOutcome {
    All,
    Mixed,
    None,
    Unknown,
}

/// The record produced by a single module execution (C5's return value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecDetails {
    pub module_name: String,
    pub source: String,
    pub output: Option<String>,
    pub params: BTreeMap<String, String>,
    pub session: Option<String>,
    pub gathered_info: BTreeMap<String, String>,
    pub exit_code: Option<i64>,
    pub matched_criterion: Option<SuccessCriterion>,
    pub module_success: Option<bool>,
    pub exec_success: bool,
}

impl ExecDetails {
    pub fn new(module_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            source: source.into(),
            output: None,
            params: BTreeMap::new(),
            session: None,
            gathered_info: BTreeMap::new(),
            exit_code: None,
            matched_criterion: None,
            module_success: None,
            exec_success: false,
        }
    }

    /// Captures an exception/error path: the message becomes the output, and the module is
    /// marked as not technically succeeded (§4.5).
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.output = Some(message.into());
        self.exec_success = false;
        self.module_success = None;
        self
    }
}

/// Per-class aggregate over one module class's executions within a single event verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassResult {
    pub successful_modules: Vec<String>,
    pub erroneous_modules: Vec<String>,
    pub result: Option<ClassOutcome>,
    pub details: Vec<ExecDetails>,
}

impl ClassResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `count = |successful| + |erroneous|` (§3, an explicit testable invariant).
    pub fn count(&self) -> usize {
        self.successful_modules.len() + self.erroneous_modules.len()
    }

    pub fn record(&mut self, details: ExecDetails) {
        if details.exec_success {
            self.successful_modules.push(details.module_name.clone());
        } else {
            self.erroneous_modules.push(details.module_name.clone());
        }
        self.details.push(details);
    }

    /// Folds per-module `module_success` into the class-level `ClassOutcome` (§4.6).
    pub fn finalize_outcome(&mut self) {
        let technical_successes: Vec<bool> = self
            .details
            .iter()
            .filter(|d| d.exec_success)
            .filter_map(|d| d.module_success)
            .collect();
        self.result = if technical_successes.is_empty() {
            Some(ClassOutcome::Unknown)
        } else if technical_successes.iter().all(|&s| s) {
            Some(ClassOutcome::All)
        } else if technical_successes.iter().all(|&s| !s) {
            Some(ClassOutcome::None)
        } else {
            Some(ClassOutcome::Mixed)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(name: &str, success: bool, technical: bool) -> ExecDetails {
        let mut d = ExecDetails::new(name, "test");
        d.exec_success = technical;
        d.module_success = if technical { Some(success) } else { None };
        d
    }

    #[test]
    fn count_equals_successful_plus_erroneous() {
        let mut cr = ClassResult::empty();
        cr.record(exec("a", true, true));
        cr.record(exec("b", false, false));
        assert_eq!(cr.count(), 2);
        assert_eq!(cr.successful_modules, vec!["a"]);
        assert_eq!(cr.erroneous_modules, vec!["b"]);
    }

    #[test]
    fn finalize_outcome_all() {
        let mut cr = ClassResult::empty();
        cr.record(exec("a", true, true));
        cr.record(exec("b", true, true));
        cr.finalize_outcome();
        assert_eq!(cr.result, Some(ClassOutcome::All));
    }

    #[test]
    fn finalize_outcome_mixed() {
        let mut cr = ClassResult::empty();
        cr.record(exec("a", true, true));
        cr.record(exec("b", false, true));
        cr.finalize_outcome();
        assert_eq!(cr.result, Some(ClassOutcome::Mixed));
    }

    #[test]
    fn finalize_outcome_unknown_when_nothing_technically_succeeded() {
        let mut cr = ClassResult::empty();
        cr.record(exec("a", false, false));
        cr.finalize_outcome();
        assert_eq!(cr.result, Some(ClassOutcome::Unknown));
    }
}
