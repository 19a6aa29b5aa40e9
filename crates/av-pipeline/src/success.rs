use av_model::{SuccessCriterion, SuccessStrategy};
use regex::Regex;

/// First-match module-success evaluation (C4, §4.4). `overrides` (from the `ModuleRef`
/// binding) are tried before the descriptor's own `success` list; `FALLBACK` always matches
/// and must be the terminal entry of whichever list it appears in.
pub struct ModuleSuccessEvaluator;

impl ModuleSuccessEvaluator {
    /// Returns the first matching criterion plus the module-success verdict it carries, or
    /// `None` if nothing in either list matched (the `⊥` case). The verdict is the matched
    /// criterion's own declared `conclusion`, not something implied by its strategy (§4.4).
    pub fn evaluate(
        overrides: &[SuccessCriterion],
        descriptor_success: &[SuccessCriterion],
        output: Option<&str>,
        session: Option<&str>,
        exit_code: Option<i64>,
    ) -> Option<(SuccessCriterion, bool)> {
        overrides
            .iter()
            .chain(descriptor_success.iter())
            .find_map(|criterion| {
                if Self::matches(criterion, output, session, exit_code) {
                    Some((criterion.clone(), criterion.conclusion))
                } else {
                    None
                }
            })
    }

    fn matches(
        criterion: &SuccessCriterion,
        output: Option<&str>,
        session: Option<&str>,
        exit_code: Option<i64>,
    ) -> bool {
        match criterion.strategy {
            SuccessStrategy::Output => (|| {
                let pattern = criterion.argument.as_deref()?;
                let regex = Regex::new(pattern).ok()?;
                let text = output?;
                Some(regex.is_match(text))
            })()
            .unwrap_or(false),
            SuccessStrategy::Session => session.is_some(),
            SuccessStrategy::ExitCode => (|| {
                let expected: i64 = criterion.argument.as_deref()?.parse().ok()?;
                let actual = exit_code?;
                Some(actual == expected)
            })()
            .unwrap_or(false),
            SuccessStrategy::Fallback => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_criterion(pattern: &str) -> SuccessCriterion {
        SuccessCriterion {
            strategy: SuccessStrategy::Output,
            conclusion: true,
            argument: Some(pattern.to_string()),
        }
    }

    fn fallback() -> SuccessCriterion {
        SuccessCriterion {
            strategy: SuccessStrategy::Fallback,
            conclusion: false,
            argument: None,
        }
    }

    #[test]
    fn output_regex_match_yields_success() {
        let result = ModuleSuccessEvaluator::evaluate(
            &[],
            &[output_criterion("VULNERABLE"), fallback()],
            Some("target is VULNERABLE to this check"),
            None,
            None,
        );
        assert!(matches!(result, Some((_, true))));
    }

    #[test]
    fn falls_through_to_fallback_when_output_does_not_match() {
        let result = ModuleSuccessEvaluator::evaluate(
            &[],
            &[output_criterion("VULNERABLE"), fallback()],
            Some("target is not affected"),
            None,
            None,
        );
        assert!(matches!(result, Some((c, false)) if c.strategy == SuccessStrategy::Fallback));
    }

    #[test]
    fn override_takes_priority_over_descriptor_list() {
        let result = ModuleSuccessEvaluator::evaluate(
            &[fallback()],
            &[output_criterion("VULNERABLE")],
            Some("target is VULNERABLE"),
            None,
            None,
        );
        assert!(matches!(result, Some((c, false)) if c.strategy == SuccessStrategy::Fallback));
    }

    #[test]
    fn session_strategy_requires_a_live_session() {
        let criteria = [SuccessCriterion {
            strategy: SuccessStrategy::Session,
            conclusion: true,
            argument: None,
        }];
        assert!(ModuleSuccessEvaluator::evaluate(&[], &criteria, None, Some("session-1"), None).is_some());
        assert!(ModuleSuccessEvaluator::evaluate(&[], &criteria, None, None, None).is_none());
    }

    #[test]
    fn nothing_matches_yields_none() {
        let result = ModuleSuccessEvaluator::evaluate(&[], &[output_criterion("X")], Some("y"), None, None);
        assert!(result.is_none());
    }
}
