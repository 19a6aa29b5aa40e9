use std::path::Path;

use av_model::{ModuleDefinitionError, ModuleDescriptor, ModuleLoadError, ModulesForVuln};
use tracing::warn;
use walkdir::WalkDir;

/// Recursively parses a module repository into its two constituent collections (§6, C9):
/// `vulns/` files prefixed `vuln_` materialize `ModulesForVuln`; `modules/` files prefixed
/// `module_` materialize `ModuleDescriptor`. Every parsed value is validated before being
/// returned — invariant violations are rejected at load time, not at use time.
pub struct ModuleRepoParser;

impl ModuleRepoParser {
    pub fn parse_directory(
        root: &Path,
    ) -> Result<(Vec<ModuleDescriptor>, Vec<ModulesForVuln>), ModuleLoadError> {
        let mut modules = Vec::new();
        let mut vulns = Vec::new();

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let is_yaml = file_name.ends_with(".yml") || file_name.ends_with(".yaml");
            if !is_yaml {
                continue;
            }

            if file_name.starts_with("vuln_") {
                let vuln = Self::parse_vuln(path)?;
                vuln.validate()?;
                vulns.push(vuln);
            } else if file_name.starts_with("module_") {
                let mut module = Self::parse_module(path)?;
                if module.path.is_none() {
                    module.path = path.parent().map(|p| p.display().to_string());
                }
                module.validate()?;
                modules.push(module);
            }
        }

        Ok((modules, vulns))
    }

    fn parse_module(path: &Path) -> Result<ModuleDescriptor, ModuleLoadError> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| ModuleLoadError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn parse_vuln(path: &Path) -> Result<ModulesForVuln, ModuleLoadError> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| ModuleLoadError::ParseVuln {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Resolves the unique `ModulesForVuln` binding whose CVEs intersect the event's (§4.6 step 4).
pub fn select_binding<'a>(
    vulns: &'a [ModulesForVuln],
    event_cves: &[String],
) -> Result<&'a ModulesForVuln, ModuleDefinitionError> {
    let mut matches = vulns.iter().filter(|v| v.matches_any_cve(event_cves));
    let first = matches.next();
    match first {
        None => Err(ModuleDefinitionError::NoMatchingBinding(event_cves.to_vec())),
        Some(binding) => {
            let remaining = matches.count();
            if remaining > 0 {
                warn!(cves = ?event_cves, "multiple ModulesForVuln bindings matched event CVEs");
                Err(ModuleDefinitionError::AmbiguousBinding(
                    event_cves.to_vec(),
                    remaining + 1,
                ))
            } else {
                Ok(binding)
            }
        }
    }
}
