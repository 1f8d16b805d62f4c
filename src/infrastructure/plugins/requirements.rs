//! Dependency specifier parsing
//!
//! Accepts entries of the form `name[extra,...] op version, op version ; marker`,
//! e.g. `requests[socks]>=2.28,<3 ; python_version >= "3.9"`.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::HashSet;
use std::fmt;

use crate::application::errors::{PluginError, PluginResult};

static HEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([A-Za-z0-9._,\s-]*)\])?\s*(.*)$")
        .expect("valid regex")
});

static CONSTRAINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(===|==|!=|~=|<=|>=|<|>)\s*([A-Za-z0-9.*+!_-]+)\s*$").expect("valid regex")
});

static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").expect("valid regex"));

/// One parsed dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpecifier {
    /// Canonical name used for duplicate detection
    pub name: String,
    /// Name as written
    pub raw_name: String,
    pub extras: Vec<String>,
    /// Normalised constraints, e.g. `>=2.28,<3`
    pub constraint: Option<String>,
    pub marker: Option<String>,
}

impl DependencySpecifier {
    pub fn parse(item: &str) -> Result<Self, String> {
        let lines: Vec<&str> = item
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .collect();

        let line = match lines.as_slice() {
            [] => return Err(format!("could not parse requirement: {}", item)),
            [line] => *line,
            _ => return Err(format!("requirement {} seems to refer to more than one package", item)),
        };

        let (spec, marker) = match line.split_once(';') {
            Some((spec, marker)) => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err(format!("could not parse requirement {}: empty marker", item));
                }
                (spec.trim(), Some(marker.to_string()))
            }
            None => (line, None),
        };

        let caps = HEAD_RE
            .captures(spec)
            .ok_or_else(|| format!("could not parse requirement: {}", item))?;

        let raw_name = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
        let extras: Vec<String> = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();

        let constraint = if rest.is_empty() {
            None
        } else {
            if HEAD_RE.captures(rest).is_some() && !rest.starts_with(|c: char| "=!~<>".contains(c)) {
                return Err(format!("requirement {} seems to refer to more than one package", item));
            }

            let mut parts = Vec::new();
            for part in rest.split(',') {
                let caps = CONSTRAINT_RE.captures(part).ok_or_else(|| {
                    format!(
                        "could not parse requirement {}: invalid version constraint '{}'",
                        item,
                        part.trim()
                    )
                })?;
                parts.push(format!("{}{}", &caps[1], &caps[2]));
            }
            Some(parts.join(","))
        };

        Ok(Self {
            name: canonical_name(&raw_name),
            raw_name,
            extras,
            constraint,
            marker,
        })
    }

    /// Render as a single dependency-list line
    pub fn line(&self) -> String {
        let mut line = self.raw_name.clone();
        if !self.extras.is_empty() {
            line.push_str(&format!("[{}]", self.extras.join(",")));
        }
        if let Some(constraint) = &self.constraint {
            line.push_str(constraint);
        }
        if let Some(marker) = &self.marker {
            line.push_str(&format!("; {}", marker));
        }
        line
    }
}

impl fmt::Display for DependencySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// Lowercase, with runs of `-`, `_` and `.` folded to a single `-`
pub fn canonical_name(name: &str) -> String {
    SEPARATOR_RE.replace_all(&name.to_lowercase(), "-").into_owned()
}

/// A plugin's dependency set, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencies {
    specs: Vec<DependencySpecifier>,
}

impl ResolvedDependencies {
    pub fn get(&self, name: &str) -> Option<&DependencySpecifier> {
        let name = canonical_name(name);
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencySpecifier> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Contents of the generated dependency list file
    pub fn to_requirements_file(&self) -> String {
        self.specs
            .iter()
            .map(DependencySpecifier::line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse every entry, collecting all rejections
pub fn resolve(items: &[String]) -> PluginResult<ResolvedDependencies> {
    let mut specs = Vec::new();
    let mut seen = HashSet::new();
    let mut errors = Vec::new();

    for item in items {
        match DependencySpecifier::parse(item) {
            Ok(spec) => {
                if !seen.insert(spec.name.clone()) {
                    errors.push(format!("requirement {} is duplicated", item));
                    continue;
                }
                specs.push(spec);
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(ResolvedDependencies { specs })
    } else {
        Err(PluginError::DependencyParse(errors))
    }
}
