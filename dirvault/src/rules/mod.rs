//! Ignore rules.
//!
//! A rule file (`*.dv.ignore`) holds a JSON list of records:
//!
//! ```json
//! [{ "pattern": ".*\\.tmp", "regex": true, "recursive": true, "type": "name" }]
//! ```
//!
//! Rules found in a directory apply to every sibling of the rule file and,
//! when `recursive`, to everything below it.

use crate::utils::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

pub const RULE_FILE_EXTENSION: &str = ".dv.ignore";

pub fn is_rule_file(name: &str) -> bool {
    name.ends_with(RULE_FILE_EXTENSION)
}

/// What a pattern is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTarget {
    Name,
    RelativePath,
    AbsolutePath,
}

impl FromStr for MatchTarget {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(MatchTarget::Name),
            "relative path" => Ok(MatchTarget::RelativePath),
            "absolute path" => Ok(MatchTarget::AbsolutePath),
            other => Err(EngineError::UnknownMatchTarget(other.to_string())),
        }
    }
}

/// Rule as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(alias = "Pattern")]
    pub pattern: String,
    #[serde(default, alias = "Regex")]
    pub regex: bool,
    #[serde(default, alias = "Recursive")]
    pub recursive: bool,
    #[serde(rename = "type", alias = "Type")]
    pub target: String,
}

/// A node as seen by the rules
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub name: &'a str,
    pub relative_path: &'a str,
    pub absolute_path: &'a str,
}

#[derive(Debug, Clone)]
enum Pattern {
    Literal(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct Match {
    pattern: Pattern,
    target: MatchTarget,
    recursive: bool,
}

impl Match {
    pub fn literal(pattern: impl Into<String>, target: MatchTarget, recursive: bool) -> Self {
        Self {
            pattern: Pattern::Literal(pattern.into()),
            target,
            recursive,
        }
    }

    /// Regex rules match the whole string.
    pub fn regex(pattern: &str, target: MatchTarget, recursive: bool) -> Result<Self> {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            pattern: Pattern::Regex(anchored),
            target,
            recursive,
        })
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn is_match(&self, subject: &Subject<'_>) -> bool {
        let value = match self.target {
            MatchTarget::Name => subject.name,
            MatchTarget::RelativePath => subject.relative_path,
            MatchTarget::AbsolutePath => subject.absolute_path,
        };
        match &self.pattern {
            Pattern::Literal(literal) => literal == value,
            Pattern::Regex(regex) => regex.is_match(value),
        }
    }
}

/// Rules in effect for one directory
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Match>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = Match>) {
        self.rules.extend(rules);
    }

    pub fn is_match(&self, subject: &Subject<'_>) -> bool {
        self.rules.iter().any(|rule| rule.is_match(subject))
    }

    /// The subset passed down to subdirectories
    pub fn inherited(&self) -> RuleSet {
        RuleSet {
            rules: self
                .rules
                .iter()
                .filter(|rule| rule.recursive)
                .cloned()
                .collect(),
        }
    }
}

/// Convert parsed records. Targets are checked for every record before any
/// regex is compiled, so an unknown target is reported even when another
/// record is broken.
pub fn compile_records(records: Vec<RuleRecord>) -> Result<Vec<Match>> {
    let targets = records
        .iter()
        .map(|record| record.target.parse::<MatchTarget>())
        .collect::<Result<Vec<_>>>()?;

    records
        .into_iter()
        .zip(targets)
        .map(|(record, target)| {
            if record.regex {
                Match::regex(&record.pattern, target, record.recursive)
            } else {
                Ok(Match::literal(record.pattern, target, record.recursive))
            }
        })
        .collect()
}

/// Read a rule file. An unknown target kind is fatal; anything else wrong
/// with the file is logged and the file contributes no rules.
pub fn load_rule_file(path: &Path) -> Result<Vec<Match>> {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| EngineError::fs(path, e))
        .and_then(|content| Ok(serde_json::from_str::<Vec<RuleRecord>>(&content)?))
        .and_then(compile_records);

    match parsed {
        Ok(rules) => {
            debug!(path = %path.display(), count = rules.len(), "Loaded ignore rules");
            Ok(rules)
        }
        Err(e @ EngineError::UnknownMatchTarget(_)) => Err(e),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable ignore file");
            Ok(Vec::new())
        }
    }
}
