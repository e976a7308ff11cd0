use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::event::RunKind;
use crate::error::{CoreError, Result};

/// Validated input for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunPlan {
    Discovery { keywords: Vec<String> },
    Metrics { handles: Vec<String> },
}

impl RunPlan {
    /// Parses a newline-delimited keyword list.
    pub fn discovery(raw: &str, max_keywords: usize) -> Result<Self> {
        let keywords = parse_keywords(raw);
        if keywords.is_empty() {
            return Err(CoreError::Validation(
                "at least one keyword is required".to_string(),
            ));
        }
        if keywords.len() > max_keywords {
            return Err(CoreError::Validation(format!(
                "{} keywords given, at most {} allowed",
                keywords.len(),
                max_keywords
            )));
        }
        Ok(RunPlan::Discovery { keywords })
    }

    pub fn metrics<S: AsRef<str>>(handles: &[S], max_handles: usize) -> Result<Self> {
        let handles = normalize_handles(handles);
        if handles.is_empty() {
            return Err(CoreError::Validation(
                "at least one handle is required".to_string(),
            ));
        }
        if handles.len() > max_handles {
            return Err(CoreError::Validation(format!(
                "{} handles given, at most {} allowed",
                handles.len(),
                max_handles
            )));
        }
        Ok(RunPlan::Metrics { handles })
    }

    pub fn kind(&self) -> RunKind {
        match self {
            RunPlan::Discovery { .. } => RunKind::Discovery,
            RunPlan::Metrics { .. } => RunKind::Metrics,
        }
    }

    pub fn subjects(&self) -> &[String] {
        match self {
            RunPlan::Discovery { keywords } => keywords,
            RunPlan::Metrics { handles } => handles,
        }
    }
}

/// Trims lines, strips leading `#`, drops blanks and repeats. First
/// occurrence wins.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .filter(|keyword| !keyword.is_empty())
        .filter(|keyword| seen.insert(keyword.to_lowercase()))
        .map(str::to_string)
        .collect()
}

pub fn normalize_handles<S: AsRef<str>>(handles: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    handles
        .iter()
        .map(|h| h.as_ref().trim().trim_start_matches('@').trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .filter(|h| seen.insert(h.clone()))
        .collect()
}
