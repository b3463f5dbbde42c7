use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Keyword policy deciding which labels are claimed.
///
/// A keyword never sits in both lists; every constructor and mutator checks
/// this, and `validate` re-checks values that came straight from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordFilter {
    claim_all: bool,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl KeywordFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self, ConfigError> {
        let filter = Self {
            claim_all: false,
            include,
            exclude,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Claims every label not matching an exclude keyword.
    pub fn wildcard(exclude: Vec<String>) -> Result<Self, ConfigError> {
        let filter = Self {
            claim_all: true,
            include: Vec::new(),
            exclude,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn is_wildcard(&self) -> bool {
        self.claim_all
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// False when nothing could ever be claimed ("auto-claim off").
    pub fn is_active(&self) -> bool {
        self.claim_all || !self.include.is_empty()
    }

    pub fn is_excluded(&self, label: &str) -> bool {
        self.exclude.iter().any(|kw| label.contains(kw.as_str()))
    }

    pub fn is_included(&self, label: &str) -> bool {
        self.include.iter().any(|kw| label.contains(kw.as_str()))
    }

    pub fn accepts(&self, label: &str) -> bool {
        if self.is_excluded(label) {
            return false;
        }
        self.claim_all || self.is_included(label)
    }

    pub fn add_include(&mut self, keyword: &str) -> Result<(), ConfigError> {
        let keyword = self.check_new(keyword)?;
        self.include.push(keyword);
        Ok(())
    }

    pub fn add_exclude(&mut self, keyword: &str) -> Result<(), ConfigError> {
        let keyword = self.check_new(keyword)?;
        self.exclude.push(keyword);
        Ok(())
    }

    /// Removes the keyword from whichever list holds it.
    pub fn remove(&mut self, keyword: &str) -> bool {
        let before = self.include.len() + self.exclude.len();
        self.include.retain(|kw| kw != keyword);
        self.exclude.retain(|kw| kw != keyword);
        before != self.include.len() + self.exclude.len()
    }

    pub fn set_claim_all(&mut self, claim_all: bool) {
        self.claim_all = claim_all;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.include.len());
        for kw in &self.include {
            if kw.is_empty() {
                return Err(ConfigError::EmptyKeyword);
            }
            if seen.contains(&kw.as_str()) {
                return Err(ConfigError::DuplicateKeyword(kw.clone()));
            }
            seen.push(kw);
        }

        let mut seen_excluded: Vec<&str> = Vec::with_capacity(self.exclude.len());
        for kw in &self.exclude {
            if kw.is_empty() {
                return Err(ConfigError::EmptyKeyword);
            }
            if seen.contains(&kw.as_str()) {
                return Err(ConfigError::ContradictoryKeyword(kw.clone()));
            }
            if seen_excluded.contains(&kw.as_str()) {
                return Err(ConfigError::DuplicateKeyword(kw.clone()));
            }
            seen_excluded.push(kw);
        }

        Ok(())
    }

    /// Human-readable policy lines for the status output.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.claim_all {
            lines.push("Will auto-claim all items.".to_string());
        } else if self.include.is_empty() {
            lines.push("Auto-claim off.".to_string());
            return lines;
        } else {
            lines.push(format!(
                "Will claim items with keyword(s): {}.",
                self.include.join(", ")
            ));
        }
        if !self.exclude.is_empty() {
            lines.push(format!(
                "Will not claim items with keyword(s): {}.",
                self.exclude.join(", ")
            ));
        }
        lines
    }

    fn check_new(&self, keyword: &str) -> Result<String, ConfigError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ConfigError::EmptyKeyword);
        }
        let in_include = self.include.iter().any(|kw| kw == keyword);
        let in_exclude = self.exclude.iter().any(|kw| kw == keyword);
        if in_include || in_exclude {
            return Err(ConfigError::DuplicateKeyword(keyword.to_string()));
        }
        Ok(keyword.to_string())
    }
}
