use tracing::{debug, info};

use crate::signals::Digit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCode {
    name: String,
    value: Vec<Digit>,
    used: bool,
}

impl TargetCode {
    pub fn new(name: impl Into<String>, value: Vec<Digit>) -> Self {
        Self {
            name: name.into(),
            value,
            used: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[Digit] {
        &self.value
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn matches(&self, entered: &[Digit]) -> bool {
        self.value == entered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMatch {
    pub index: usize,
    pub name: String,
    pub already_used: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CodeValidator {
    codes: Vec<TargetCode>,
}

impl CodeValidator {
    pub fn new(codes: Vec<TargetCode>) -> Self {
        Self { codes }
    }

    pub fn validate(&self, entered: &[Digit]) -> Option<CodeMatch> {
        let (index, code) = self
            .codes
            .iter()
            .enumerate()
            .find(|(_, code)| code.matches(entered))?;
        debug!(index, name = code.name(), used = code.used, "code_matched");
        Some(CodeMatch {
            index,
            name: code.name.clone(),
            already_used: code.used,
        })
    }

    /// Returns `true` only when the code flipped from unused to used.
    pub fn mark_used(&mut self, index: usize) -> bool {
        let Some(code) = self.codes.get_mut(index) else {
            return false;
        };
        if code.used {
            return false;
        }
        code.used = true;
        info!(index, name = code.name.as_str(), "code_marked_used");
        true
    }

    pub fn codes(&self) -> &[TargetCode] {
        &self.codes
    }

    pub fn unused_count(&self) -> usize {
        self.codes.iter().filter(|code| !code.used).count()
    }
}
