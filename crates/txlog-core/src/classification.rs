// ABOUTME: Error classification for transactions and segments
// ABOUTME: Orders business, infrastructure, and internal failures by severity
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of the outcome of a unit of work.
///
/// Variants are ordered by severity so that [`Classification::escalate`]
/// keeps the most severe classification observed during the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Completed without error
    #[default]
    None,
    /// Well-formed request rejected by domain rules
    Business,
    /// Transient dependency failure (database down, upstream timeout)
    Infrastructure,
    /// Unexpected defect such as a panic
    Internal,
}

impl Classification {
    /// Combine with another classification, keeping the more severe one
    #[must_use]
    pub fn escalate(self, other: Self) -> Self {
        self.max(other)
    }

    /// Whether this classification represents any kind of failure
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether failures of this class are worth retrying
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Infrastructure | Self::Internal)
    }

    /// Stable lowercase name used in log records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Business => "business",
            Self::Infrastructure => "infrastructure",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalate_keeps_most_severe() {
        assert_eq!(
            Classification::Business.escalate(Classification::Infrastructure),
            Classification::Infrastructure
        );
        assert_eq!(
            Classification::Internal.escalate(Classification::Business),
            Classification::Internal
        );
        assert_eq!(
            Classification::None.escalate(Classification::None),
            Classification::None
        );
    }

    #[test]
    fn business_is_not_retryable() {
        assert!(!Classification::Business.is_retryable());
        assert!(Classification::Infrastructure.is_retryable());
    }
}
