//! Task proposals and their structural validation
//!
//! Generator output is untrusted. Enumerated fields are typed, so an unknown
//! category or level is rejected while deserializing; the remaining checks run
//! in [`validate_proposals`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bug,
    Feature,
    Refactor,
    Test,
    Docs,
    Performance,
    Security,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bug => "bug",
            Category::Feature => "feature",
            Category::Refactor => "refactor",
            Category::Test => "test",
            Category::Docs => "docs",
            Category::Performance => "performance",
            Category::Security => "security",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact, effort and risk rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

/// A place in the workspace that motivates a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProposal {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub impact: Level,
    pub effort: Level,
    pub risk: Level,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("generator returned no proposals")]
    Empty,

    #[error("generator returned {count} proposals, at most {max} allowed")]
    TooMany { count: usize, max: usize },

    #[error("proposal {index}: {field} is empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("proposal {index}: {found} evidence citations, at least {required} required")]
    InsufficientEvidence {
        index: usize,
        found: usize,
        required: usize,
    },

    #[error("proposal {index}: evidence citation {citation} has an empty path")]
    EmptyEvidencePath { index: usize, citation: usize },
}

/// Accept a batch only if every proposal is complete and cites enough evidence
pub fn validate_proposals(
    proposals: &[TaskProposal],
    min_evidence: usize,
    max_tasks: usize,
) -> Result<(), ProposalError> {
    if proposals.is_empty() {
        return Err(ProposalError::Empty);
    }
    if proposals.len() > max_tasks {
        return Err(ProposalError::TooMany {
            count: proposals.len(),
            max: max_tasks,
        });
    }

    for (index, proposal) in proposals.iter().enumerate() {
        if proposal.title.trim().is_empty() {
            return Err(ProposalError::EmptyField {
                index,
                field: "title",
            });
        }
        if proposal.description.trim().is_empty() {
            return Err(ProposalError::EmptyField {
                index,
                field: "description",
            });
        }
        if proposal.evidence.len() < min_evidence {
            return Err(ProposalError::InsufficientEvidence {
                index,
                found: proposal.evidence.len(),
                required: min_evidence,
            });
        }
        if let Some(citation) = proposal
            .evidence
            .iter()
            .position(|e| e.path.trim().is_empty())
        {
            return Err(ProposalError::EmptyEvidencePath { index, citation });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(evidence: usize) -> TaskProposal {
        TaskProposal {
            title: "Fix null check".into(),
            description: "The parser dereferences an empty option".into(),
            category: Category::Bug,
            impact: Level::High,
            effort: Level::Low,
            risk: Level::Low,
            evidence: (0..evidence)
                .map(|i| Evidence {
                    path: format!("src/file{}.rs", i),
                    line: Some(10),
                    note: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_complete_batch() {
        assert!(validate_proposals(&[proposal(2), proposal(3)], 2, 12).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_batches() {
        assert_eq!(validate_proposals(&[], 2, 12), Err(ProposalError::Empty));
        assert_eq!(
            validate_proposals(&[proposal(2), proposal(2)], 2, 1),
            Err(ProposalError::TooMany { count: 2, max: 1 })
        );
    }

    #[test]
    fn requires_evidence() {
        assert_eq!(
            validate_proposals(&[proposal(2), proposal(1)], 2, 12),
            Err(ProposalError::InsufficientEvidence {
                index: 1,
                found: 1,
                required: 2
            })
        );

        let mut blank = proposal(2);
        blank.evidence[1].path = "  ".into();
        assert_eq!(
            validate_proposals(&[blank], 2, 12),
            Err(ProposalError::EmptyEvidencePath {
                index: 0,
                citation: 1
            })
        );
    }

    #[test]
    fn requires_title_and_description() {
        let mut untitled = proposal(2);
        untitled.title = String::new();
        assert!(matches!(
            validate_proposals(&[untitled], 2, 12),
            Err(ProposalError::EmptyField { field: "title", .. })
        ));
    }

    #[test]
    fn unknown_enum_values_fail_to_parse() {
        let json = serde_json::json!({
            "title": "t",
            "description": "d",
            "category": "chore",
            "impact": "low",
            "effort": "low",
            "risk": "low",
            "evidence": []
        });
        assert!(serde_json::from_value::<TaskProposal>(json).is_err());

        let json = serde_json::json!({
            "title": "t",
            "description": "d",
            "category": "docs",
            "impact": "huge",
            "effort": "low",
            "risk": "low"
        });
        assert!(serde_json::from_value::<TaskProposal>(json).is_err());
    }
}
