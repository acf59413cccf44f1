//! Conflict resolution
//!
//! Builds the resolved entity from the successful results of one sync
//! operation. Candidates arrive in priority order (lowest priority value
//! first); every tie falls back to that order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_kernel::{AdapterId, NormalizedEntity};

use crate::report::Conflict;

/// Deployment-wide policy for conflicting fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The primary adapter's value wins
    #[default]
    PrimaryWins,
    /// The value from the most recently updated result wins, per field
    NewestWins,
    /// The primary's value is a placeholder; a human decides
    ManualReview,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::PrimaryWins => "primary_wins",
            ResolutionStrategy::NewestWins => "newest_wins",
            ResolutionStrategy::ManualReview => "manual_review",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary_wins" => Ok(ResolutionStrategy::PrimaryWins),
            "newest_wins" => Ok(ResolutionStrategy::NewestWins),
            "manual_review" => Ok(ResolutionStrategy::ManualReview),
            other => Err(format!("unknown resolution strategy '{}'", other)),
        }
    }
}

/// A successful result taking part in resolution
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub adapter_id: &'a AdapterId,
    pub entity: &'a NormalizedEntity,
}

/// Resolved entity plus the decisions behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub entity: NormalizedEntity,
    pub primary_adapter: AdapterId,
    pub requires_manual_review: bool,
}

/// Resolves conflicts between `candidates`, given in priority order
///
/// The primary is `configured_primary` when it is among the candidates,
/// otherwise the highest-priority candidate. Returns `None` when there are
/// no candidates.
pub fn resolve(
    candidates: &[Candidate<'_>],
    conflicts: &[Conflict],
    strategy: ResolutionStrategy,
    configured_primary: Option<&AdapterId>,
) -> Option<Resolution> {
    let primary = configured_primary
        .and_then(|id| candidates.iter().find(|c| c.adapter_id == id))
        .or_else(|| candidates.first())?;

    let conflicting: BTreeSet<&str> = conflicts.iter().map(|c| c.field.as_str()).collect();
    let field_names: BTreeSet<&String> = candidates
        .iter()
        .flat_map(|c| c.entity.fields.keys())
        .collect();

    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    for name in field_names {
        let having: Vec<&Candidate<'_>> = candidates
            .iter()
            .filter(|c| c.entity.fields.contains_key(name))
            .collect();

        let winner = if !conflicting.contains(name.as_str()) {
            having.first().copied()
        } else {
            match strategy {
                ResolutionStrategy::NewestWins => newest(&having),
                ResolutionStrategy::PrimaryWins | ResolutionStrategy::ManualReview => having
                    .iter()
                    .copied()
                    .find(|c| c.adapter_id == primary.adapter_id)
                    .or_else(|| having.first().copied()),
            }
        };

        if let Some(value) = winner.and_then(|c| c.entity.fields.get(name)) {
            fields.insert(name.clone(), value.clone());
        }
    }

    let entity = NormalizedEntity {
        external_id: primary.entity.external_id.clone(),
        fields,
        updated_at: candidates.iter().filter_map(|c| c.entity.updated_at).max(),
    };

    Some(Resolution {
        entity,
        primary_adapter: primary.adapter_id.clone(),
        requires_manual_review: strategy == ResolutionStrategy::ManualReview
            && !conflicts.is_empty(),
    })
}

// Latest `updated_at` wins; a missing timestamp loses to any present one, and
// equal timestamps keep the earlier (higher-priority) candidate
fn newest<'a, 'b>(having: &[&'b Candidate<'a>]) -> Option<&'b Candidate<'a>> {
    having.iter().copied().fold(None, |best: Option<&Candidate<'a>>, candidate| match best {
        Some(current) if candidate.entity.updated_at <= current.entity.updated_at => Some(current),
        _ => Some(candidate),
    })
}
