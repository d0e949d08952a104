//! Stage-to-status mapping.
//!
//! Administrators map each CRM stage to one of the three internal lead statuses.
//! For unmapped stages a heuristic suggests a status from the stage name. Rules are
//! evaluated top to bottom and the first match wins:
//!
//! 1. System stage ids `142` (closed won) and `143` (closed lost) map to `CLOSED`.
//! 2. Lost-like tokens ("lost", "rejected", "не реализовано", ...) map to `CLOSED`.
//!    They precede the won tokens so "not realized" is not read as "realized".
//! 3. Won-like tokens ("won", "signed", "closed", ...) map to `CLOSED`.
//! 4. In-progress tokens ("in progress", "qualification", "negotiation", ...) map to
//!    `IN_PROGRESS`.
//! 5. Intake tokens ("unsorted", "new", "incoming", ...) map to `NEW`. Checked last
//!    because "new" is a substring of many longer names.
//!
//! Matching is a case-insensitive substring test on the stage name.

use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::CrmError;
use crate::models::{LeadStatus, stage};
use crate::repositories::TaxonomyRepository;

pub use crate::models::stage::{LOST_STAGE_ID, WON_STAGE_ID};

struct NameRule {
    label: &'static str,
    status: LeadStatus,
    tokens: &'static [&'static str],
}

const NAME_RULES: &[NameRule] = &[
    NameRule {
        label: "lost",
        status: LeadStatus::Closed,
        tokens: &[
            "lost",
            "rejected",
            "declined",
            "not realized",
            "cancel",
            "refused",
            "отказ",
            "не реализовано",
        ],
    },
    NameRule {
        label: "won",
        status: LeadStatus::Closed,
        tokens: &[
            "won",
            "signed",
            "closed",
            "success",
            "realized",
            "paid",
            "реализовано",
        ],
    },
    NameRule {
        label: "in progress",
        status: LeadStatus::InProgress,
        tokens: &[
            "in progress",
            "in work",
            "qualification",
            "presentation",
            "negotiation",
            "meeting",
            "viewing",
            "proposal",
            "contacted",
            "decision",
            "в работе",
            "переговоры",
        ],
    },
    NameRule {
        label: "new",
        status: LeadStatus::New,
        tokens: &[
            "unsorted",
            "incoming",
            "new",
            "first contact",
            "неразобран",
            "новая",
        ],
    },
];

/// Suggested status for a stage, with the rule that produced it.
pub fn suggest_status(stage_id: i64, stage_name: &str) -> Option<(LeadStatus, String)> {
    match stage_id {
        WON_STAGE_ID => {
            return Some((LeadStatus::Closed, "system stage 142 (closed won)".to_string()));
        }
        LOST_STAGE_ID => {
            return Some((LeadStatus::Closed, "system stage 143 (closed lost)".to_string()));
        }
        _ => {}
    }

    let name = stage_name.to_lowercase();
    NAME_RULES.iter().find_map(|rule| {
        rule.tokens
            .iter()
            .find(|token| name.contains(*token))
            .map(|token| {
                (
                    rule.status,
                    format!("name contains \"{token}\" ({} rule)", rule.label),
                )
            })
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MappingSuggestion {
    pub stage_id: i64,
    pub stage_name: String,
    pub pipeline_id: i64,
    pub suggested_status: LeadStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct AutoMappingOutcome {
    pub updated: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone)]
pub struct StageMapper {
    repo: TaxonomyRepository,
}

impl StageMapper {
    pub fn new(repo: TaxonomyRepository) -> Self {
        Self { repo }
    }

    /// Sets or clears the mapping of one stage.
    pub async fn update_stage_mapping(
        &self,
        stage_id: i64,
        status: Option<LeadStatus>,
    ) -> Result<stage::Model, CrmError> {
        let updated = self
            .repo
            .set_stage_mapping(stage_id, status)
            .await?
            .ok_or_else(|| CrmError::not_found("stage", stage_id))?;
        info!(stage_id, status = ?status, "stage mapping updated");
        Ok(updated)
    }

    /// Internal status for a stage; `None` when the stage is unknown or unmapped.
    pub async fn get_status_for_stage(&self, stage_id: i64) -> Result<Option<LeadStatus>, CrmError> {
        Ok(self
            .repo
            .find_stage(stage_id)
            .await?
            .and_then(|stage| stage.mapped_status))
    }

    /// Stage to move a lead to so that it reads as `status` within `pipeline_id`.
    pub async fn stage_for_status(
        &self,
        pipeline_id: i64,
        status: LeadStatus,
    ) -> Result<Option<i64>, CrmError> {
        Ok(self
            .repo
            .stage_for_status(pipeline_id, status)
            .await?
            .map(|stage| stage.id))
    }

    /// Suggestions for every unmapped stage a rule matches, ordered by pipeline,
    /// sort order and id.
    pub async fn suggest_mappings(&self) -> Result<Vec<MappingSuggestion>, CrmError> {
        let stages = self.repo.unmapped_stages().await?;
        Ok(stages
            .into_iter()
            .filter_map(|stage| {
                suggest_status(stage.id, &stage.name).map(|(status, reason)| MappingSuggestion {
                    stage_id: stage.id,
                    stage_name: stage.name,
                    pipeline_id: stage.pipeline_id,
                    suggested_status: status,
                    reason,
                })
            })
            .collect())
    }

    /// Applies every current suggestion. Failures are counted as skipped.
    pub async fn apply_auto_mapping(&self) -> Result<AutoMappingOutcome, CrmError> {
        let suggestions = self.suggest_mappings().await?;
        let mut outcome = AutoMappingOutcome::default();

        for suggestion in suggestions {
            match self
                .update_stage_mapping(suggestion.stage_id, Some(suggestion.suggested_status))
                .await
            {
                Ok(_) => outcome.updated += 1,
                Err(err) => {
                    warn!(stage_id = suggestion.stage_id, error = %err, "auto-mapping skipped stage");
                    outcome.skipped += 1;
                }
            }
        }

        info!(updated = outcome.updated, skipped = outcome.skipped, "auto-mapping applied");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(id: i64, name: &str) -> Option<LeadStatus> {
        suggest_status(id, name).map(|(status, _)| status)
    }

    #[test]
    fn intake_and_won_examples() {
        assert_eq!(status_of(10, "New Unsorted"), Some(LeadStatus::New));
        assert_eq!(status_of(11, "Deal Won"), Some(LeadStatus::Closed));
    }

    #[test]
    fn system_stage_ids_win_over_names() {
        assert_eq!(status_of(142, "Успешно реализовано"), Some(LeadStatus::Closed));
        assert_eq!(status_of(143, "New"), Some(LeadStatus::Closed));
    }

    #[test]
    fn lost_is_checked_before_won() {
        let (status, reason) = suggest_status(20, "Не реализовано").unwrap();
        assert_eq!(status, LeadStatus::Closed);
        assert!(reason.contains("lost"));

        let (_, reason) = suggest_status(21, "Closed - lost").unwrap();
        assert!(reason.contains("lost"));
    }

    #[test]
    fn in_progress_beats_generic_new() {
        assert_eq!(
            status_of(30, "New client negotiation"),
            Some(LeadStatus::InProgress)
        );
        assert_eq!(status_of(31, "Qualification"), Some(LeadStatus::InProgress));
        assert_eq!(status_of(32, "Переговоры"), Some(LeadStatus::InProgress));
    }

    #[test]
    fn unmatched_names_have_no_suggestion() {
        assert_eq!(status_of(40, "Waiting for documents"), None);
    }

    #[test]
    fn suggestions_are_deterministic() {
        let first = suggest_status(50, "Presentation scheduled");
        let second = suggest_status(50, "Presentation scheduled");
        assert_eq!(first, second);
    }
}
