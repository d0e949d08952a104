//! Webhook event routing.
//!
//! A delivery is a grab-bag of independent event arrays. It is decoded once into
//! [`WebhookEvent`]s; absent or non-array sections mean "no events of that kind",
//! and individually malformed entries are rejected without affecting the rest.
//! Events of one delivery are processed in order, each failure counted and logged.

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::crm::types::{StringOrInt, flexible_id};
use crate::error::CrmError;
use crate::repositories::{ContactRecord, TaskRecord};
use crate::sync::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    LeadStatusChanged {
        lead_id: i64,
        status_id: i64,
        pipeline_id: Option<i64>,
    },
    LeadAdded { lead_id: i64 },
    LeadUpdated { lead_id: i64 },
    TaskAdded { task_id: i64 },
    TaskUpdated { task_id: i64 },
    TaskDeleted { task_id: i64 },
    ContactAdded { contact_id: i64 },
    ContactUpdated { contact_id: i64 },
}

impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LeadStatusChanged { .. } => "lead_status",
            Self::LeadAdded { .. } => "lead_add",
            Self::LeadUpdated { .. } => "lead_update",
            Self::TaskAdded { .. } => "task_add",
            Self::TaskUpdated { .. } => "task_update",
            Self::TaskDeleted { .. } => "task_delete",
            Self::ContactAdded { .. } => "contact_add",
            Self::ContactUpdated { .. } => "contact_update",
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdItem {
    #[serde(deserialize_with = "flexible_id")]
    id: i64,
}

#[derive(Debug, Deserialize)]
struct StatusItem {
    #[serde(deserialize_with = "flexible_id")]
    id: i64,
    #[serde(deserialize_with = "flexible_id")]
    status_id: i64,
    #[serde(default)]
    pipeline_id: Option<StringOrInt>,
}

/// Result of decoding one delivery.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedWebhook {
    pub events: Vec<WebhookEvent>,
    /// Entries that were present but malformed
    pub rejected: u32,
    /// Account the delivery claims to come from
    pub account_id: Option<i64>,
}

fn section<'a>(payload: &'a Value, entity: &str, action: &str) -> &'a [Value] {
    payload
        .get(entity)
        .and_then(|group| group.get(action))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn decode_section<T, F>(
    payload: &Value,
    entity: &str,
    action: &str,
    decoded: &mut DecodedWebhook,
    to_event: F,
) where
    T: for<'de> Deserialize<'de>,
    F: Fn(T) -> WebhookEvent,
{
    for raw in section(payload, entity, action) {
        match T::deserialize(raw) {
            Ok(item) => decoded.events.push(to_event(item)),
            Err(err) => {
                warn!(entity, action, error = %err, "rejected malformed webhook entry");
                decoded.rejected += 1;
            }
        }
    }
}

/// Decodes a delivery body into typed events.
pub fn decode(payload: &Value) -> DecodedWebhook {
    let mut decoded = DecodedWebhook {
        account_id: payload
            .get("account")
            .and_then(|account| account.get("id"))
            .and_then(|id| StringOrInt::deserialize(id).ok())
            .and_then(|id| id.as_i64()),
        ..DecodedWebhook::default()
    };

    decode_section(payload, "leads", "status", &mut decoded, |item: StatusItem| {
        WebhookEvent::LeadStatusChanged {
            lead_id: item.id,
            status_id: item.status_id,
            pipeline_id: item.pipeline_id.and_then(|id| id.as_i64()),
        }
    });
    decode_section(payload, "leads", "add", &mut decoded, |item: IdItem| {
        WebhookEvent::LeadAdded { lead_id: item.id }
    });
    decode_section(payload, "leads", "update", &mut decoded, |item: IdItem| {
        WebhookEvent::LeadUpdated { lead_id: item.id }
    });
    decode_section(payload, "tasks", "add", &mut decoded, |item: IdItem| {
        WebhookEvent::TaskAdded { task_id: item.id }
    });
    decode_section(payload, "tasks", "update", &mut decoded, |item: IdItem| {
        WebhookEvent::TaskUpdated { task_id: item.id }
    });
    decode_section(payload, "tasks", "delete", &mut decoded, |item: IdItem| {
        WebhookEvent::TaskDeleted { task_id: item.id }
    });
    decode_section(payload, "contacts", "add", &mut decoded, |item: IdItem| {
        WebhookEvent::ContactAdded {
            contact_id: item.id,
        }
    });
    decode_section(payload, "contacts", "update", &mut decoded, |item: IdItem| {
        WebhookEvent::ContactUpdated {
            contact_id: item.id,
        }
    });

    if !section(payload, "leads", "delete").is_empty() {
        debug!("ignoring lead delete events; leads are owned by the application");
    }

    decoded
}

/// Acknowledgement returned to the webhook sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct WebhookOutcome {
    pub processed: u32,
    pub errors: u32,
}

#[derive(Clone)]
pub struct WebhookRouter {
    reconciler: Reconciler,
    account_id: i64,
}

impl WebhookRouter {
    pub fn new(reconciler: Reconciler, account_id: i64) -> Self {
        Self {
            reconciler,
            account_id,
        }
    }

    /// Processes every event of the delivery; never fails as a whole.
    #[instrument(skip_all)]
    pub async fn handle(&self, payload: &Value) -> WebhookOutcome {
        let decoded = decode(payload);

        if let Some(account_id) = decoded.account_id.filter(|id| *id != self.account_id) {
            warn!(
                account_id,
                expected = self.account_id,
                "ignoring webhook for a different CRM account"
            );
            return WebhookOutcome::default();
        }

        let mut outcome = WebhookOutcome {
            processed: 0,
            errors: decoded.rejected,
        };

        for event in decoded.events {
            match self.dispatch(event).await {
                Ok(()) => {
                    outcome.processed += 1;
                    counter!("crm_webhook_events_total", "kind" => event.kind(), "outcome" => "success")
                        .increment(1);
                }
                Err(err) => {
                    outcome.errors += 1;
                    counter!("crm_webhook_events_total", "kind" => event.kind(), "outcome" => "error")
                        .increment(1);
                    warn!(?event, error = %err, "webhook event failed");
                }
            }
        }

        info!(
            processed = outcome.processed,
            errors = outcome.errors,
            "webhook delivery handled"
        );
        outcome
    }

    async fn dispatch(&self, event: WebhookEvent) -> Result<(), CrmError> {
        let reconciler = &self.reconciler;
        match event {
            WebhookEvent::LeadStatusChanged {
                lead_id, status_id, ..
            } => match reconciler.leads().find_by_external_id(lead_id).await? {
                Some(mut lead) => {
                    match reconciler.mapper().get_status_for_stage(status_id).await? {
                        Some(status) => {
                            lead.status = status;
                            reconciler.leads().save(lead).await?;
                        }
                        None => {
                            debug!(external_lead_id = lead_id, stage_id = status_id, "stage unmapped; status left unchanged");
                        }
                    }
                    Ok(())
                }
                None => {
                    let external = reconciler.client().get_lead(lead_id).await?;
                    reconciler.import_lead(&external).await.map(|_| ())
                }
            },
            WebhookEvent::LeadAdded { lead_id } | WebhookEvent::LeadUpdated { lead_id } => {
                let external = reconciler.client().get_lead(lead_id).await?;
                reconciler.import_lead(&external).await.map(|_| ())
            }
            WebhookEvent::TaskAdded { task_id } | WebhookEvent::TaskUpdated { task_id } => {
                let task = reconciler.client().get_task(task_id).await?;
                reconciler.tasks().upsert(TaskRecord::from(&task)).await?;
                Ok(())
            }
            WebhookEvent::TaskDeleted { task_id } => {
                reconciler.tasks().delete(task_id).await?;
                Ok(())
            }
            WebhookEvent::ContactAdded { contact_id }
            | WebhookEvent::ContactUpdated { contact_id } => {
                let contact = reconciler.client().get_contact(contact_id).await?;
                reconciler
                    .contacts()
                    .upsert(ContactRecord::from(&contact))
                    .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_section_and_accepts_string_ids() {
        let payload = json!({
            "leads": {
                "status": [{"id": "501", "status_id": "142", "pipeline_id": 10, "old_status_id": 100}],
                "add": [{"id": 502}],
                "update": [{"id": "503"}]
            },
            "tasks": {"add": [{"id": 9}], "update": [{"id": 10}], "delete": [{"id": "11"}]},
            "contacts": {"add": [{"id": 77}], "update": [{"id": 78}]},
            "account": {"id": "31000001", "subdomain": "agency"}
        });

        let decoded = decode(&payload);
        assert_eq!(decoded.rejected, 0);
        assert_eq!(decoded.account_id, Some(31_000_001));
        assert_eq!(
            decoded.events,
            vec![
                WebhookEvent::LeadStatusChanged {
                    lead_id: 501,
                    status_id: 142,
                    pipeline_id: Some(10)
                },
                WebhookEvent::LeadAdded { lead_id: 502 },
                WebhookEvent::LeadUpdated { lead_id: 503 },
                WebhookEvent::TaskAdded { task_id: 9 },
                WebhookEvent::TaskUpdated { task_id: 10 },
                WebhookEvent::TaskDeleted { task_id: 11 },
                WebhookEvent::ContactAdded { contact_id: 77 },
                WebhookEvent::ContactUpdated { contact_id: 78 },
            ]
        );
    }

    #[test]
    fn malformed_sections_are_skipped_and_bad_entries_rejected() {
        let payload = json!({
            "leads": {"status": "not-an-array", "update": [{"id": 1}, {"id": "abc"}, {"name": "no id"}]},
            "tasks": null
        });

        let decoded = decode(&payload);
        assert_eq!(decoded.events, vec![WebhookEvent::LeadUpdated { lead_id: 1 }]);
        assert_eq!(decoded.rejected, 2);
    }

    #[test]
    fn empty_payload_has_no_events() {
        assert_eq!(decode(&json!({})), DecodedWebhook::default());
        assert_eq!(decode(&json!([])), DecodedWebhook::default());
    }
}
