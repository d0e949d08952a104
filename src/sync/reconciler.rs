//! Lead, contact and task reconciliation.
//!
//! Internal leads and CRM leads are matched by the CRM lead id. When importing,
//! the CRM is authoritative for the status (through the stage mapping), the
//! responsible user and the lead name; every other field is owned internally and
//! never overwritten from upstream.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::crm::CrmClient;
use crate::crm::types::{
    ContactPayload, CrmLead, CustomFieldValues, EntityRef, LeadPayload, LeadPayloadEmbedded,
    TaskPayload,
};
use crate::error::{CrmError, is_unique_violation};
use crate::models::{LeadStatus, lead, task::TASK_TYPE_CALL};
use crate::repositories::{
    ContactRecord, ContactRepository, LeadStore, TaskRecord, TaskRepository, lead::new_lead,
};
use crate::sync::{StageMapper, SyncOutcome, fan_out};

/// Name used for exported leads without a guest name.
pub const FALLBACK_LEAD_NAME: &str = "Website enquiry";
const FALLBACK_CONTACT_NAME: &str = "Website visitor";
const FOLLOW_UP_TASK_TEXT: &str = "Call the client";

/// Ids assigned while exporting a freshly created lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExportOutcome {
    pub lead_id: Uuid,
    pub crm_contact_id: Option<i64>,
    pub crm_lead_id: i64,
    /// Absent when the follow-up task could not be created
    pub crm_task_id: Option<i64>,
    /// The lead already carried a CRM id; nothing was sent upstream
    pub already_exported: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    client: CrmClient,
    leads: Arc<dyn LeadStore>,
    mapper: StageMapper,
    contacts: ContactRepository,
    tasks: TaskRepository,
    follow_up_task_seconds: i64,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(
        client: CrmClient,
        leads: Arc<dyn LeadStore>,
        mapper: StageMapper,
        contacts: ContactRepository,
        tasks: TaskRepository,
        follow_up_task_seconds: i64,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            leads,
            mapper,
            contacts,
            tasks,
            follow_up_task_seconds,
            concurrency,
        }
    }

    pub fn client(&self) -> &CrmClient {
        &self.client
    }

    pub fn leads(&self) -> &Arc<dyn LeadStore> {
        &self.leads
    }

    pub fn mapper(&self) -> &StageMapper {
        &self.mapper
    }

    pub fn contacts(&self) -> &ContactRepository {
        &self.contacts
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    /// Creates a contact upstream and mirrors it locally. Always creates; a retried
    /// submission may produce a duplicate contact in the CRM.
    #[instrument(skip_all)]
    pub async fn create_external_contact(
        &self,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<i64, CrmError> {
        let mut custom_fields_values = Vec::new();
        if let Some(phone) = phone.filter(|value| !value.is_empty()) {
            custom_fields_values.push(CustomFieldValues::work("PHONE", phone));
        }
        if let Some(email) = email.filter(|value| !value.is_empty()) {
            custom_fields_values.push(CustomFieldValues::work("EMAIL", email));
        }

        let contact_id = self
            .client
            .create_contact(&ContactPayload {
                name: name.to_string(),
                custom_fields_values,
            })
            .await?;

        let record = ContactRecord {
            id: contact_id,
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            account_id: Some(self.client.tokens().account_id()),
            ..ContactRecord::default()
        };
        if let Err(err) = self.contacts.upsert(record).await {
            warn!(external_contact_id = contact_id, error = %err, "contact mirror write failed");
        }

        info!(external_contact_id = contact_id, "contact created in CRM");
        Ok(contact_id)
    }

    /// Creates the upstream lead for an internal one and returns its CRM id. The
    /// caller persists the id.
    #[instrument(skip_all, fields(lead_id = %lead.id))]
    pub async fn create_external_lead(
        &self,
        lead: &lead::Model,
        contact_external_id: Option<i64>,
    ) -> Result<i64, CrmError> {
        let property = self.leads.property_for(lead).await?;
        let guest = lead
            .guest_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let name = match (guest, property.as_ref()) {
            (Some(guest), Some(property)) => format!("{guest} - {}", property.title),
            (Some(guest), None) => guest.to_string(),
            (None, _) => FALLBACK_LEAD_NAME.to_string(),
        };

        let payload = LeadPayload {
            name: Some(name),
            price: Some(property.and_then(|property| property.price).unwrap_or(0)),
            embedded: contact_external_id.map(|id| LeadPayloadEmbedded {
                contacts: vec![EntityRef { id }],
            }),
            ..LeadPayload::default()
        };

        let external_lead_id = self.client.create_lead(&payload).await?;
        info!(external_lead_id, "lead created in CRM");
        Ok(external_lead_id)
    }

    /// Creates a "call the client" task on the lead, due `due_in_seconds` from now.
    #[instrument(skip(self))]
    pub async fn create_follow_up_task(
        &self,
        external_lead_id: i64,
        due_in_seconds: i64,
    ) -> Result<i64, CrmError> {
        let complete_till = Utc::now().timestamp() + due_in_seconds;
        let payload = TaskPayload {
            text: Some(FOLLOW_UP_TASK_TEXT.to_string()),
            complete_till: Some(complete_till),
            entity_id: Some(external_lead_id),
            entity_type: Some("leads".to_string()),
            task_type_id: Some(TASK_TYPE_CALL),
            ..TaskPayload::default()
        };

        let task_id = self.client.create_task(&payload).await?;

        let record = TaskRecord {
            id: task_id,
            text: FOLLOW_UP_TASK_TEXT.to_string(),
            task_type_id: TASK_TYPE_CALL,
            complete_till,
            entity_id: Some(external_lead_id),
            entity_type: Some("leads".to_string()),
            account_id: Some(self.client.tokens().account_id()),
            ..TaskRecord::default()
        };
        if let Err(err) = self.tasks.upsert(record).await {
            warn!(external_task_id = task_id, error = %err, "task mirror write failed");
        }

        Ok(task_id)
    }

    /// Upserts the internal lead matching `external.id`.
    #[instrument(skip_all, fields(external_lead_id = external.id))]
    pub async fn import_lead(&self, external: &CrmLead) -> Result<lead::Model, CrmError> {
        let mapped_status = match external.status_id {
            Some(stage_id) => self.mapper.get_status_for_stage(stage_id).await?,
            None => None,
        };

        if let Some(existing) = self.leads.find_by_external_id(external.id).await? {
            return self.merge_into(existing, external, mapped_status).await;
        }

        let mut created = new_lead(None, None, None, None);
        created.crm_lead_id = Some(external.id);
        created.status = mapped_status.unwrap_or_default();
        created.responsible_user_id = external.responsible_user_id;
        created.crm_lead_name = Some(external.name.clone()).filter(|name| !name.is_empty());
        created.crm_contact_id = first_contact(external);

        match self.leads.save(created).await {
            Ok(saved) => {
                info!(lead_id = %saved.id, "imported new lead from CRM");
                Ok(saved)
            }
            // A concurrent import created the row first.
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .leads
                    .find_by_external_id(external.id)
                    .await?
                    .ok_or_else(|| CrmError::from(err))?;
                self.merge_into(existing, external, mapped_status).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn merge_into(
        &self,
        mut lead: lead::Model,
        external: &CrmLead,
        mapped_status: Option<LeadStatus>,
    ) -> Result<lead::Model, CrmError> {
        if let Some(status) = mapped_status {
            lead.status = status;
        }
        if external.responsible_user_id.is_some() {
            lead.responsible_user_id = external.responsible_user_id;
        }
        if !external.name.is_empty() {
            lead.crm_lead_name = Some(external.name.clone());
        }
        if lead.crm_contact_id.is_none() {
            lead.crm_contact_id = first_contact(external);
        }
        Ok(self.leads.save(lead).await?)
    }

    /// Pushes the internal status and price of `lead` to the CRM lead.
    ///
    /// The status travels as a stage: if the lead's current upstream stage already
    /// maps to the internal status nothing changes, otherwise the first stage of the
    /// same pipeline mapped to that status is used. Without such a stage only the
    /// price is sent, and with nothing to send no request is made.
    #[instrument(skip_all, fields(external_lead_id = external_lead_id, lead_id = %lead.id))]
    pub async fn update_external_lead(
        &self,
        external_lead_id: i64,
        lead: &lead::Model,
    ) -> Result<(), CrmError> {
        let current = self.client.get_lead(external_lead_id).await?;
        let current_status = match current.status_id {
            Some(stage_id) => self.mapper.get_status_for_stage(stage_id).await?,
            None => None,
        };

        let status_id = match (current_status, current.pipeline_id) {
            (Some(status), _) if status == lead.status => None,
            (_, Some(pipeline_id)) => {
                let target = self.mapper.stage_for_status(pipeline_id, lead.status).await?;
                if target.is_none() {
                    warn!(pipeline_id, status = %lead.status, "no stage mapped to status; leaving stage unchanged");
                }
                target
            }
            (_, None) => None,
        };

        let property = self.leads.property_for(lead).await?;
        let payload = LeadPayload {
            status_id,
            pipeline_id: status_id.and(current.pipeline_id),
            price: property.and_then(|property| property.price),
            ..LeadPayload::default()
        };
        if payload.status_id.is_none() && payload.price.is_none() {
            info!("nothing to push; lead left untouched");
            return Ok(());
        }

        self.client.update_lead(external_lead_id, &payload).await?;
        info!(stage_id = ?status_id, "lead pushed to CRM");
        Ok(())
    }

    /// Imports the `limit` most recently updated CRM leads.
    #[instrument(skip(self))]
    pub async fn pull_leads(&self, limit: u32) -> Result<SyncOutcome, CrmError> {
        let external_leads = self.client.list_leads(limit).await?;
        let this = self.clone();

        let outcome = fan_out("leads", external_leads, self.concurrency, move |external| {
            let this = this.clone();
            async move { this.import_lead(&external).await.map(|_| ()) }
        })
        .await;

        info!(synced = outcome.synced, errors = outcome.errors, "lead pull finished");
        Ok(outcome)
    }

    /// Post-creation integration of a local lead: contact, lead, ids persisted,
    /// follow-up task. The local lead stays valid whatever fails upstream.
    #[instrument(skip(self))]
    pub async fn export_new_lead(&self, lead_id: Uuid) -> Result<ExportOutcome, CrmError> {
        let mut lead = self
            .leads
            .find_by_id(lead_id)
            .await?
            .ok_or_else(|| CrmError::not_found("lead", lead_id))?;

        if let Some(crm_lead_id) = lead.crm_lead_id {
            return Ok(ExportOutcome {
                lead_id,
                crm_contact_id: lead.crm_contact_id,
                crm_lead_id,
                crm_task_id: None,
                already_exported: true,
            });
        }

        if lead.crm_contact_id.is_none() {
            let name = lead
                .guest_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_CONTACT_NAME.to_string());
            let contact_id = self
                .create_external_contact(
                    &name,
                    lead.guest_email.as_deref(),
                    lead.guest_phone.as_deref(),
                )
                .await?;
            // Persist right away so a retried export reuses the contact.
            lead.crm_contact_id = Some(contact_id);
            lead = self.leads.save(lead).await?;
        }

        let crm_lead_id = self.create_external_lead(&lead, lead.crm_contact_id).await?;
        lead.crm_lead_id = Some(crm_lead_id);
        let lead = self.leads.save(lead).await?;

        let crm_task_id = match self
            .create_follow_up_task(crm_lead_id, self.follow_up_task_seconds)
            .await
        {
            Ok(task_id) => Some(task_id),
            Err(err) => {
                warn!(external_lead_id = crm_lead_id, error = %err, "follow-up task creation failed");
                None
            }
        };

        Ok(ExportOutcome {
            lead_id,
            crm_contact_id: lead.crm_contact_id,
            crm_lead_id,
            crm_task_id,
            already_exported: false,
        })
    }

    /// Pushes an exported lead's internal changes upstream.
    pub async fn push_lead(&self, lead_id: Uuid) -> Result<(), CrmError> {
        let lead = self
            .leads
            .find_by_id(lead_id)
            .await?
            .ok_or_else(|| CrmError::not_found("lead", lead_id))?;
        let external_lead_id = lead.crm_lead_id.ok_or_else(|| {
            CrmError::Validation(format!("lead {lead_id} has not been exported to the CRM"))
        })?;
        self.update_external_lead(external_lead_id, &lead).await
    }
}

fn first_contact(external: &CrmLead) -> Option<i64> {
    external
        .embedded
        .as_ref()
        .and_then(|embedded| embedded.contacts.first())
        .map(|contact| contact.id)
}
