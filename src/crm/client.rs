//! # CRM Gateway
//!
//! Thin typed client over the CRM REST API (`/api/v4`). Each call fetches its
//! bearer token from the [`TokenManager`]; any non-2xx answer is surfaced as
//! [`CrmError::Upstream`] carrying the operation name and the upstream body.
//! Nothing is retried here: most upstream failures are semantic, and retry policy
//! belongs to the caller.

use metrics::counter;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::crm::body_snippet;
use crate::crm::token::TokenManager;
use crate::crm::types::{
    ContactPayload, CreatedEmbedded, CrmContact, CrmLead, CrmPipeline, CrmRole, CrmTask, CrmUser,
    LeadPayload, LeadsEmbedded, Page, PipelinesEmbedded, RolesEmbedded, TaskPayload,
    UsersEmbedded,
};
use crate::error::CrmError;

/// Largest page the CRM serves.
pub const MAX_PAGE_SIZE: u32 = 250;
/// Hard stop for paged collections.
const MAX_PAGES: u32 = 100;

#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    api_base: String,
}

impl CrmClient {
    /// `base_url` is the account origin, e.g. `https://agency.amocrm.ru`.
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<TokenManager>,
        base_url: &str,
    ) -> Result<Self, CrmError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| CrmError::Validation(format!("invalid CRM base url '{base_url}': {err}")))?;
        Ok(Self {
            http,
            tokens,
            api_base: format!("{}/api/v4", parsed.as_str().trim_end_matches('/')),
        })
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CrmError> {
        let token = self.tokens.get_valid_access_token().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    /// Sends the request and decodes a JSON body. `Ok(None)` means HTTP 204.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, CrmError> {
        let result = self.send_inner(operation, builder).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        counter!("crm_api_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        result
    }

    async fn send_inner<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, CrmError> {
        let response = builder
            .send()
            .await
            .map_err(|err| CrmError::from_reqwest(operation, err))?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "CRM response");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Upstream {
                operation,
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| CrmError::from_reqwest(operation, err))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| CrmError::Decode {
                operation,
                message: err.to_string(),
            })
    }

    async fn get_one<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        entity: &'static str,
        path: &str,
        id: i64,
    ) -> Result<T, CrmError> {
        let builder = self.request(Method::GET, path).await?;
        self.send(operation, builder)
            .await?
            .ok_or_else(|| CrmError::not_found(entity, id))
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Option<Page<CreatedEmbedded>>, CrmError> {
        let builder = self.request(method, path).await?.json(body);
        self.send(operation, builder).await
    }

    fn first_id(
        operation: &'static str,
        page: Option<Page<CreatedEmbedded>>,
        pick: impl Fn(&CreatedEmbedded) -> Option<i64>,
    ) -> Result<i64, CrmError> {
        page.as_ref()
            .and_then(|page| pick(&page.embedded))
            .ok_or_else(|| CrmError::Decode {
                operation,
                message: "response did not contain the created id".to_string(),
            })
    }

    // ---- leads ----

    pub async fn get_lead(&self, id: i64) -> Result<CrmLead, CrmError> {
        self.get_one("get_lead", "lead", &format!("/leads/{id}?with=contacts"), id)
            .await
    }

    pub async fn create_lead(&self, lead: &LeadPayload) -> Result<i64, CrmError> {
        let page = self
            .write("create_lead", Method::POST, "/leads", std::slice::from_ref(lead))
            .await?;
        Self::first_id("create_lead", page, |embedded| {
            embedded.leads.first().map(|lead| lead.id)
        })
    }

    pub async fn update_lead(&self, id: i64, lead: &LeadPayload) -> Result<(), CrmError> {
        let body = LeadPayload {
            id: Some(id),
            ..lead.clone()
        };
        self.write("update_lead", Method::PATCH, "/leads", &[body])
            .await?;
        Ok(())
    }

    /// Most recently updated leads first; `limit` is clamped to `1..=250`.
    pub async fn list_leads(&self, limit: u32) -> Result<Vec<CrmLead>, CrmError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let builder = self.request(Method::GET, "/leads").await?.query(&[
            ("order[updated_at]", "desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let page: Option<Page<LeadsEmbedded>> = self.send("list_leads", builder).await?;
        Ok(page.map(|page| page.embedded.leads).unwrap_or_default())
    }

    // ---- contacts ----

    pub async fn get_contact(&self, id: i64) -> Result<CrmContact, CrmError> {
        self.get_one("get_contact", "contact", &format!("/contacts/{id}"), id)
            .await
    }

    pub async fn create_contact(&self, contact: &ContactPayload) -> Result<i64, CrmError> {
        let page = self
            .write(
                "create_contact",
                Method::POST,
                "/contacts",
                std::slice::from_ref(contact),
            )
            .await?;
        Self::first_id("create_contact", page, |embedded| {
            embedded.contacts.first().map(|contact| contact.id)
        })
    }

    // ---- tasks ----

    pub async fn get_task(&self, id: i64) -> Result<CrmTask, CrmError> {
        self.get_one("get_task", "task", &format!("/tasks/{id}"), id)
            .await
    }

    pub async fn create_task(&self, task: &TaskPayload) -> Result<i64, CrmError> {
        let page = self
            .write("create_task", Method::POST, "/tasks", std::slice::from_ref(task))
            .await?;
        Self::first_id("create_task", page, |embedded| {
            embedded.tasks.first().map(|task| task.id)
        })
    }

    pub async fn update_task(&self, id: i64, task: &TaskPayload) -> Result<(), CrmError> {
        let body = TaskPayload {
            id: Some(id),
            ..task.clone()
        };
        self.write("update_task", Method::PATCH, "/tasks", &[body])
            .await?;
        Ok(())
    }

    // ---- taxonomy ----

    /// All pipelines with their stages embedded.
    pub async fn list_pipelines(&self) -> Result<Vec<CrmPipeline>, CrmError> {
        let builder = self.request(Method::GET, "/leads/pipelines").await?;
        let page: Option<Page<PipelinesEmbedded>> = self.send("list_pipelines", builder).await?;
        Ok(page.map(|page| page.embedded.pipelines).unwrap_or_default())
    }

    pub async fn list_roles(&self) -> Result<Vec<CrmRole>, CrmError> {
        self.list_paged("list_roles", "/roles", &[], |embedded: RolesEmbedded| {
            embedded.roles
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<CrmUser>, CrmError> {
        self.list_paged(
            "list_users",
            "/users",
            &[("with", "role,group")],
            |embedded: UsersEmbedded| embedded.users,
        )
        .await
    }

    /// Walks `page=1..` until the envelope has no `next` link or a page is empty.
    async fn list_paged<E, T>(
        &self,
        operation: &'static str,
        path: &str,
        extra_query: &[(&str, &str)],
        items: impl Fn(E) -> Vec<T>,
    ) -> Result<Vec<T>, CrmError>
    where
        E: DeserializeOwned + Default,
    {
        let mut all = Vec::new();
        for page_number in 1..=MAX_PAGES {
            let builder = self
                .request(Method::GET, path)
                .await?
                .query(extra_query)
                .query(&[
                    ("page", page_number.to_string()),
                    ("limit", MAX_PAGE_SIZE.to_string()),
                ]);
            let Some(page) = self.send::<Page<E>>(operation, builder).await? else {
                break;
            };
            let has_next = page.links.next.is_some();
            let batch = items(page.embedded);
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
            if !has_next {
                break;
            }
        }
        Ok(all)
    }
}
