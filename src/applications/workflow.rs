//! Application workflow manager.
//!
//! Owns the application's step-by-step state machine. Every operation loads
//! the persisted record, checks the current state gate, mutates, and writes
//! back; `mark_paid` alone goes through the store's conditional update so it
//! can race webhook-driven settlement safely.

use crate::applications::fees;
use crate::applications::types::{Applicant, Application, ApplicationStatus, DocumentSet};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::services::notification::{NotificationKind, NotificationService};
use crate::store::{ApplicationStore, StoreError};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts at allocating a collision-free application identifier
const ID_ALLOCATION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct StartApplicationRequest {
    pub passport_country: String,
    pub visa_type: String,
    pub destination: String,
    pub email: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct WorkflowManager {
    store: Arc<dyn ApplicationStore>,
    notifications: Arc<NotificationService>,
}

impl WorkflowManager {
    pub fn new(store: Arc<dyn ApplicationStore>, notifications: Arc<NotificationService>) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Start a new application for a supported passport country.
    pub async fn start(&self, request: StartApplicationRequest) -> AppResult<Application> {
        let entry = fees::lookup(&request.passport_country).ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(
                crate::error::ValidationError::UnsupportedCountry {
                    country: request.passport_country.clone(),
                },
            ))
        })?;

        if request.email.trim().is_empty() || !request.email.contains('@') {
            return Err(AppError::validation("email", "a valid email is required"));
        }

        let now = Utc::now();
        let mut last_collision = None;
        for attempt in 1..=ID_ALLOCATION_ATTEMPTS {
            let application = Application {
                application_id: Uuid::new_v4().to_string(),
                passport_country: entry.country.to_string(),
                visa_type: request.visa_type.clone(),
                destination: request.destination.clone(),
                email: request.email.trim().to_lowercase(),
                main_applicant: None,
                additional_applicants: Vec::new(),
                status: ApplicationStatus::Started,
                current_step: ApplicationStatus::Started.step(),
                visa_fee: BigDecimal::from(entry.visa_fee),
                service_fee: BigDecimal::from(entry.service_fee),
                currency: entry.currency.to_string(),
                total_fee: None,
                submitted_at: None,
                client_ip: request.client_ip.clone(),
                user_agent: request.user_agent.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_application(&application).await {
                Ok(stored) => {
                    info!(
                        application_id = %stored.application_id,
                        passport_country = %stored.passport_country,
                        "application started"
                    );
                    self.notifications.dispatch(
                        NotificationKind::ApplicationStarted,
                        stored.application_id.clone(),
                        stored.email.clone(),
                    );
                    return Ok(stored);
                }
                Err(StoreError::DuplicateKey { .. }) => {
                    warn!(attempt, "application id collision, retrying allocation");
                    last_collision = Some(attempt);
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(AppError::new(AppErrorKind::Domain(
            DomainError::IdAllocationExhausted {
                attempts: last_collision.unwrap_or(ID_ALLOCATION_ATTEMPTS),
            },
        )))
    }

    /// Estimated total for a single-applicant application, shown at start.
    pub fn estimated_total(application: &Application) -> BigDecimal {
        fees::total_fee(&application.visa_fee, &application.service_fee, 0)
    }

    /// Save or update the main applicant's personal and passport details.
    pub async fn save_main_applicant(
        &self,
        application_id: &str,
        applicant: Applicant,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_save_applicant_details() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "save applicant details",
            ));
        }

        applicant.validate(Utc::now().date_naive())?;

        application.main_applicant = Some(applicant);
        application.advance(ApplicationStatus::ApplicantDetailsCompleted);
        Ok(self.store.update_application(&application).await?)
    }

    /// Register the main applicant's supporting documents and uploaded
    /// files, advancing the workflow.
    pub async fn register_documents(
        &self,
        application_id: &str,
        documents: DocumentSet,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_register_documents() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "register documents",
            ));
        }

        documents.validate()?;

        let main = application
            .main_applicant
            .as_mut()
            .ok_or_else(|| AppError::validation("main_applicant", "applicant details missing"))?;
        main.documents = documents;
        application.advance(ApplicationStatus::DocumentsCompleted);
        Ok(self.store.update_application(&application).await?)
    }

    /// Idempotently replace the registered documents without a status
    /// change.
    pub async fn update_documents(
        &self,
        application_id: &str,
        documents: DocumentSet,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if application.status != ApplicationStatus::DocumentsCompleted {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "update documents",
            ));
        }

        documents.validate()?;

        let main = application
            .main_applicant
            .as_mut()
            .ok_or_else(|| AppError::validation("main_applicant", "applicant details missing"))?;
        main.documents = documents;
        application.updated_at = Utc::now();
        Ok(self.store.update_application(&application).await?)
    }

    /// Append an additional applicant once main-applicant documents are
    /// complete.
    pub async fn add_additional_applicant(
        &self,
        application_id: &str,
        applicant: Applicant,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_modify_additional_applicants() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "add applicant",
            ));
        }

        Self::validate_additional(&applicant)?;

        application.additional_applicants.push(applicant);
        application.updated_at = Utc::now();
        Ok(self.store.update_application(&application).await?)
    }

    /// Replace the additional applicant at a positional index.
    pub async fn update_additional_applicant(
        &self,
        application_id: &str,
        index: usize,
        applicant: Applicant,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_modify_additional_applicants() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "update applicant",
            ));
        }

        Self::validate_additional(&applicant)?;

        let slot = application
            .additional_applicants
            .get_mut(index)
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::ApplicantNotFound { index }))
            })?;
        *slot = applicant;
        application.updated_at = Utc::now();
        Ok(self.store.update_application(&application).await?)
    }

    /// Remove the additional applicant at a positional index.
    pub async fn remove_additional_applicant(
        &self,
        application_id: &str,
        index: usize,
    ) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_modify_additional_applicants() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "remove applicant",
            ));
        }

        if index >= application.additional_applicants.len() {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::ApplicantNotFound { index },
            )));
        }
        application.additional_applicants.remove(index);
        application.updated_at = Utc::now();
        Ok(self.store.update_application(&application).await?)
    }

    /// Submit the application: compute the total fee, stamp the submission
    /// time and advance to `submitted`.
    pub async fn submit(&self, application_id: &str) -> AppResult<Application> {
        let mut application = self.load(application_id).await?;

        if !application.status.can_submit() {
            return Err(AppError::invalid_state(
                "application",
                application.status.as_str(),
                "submit",
            ));
        }

        let main = application
            .main_applicant
            .as_ref()
            .ok_or_else(|| AppError::validation("main_applicant", "applicant details missing"))?;
        if main.documents.is_empty() {
            return Err(AppError::validation(
                "documents",
                "supporting documents missing",
            ));
        }

        let total = fees::total_fee(
            &application.visa_fee,
            &application.service_fee,
            application.additional_applicants.len(),
        );
        application.total_fee = Some(total.clone());
        application.submitted_at = Some(Utc::now());
        application.advance(ApplicationStatus::Submitted);

        let stored = self.store.update_application(&application).await?;
        info!(
            application_id = %stored.application_id,
            total_fee = %total,
            applicants = stored.applicant_count(),
            "application submitted"
        );
        self.notifications.dispatch(
            NotificationKind::ApplicationSubmitted,
            stored.application_id.clone(),
            stored.email.clone(),
        );
        Ok(stored)
    }

    /// Settle the workflow to `paid`. Invoked only by the payment
    /// orchestrator and webhook processor; a no-op when the application has
    /// already left `submitted`.
    pub async fn mark_paid(&self, application_id: &str) -> AppResult<bool> {
        match self.store.mark_paid_if_submitted(application_id).await? {
            Some(application) => {
                info!(application_id = %application.application_id, "application marked paid");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fetch an application for its owner; the email must match.
    pub async fn get_for_owner(
        &self,
        application_id: &str,
        email: &str,
    ) -> AppResult<Application> {
        let application = self.load(application_id).await?;
        if !application.email.eq_ignore_ascii_case(email.trim()) {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::EmailMismatch {
                    application_id: application_id.to_string(),
                },
            )));
        }
        Ok(application)
    }

    pub async fn load(&self, application_id: &str) -> AppResult<Application> {
        self.store
            .find_application(application_id)
            .await?
            .ok_or_else(|| AppError::application_not_found(application_id))
    }

    fn validate_additional(applicant: &Applicant) -> AppResult<()> {
        applicant.validate(Utc::now().date_naive())?;
        // Additional applicants may omit documents, but any provided
        // descriptor must be well-formed.
        for document in &applicant.documents.supporting_documents {
            document.validate()?;
        }
        Ok(())
    }
}
