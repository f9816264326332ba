//! Application workflow endpoints.

use crate::api::AppState;
use crate::applications::types::{
    Applicant, Application, ApplicationStatus, DocumentSet, SupportingDocument, UploadedFile,
};
use crate::applications::workflow::{StartApplicationRequest, WorkflowManager};
use crate::error::{AppError, AppResult};
use crate::middleware::error::{created_response, success_response};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub passport_country: String,
    pub visa_type: String,
    pub destination: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub current_step: u8,
    pub next_step: Option<u8>,
    pub estimated_total_fee: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub current_step: u8,
    pub next_step: Option<u8>,
}

impl StepResponse {
    fn from_application(application: &Application) -> Self {
        Self {
            application_id: application.application_id.clone(),
            status: application.status,
            current_step: application.current_step,
            next_step: application.status.next_step(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocumentsRequest {
    #[serde(default)]
    pub supporting_documents: Vec<SupportingDocument>,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

impl From<DocumentsRequest> for DocumentSet {
    fn from(request: DocumentsRequest) -> Self {
        DocumentSet {
            supporting_documents: request.supporting_documents,
            files: request.files,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub email: String,
}

/// Owner-facing application view; internal request metadata is stripped.
#[derive(Debug, Serialize)]
pub struct ApplicationView {
    pub application_id: String,
    pub passport_country: String,
    pub visa_type: String,
    pub destination: String,
    pub email: String,
    pub main_applicant: Option<Applicant>,
    pub additional_applicants: Vec<Applicant>,
    pub status: ApplicationStatus,
    pub current_step: u8,
    pub next_step: Option<u8>,
    pub visa_fee: BigDecimal,
    pub service_fee: BigDecimal,
    pub currency: String,
    pub total_fee: Option<BigDecimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Application> for ApplicationView {
    fn from(application: Application) -> Self {
        Self {
            next_step: application.status.next_step(),
            application_id: application.application_id,
            passport_country: application.passport_country,
            visa_type: application.visa_type,
            destination: application.destination,
            email: application.email,
            main_applicant: application.main_applicant,
            additional_applicants: application.additional_applicants,
            status: application.status,
            current_step: application.current_step,
            visa_fee: application.visa_fee,
            service_fee: application.service_fee,
            currency: application.currency,
            total_fee: application.total_fee,
            submitted_at: application.submitted_at,
            created_at: application.created_at,
        }
    }
}

/// POST /api/applications/start
pub async fn start_application(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .start(StartApplicationRequest {
            passport_country: request.passport_country,
            visa_type: request.visa_type,
            destination: request.destination,
            email: request.email,
            client_ip: Some(addr.ip().to_string()),
            user_agent: headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
        })
        .await?;

    let estimated = WorkflowManager::estimated_total(&application);
    Ok(created_response(StartResponse {
        application_id: application.application_id.clone(),
        status: application.status,
        current_step: application.current_step,
        next_step: application.status.next_step(),
        estimated_total_fee: estimated,
        currency: application.currency,
    }))
}

/// POST /api/applications/:id/applicant-details
pub async fn save_applicant_details(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Json(applicant): Json<Applicant>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .save_main_applicant(&application_id, applicant)
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// POST /api/applications/:id/documents
pub async fn register_documents(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Json(request): Json<DocumentsRequest>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .register_documents(&application_id, request.into())
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// POST /api/applications/:id/documents/update
pub async fn update_documents(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Json(request): Json<DocumentsRequest>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .update_documents(&application_id, request.into())
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// POST /api/applications/:id/applicants
pub async fn add_applicant(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Json(applicant): Json<Applicant>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .add_additional_applicant(&application_id, applicant)
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// PUT /api/applications/:id/applicants/:index
pub async fn update_applicant(
    State(state): State<Arc<AppState>>,
    Path((application_id, index)): Path<(String, usize)>,
    Json(applicant): Json<Applicant>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .update_additional_applicant(&application_id, index, applicant)
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// DELETE /api/applications/:id/applicants/:index
pub async fn remove_applicant(
    State(state): State<Arc<AppState>>,
    Path((application_id, index)): Path<(String, usize)>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .remove_additional_applicant(&application_id, index)
        .await?;
    Ok(success_response(StepResponse::from_application(&application)))
}

/// POST /api/applications/:id/submit
pub async fn submit_application(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
) -> AppResult<Response> {
    let application = state.workflow.submit(&application_id).await?;
    let total = application
        .total_fee
        .clone()
        .ok_or_else(|| AppError::validation("total_fee", "total fee missing after submission"))?;

    #[derive(Serialize)]
    struct SubmitResponse {
        #[serde(flatten)]
        step: StepResponse,
        total_fee: BigDecimal,
        submitted_at: Option<DateTime<Utc>>,
    }

    Ok(success_response(SubmitResponse {
        step: StepResponse::from_application(&application),
        total_fee: total,
        submitted_at: application.submitted_at,
    }))
}

/// GET /api/applications/:id?email=
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> AppResult<Response> {
    let application = state
        .workflow
        .get_for_owner(&application_id, &query.email)
        .await?;
    Ok(success_response(ApplicationView::from(application)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn documents_request_converts_to_document_set() {
        let request = DocumentsRequest {
            supporting_documents: vec![SupportingDocument {
                doc_type: "bank_statement".to_string(),
                issuing_country: "NG".to_string(),
                document_number: "BS-1".to_string(),
                expiry_date: None,
                unlimited_validity: true,
            }],
            files: vec![],
        };
        let set: DocumentSet = request.into();
        assert_eq!(set.supporting_documents.len(), 1);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn applicant_deserializes_from_json_body() {
        let body = serde_json::json!({
            "given_name": "Amina",
            "family_name": "Diallo",
            "date_of_birth": "1996-05-14",
            "nationality": "NG",
            "passport_number": "A1234567",
            "passport_issue_date": "2024-01-10",
            "passport_expiry_date": "2031-01-10"
        });
        let applicant: Applicant =
            serde_json::from_value(body).expect("deserialization should succeed");
        assert_eq!(applicant.given_name, "Amina");
        assert_eq!(applicant.date_of_birth, naive(1996, 5, 14));
        assert!(applicant.documents.is_empty());
    }

    #[test]
    fn application_view_strips_internal_fields() {
        let view_json = serde_json::to_value(ApplicationView {
            application_id: "app-1".to_string(),
            passport_country: "NG".to_string(),
            visa_type: "tourist".to_string(),
            destination: "PT".to_string(),
            email: "a@example.com".to_string(),
            main_applicant: None,
            additional_applicants: vec![],
            status: ApplicationStatus::Started,
            current_step: 1,
            next_step: Some(3),
            visa_fee: BigDecimal::from(49),
            service_fee: BigDecimal::from(35),
            currency: "USD".to_string(),
            total_fee: None,
            submitted_at: None,
            created_at: Utc::now(),
        })
        .expect("serialization should succeed");

        assert!(view_json.get("client_ip").is_none());
        assert!(view_json.get("user_agent").is_none());
    }
}
