use crate::error::{AppError, AppResult};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Workflow status of an application.
///
/// Ordered; each state is gated by completion of the previous one. `Started`
/// and `ApplicantDetailsCompleted` are re-enterable for update operations,
/// `DocumentsCompleted` additionally allows appending additional applicants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Started,
    ApplicantDetailsCompleted,
    DocumentsCompleted,
    Submitted,
    Paid,
    Processing,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Started => "started",
            ApplicationStatus::ApplicantDetailsCompleted => "applicant_details_completed",
            ApplicationStatus::DocumentsCompleted => "documents_completed",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Paid => "paid",
            ApplicationStatus::Processing => "processing",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "draft" => Some(ApplicationStatus::Draft),
            "started" => Some(ApplicationStatus::Started),
            "applicant_details_completed" => Some(ApplicationStatus::ApplicantDetailsCompleted),
            "documents_completed" => Some(ApplicationStatus::DocumentsCompleted),
            "submitted" => Some(ApplicationStatus::Submitted),
            "paid" => Some(ApplicationStatus::Paid),
            "processing" => Some(ApplicationStatus::Processing),
            "approved" => Some(ApplicationStatus::Approved),
            "rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }

    /// Step the workflow lands on when this status is reached.
    ///
    /// Step 2 is intentionally absent: applicant details and the
    /// destination's required fields are combined in one call, so the
    /// workflow jumps from step 1 to step 3.
    pub fn step(&self) -> u8 {
        match self {
            ApplicationStatus::Draft => 1,
            ApplicationStatus::Started => 1,
            ApplicationStatus::ApplicantDetailsCompleted => 3,
            ApplicationStatus::DocumentsCompleted => 4,
            ApplicationStatus::Submitted => 5,
            ApplicationStatus::Paid
            | ApplicationStatus::Processing
            | ApplicationStatus::Approved
            | ApplicationStatus::Rejected => 6,
        }
    }

    /// Step the client is expected to complete next, `None` once the
    /// workflow is past client-driven steps.
    pub fn next_step(&self) -> Option<u8> {
        match self {
            ApplicationStatus::Draft | ApplicationStatus::Started => Some(3),
            ApplicationStatus::ApplicantDetailsCompleted => Some(4),
            ApplicationStatus::DocumentsCompleted => Some(5),
            ApplicationStatus::Submitted => Some(6),
            ApplicationStatus::Paid
            | ApplicationStatus::Processing
            | ApplicationStatus::Approved
            | ApplicationStatus::Rejected => None,
        }
    }

    pub fn can_save_applicant_details(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Started | ApplicationStatus::ApplicantDetailsCompleted
        )
    }

    pub fn can_register_documents(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::ApplicantDetailsCompleted | ApplicationStatus::DocumentsCompleted
        )
    }

    pub fn can_modify_additional_applicants(&self) -> bool {
        matches!(self, ApplicationStatus::DocumentsCompleted)
    }

    pub fn can_submit(&self) -> bool {
        matches!(self, ApplicationStatus::DocumentsCompleted)
    }

    pub fn is_payable(&self) -> bool {
        matches!(self, ApplicationStatus::Submitted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Rejected)
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upper bound on how far in the future a passport expiry may lie
pub const PASSPORT_EXPIRY_HORIZON_YEARS: i32 = 20;

/// Minimum applicant age at the time of application
pub const MINIMUM_APPLICANT_AGE_YEARS: i32 = 18;

/// A supporting document descriptor.
///
/// `expiry_date` and `unlimited_validity` are mutually exclusive; exactly one
/// must be provided.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportingDocument {
    pub doc_type: String,
    pub issuing_country: String,
    pub document_number: String,
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub unlimited_validity: bool,
}

impl SupportingDocument {
    pub fn validate(&self) -> AppResult<()> {
        if self.doc_type.trim().is_empty() {
            return Err(AppError::validation("doc_type", "document type is required"));
        }
        if self.document_number.trim().is_empty() {
            return Err(AppError::validation(
                "document_number",
                "document number is required",
            ));
        }
        match (self.expiry_date, self.unlimited_validity) {
            (Some(_), true) => Err(AppError::validation(
                "expiry_date",
                "expiry date and unlimited validity are mutually exclusive",
            )),
            (None, false) => Err(AppError::validation(
                "expiry_date",
                "either an expiry date or unlimited validity is required",
            )),
            _ => Ok(()),
        }
    }
}

/// Reference to a file already uploaded through the media boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub url: Option<String>,
}

/// Documents attached to one applicant
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSet {
    pub supporting_documents: Vec<SupportingDocument>,
    pub files: Vec<UploadedFile>,
}

impl DocumentSet {
    pub fn is_empty(&self) -> bool {
        self.supporting_documents.is_empty() && self.files.is_empty()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.is_empty() {
            return Err(AppError::validation(
                "documents",
                "at least one supporting document or uploaded file is required",
            ));
        }
        for document in &self.supporting_documents {
            document.validate()?;
        }
        Ok(())
    }
}

/// One applicant (main or additional) with passport fields and documents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Applicant {
    pub given_name: String,
    pub family_name: String,
    pub date_of_birth: NaiveDate,
    pub nationality: String,
    pub passport_number: String,
    pub passport_issue_date: NaiveDate,
    pub passport_expiry_date: NaiveDate,
    #[serde(default)]
    pub documents: DocumentSet,
}

impl Applicant {
    /// Validate personal and passport fields against `today`.
    ///
    /// Rules: age >= 18 at application time, passport issue date not in the
    /// future, passport expiry strictly in the future and within the horizon.
    pub fn validate(&self, today: NaiveDate) -> AppResult<()> {
        if self.given_name.trim().is_empty() {
            return Err(AppError::validation("given_name", "given name is required"));
        }
        if self.family_name.trim().is_empty() {
            return Err(AppError::validation(
                "family_name",
                "family name is required",
            ));
        }
        if self.passport_number.trim().is_empty() {
            return Err(AppError::validation(
                "passport_number",
                "passport number is required",
            ));
        }

        if age_in_years(self.date_of_birth, today) < MINIMUM_APPLICANT_AGE_YEARS {
            return Err(AppError::validation(
                "date_of_birth",
                format!(
                    "applicant must be at least {} years old",
                    MINIMUM_APPLICANT_AGE_YEARS
                ),
            ));
        }

        if self.passport_issue_date > today {
            return Err(AppError::validation(
                "passport_issue_date",
                "passport issue date cannot be in the future",
            ));
        }

        if self.passport_expiry_date <= today {
            return Err(AppError::validation(
                "passport_expiry_date",
                "passport has expired",
            ));
        }

        let horizon = add_years(today, PASSPORT_EXPIRY_HORIZON_YEARS);
        if self.passport_expiry_date > horizon {
            return Err(AppError::validation(
                "passport_expiry_date",
                format!(
                    "passport expiry date cannot be more than {} years ahead",
                    PASSPORT_EXPIRY_HORIZON_YEARS
                ),
            ));
        }

        Ok(())
    }
}

/// Whole years between `from` and `to`
pub fn age_in_years(from: NaiveDate, to: NaiveDate) -> i32 {
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years
}

fn add_years(date: NaiveDate, years: i32) -> NaiveDate {
    date.with_year(date.year() + years)
        // Feb 29 on a non-leap target year slides to Feb 28
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(date.year() + years, date.month(), date.day() - 1)
                .unwrap_or(date)
        })
}

/// A visa application and its workflow position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub application_id: String,
    pub passport_country: String,
    pub visa_type: String,
    pub destination: String,
    pub email: String,
    pub main_applicant: Option<Applicant>,
    pub additional_applicants: Vec<Applicant>,
    pub status: ApplicationStatus,
    pub current_step: u8,
    pub visa_fee: BigDecimal,
    pub service_fee: BigDecimal,
    pub currency: String,
    pub total_fee: Option<BigDecimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Internal-only request metadata, stripped from API reads
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn applicant_count(&self) -> usize {
        let main = usize::from(self.main_applicant.is_some());
        main + self.additional_applicants.len()
    }

    /// Advance status, keeping `current_step` monotonic non-decreasing.
    pub fn advance(&mut self, status: ApplicationStatus) {
        self.status = status;
        self.current_step = self.current_step.max(status.step());
        self.updated_at = Utc::now();
    }
}
