use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::{RepoResultExt, ServiceError, ServiceResult};
use crate::models::*;
use crate::repo::{RepoError, Repo};
use crate::require_role;
use crate::services::{ensure_active, require_text, AuditLog, NotificationService};
use crate::visibility::can_view;

/// What resolving a report did to the reported content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// Question locked and unapproved.
    QuestionHidden,
    AnswerDeleted,
    /// The content was already gone.
    TargetMissing,
    /// Remediation errored; the report was still resolved.
    Failed(String),
}

impl Remediation {
    fn describe(&self) -> String {
        match self {
            Remediation::QuestionHidden => "question locked and unapproved".into(),
            Remediation::AnswerDeleted => "answer deleted".into(),
            Remediation::TargetMissing => "target already removed".into(),
            Remediation::Failed(e) => format!("remediation failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Resolution {
    pub report: Report,
    pub remediation: Remediation,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReportCounts {
    pub pending: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub total: u64,
}

#[derive(Clone)]
pub struct ReportService {
    repo: Arc<dyn Repo>,
    audit: AuditLog,
    notifier: NotificationService,
}

impl ReportService {
    pub fn new(repo: Arc<dyn Repo>, audit: AuditLog, notifier: NotificationService) -> Self {
        Self { repo, audit, notifier }
    }

    pub async fn create_report(&self, caller: &Caller, mut new: NewReport) -> ServiceResult<Report> {
        ensure_active(caller)?;
        new.reason = require_text("reason", &new.reason, 200)?;
        new.description = new.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        let question_id = match new.entity_type {
            ContentKind::Question => new.entity_id,
            ContentKind::Answer => {
                self.repo.get_answer(new.entity_id).await.or_missing(EntityKind::Answer, new.entity_id)?.question_id
            }
        };
        let q = self.repo.get_question(question_id).await.or_missing(EntityKind::Question, question_id)?;
        if !can_view(&q, Some(caller)) {
            // an answer under a hidden question is as invisible as the question
            return Err(ServiceError::NotFound(new.entity_type.into(), new.entity_id));
        }
        let report = self.repo.create_report(ReportInsert { reporter_id: caller.user_id, report: new }).await?;
        info!(report_id = report.id, target = %EntityKind::from(report.entity_type), target_id = report.entity_id, "report filed");
        metrics::increment_counter!("askboard_reports_total", "status" => "pending");
        self.audit
            .record(
                NewActivity::new(ActivityAction::CreateReport)
                    .by(caller)
                    .on(EntityKind::Report, report.id)
                    .details(format!("reported {} {}: {}", EntityKind::from(report.entity_type), report.entity_id, report.reason)),
            )
            .await;
        Ok(report)
    }

    pub async fn get(&self, caller: &Caller, id: Id) -> ServiceResult<Report> {
        let report = self.repo.get_report(id).await.or_missing(EntityKind::Report, id)?;
        if report.reporter_id != caller.user_id && !caller.is_staff() {
            return Err(ServiceError::Forbidden("not your report".into()));
        }
        Ok(report)
    }

    pub async fn list(&self, caller: &Caller, status: Option<ReportStatus>, page: &PageRequest) -> ServiceResult<Page<Report>> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(self.repo.list_reports(status, None, page).await?)
    }

    pub async fn my_reports(&self, caller: &Caller, page: &PageRequest) -> ServiceResult<Page<Report>> {
        Ok(self.repo.list_reports(None, Some(caller.user_id), page).await?)
    }

    pub async fn counts(&self, caller: &Caller) -> ServiceResult<ReportCounts> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(ReportCounts {
            pending: self.repo.count_reports(Some(ReportStatus::Pending)).await?,
            resolved: self.repo.count_reports(Some(ReportStatus::Resolved)).await?,
            rejected: self.repo.count_reports(Some(ReportStatus::Rejected)).await?,
            total: self.repo.count_reports(None).await?,
        })
    }

    /// Act on the reported content, then close the report as RESOLVED.
    /// A remediation failure is carried in the outcome, not propagated.
    pub async fn resolve(&self, caller: &Caller, id: Id, resolution: &str) -> ServiceResult<Resolution> {
        require_role!(caller, Role::Manager | Role::Admin);
        let report = self.pending_report(id).await?;
        let remediation = self.remediate(&report).await;
        let report = self.close(caller, &report, ReportStatus::Resolved, resolution).await?;
        info!(report_id = id, remediation = %remediation.describe(), "report resolved");
        self.audit
            .record(
                NewActivity::new(ActivityAction::ResolveReport)
                    .by(caller)
                    .on(EntityKind::Report, id)
                    .details(format!("resolved: {}", remediation.describe())),
            )
            .await;
        Ok(Resolution { report, remediation })
    }

    /// Close the report as REJECTED without touching the content.
    pub async fn reject(&self, caller: &Caller, id: Id, reason: &str) -> ServiceResult<Report> {
        require_role!(caller, Role::Manager | Role::Admin);
        let report = self.pending_report(id).await?;
        let report = self.close(caller, &report, ReportStatus::Rejected, reason).await?;
        info!(report_id = id, "report rejected");
        self.audit
            .record(
                NewActivity::new(ActivityAction::RejectReport)
                    .by(caller)
                    .on(EntityKind::Report, id)
                    .details(format!("rejected: {reason}")),
            )
            .await;
        Ok(report)
    }

    /// Drop a report in any state. Content it pointed at is left alone.
    pub async fn delete(&self, caller: &Caller, id: Id) -> ServiceResult<()> {
        require_role!(caller, Role::Manager | Role::Admin);
        let report = self.repo.delete_report(id).await.or_missing(EntityKind::Report, id)?;
        info!(report_id = id, by = caller.user_id, status = ?report.status, "report deleted");
        self.audit
            .record(
                NewActivity::new(ActivityAction::DeleteReport)
                    .by(caller)
                    .on(EntityKind::Report, id)
                    .details(format!(
                        "deleted report on {} {} ({:?})",
                        EntityKind::from(report.entity_type),
                        report.entity_id,
                        report.status
                    )),
            )
            .await;
        Ok(())
    }

    async fn pending_report(&self, id: Id) -> ServiceResult<Report> {
        let report = self.repo.get_report(id).await.or_missing(EntityKind::Report, id)?;
        if report.status.is_terminal() {
            return Err(ServiceError::InvalidState(format!("report {id} is already closed")));
        }
        Ok(report)
    }

    async fn remediate(&self, report: &Report) -> Remediation {
        let result = match report.entity_type {
            ContentKind::Question => {
                let hide = FlagUpdate { approved: Some(false), locked: Some(true), pinned: None };
                self.repo.update_flags(report.entity_id, hide).await.map(|_| Remediation::QuestionHidden)
            }
            ContentKind::Answer => self.repo.delete_answer(report.entity_id).await.map(|_| Remediation::AnswerDeleted),
        };
        match result {
            Ok(r) => r,
            Err(RepoError::NotFound) => Remediation::TargetMissing,
            Err(e) => {
                warn!(report_id = report.id, error = %e, "report remediation failed, resolving anyway");
                Remediation::Failed(e.to_string())
            }
        }
    }

    async fn close(&self, caller: &Caller, report: &Report, status: ReportStatus, note: &str) -> ServiceResult<Report> {
        let closure = ReportClosure {
            status,
            resolved_by: caller.user_id,
            resolution: note.trim().to_string(),
            resolved_at: Utc::now(),
        };
        let closed = match self.repo.close_report(report.id, closure).await {
            Ok(r) => r,
            Err(RepoError::Conflict) => {
                return Err(ServiceError::InvalidState(format!("report {} is already closed", report.id)))
            }
            Err(RepoError::NotFound) => return Err(ServiceError::NotFound(EntityKind::Report, report.id)),
            Err(e) => return Err(e.into()),
        };
        let label = match status {
            ReportStatus::Resolved => "resolved",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Pending => "pending",
        };
        metrics::increment_counter!("askboard_reports_total", "status" => label);
        if closed.reporter_id != caller.user_id {
            let draft = NotificationDraft::new(
                "REPORT_UPDATE",
                format!("Your report #{} was {label}", closed.id),
            );
            self.notifier.emit(Some(caller.user_id), closed.reporter_id, draft).await;
        }
        Ok(closed)
    }
}
