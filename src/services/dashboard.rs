use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::ServiceResult;
use crate::models::ReportStatus;
use crate::repo::Repo;
use crate::require_role;
use crate::services::activity::start_of_today;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardStats {
    pub questions_total: u64,
    pub questions_pending: u64,
    pub questions_approved: u64,
    pub answers_total: u64,
    pub reports_pending: u64,
    pub reports_resolved: u64,
    pub reports_total: u64,
    pub notifications_total: u64,
    pub notifications_unread: u64,
    pub activity_total: u64,
    pub activity_today: u64,
    pub users_total: u64,
    pub users_banned: u64,
}

#[derive(Clone)]
pub struct Dashboard {
    repo: Arc<dyn Repo>,
}

impl Dashboard {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    pub async fn stats(&self, caller: &Caller) -> ServiceResult<DashboardStats> {
        require_role!(caller, Role::Manager | Role::Admin);
        let r = &self.repo;
        Ok(DashboardStats {
            questions_total: r.count_questions(None).await?,
            questions_pending: r.count_questions(Some(false)).await?,
            questions_approved: r.count_questions(Some(true)).await?,
            answers_total: r.count_answers().await?,
            reports_pending: r.count_reports(Some(ReportStatus::Pending)).await?,
            reports_resolved: r.count_reports(Some(ReportStatus::Resolved)).await?,
            reports_total: r.count_reports(None).await?,
            notifications_total: r.count_notifications(false, None).await?,
            notifications_unread: r.count_notifications(true, None).await?,
            activity_total: r.count_activity(None, None).await?,
            activity_today: r.count_activity(None, Some(start_of_today())).await?,
            users_total: r.count_users(false).await?,
            users_banned: r.count_users(true).await?,
        })
    }
}
