//! Core operations. Every entry point takes the acting [`Caller`] explicitly
//! and returns a [`ServiceResult`]; nothing here touches HTTP.

use std::sync::Arc;

use crate::auth::Caller;
use crate::error::{ServiceError, ServiceResult};
use crate::repo::Repo;

pub mod activity;
pub mod content;
pub mod dashboard;
pub mod moderation;
pub mod notifications;
pub mod reports;
pub mod users;
pub mod votes;

pub use activity::AuditLog;
pub use content::ContentService;
pub use dashboard::{Dashboard, DashboardStats};
pub use moderation::{Moderation, ModerationAction};
pub use notifications::NotificationService;
pub use reports::{Remediation, ReportService, Resolution};
pub use users::UserAdmin;
pub use votes::VoteLedger;

/// All services wired to one repository.
#[derive(Clone)]
pub struct Services {
    pub content: ContentService,
    pub moderation: Moderation,
    pub votes: VoteLedger,
    pub reports: ReportService,
    pub notifications: NotificationService,
    pub audit: AuditLog,
    pub users: UserAdmin,
    pub dashboard: Dashboard,
}

impl Services {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        let audit = AuditLog::new(repo.clone());
        let notifications = NotificationService::new(repo.clone(), audit.clone());
        Self {
            content: ContentService::new(repo.clone(), audit.clone(), notifications.clone()),
            moderation: Moderation::new(repo.clone(), audit.clone(), notifications.clone()),
            votes: VoteLedger::new(repo.clone()),
            reports: ReportService::new(repo.clone(), audit.clone(), notifications.clone()),
            users: UserAdmin::new(repo.clone(), audit.clone(), notifications.clone()),
            dashboard: Dashboard::new(repo),
            notifications,
            audit,
        }
    }
}

/// Banned accounts keep read access but cannot contribute.
pub(crate) fn ensure_active(caller: &Caller) -> ServiceResult<()> {
    if caller.banned {
        return Err(ServiceError::Forbidden("account is banned".into()));
    }
    Ok(())
}

pub(crate) fn require_text(field: &str, value: &str, max: usize) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(ServiceError::Validation(format!("{field} exceeds {max} characters")));
    }
    Ok(trimmed.to_string())
}
