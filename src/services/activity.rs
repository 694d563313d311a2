use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::ServiceResult;
use crate::models::*;
use crate::repo::Repo;
use crate::require_role;

/// Append-only audit trail. Writes are best effort: a failed append is
/// logged and swallowed so it never undoes the operation being audited.
#[derive(Clone)]
pub struct AuditLog {
    repo: Arc<dyn Repo>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActivityCounts {
    pub total: u64,
    pub today: u64,
}

pub(crate) fn start_of_today() -> DateTime<Utc> {
    Utc.from_utc_datetime(&Utc::now().date_naive().and_time(NaiveTime::MIN))
}

impl AuditLog {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: NewActivity) {
        let action = entry.action;
        if let Err(e) = self.repo.append_activity(entry).await {
            warn!(%action, error = %e, "failed to append activity log entry");
        }
    }

    pub async fn search(&self, caller: &Caller, filter: &ActivityFilter, page: &PageRequest) -> ServiceResult<Page<ActivityLog>> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(self.repo.search_activity(filter, page).await?)
    }

    /// Retention sweep run by the binary. Deletes entries created before
    /// `now - days` and leaves a system entry behind when anything went.
    pub async fn purge_older_than(&self, days: u32) -> ServiceResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let purged = self.repo.purge_activity_before(cutoff).await?;
        info!(purged, days, "activity log retention sweep");
        if purged > 0 {
            self.record(
                NewActivity::new(ActivityAction::PurgeActivityLog)
                    .details(format!("purged {purged} entries older than {days} days")),
            )
            .await;
        }
        Ok(purged)
    }

    /// Admin-triggered purge.
    pub async fn purge(&self, caller: &Caller, days: u32) -> ServiceResult<u64> {
        require_role!(caller, Role::Admin);
        self.purge_older_than(days).await
    }

    pub async fn counts(&self, caller: &Caller) -> ServiceResult<ActivityCounts> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(ActivityCounts {
            total: self.repo.count_activity(None, None).await?,
            today: self.repo.count_activity(None, Some(start_of_today())).await?,
        })
    }

    pub async fn count_by_action(&self, caller: &Caller, action: ActivityAction) -> ServiceResult<u64> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(self.repo.count_activity(Some(action), None).await?)
    }

    /// Every entry matching `filter`, newest first, as CSV.
    pub async fn export_csv(&self, caller: &Caller, filter: &ActivityFilter) -> ServiceResult<String> {
        require_role!(caller, Role::Admin);
        let mut out = String::from("id,user_id,action,entity_type,entity_id,details,ip_address,created_at\n");
        let mut page = PageRequest::new(0, MAX_PAGE_SIZE);
        loop {
            let batch = self.repo.search_activity(filter, &page).await?;
            for log in &batch.items {
                push_csv_row(&mut out, log);
            }
            if u64::from(page.page) + 1 >= batch.total_pages {
                break;
            }
            page.page += 1;
        }
        Ok(out)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn push_csv_row(out: &mut String, log: &ActivityLog) {
    let opt = |v: Option<Id>| v.map(|v| v.to_string()).unwrap_or_default();
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{}",
        log.id,
        opt(log.user_id),
        log.action,
        log.entity_type.map(|k| k.as_str()).unwrap_or_default(),
        opt(log.entity_id),
        csv_field(log.details.as_deref().unwrap_or_default()),
        csv_field(log.ip_address.as_deref().unwrap_or_default()),
        log.created_at.to_rfc3339(),
    );
}
