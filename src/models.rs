use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub use crate::auth::Role;

pub type Id = i64;

// ---------------- users ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub reputation: i64,
    pub is_banned: bool,
    pub banned_until: Option<DateTime<Utc>>, // None while banned = permanent
    pub ban_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A ban with an expiry in the past no longer restricts the user.
    pub fn ban_active(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.banned_until.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BanState {
    pub is_banned: bool,
    pub banned_until: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
}

// ---------------- questions & answers ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Question {
    pub id: Id,
    pub author_id: Id,
    pub title: String,
    pub body: String,
    pub views: i64,
    pub votes: i64, // signed, may go negative
    pub answer_count: i64,
    pub is_approved: bool,
    pub is_locked: bool,
    pub is_pinned: bool,
    pub accepted_answer_id: Option<Id>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewQuestion {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Row handed to the repository once the service has decided the approval flag.
#[derive(Debug, Clone)]
pub struct QuestionInsert {
    pub author_id: Id,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub is_approved: bool,
}

/// Author edit. Absent or empty `tags` keeps the current tag set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionEdit {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Validated edit handed to the repository; `tags: None` leaves them alone.
#[derive(Debug, Clone)]
pub struct QuestionUpdate {
    pub title: String,
    pub body: String,
    pub tags: Option<Vec<String>>,
}

/// Partial update of the three moderation flags; `None` leaves a flag alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub approved: Option<bool>,
    pub locked: Option<bool>,
    pub pinned: Option<bool>,
}

impl FlagUpdate {
    pub fn apply_to(&self, q: &mut Question) {
        if let Some(v) = self.approved { q.is_approved = v; }
        if let Some(v) = self.locked { q.is_locked = v; }
        if let Some(v) = self.pinned { q.is_pinned = v; }
    }

    /// True when applying the update would not change anything.
    pub fn is_satisfied_by(&self, q: &Question) -> bool {
        self.approved.map_or(true, |v| q.is_approved == v)
            && self.locked.map_or(true, |v| q.is_locked == v)
            && self.pinned.map_or(true, |v| q.is_pinned == v)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Answer {
    pub id: Id,
    pub question_id: Id,
    pub author_id: Id,
    pub body: String,
    pub votes: i64,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAnswer {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerEdit {
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct AnswerInsert {
    pub question_id: Id,
    pub author_id: Id,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub name: String,
    pub question_count: i64,
}

// ---------------- votes ----------------

/// Kinds of content that can be voted on or reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum ContentKind {
    Question,
    Answer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
pub struct VoteTarget {
    pub kind: ContentKind,
    pub id: Id,
}

impl VoteTarget {
    pub fn question(id: Id) -> Self { Self { kind: ContentKind::Question, id } }
    pub fn answer(id: Id) -> Self { Self { kind: ContentKind::Answer, id } }
}

/// Membership change requested of the vote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Cast,
    Retract,
}

impl VoteChange {
    pub fn delta(self) -> i64 {
        match self {
            VoteChange::Cast => 1,
            VoteChange::Retract => -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoteTally {
    pub target: VoteTarget,
    pub votes: i64,
    pub voted: bool,
}

// ---------------- reports ----------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Rejected,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Report {
    pub id: Id,
    pub reporter_id: Id,
    pub entity_type: ContentKind,
    pub entity_id: Id,
    pub reason: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub resolved_by: Option<Id>,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub entity_type: ContentKind,
    pub entity_id: Id,
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportInsert {
    pub reporter_id: Id,
    pub report: NewReport,
}

/// Terminal transition applied to a pending report.
#[derive(Debug, Clone)]
pub struct ReportClosure {
    pub status: ReportStatus,
    pub resolved_by: Id,
    pub resolution: String,
    pub resolved_at: DateTime<Utc>,
}

// ---------------- notifications ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Notification {
    pub id: Id,
    pub user_id: Id,
    pub sender_id: Option<Id>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// What to say; the fan-out decides to whom.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
}

impl NotificationDraft {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), link: None }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NotificationInsert {
    pub user_id: Id,
    pub sender_id: Option<Id>,
    pub draft: NotificationDraft,
}

// ---------------- activity log ----------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    CreateQuestion,
    EditQuestion,
    DeleteQuestion,
    ApproveQuestion,
    RejectQuestion,
    LockQuestion,
    UnlockQuestion,
    PinQuestion,
    UnpinQuestion,
    CreateAnswer,
    EditAnswer,
    DeleteAnswer,
    AcceptAnswer,
    CreateReport,
    ResolveReport,
    RejectReport,
    DeleteReport,
    SendNotification,
    DeleteNotification,
    BanUser,
    UnbanUser,
    ChangeRole,
    DeleteUser,
    PurgeActivityLog,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        use ActivityAction::*;
        match self {
            CreateQuestion => "CREATE_QUESTION",
            EditQuestion => "EDIT_QUESTION",
            DeleteQuestion => "DELETE_QUESTION",
            ApproveQuestion => "APPROVE_QUESTION",
            RejectQuestion => "REJECT_QUESTION",
            LockQuestion => "LOCK_QUESTION",
            UnlockQuestion => "UNLOCK_QUESTION",
            PinQuestion => "PIN_QUESTION",
            UnpinQuestion => "UNPIN_QUESTION",
            CreateAnswer => "CREATE_ANSWER",
            EditAnswer => "EDIT_ANSWER",
            DeleteAnswer => "DELETE_ANSWER",
            AcceptAnswer => "ACCEPT_ANSWER",
            CreateReport => "CREATE_REPORT",
            ResolveReport => "RESOLVE_REPORT",
            RejectReport => "REJECT_REPORT",
            DeleteReport => "DELETE_REPORT",
            SendNotification => "SEND_NOTIFICATION",
            DeleteNotification => "DELETE_NOTIFICATION",
            BanUser => "BAN_USER",
            UnbanUser => "UNBAN_USER",
            ChangeRole => "CHANGE_ROLE",
            DeleteUser => "DELETE_USER",
            PurgeActivityLog => "PURGE_ACTIVITY_LOG",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an audit entry can point at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum EntityKind {
    Question,
    Answer,
    Report,
    Notification,
    User,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Question => "QUESTION",
            EntityKind::Answer => "ANSWER",
            EntityKind::Report => "REPORT",
            EntityKind::Notification => "NOTIFICATION",
            EntityKind::User => "USER",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ContentKind> for EntityKind {
    fn from(k: ContentKind) -> Self {
        match k {
            ContentKind::Question => EntityKind::Question,
            ContentKind::Answer => EntityKind::Answer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: Id,
    pub user_id: Option<Id>, // None = system action
    pub action: ActivityAction,
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<Id>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry under construction. Built explicitly at each call site:
/// `NewActivity::new(ActivityAction::LockQuestion).by(caller).on(EntityKind::Question, id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub user_id: Option<Id>,
    pub action: ActivityAction,
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<Id>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
}

impl NewActivity {
    pub fn new(action: ActivityAction) -> Self {
        Self { user_id: None, action, entity_type: None, entity_id: None, details: None, ip_address: None }
    }

    pub fn by(mut self, caller: &crate::auth::Caller) -> Self {
        self.user_id = Some(caller.user_id);
        self.ip_address = caller.ip.clone();
        self
    }

    pub fn on(mut self, kind: EntityKind, id: Id) -> Self {
        self.entity_type = Some(kind);
        self.entity_id = Some(id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityFilter {
    /// Case-insensitive substring of `details`.
    pub search: Option<String>,
    pub action: Option<ActivityAction>,
    pub entity_type: Option<EntityKind>,
    pub user_id: Option<Id>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    pub fn matches(&self, log: &ActivityLog) -> bool {
        if let Some(needle) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            match &log.details {
                Some(d) if d.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        self.action.map_or(true, |a| log.action == a)
            && self.entity_type.map_or(true, |k| log.entity_type == Some(k))
            && self.user_id.map_or(true, |u| log.user_id == Some(u))
            && self.from.map_or(true, |from| log.created_at >= from)
            && self.to.map_or(true, |to| log.created_at <= to)
    }
}

// ---------------- pagination ----------------

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 { DEFAULT_PAGE_SIZE }

impl Default for PageRequest {
    fn default() -> Self { Self { page: 0, size: DEFAULT_PAGE_SIZE } }
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self { Self { page, size } }

    /// Size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> u32 { self.size.clamp(1, MAX_PAGE_SIZE) }

    pub fn offset(&self) -> u64 { u64::from(self.page) * u64::from(self.limit()) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_pages: u64,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_elements: u64, req: &PageRequest) -> Self {
        let limit = u64::from(req.limit());
        Self { items, total_pages: total_elements.div_ceil(limit), total_elements }
    }

    /// Slice an already filtered and ordered collection.
    pub fn from_sorted(all: Vec<T>, req: &PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(req.offset() as usize)
            .take(req.limit() as usize)
            .collect();
        Self::new(items, total, req)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page { items: self.items.into_iter().map(f).collect(), total_pages: self.total_pages, total_elements: self.total_elements }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSort {
    #[default]
    Newest,
    Votes,
    Views,
}

/// Listing criteria layered on top of visibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuestionQuery {
    #[serde(default)]
    pub sort: QuestionSort,
    pub author_id: Option<Id>,
    pub tag: Option<String>,
    /// Case-insensitive substring of title or body.
    pub search: Option<String>,
    /// Filter on the approval flag (moderation queues).
    pub approved: Option<bool>,
}

impl QuestionQuery {
    pub fn matches(&self, q: &Question) -> bool {
        if let Some(needle) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            if !q.title.to_lowercase().contains(&needle) && !q.body.to_lowercase().contains(&needle) {
                return false;
            }
        }
        self.author_id.map_or(true, |a| q.author_id == a)
            && self.tag.as_deref().map_or(true, |t| q.tags.iter().any(|qt| qt.eq_ignore_ascii_case(t)))
            && self.approved.map_or(true, |a| q.is_approved == a)
    }

    /// Pinned first, then the requested key descending, newest id breaking ties.
    pub fn order(&self, a: &Question, b: &Question) -> std::cmp::Ordering {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| match self.sort {
                QuestionSort::Newest => b.created_at.cmp(&a.created_at),
                QuestionSort::Votes => b.votes.cmp(&a.votes),
                QuestionSort::Views => b.views.cmp(&a.views),
            })
            .then_with(|| b.id.cmp(&a.id))
    }
}

/// Normalise user-supplied tag names: trimmed, lowercase, unique, non-empty.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in tags {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}
