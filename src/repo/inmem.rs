use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

#[derive(Default, Serialize, Deserialize)]
struct State {
    users: HashMap<Id, User>,
    questions: HashMap<Id, Question>,
    answers: HashMap<Id, Answer>,
    tags: BTreeMap<String, i64>,
    votes: HashSet<(Id, VoteTarget)>,
    reports: HashMap<Id, Report>,
    notifications: HashMap<Id, Notification>,
    activity: Vec<ActivityLog>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn drop_votes_for(&mut self, target: VoteTarget) {
        self.votes.retain(|(_, t)| *t != target);
    }

    fn untag(&mut self, tags: &[String]) {
        for tag in tags {
            if let Some(n) = self.tags.get_mut(tag) {
                *n = (*n - 1).max(0);
            }
        }
    }

    fn tag(&mut self, tags: &[String]) {
        for tag in tags {
            *self.tags.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    /// Question plus its answers, votes and tag usage.
    fn remove_question(&mut self, id: Id) -> Option<Question> {
        let q = self.questions.remove(&id)?;
        self.untag(&q.tags);
        let answer_ids: Vec<Id> = self.answers.values()
            .filter(|a| a.question_id == id)
            .map(|a| a.id)
            .collect();
        for aid in answer_ids {
            self.answers.remove(&aid);
            self.drop_votes_for(VoteTarget::answer(aid));
        }
        self.drop_votes_for(VoteTarget::question(id));
        Some(q)
    }

    /// Answer plus its votes; the parent's count and acceptance follow.
    fn remove_answer(&mut self, id: Id) -> Option<Answer> {
        let answer = self.answers.remove(&id)?;
        if let Some(q) = self.questions.get_mut(&answer.question_id) {
            q.answer_count = (q.answer_count - 1).max(0);
            if q.accepted_answer_id == Some(id) {
                q.accepted_answer_id = None;
            }
        }
        self.drop_votes_for(VoteTarget::answer(id));
        Some(answer)
    }

    fn adjust_votes(&mut self, target: VoteTarget, delta: i64) -> Option<i64> {
        match target.kind {
            ContentKind::Question => self.questions.get_mut(&target.id).map(|q| {
                q.votes += delta;
                q.votes
            }),
            ContentKind::Answer => self.answers.get_mut(&target.id).map(|a| {
                a.votes += delta;
                a.votes
            }),
        }
    }
}

/// Process-local repository. Every trait method runs under a single write
/// (or read) lock, which gives each call the same all-or-nothing behaviour a
/// database transaction gives the Postgres backend.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot: Option<Arc<Snapshot>>,
}

/// On-disk copy of the state. `lock` is taken before the state lock is
/// released and held until the file is in place, so snapshots land in
/// mutation order and never overlap.
struct Snapshot {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Snapshot {
    fn new(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    /// Write to a sibling temp file, then rename over `state.json`.
    fn persist(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl InMemRepo {
    /// Ephemeral store; nothing is written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot at `<dir>/state.json`, loaded now and
    /// rewritten after every mutation.
    pub fn with_snapshot(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join("state.json");
        let state = Self::load_state_from(&path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot: Some(Arc::new(Snapshot::new(path))),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!(path = %path.display(), "loaded in-memory snapshot");
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparseable snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Run `f` under the write lock; on success serialise the state and
    /// persist it once readers are let back in.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut s = self.write()?;
        let out = f(&mut s)?;
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(out);
        };
        let bytes = serde_json::to_vec_pretty(&*s);
        let guard = snapshot.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(s);
        match bytes {
            Ok(bytes) => {
                if let Err(e) = snapshot.persist(&bytes) {
                    warn!(path = %snapshot.path.display(), error = %e, "failed to write snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialise snapshot"),
        }
        drop(guard);
        Ok(out)
    }
}

fn count(n: usize) -> u64 {
    n as u64
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        self.mutate(|s| {
            if s.users.values().any(|u| u.username.eq_ignore_ascii_case(&new.username)) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: new.username,
                email: new.email,
                role: new.role,
                reputation: 1,
                is_banned: false,
                banned_until: None,
                ban_reason: None,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            Ok(user)
        })
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        Ok(self.read()?.users.values().find(|u| u.username.eq_ignore_ascii_case(username)).cloned())
    }

    async fn list_users(&self, role: Option<Role>) -> RepoResult<Vec<User>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.users.values()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .cloned()
            .collect();
        v.sort_by_key(|u| u.id);
        Ok(v)
    }

    async fn update_ban(&self, id: Id, ban: BanState) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.is_banned = ban.is_banned;
            user.banned_until = ban.banned_until;
            user.ban_reason = ban.ban_reason;
            Ok(user.clone())
        })
    }

    async fn update_role(&self, id: Id, role: Role) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.role = role;
            Ok(user.clone())
        })
    }

    async fn count_users(&self, banned_only: bool) -> RepoResult<u64> {
        let now = Utc::now();
        let s = self.read()?;
        Ok(count(s.users.values().filter(|u| !banned_only || u.ban_active(now)).count()))
    }

    async fn delete_user(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| {
            if !s.users.contains_key(&id) { return Err(RepoError::NotFound); }
            if s.reports.values().any(|r| r.resolved_by == Some(id)) {
                return Err(RepoError::Conflict);
            }
            let cast: Vec<VoteTarget> = s.votes.iter().filter(|(u, _)| *u == id).map(|(_, t)| *t).collect();
            for target in cast {
                s.votes.remove(&(id, target));
                s.adjust_votes(target, -1);
            }
            let questions: Vec<Id> = s.questions.values().filter(|q| q.author_id == id).map(|q| q.id).collect();
            for qid in questions {
                s.remove_question(qid);
            }
            let answers: Vec<Id> = s.answers.values().filter(|a| a.author_id == id).map(|a| a.id).collect();
            for aid in answers {
                s.remove_answer(aid);
            }
            s.reports.retain(|_, r| r.reporter_id != id);
            s.notifications.retain(|_, n| n.user_id != id);
            for n in s.notifications.values_mut().filter(|n| n.sender_id == Some(id)) {
                n.sender_id = None;
            }
            s.users.remove(&id);
            Ok(())
        })
    }
}

#[async_trait]
impl QuestionRepo for InMemRepo {
    async fn create_question(&self, new: QuestionInsert) -> RepoResult<Question> {
        self.mutate(|s| {
            if !s.users.contains_key(&new.author_id) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let id = s.next_id();
            s.tag(&new.tags);
            let question = Question {
                id,
                author_id: new.author_id,
                title: new.title,
                body: new.body,
                views: 0,
                votes: 0,
                answer_count: 0,
                is_approved: new.is_approved,
                is_locked: false,
                is_pinned: false,
                accepted_answer_id: None,
                tags: new.tags,
                created_at: now,
                updated_at: now,
            };
            s.questions.insert(id, question.clone());
            Ok(question)
        })
    }

    async fn get_question(&self, id: Id) -> RepoResult<Question> {
        self.read()?.questions.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_questions(&self, vis: Visibility, query: &QuestionQuery, page: &PageRequest) -> RepoResult<Page<Question>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.questions.values()
            .filter(|q| vis.admits(q) && query.matches(q))
            .cloned()
            .collect();
        v.sort_by(|a, b| query.order(a, b));
        Ok(Page::from_sorted(v, page))
    }

    async fn update_question(&self, id: Id, update: QuestionUpdate) -> RepoResult<Question> {
        self.mutate(|s| {
            let old_tags = s.questions.get(&id).ok_or(RepoError::NotFound)?.tags.clone();
            if let Some(tags) = &update.tags {
                s.untag(&old_tags);
                s.tag(tags);
            }
            let q = s.questions.get_mut(&id).ok_or(RepoError::NotFound)?;
            q.title = update.title;
            q.body = update.body;
            if let Some(tags) = update.tags {
                q.tags = tags;
            }
            q.updated_at = Utc::now();
            Ok(q.clone())
        })
    }

    async fn update_flags(&self, id: Id, flags: FlagUpdate) -> RepoResult<Question> {
        self.mutate(|s| {
            let q = s.questions.get_mut(&id).ok_or(RepoError::NotFound)?;
            flags.apply_to(q);
            q.updated_at = Utc::now();
            Ok(q.clone())
        })
    }

    async fn increment_views(&self, id: Id) -> RepoResult<Question> {
        self.mutate(|s| {
            let q = s.questions.get_mut(&id).ok_or(RepoError::NotFound)?;
            q.views += 1;
            Ok(q.clone())
        })
    }

    async fn delete_question(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| s.remove_question(id).map(|_| ()).ok_or(RepoError::NotFound))
    }

    async fn count_questions(&self, approved: Option<bool>) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(count(s.questions.values().filter(|q| approved.map_or(true, |a| q.is_approved == a)).count()))
    }

    async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
        let s = self.read()?;
        let mut v: Vec<Tag> = s.tags.iter()
            .map(|(name, n)| Tag { name: name.clone(), question_count: *n })
            .collect();
        v.sort_by(|a, b| b.question_count.cmp(&a.question_count).then_with(|| a.name.cmp(&b.name)));
        Ok(v)
    }
}

#[async_trait]
impl AnswerRepo for InMemRepo {
    async fn create_answer(&self, new: AnswerInsert) -> RepoResult<Answer> {
        self.mutate(|s| {
            if !s.questions.contains_key(&new.question_id) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let answer = Answer {
                id,
                question_id: new.question_id,
                author_id: new.author_id,
                body: new.body,
                votes: 0,
                is_accepted: false,
                created_at: Utc::now(),
            };
            s.answers.insert(id, answer.clone());
            if let Some(q) = s.questions.get_mut(&new.question_id) {
                q.answer_count += 1;
            }
            Ok(answer)
        })
    }

    async fn get_answer(&self, id: Id) -> RepoResult<Answer> {
        self.read()?.answers.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_answers(&self, question_id: Id) -> RepoResult<Vec<Answer>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.answers.values()
            .filter(|a| a.question_id == question_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| {
            b.is_accepted.cmp(&a.is_accepted)
                .then_with(|| b.votes.cmp(&a.votes))
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(v)
    }

    async fn accept_answer(&self, question_id: Id, answer_id: Id) -> RepoResult<Answer> {
        self.mutate(|s| {
            match s.answers.get(&answer_id) {
                Some(a) if a.question_id == question_id => {}
                _ => return Err(RepoError::NotFound),
            }
            let q = s.questions.get_mut(&question_id).ok_or(RepoError::NotFound)?;
            q.accepted_answer_id = Some(answer_id);
            q.updated_at = Utc::now();
            for a in s.answers.values_mut().filter(|a| a.question_id == question_id) {
                a.is_accepted = a.id == answer_id;
            }
            s.answers.get(&answer_id).cloned().ok_or(RepoError::NotFound)
        })
    }

    async fn update_answer(&self, id: Id, body: String) -> RepoResult<Answer> {
        self.mutate(|s| {
            let a = s.answers.get_mut(&id).ok_or(RepoError::NotFound)?;
            a.body = body;
            Ok(a.clone())
        })
    }

    async fn delete_answer(&self, id: Id) -> RepoResult<Answer> {
        self.mutate(|s| s.remove_answer(id).ok_or(RepoError::NotFound))
    }

    async fn count_answers(&self) -> RepoResult<u64> {
        Ok(count(self.read()?.answers.len()))
    }
}

#[async_trait]
impl VoteRepo for InMemRepo {
    async fn has_voted(&self, user_id: Id, target: VoteTarget) -> RepoResult<bool> {
        Ok(self.read()?.votes.contains(&(user_id, target)))
    }

    async fn record_vote(&self, user_id: Id, target: VoteTarget, change: VoteChange) -> RepoResult<i64> {
        self.mutate(|s| {
            let key = (user_id, target);
            let present = s.votes.contains(&key);
            match change {
                VoteChange::Cast if present => return Err(RepoError::Conflict),
                VoteChange::Retract if !present => return Err(RepoError::Conflict),
                _ => {}
            }
            let votes = s.adjust_votes(target, change.delta()).ok_or(RepoError::NotFound)?;
            match change {
                VoteChange::Cast => { s.votes.insert(key); }
                VoteChange::Retract => { s.votes.remove(&key); }
            }
            Ok(votes)
        })
    }
}

#[async_trait]
impl ReportRepo for InMemRepo {
    async fn create_report(&self, new: ReportInsert) -> RepoResult<Report> {
        self.mutate(|s| {
            let id = s.next_id();
            let report = Report {
                id,
                reporter_id: new.reporter_id,
                entity_type: new.report.entity_type,
                entity_id: new.report.entity_id,
                reason: new.report.reason,
                description: new.report.description,
                status: ReportStatus::Pending,
                resolved_by: None,
                resolution: None,
                resolved_at: None,
                created_at: Utc::now(),
            };
            s.reports.insert(id, report.clone());
            Ok(report)
        })
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        self.read()?.reports.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_reports(&self, status: Option<ReportStatus>, reporter: Option<Id>, page: &PageRequest) -> RepoResult<Page<Report>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.reports.values()
            .filter(|r| status.map_or(true, |st| r.status == st))
            .filter(|r| reporter.map_or(true, |u| r.reporter_id == u))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(Page::from_sorted(v, page))
    }

    async fn close_report(&self, id: Id, closure: ReportClosure) -> RepoResult<Report> {
        self.mutate(|s| {
            let r = s.reports.get_mut(&id).ok_or(RepoError::NotFound)?;
            if r.status.is_terminal() {
                return Err(RepoError::Conflict);
            }
            r.status = closure.status;
            r.resolved_by = Some(closure.resolved_by);
            r.resolution = Some(closure.resolution);
            r.resolved_at = Some(closure.resolved_at);
            Ok(r.clone())
        })
    }

    async fn count_reports(&self, status: Option<ReportStatus>) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(count(s.reports.values().filter(|r| status.map_or(true, |st| r.status == st)).count()))
    }

    async fn delete_report(&self, id: Id) -> RepoResult<Report> {
        self.mutate(|s| s.reports.remove(&id).ok_or(RepoError::NotFound))
    }
}

fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl NotificationRepo for InMemRepo {
    async fn insert_notifications(&self, rows: Vec<NotificationInsert>) -> RepoResult<Vec<Notification>> {
        self.mutate(|s| {
            let now = Utc::now();
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let id = s.next_id();
                let n = Notification {
                    id,
                    user_id: row.user_id,
                    sender_id: row.sender_id,
                    kind: row.draft.kind,
                    message: row.draft.message,
                    link: row.draft.link,
                    is_read: false,
                    created_at: now,
                };
                s.notifications.insert(id, n.clone());
                out.push(n);
            }
            Ok(out)
        })
    }

    async fn get_notification(&self, id: Id) -> RepoResult<Notification> {
        self.read()?.notifications.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_notifications_for(&self, user_id: Id, unread_only: bool) -> RepoResult<Vec<Notification>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.notifications.values()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        v.sort_by(newest_first);
        Ok(v)
    }

    async fn list_notifications(&self, page: &PageRequest) -> RepoResult<Page<Notification>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.notifications.values().cloned().collect();
        v.sort_by(newest_first);
        Ok(Page::from_sorted(v, page))
    }

    async fn mark_read(&self, id: Id) -> RepoResult<Notification> {
        self.mutate(|s| {
            let n = s.notifications.get_mut(&id).ok_or(RepoError::NotFound)?;
            n.is_read = true;
            Ok(n.clone())
        })
    }

    async fn mark_all_read(&self, user_id: Id) -> RepoResult<u64> {
        self.mutate(|s| {
            let mut changed = 0;
            for n in s.notifications.values_mut().filter(|n| n.user_id == user_id && !n.is_read) {
                n.is_read = true;
                changed += 1;
            }
            Ok(changed)
        })
    }

    async fn delete_notification(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| s.notifications.remove(&id).map(|_| ()).ok_or(RepoError::NotFound))
    }

    async fn count_notifications(&self, unread_only: bool, user_id: Option<Id>) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(count(s.notifications.values()
            .filter(|n| !unread_only || !n.is_read)
            .filter(|n| user_id.map_or(true, |u| n.user_id == u))
            .count()))
    }
}

#[async_trait]
impl ActivityLogRepo for InMemRepo {
    async fn append_activity(&self, entry: NewActivity) -> RepoResult<ActivityLog> {
        self.mutate(|s| {
            let id = s.next_id();
            let log = ActivityLog {
                id,
                user_id: entry.user_id,
                action: entry.action,
                entity_type: entry.entity_type,
                entity_id: entry.entity_id,
                details: entry.details,
                ip_address: entry.ip_address,
                created_at: Utc::now(),
            };
            s.activity.push(log.clone());
            Ok(log)
        })
    }

    async fn search_activity(&self, filter: &ActivityFilter, page: &PageRequest) -> RepoResult<Page<ActivityLog>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.activity.iter().filter(|l| filter.matches(l)).cloned().collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(Page::from_sorted(v, page))
    }

    async fn purge_activity_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        self.mutate(|s| {
            let before = s.activity.len();
            s.activity.retain(|l| l.created_at >= cutoff);
            Ok(count(before - s.activity.len()))
        })
    }

    async fn count_activity(&self, action: Option<ActivityAction>, since: Option<DateTime<Utc>>) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(count(s.activity.iter()
            .filter(|l| action.map_or(true, |a| l.action == a))
            .filter(|l| since.map_or(true, |t| l.created_at >= t))
            .count()))
    }
}

#[cfg(test)]
impl InMemRepo {
    /// Backdate an audit entry; lets retention tests avoid sleeping.
    pub(crate) fn backdate_activity(&self, id: Id, at: DateTime<Utc>) {
        if let Ok(mut s) = self.write() {
            if let Some(l) = s.activity.iter_mut().find(|l| l.id == id) {
                l.created_at = at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn purge_drops_only_entries_before_cutoff() {
        let repo = InMemRepo::new();
        let old = repo.append_activity(NewActivity::new(ActivityAction::CreateQuestion)).await.unwrap();
        repo.append_activity(NewActivity::new(ActivityAction::CreateAnswer)).await.unwrap();
        repo.backdate_activity(old.id, Utc::now() - Duration::days(120));

        let purged = repo.purge_activity_before(Utc::now() - Duration::days(90)).await.unwrap();
        assert_eq!(purged, 1);
        let left = repo.search_activity(&ActivityFilter::default(), &PageRequest::default()).await.unwrap();
        assert_eq!(left.items.len(), 1);
        assert_eq!(left.items[0].action, ActivityAction::CreateAnswer);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn snapshot_survives_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemRepo::with_snapshot(dir.path());
        let writers: Vec<_> = (0..64)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let draft = NotificationDraft::new("SYSTEM", format!("message {i}"));
                    repo.insert_notifications(vec![NotificationInsert { user_id: 1, sender_id: None, draft }]).await
                })
            })
            .collect();
        for w in writers {
            w.await.unwrap().unwrap();
        }

        assert!(!dir.path().join("state.json.tmp").exists());
        let reloaded = InMemRepo::with_snapshot(dir.path());
        assert_eq!(reloaded.count_notifications(false, None).await.unwrap(), 64);
        assert_eq!(reloaded.read().unwrap().next_id, repo.read().unwrap().next_id);
    }

    #[tokio::test]
    async fn activity_counts_respect_since() {
        let repo = InMemRepo::new();
        let a = repo.append_activity(NewActivity::new(ActivityAction::BanUser)).await.unwrap();
        repo.append_activity(NewActivity::new(ActivityAction::BanUser)).await.unwrap();
        repo.backdate_activity(a.id, Utc::now() - Duration::days(2));

        assert_eq!(repo.count_activity(Some(ActivityAction::BanUser), None).await.unwrap(), 2);
        let yesterday = Utc::now() - Duration::days(1);
        assert_eq!(repo.count_activity(None, Some(yesterday)).await.unwrap(), 1);
    }
}
