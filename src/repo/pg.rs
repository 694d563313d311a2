use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use super::*;

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
}

async fn insert_tags(tx: &mut Transaction<'_, Postgres>, question_id: Id, tags: &[String]) -> RepoResult<()> {
    for tag in tags {
        sqlx::query(
            "INSERT INTO tags (name, question_count) VALUES ($1, 1)
             ON CONFLICT (name) DO UPDATE SET question_count = tags.question_count + 1"
        )
            .bind(tag)
            .execute(&mut **tx).await.map_err(db)?;
        sqlx::query("INSERT INTO question_tags (question_id, tag) VALUES ($1,$2)")
            .bind(question_id).bind(tag)
            .execute(&mut **tx).await.map_err(db)?;
    }
    Ok(())
}

fn db(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(d) => match d.code().as_deref() {
            Some("23505") => RepoError::Conflict,   // unique_violation
            Some("23503") => RepoError::NotFound,   // foreign_key_violation
            Some("40001") => RepoError::Conflict,   // serialization_failure
            _ => RepoError::Internal(e.to_string()),
        },
        _ => RepoError::Internal(e.to_string()),
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

const USER_COLUMNS: &str =
    "id, username, email, role, reputation, is_banned, banned_until, ban_reason, created_at";

const QUESTION_COLUMNS: &str = r#"
    q.id, q.author_id, q.title, q.body, q.views, q.votes, q.answer_count,
    q.is_approved, q.is_locked, q.is_pinned, q.accepted_answer_id,
    COALESCE(
        (SELECT array_agg(qt.tag ORDER BY qt.tag) FROM question_tags qt WHERE qt.question_id = q.id),
        ARRAY[]::text[]
    ) AS tags,
    q.created_at, q.updated_at
"#;

const ANSWER_COLUMNS: &str = "id, question_id, author_id, body, votes, is_accepted, created_at";

const REPORT_COLUMNS: &str = "id, reporter_id, entity_type, entity_id, reason, description, status, resolved_by, resolution, resolved_at, created_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, sender_id, kind, message, link, is_read, created_at";

const ACTIVITY_COLUMNS: &str = "id, user_id, action, entity_type, entity_id, details, ip_address, created_at";

fn push_question_filters(qb: &mut QueryBuilder<'_, Postgres>, vis: Visibility, query: &QuestionQuery) {
    qb.push(" WHERE TRUE");
    match vis {
        Visibility::Unrestricted => {}
        Visibility::Public { viewer: Some(viewer) } => {
            qb.push(" AND ((q.is_approved AND NOT q.is_locked) OR q.author_id = ");
            qb.push_bind(viewer);
            qb.push(")");
        }
        Visibility::Public { viewer: None } => {
            qb.push(" AND q.is_approved AND NOT q.is_locked");
        }
    }
    if let Some(author) = query.author_id {
        qb.push(" AND q.author_id = ").push_bind(author);
    }
    if let Some(tag) = query.tag.as_deref().filter(|t| !t.is_empty()) {
        qb.push(" AND EXISTS (SELECT 1 FROM question_tags qt WHERE qt.question_id = q.id AND qt.tag = ")
            .push_bind(tag.trim().to_lowercase())
            .push(")");
    }
    if let Some(needle) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = like_pattern(needle);
        qb.push(" AND (q.title ILIKE ").push_bind(pattern.clone())
            .push(" OR q.body ILIKE ").push_bind(pattern)
            .push(")");
    }
    if let Some(approved) = query.approved {
        qb.push(" AND q.is_approved = ").push_bind(approved);
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: &PageRequest) {
    qb.push(" LIMIT ").push_bind(i64::from(page.limit()));
    qb.push(" OFFSET ").push_bind(page.offset() as i64);
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, role) VALUES ($1,$2,$3) RETURNING {USER_COLUMNS}"
        ))
            .bind(&new.username).bind(&new.email).bind(new.role)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE lower(username) = lower($1)"))
            .bind(username)
            .fetch_optional(&self.pool).await.map_err(db)
    }

    async fn list_users(&self, role: Option<Role>) -> RepoResult<Vec<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE ($1::text IS NULL OR role = $1) ORDER BY id"
        ))
            .bind(role)
            .fetch_all(&self.pool).await.map_err(db)
    }

    async fn update_ban(&self, id: Id, ban: BanState) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_banned=$2, banned_until=$3, ban_reason=$4 WHERE id=$1 RETURNING {USER_COLUMNS}"
        ))
            .bind(id).bind(ban.is_banned).bind(ban.banned_until).bind(ban.ban_reason)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn update_role(&self, id: Id, role: Role) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!("UPDATE users SET role=$2 WHERE id=$1 RETURNING {USER_COLUMNS}"))
            .bind(id).bind(role)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn count_users(&self, banned_only: bool) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE NOT $1 OR (is_banned AND (banned_until IS NULL OR banned_until > now()))"
        )
            .bind(banned_only)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }

    async fn delete_user(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("SELECT id FROM users WHERE id=$1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        let (resolver,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM reports WHERE resolved_by=$1)")
            .bind(id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        if resolver {
            return Err(RepoError::Conflict);
        }
        // votes the user cast come off the counts they contributed to
        sqlx::query(
            "UPDATE questions q SET votes = q.votes - 1 FROM votes v
             WHERE v.user_id=$1 AND v.entity_type='QUESTION' AND v.entity_id=q.id"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query(
            "UPDATE answers a SET votes = a.votes - 1 FROM votes v
             WHERE v.user_id=$1 AND v.entity_type='ANSWER' AND v.entity_id=a.id"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM votes WHERE user_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        // authored questions, as delete_question does for one
        sqlx::query(
            "UPDATE tags t SET question_count = GREATEST(t.question_count - u.n, 0)
             FROM (SELECT qt.tag, COUNT(*) AS n FROM question_tags qt
                   JOIN questions q ON q.id = qt.question_id
                   WHERE q.author_id=$1 GROUP BY qt.tag) u
             WHERE t.name = u.tag"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query(
            "DELETE FROM votes WHERE (entity_type='QUESTION' AND entity_id IN (SELECT id FROM questions WHERE author_id=$1))
                OR (entity_type='ANSWER' AND entity_id IN (
                    SELECT a.id FROM answers a JOIN questions q ON q.id = a.question_id WHERE q.author_id=$1))"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM questions WHERE author_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        // answers left on other people's questions
        sqlx::query(
            "UPDATE questions q SET answer_count = GREATEST(q.answer_count - u.n, 0)
             FROM (SELECT question_id, COUNT(*) AS n FROM answers WHERE author_id=$1 GROUP BY question_id) u
             WHERE q.id = u.question_id"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM votes WHERE entity_type='ANSWER' AND entity_id IN (SELECT id FROM answers WHERE author_id=$1)")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        // accepted_answer_id is cleared by its ON DELETE SET NULL
        sqlx::query("DELETE FROM answers WHERE author_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM reports WHERE reporter_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM notifications WHERE user_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("UPDATE notifications SET sender_id = NULL WHERE sender_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM users WHERE id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        tx.commit().await.map_err(db)
    }
}

#[async_trait]
impl QuestionRepo for PgRepo {
    async fn create_question(&self, new: QuestionInsert) -> RepoResult<Question> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let (id,): (Id,) = sqlx::query_as(
            "INSERT INTO questions (author_id, title, body, is_approved) VALUES ($1,$2,$3,$4) RETURNING id"
        )
            .bind(new.author_id).bind(&new.title).bind(&new.body).bind(new.is_approved)
            .fetch_one(&mut *tx).await.map_err(db)?;
        insert_tags(&mut tx, id, &new.tags).await?;
        tx.commit().await.map_err(db)?;
        self.get_question(id).await
    }

    async fn get_question(&self, id: Id) -> RepoResult<Question> {
        sqlx::query_as::<_, Question>(&format!("SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.id=$1"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn list_questions(&self, vis: Visibility, query: &QuestionQuery, page: &PageRequest) -> RepoResult<Page<Question>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM questions q");
        push_question_filters(&mut count_qb, vis, query);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await.map_err(db)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {QUESTION_COLUMNS} FROM questions q"));
        push_question_filters(&mut qb, vis, query);
        qb.push(match query.sort {
            QuestionSort::Newest => " ORDER BY q.is_pinned DESC, q.created_at DESC, q.id DESC",
            QuestionSort::Votes => " ORDER BY q.is_pinned DESC, q.votes DESC, q.id DESC",
            QuestionSort::Views => " ORDER BY q.is_pinned DESC, q.views DESC, q.id DESC",
        });
        push_page(&mut qb, page);
        let items = qb.build_query_as::<Question>().fetch_all(&self.pool).await.map_err(db)?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn update_question(&self, id: Id, update: QuestionUpdate) -> RepoResult<Question> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("UPDATE questions SET title=$2, body=$3, updated_at=now() WHERE id=$1 RETURNING id")
            .bind(id).bind(&update.title).bind(&update.body)
            .fetch_one(&mut *tx).await.map_err(db)?;
        if let Some(tags) = &update.tags {
            sqlx::query(
                "UPDATE tags SET question_count = GREATEST(question_count - 1, 0)
                 WHERE name IN (SELECT tag FROM question_tags WHERE question_id=$1)"
            )
                .bind(id)
                .execute(&mut *tx).await.map_err(db)?;
            sqlx::query("DELETE FROM question_tags WHERE question_id=$1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db)?;
            insert_tags(&mut tx, id, tags).await?;
        }
        tx.commit().await.map_err(db)?;
        self.get_question(id).await
    }

    async fn update_flags(&self, id: Id, flags: FlagUpdate) -> RepoResult<Question> {
        sqlx::query(
            "UPDATE questions SET
                is_approved = COALESCE($2, is_approved),
                is_locked = COALESCE($3, is_locked),
                is_pinned = COALESCE($4, is_pinned),
                updated_at = now()
             WHERE id=$1 RETURNING id"
        )
            .bind(id).bind(flags.approved).bind(flags.locked).bind(flags.pinned)
            .fetch_one(&self.pool).await.map_err(db)?;
        self.get_question(id).await
    }

    async fn increment_views(&self, id: Id) -> RepoResult<Question> {
        sqlx::query("UPDATE questions SET views = views + 1 WHERE id=$1 RETURNING id")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)?;
        self.get_question(id).await
    }

    async fn delete_question(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("SELECT id FROM questions WHERE id=$1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        sqlx::query(
            "UPDATE tags SET question_count = GREATEST(question_count - 1, 0)
             WHERE name IN (SELECT tag FROM question_tags WHERE question_id=$1)"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query(
            "DELETE FROM votes WHERE (entity_type='QUESTION' AND entity_id=$1)
                OR (entity_type='ANSWER' AND entity_id IN (SELECT id FROM answers WHERE question_id=$1))"
        )
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        // answers and question_tags go with the row (ON DELETE CASCADE)
        sqlx::query("DELETE FROM questions WHERE id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        tx.commit().await.map_err(db)
    }

    async fn count_questions(&self, approved: Option<bool>) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM questions WHERE ($1::boolean IS NULL OR is_approved = $1)")
            .bind(approved)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }

    async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
        sqlx::query_as::<_, Tag>("SELECT name, question_count FROM tags ORDER BY question_count DESC, name")
            .fetch_all(&self.pool).await.map_err(db)
    }
}

#[async_trait]
impl AnswerRepo for PgRepo {
    async fn create_answer(&self, new: AnswerInsert) -> RepoResult<Answer> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let answer = sqlx::query_as::<_, Answer>(&format!(
            "INSERT INTO answers (question_id, author_id, body) VALUES ($1,$2,$3) RETURNING {ANSWER_COLUMNS}"
        ))
            .bind(new.question_id).bind(new.author_id).bind(&new.body)
            .fetch_one(&mut *tx).await.map_err(db)?;
        sqlx::query("UPDATE questions SET answer_count = answer_count + 1 WHERE id=$1")
            .bind(new.question_id)
            .execute(&mut *tx).await.map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(answer)
    }

    async fn get_answer(&self, id: Id) -> RepoResult<Answer> {
        sqlx::query_as::<_, Answer>(&format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn list_answers(&self, question_id: Id) -> RepoResult<Vec<Answer>> {
        sqlx::query_as::<_, Answer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers WHERE question_id=$1
             ORDER BY is_accepted DESC, votes DESC, created_at DESC, id DESC"
        ))
            .bind(question_id)
            .fetch_all(&self.pool).await.map_err(db)
    }

    async fn accept_answer(&self, question_id: Id, answer_id: Id) -> RepoResult<Answer> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("SELECT id FROM answers WHERE id=$1 AND question_id=$2 FOR UPDATE")
            .bind(answer_id).bind(question_id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        sqlx::query("UPDATE answers SET is_accepted = (id = $2) WHERE question_id=$1")
            .bind(question_id).bind(answer_id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("UPDATE questions SET accepted_answer_id=$2, updated_at=now() WHERE id=$1 RETURNING id")
            .bind(question_id).bind(answer_id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        tx.commit().await.map_err(db)?;
        self.get_answer(answer_id).await
    }

    async fn update_answer(&self, id: Id, body: String) -> RepoResult<Answer> {
        sqlx::query_as::<_, Answer>(&format!("UPDATE answers SET body=$2 WHERE id=$1 RETURNING {ANSWER_COLUMNS}"))
            .bind(id).bind(body)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn delete_answer(&self, id: Id) -> RepoResult<Answer> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let answer = sqlx::query_as::<_, Answer>(&format!("DELETE FROM answers WHERE id=$1 RETURNING {ANSWER_COLUMNS}"))
            .bind(id)
            .fetch_one(&mut *tx).await.map_err(db)?;
        sqlx::query(
            "UPDATE questions SET
                answer_count = GREATEST(answer_count - 1, 0),
                accepted_answer_id = CASE WHEN accepted_answer_id = $2 THEN NULL ELSE accepted_answer_id END
             WHERE id=$1"
        )
            .bind(answer.question_id).bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        sqlx::query("DELETE FROM votes WHERE entity_type='ANSWER' AND entity_id=$1")
            .bind(id)
            .execute(&mut *tx).await.map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(answer)
    }

    async fn count_answers(&self) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM answers")
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }
}

#[async_trait]
impl VoteRepo for PgRepo {
    async fn has_voted(&self, user_id: Id, target: VoteTarget) -> RepoResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM votes WHERE user_id=$1 AND entity_type=$2 AND entity_id=$3)"
        )
            .bind(user_id).bind(target.kind).bind(target.id)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(exists)
    }

    async fn record_vote(&self, user_id: Id, target: VoteTarget, change: VoteChange) -> RepoResult<i64> {
        let table = match target.kind {
            ContentKind::Question => "questions",
            ContentKind::Answer => "answers",
        };
        let mut tx = self.pool.begin().await.map_err(db)?;
        let (votes,): (i64,) = sqlx::query_as(&format!("UPDATE {table} SET votes = votes + $2 WHERE id=$1 RETURNING votes"))
            .bind(target.id).bind(change.delta())
            .fetch_one(&mut *tx).await.map_err(db)?;
        match change {
            VoteChange::Cast => {
                // the (user_id, entity_type, entity_id) primary key turns a double cast into 23505
                sqlx::query("INSERT INTO votes (user_id, entity_type, entity_id) VALUES ($1,$2,$3)")
                    .bind(user_id).bind(target.kind).bind(target.id)
                    .execute(&mut *tx).await.map_err(db)?;
            }
            VoteChange::Retract => {
                let done = sqlx::query("DELETE FROM votes WHERE user_id=$1 AND entity_type=$2 AND entity_id=$3")
                    .bind(user_id).bind(target.kind).bind(target.id)
                    .execute(&mut *tx).await.map_err(db)?;
                if done.rows_affected() == 0 {
                    return Err(RepoError::Conflict);
                }
            }
        }
        tx.commit().await.map_err(db)?;
        Ok(votes)
    }
}

#[async_trait]
impl ReportRepo for PgRepo {
    async fn create_report(&self, new: ReportInsert) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!(
            "INSERT INTO reports (reporter_id, entity_type, entity_id, reason, description, status)
             VALUES ($1,$2,$3,$4,$5,'PENDING') RETURNING {REPORT_COLUMNS}"
        ))
            .bind(new.reporter_id)
            .bind(new.report.entity_type)
            .bind(new.report.entity_id)
            .bind(&new.report.reason)
            .bind(&new.report.description)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn list_reports(&self, status: Option<ReportStatus>, reporter: Option<Id>, page: &PageRequest) -> RepoResult<Page<Report>> {
        let push_filters = |qb: &mut QueryBuilder<'_, Postgres>| {
            qb.push(" WHERE TRUE");
            if let Some(s) = status { qb.push(" AND status = ").push_bind(s); }
            if let Some(r) = reporter { qb.push(" AND reporter_id = ").push_bind(r); }
        };
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reports");
        push_filters(&mut count_qb);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await.map_err(db)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {REPORT_COLUMNS} FROM reports"));
        push_filters(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC");
        push_page(&mut qb, page);
        let items = qb.build_query_as::<Report>().fetch_all(&self.pool).await.map_err(db)?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn close_report(&self, id: Id, closure: ReportClosure) -> RepoResult<Report> {
        let closed = sqlx::query_as::<_, Report>(&format!(
            "UPDATE reports SET status=$2, resolved_by=$3, resolution=$4, resolved_at=$5
             WHERE id=$1 AND status='PENDING' RETURNING {REPORT_COLUMNS}"
        ))
            .bind(id)
            .bind(closure.status)
            .bind(closure.resolved_by)
            .bind(&closure.resolution)
            .bind(closure.resolved_at)
            .fetch_optional(&self.pool).await.map_err(db)?;
        match closed {
            Some(r) => Ok(r),
            // distinguish "already closed" from "no such report"
            None => {
                self.get_report(id).await?;
                Err(RepoError::Conflict)
            }
        }
    }

    async fn count_reports(&self, status: Option<ReportStatus>) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reports WHERE ($1::text IS NULL OR status = $1)")
            .bind(status)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }

    async fn delete_report(&self, id: Id) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!("DELETE FROM reports WHERE id=$1 RETURNING {REPORT_COLUMNS}"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }
}

#[async_trait]
impl NotificationRepo for PgRepo {
    async fn insert_notifications(&self, rows: Vec<NotificationInsert>) -> RepoResult<Vec<Notification>> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let n = sqlx::query_as::<_, Notification>(&format!(
                "INSERT INTO notifications (user_id, sender_id, kind, message, link) VALUES ($1,$2,$3,$4,$5)
                 RETURNING {NOTIFICATION_COLUMNS}"
            ))
                .bind(row.user_id)
                .bind(row.sender_id)
                .bind(&row.draft.kind)
                .bind(&row.draft.message)
                .bind(&row.draft.link)
                .fetch_one(&mut *tx).await.map_err(db)?;
            out.push(n);
        }
        tx.commit().await.map_err(db)?;
        Ok(out)
    }

    async fn get_notification(&self, id: Id) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn list_notifications_for(&self, user_id: Id, unread_only: bool) -> RepoResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id=$1 AND (NOT $2 OR NOT is_read)
             ORDER BY created_at DESC, id DESC"
        ))
            .bind(user_id).bind(unread_only)
            .fetch_all(&self.pool).await.map_err(db)
    }

    async fn list_notifications(&self, page: &PageRequest) -> RepoResult<Page<Notification>> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
            .fetch_one(&self.pool).await.map_err(db)?;
        let items = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
            .bind(i64::from(page.limit())).bind(page.offset() as i64)
            .fetch_all(&self.pool).await.map_err(db)?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn mark_read(&self, id: Id) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications SET is_read = TRUE WHERE id=$1 RETURNING {NOTIFICATION_COLUMNS}"
        ))
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn mark_all_read(&self, user_id: Id) -> RepoResult<u64> {
        let done = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id=$1 AND NOT is_read")
            .bind(user_id)
            .execute(&self.pool).await.map_err(db)?;
        Ok(done.rows_affected())
    }

    async fn delete_notification(&self, id: Id) -> RepoResult<()> {
        let done = sqlx::query("DELETE FROM notifications WHERE id=$1")
            .bind(id)
            .execute(&self.pool).await.map_err(db)?;
        if done.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn count_notifications(&self, unread_only: bool, user_id: Option<Id>) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE (NOT $1 OR NOT is_read) AND ($2::bigint IS NULL OR user_id = $2)"
        )
            .bind(unread_only).bind(user_id)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }
}

fn push_activity_filters(qb: &mut QueryBuilder<'_, Postgres>, f: &ActivityFilter) {
    qb.push(" WHERE TRUE");
    if let Some(needle) = f.search.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND details ILIKE ").push_bind(like_pattern(needle));
    }
    if let Some(a) = f.action { qb.push(" AND action = ").push_bind(a); }
    if let Some(k) = f.entity_type { qb.push(" AND entity_type = ").push_bind(k); }
    if let Some(u) = f.user_id { qb.push(" AND user_id = ").push_bind(u); }
    if let Some(from) = f.from { qb.push(" AND created_at >= ").push_bind(from); }
    if let Some(to) = f.to { qb.push(" AND created_at <= ").push_bind(to); }
}

#[async_trait]
impl ActivityLogRepo for PgRepo {
    async fn append_activity(&self, entry: NewActivity) -> RepoResult<ActivityLog> {
        sqlx::query_as::<_, ActivityLog>(&format!(
            "INSERT INTO activity_logs (user_id, action, entity_type, entity_id, details, ip_address)
             VALUES ($1,$2,$3,$4,$5,$6) RETURNING {ACTIVITY_COLUMNS}"
        ))
            .bind(entry.user_id)
            .bind(entry.action)
            .bind(entry.entity_type)
            .bind(entry.entity_id)
            .bind(&entry.details)
            .bind(&entry.ip_address)
            .fetch_one(&self.pool).await.map_err(db)
    }

    async fn search_activity(&self, filter: &ActivityFilter, page: &PageRequest) -> RepoResult<Page<ActivityLog>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM activity_logs");
        push_activity_filters(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await.map_err(db)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ACTIVITY_COLUMNS} FROM activity_logs"));
        push_activity_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC");
        push_page(&mut qb, page);
        let items = qb.build_query_as::<ActivityLog>().fetch_all(&self.pool).await.map_err(db)?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn purge_activity_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let done = sqlx::query("DELETE FROM activity_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool).await.map_err(db)?;
        Ok(done.rows_affected())
    }

    async fn count_activity(&self, action: Option<ActivityAction>, since: Option<DateTime<Utc>>) -> RepoResult<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM activity_logs WHERE ($1::text IS NULL OR action = $1) AND ($2::timestamptz IS NULL OR created_at >= $2)"
        )
            .bind(action).bind(since)
            .fetch_one(&self.pool).await.map_err(db)?;
        Ok(n as u64)
    }
}
