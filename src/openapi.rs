use crate::models::{
    ActivityAction, ActivityLog, Answer, AnswerEdit, ContentKind, EntityKind, NewAnswer, NewQuestion, NewReport, Notification,
    NotificationDraft, Question, QuestionEdit, QuestionSort, Report, ReportStatus, Role, Tag, User, VoteTarget, VoteTally,
};
use crate::services::users::BanRequest;
use crate::services::{ModerationAction, Remediation};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_questions,
        crate::routes::create_question,
        crate::routes::get_question,
        crate::routes::update_question,
        crate::routes::delete_question,
        crate::routes::list_answers,
        crate::routes::create_answer,
        crate::routes::accept_answer,
        crate::routes::update_answer,
        crate::routes::delete_answer,
        crate::routes::list_tags,
        crate::routes::upvote_question,
        crate::routes::downvote_question,
        crate::routes::upvote_answer,
        crate::routes::downvote_answer,
        crate::routes::question_votes,
        crate::routes::answer_votes,
        crate::routes::pending_questions,
        crate::routes::moderate_question,
        crate::routes::toggle_lock,
        crate::routes::toggle_pin,
        crate::routes::create_report,
        crate::routes::my_reports,
        crate::routes::get_report,
        crate::routes::list_reports,
        crate::routes::report_counts,
        crate::routes::resolve_report,
        crate::routes::reject_report,
        crate::routes::delete_report,
        crate::routes::list_notifications,
        crate::routes::unread_count,
        crate::routes::mark_read,
        crate::routes::mark_all_read,
        crate::routes::delete_notification,
        crate::routes::batch_delete_notifications,
        crate::routes::all_notifications,
        crate::routes::notification_totals,
        crate::routes::send_notification,
        crate::routes::broadcast_notification,
        crate::routes::dashboard,
        crate::routes::search_activity,
        crate::routes::export_activity,
        crate::routes::activity_counts,
        crate::routes::activity_count_for,
        crate::routes::purge_activity,
        crate::routes::list_users,
        crate::routes::delete_user,
        crate::routes::ban_user,
        crate::routes::unban_user,
        crate::routes::change_role,
        crate::routes::auth_me,
        crate::routes::refresh_token,
    ),
    components(schemas(
        Question, NewQuestion, QuestionEdit, QuestionSort, Answer, NewAnswer, AnswerEdit, Tag,
        VoteTarget, VoteTally, ContentKind,
        Report, NewReport, ReportStatus, Remediation, crate::routes::Resolution, crate::routes::ReportCounts,
        Notification, NotificationDraft, crate::routes::BatchDeleteOutcome, crate::routes::NotificationTotals,
        ActivityLog, ActivityAction, EntityKind, crate::routes::ActivityCounts,
        User, Role, BanRequest, ModerationAction, crate::routes::DashboardStats,
        crate::routes::ResolveReportRequest, crate::routes::RejectReportRequest,
        crate::routes::SendNotificationRequest, crate::routes::BroadcastRequest,
        crate::routes::BatchDeleteRequest, crate::routes::PurgeRequest, crate::routes::RoleChangeRequest,
        crate::routes::CountResponse, crate::routes::TokenResponse, crate::routes::MeResponse,
    )),
    tags(
        (name = "questions", description = "Questions, answers and votes"),
        (name = "moderation", description = "Approval, locking, pinning and report handling"),
        (name = "notifications", description = "Per-user notifications"),
        (name = "admin", description = "Audit log, users and dashboard"),
    )
)]
pub struct ApiDoc;
