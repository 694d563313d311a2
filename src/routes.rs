use std::sync::Arc;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{Auth, Caller, Role};
use crate::error::{ApiError, ServiceError};
use crate::models::*;
use crate::rate_limit::{LimitedAction, RateLimiterFacade};
use crate::repo::Repo;
use crate::services::users::BanRequest;
use crate::services::{ModerationAction, Services};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            // questions & answers
            .service(
                web::resource("/questions")
                    .route(web::get().to(list_questions))
                    .route(web::post().to(create_question)),
            )
            .service(
                web::resource("/questions/{id}")
                    .route(web::get().to(get_question))
                    .route(web::put().to(update_question))
                    .route(web::delete().to(delete_question)),
            )
            .service(
                web::resource("/questions/{id}/answers")
                    .route(web::get().to(list_answers))
                    .route(web::post().to(create_answer)),
            )
            .service(web::resource("/questions/{id}/answers/{answer_id}/accept").route(web::post().to(accept_answer)))
            .service(web::resource("/questions/{id}/upvote").route(web::post().to(upvote_question)))
            .service(web::resource("/questions/{id}/downvote").route(web::post().to(downvote_question)))
            .service(web::resource("/questions/{id}/votes").route(web::get().to(question_votes)))
            .service(
                web::resource("/answers/{id}")
                    .route(web::put().to(update_answer))
                    .route(web::delete().to(delete_answer)),
            )
            .service(web::resource("/answers/{id}/votes").route(web::get().to(answer_votes)))
            .service(web::resource("/answers/{id}/upvote").route(web::post().to(upvote_answer)))
            .service(web::resource("/answers/{id}/downvote").route(web::post().to(downvote_answer)))
            .service(web::resource("/tags").route(web::get().to(list_tags)))
            // reports
            .service(web::resource("/reports").route(web::post().to(create_report)))
            .service(web::resource("/reports/mine").route(web::get().to(my_reports)))
            .service(web::resource("/reports/{id}").route(web::get().to(get_report)))
            // notifications
            .service(web::resource("/notifications").route(web::get().to(list_notifications)))
            .service(web::resource("/notifications/unread-count").route(web::get().to(unread_count)))
            .service(web::resource("/notifications/read-all").route(web::post().to(mark_all_read)))
            .service(web::resource("/notifications/batch-delete").route(web::post().to(batch_delete_notifications)))
            .service(web::resource("/notifications/{id}/read").route(web::post().to(mark_read)))
            .service(web::resource("/notifications/{id}").route(web::delete().to(delete_notification)))
            // moderation (MANAGER, ADMIN)
            .service(web::resource("/mod/questions/pending").route(web::get().to(pending_questions)))
            .service(web::resource("/mod/questions/{id}/toggle-lock").route(web::post().to(toggle_lock)))
            .service(web::resource("/mod/questions/{id}/toggle-pin").route(web::post().to(toggle_pin)))
            .service(web::resource("/mod/questions/{id}/{action}").route(web::post().to(moderate_question)))
            .service(web::resource("/mod/reports").route(web::get().to(list_reports)))
            .service(web::resource("/mod/reports/counts").route(web::get().to(report_counts)))
            .service(web::resource("/mod/reports/{id}").route(web::delete().to(delete_report)))
            .service(web::resource("/mod/reports/{id}/resolve").route(web::post().to(resolve_report)))
            .service(web::resource("/mod/reports/{id}/reject").route(web::post().to(reject_report)))
            .service(web::resource("/mod/notifications").route(web::get().to(all_notifications)))
            .service(web::resource("/mod/notifications/totals").route(web::get().to(notification_totals)))
            .service(web::resource("/mod/notifications/send").route(web::post().to(send_notification)))
            .service(web::resource("/mod/notifications/broadcast").route(web::post().to(broadcast_notification)))
            // administration
            .service(web::resource("/admin/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/admin/activity").route(web::get().to(search_activity)))
            .service(web::resource("/admin/activity/export").route(web::get().to(export_activity)))
            .service(web::resource("/admin/activity/counts").route(web::get().to(activity_counts)))
            .service(web::resource("/admin/activity/counts/{action}").route(web::get().to(activity_count_for)))
            .service(web::resource("/admin/activity/purge").route(web::post().to(purge_activity)))
            .service(web::resource("/admin/users").route(web::get().to(list_users)))
            .service(web::resource("/admin/users/{id}").route(web::delete().to(delete_user)))
            .service(web::resource("/admin/users/{id}/ban").route(web::post().to(ban_user)))
            .service(web::resource("/admin/users/{id}/unban").route(web::post().to(unban_user)))
            .service(web::resource("/admin/users/{id}/role").route(web::put().to(change_role)))
            // session
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { services: Services::new(repo), rate_limiter: None }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

/// Resolve the token subject against the stored account. A token for an
/// unknown user is treated as unauthenticated.
async fn caller(req: &HttpRequest, auth: &Auth, data: &AppState) -> Result<Caller, ApiError> {
    let user_id = auth.user_id().ok_or(ApiError::Unauthorized)?;
    let ip = req.connection_info().realip_remote_addr().map(str::to_string);
    match data.services.users.resolve_caller(user_id, ip).await {
        Ok(c) => Ok(c),
        Err(ServiceError::NotFound(..)) => Err(ApiError::Unauthorized),
        Err(e) => Err(e.into()),
    }
}

async fn viewer(req: &HttpRequest, auth: &Option<Auth>, data: &AppState) -> Result<Option<Caller>, ApiError> {
    match auth {
        Some(a) => caller(req, a, data).await.map(Some),
        None => Ok(None),
    }
}

fn throttle(data: &AppState, action: LimitedAction, caller: &Caller) -> Result<(), ApiError> {
    match &data.rate_limiter {
        Some(rl) if !rl.allow(action, caller.user_id) => Err(ApiError::TooManyRequests),
        _ => Ok(()),
    }
}

// ---------------- request / response bodies ----------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveReportRequest {
    pub resolution: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectReportRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendNotificationRequest {
    pub user_id: Id,
    pub notification: NotificationDraft,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    /// Absent: every user.
    pub role: Option<Role>,
    pub notification: NotificationDraft,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchDeleteRequest {
    pub ids: Vec<Id>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PurgeRequest {
    pub days: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleChangeRequest {
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub username: String,
    pub role: Role,
    pub is_banned: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportListQuery {
    pub status: Option<ReportStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub role: Option<Role>,
}

// ---------------- questions & answers ----------------

#[utoipa::path(
    get,
    path = "/api/v1/questions",
    params(QuestionQuery, PageRequest),
    responses((status = 200, description = "Questions visible to the caller, pinned first"))
)]
pub async fn list_questions(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<QuestionQuery>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&req, &auth, &data).await?;
    let page = data.services.content.list_questions(viewer.as_ref(), &query, &page).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/questions",
    request_body = NewQuestion,
    responses(
        (status = 201, description = "Question created; approved only when asked by staff", body = Question),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Account banned"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_question(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewQuestion>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    throttle(&data, LimitedAction::Question, &caller)?;
    let q = data.services.content.create_question(&caller, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(q))
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/{id}",
    params(("id" = Id, Path, description = "Question id")),
    responses(
        (status = 200, description = "Question; counts a view", body = Question),
        (status = 404, description = "Missing or hidden from the caller")
    )
)]
pub async fn get_question(req: HttpRequest, auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&req, &auth, &data).await?;
    let q = data.services.content.view_question(viewer.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(q))
}

#[utoipa::path(
    put,
    path = "/api/v1/questions/{id}",
    params(("id" = Id, Path, description = "Question id")),
    request_body = QuestionEdit,
    responses(
        (status = 200, description = "Question edited", body = Question),
        (status = 403, description = "Not the author or staff"),
        (status = 404, description = "Missing or hidden from the caller"),
        (status = 409, description = "Question locked")
    )
)]
pub async fn update_question(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<QuestionEdit>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let q = data.services.content.update_question(&caller, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(q))
}

#[utoipa::path(
    delete,
    path = "/api/v1/questions/{id}",
    params(("id" = Id, Path, description = "Question id")),
    responses(
        (status = 204, description = "Deleted with its answers and votes"),
        (status = 403, description = "Not the author or staff"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_question(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    data.services.content.delete_question(&caller, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/{id}/answers",
    params(("id" = Id, Path, description = "Question id")),
    responses(
        (status = 200, description = "Accepted answer first, then by votes", body = [Answer]),
        (status = 404, description = "Question missing or hidden")
    )
)]
pub async fn list_answers(req: HttpRequest, auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&req, &auth, &data).await?;
    let answers = data.services.content.list_answers(viewer.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(answers))
}

#[utoipa::path(
    post,
    path = "/api/v1/questions/{id}/answers",
    params(("id" = Id, Path, description = "Question id")),
    request_body = NewAnswer,
    responses(
        (status = 201, description = "Answer created", body = Answer),
        (status = 404, description = "Question missing or hidden"),
        (status = 409, description = "Question locked"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_answer(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewAnswer>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    throttle(&data, LimitedAction::Answer, &caller)?;
    let answer = data.services.content.create_answer(&caller, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(answer))
}

#[utoipa::path(
    post,
    path = "/api/v1/questions/{id}/answers/{answer_id}/accept",
    params(("id" = Id, Path, description = "Question id"), ("answer_id" = Id, Path, description = "Answer id")),
    responses(
        (status = 200, description = "Answer accepted; any previous acceptance cleared", body = Answer),
        (status = 400, description = "Answer belongs to another question"),
        (status = 403, description = "Not the question author or staff")
    )
)]
pub async fn accept_answer(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let (question_id, answer_id) = path.into_inner();
    let answer = data.services.content.accept_answer(&caller, question_id, answer_id).await?;
    Ok(HttpResponse::Ok().json(answer))
}

#[utoipa::path(
    put,
    path = "/api/v1/answers/{id}",
    params(("id" = Id, Path, description = "Answer id")),
    request_body = AnswerEdit,
    responses(
        (status = 200, description = "Answer edited", body = Answer),
        (status = 403, description = "Not the author or staff"),
        (status = 409, description = "Question locked")
    )
)]
pub async fn update_answer(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<AnswerEdit>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let answer = data.services.content.update_answer(&caller, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(answer))
}

#[utoipa::path(
    delete,
    path = "/api/v1/answers/{id}",
    params(("id" = Id, Path, description = "Answer id")),
    responses((status = 204, description = "Deleted"), (status = 403, description = "Not the author or staff"))
)]
pub async fn delete_answer(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    data.services.content.delete_answer(&caller, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(get, path = "/api/v1/tags", responses((status = 200, description = "Tags by usage", body = [Tag])))]
pub async fn list_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.services.content.list_tags().await?))
}

// ---------------- votes ----------------

async fn vote(req: HttpRequest, auth: Auth, data: web::Data<AppState>, target: VoteTarget, up: bool) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    throttle(&data, LimitedAction::Vote, &caller)?;
    let tally = if up {
        data.services.votes.toggle_upvote(&caller, target).await?
    } else {
        data.services.votes.downvote(&caller, target).await?
    };
    Ok(HttpResponse::Ok().json(tally))
}

#[utoipa::path(
    post,
    path = "/api/v1/questions/{id}/upvote",
    params(("id" = Id, Path, description = "Question id")),
    responses((status = 200, description = "Vote toggled", body = VoteTally), (status = 404, description = "Missing or hidden"))
)]
pub async fn upvote_question(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    vote(req, auth, data, VoteTarget::question(path.into_inner()), true).await
}

#[utoipa::path(
    post,
    path = "/api/v1/questions/{id}/downvote",
    params(("id" = Id, Path, description = "Question id")),
    responses((status = 200, description = "Upvote withdrawn", body = VoteTally), (status = 409, description = "No upvote to withdraw"))
)]
pub async fn downvote_question(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    vote(req, auth, data, VoteTarget::question(path.into_inner()), false).await
}

#[utoipa::path(
    post,
    path = "/api/v1/answers/{id}/upvote",
    params(("id" = Id, Path, description = "Answer id")),
    responses((status = 200, description = "Vote toggled", body = VoteTally))
)]
pub async fn upvote_answer(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    vote(req, auth, data, VoteTarget::answer(path.into_inner()), true).await
}

#[utoipa::path(
    post,
    path = "/api/v1/answers/{id}/downvote",
    params(("id" = Id, Path, description = "Answer id")),
    responses((status = 200, description = "Upvote withdrawn", body = VoteTally), (status = 409, description = "No upvote to withdraw"))
)]
pub async fn downvote_answer(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    vote(req, auth, data, VoteTarget::answer(path.into_inner()), false).await
}

async fn tally(req: HttpRequest, auth: Option<Auth>, data: web::Data<AppState>, target: VoteTarget) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.votes.tally(viewer.as_ref(), target).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/{id}/votes",
    params(("id" = Id, Path, description = "Question id")),
    responses((status = 200, description = "Vote count and the caller's vote", body = VoteTally), (status = 404, description = "Missing or hidden"))
)]
pub async fn question_votes(req: HttpRequest, auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    tally(req, auth, data, VoteTarget::question(path.into_inner())).await
}

#[utoipa::path(
    get,
    path = "/api/v1/answers/{id}/votes",
    params(("id" = Id, Path, description = "Answer id")),
    responses((status = 200, description = "Vote count and the caller's vote", body = VoteTally), (status = 404, description = "Missing or under a hidden question"))
)]
pub async fn answer_votes(req: HttpRequest, auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    tally(req, auth, data, VoteTarget::answer(path.into_inner())).await
}

// ---------------- moderation ----------------

#[utoipa::path(
    get,
    path = "/api/v1/mod/questions/pending",
    params(PageRequest),
    responses((status = 200, description = "Unapproved questions"), (status = 403, description = "Staff only"))
)]
pub async fn pending_questions(req: HttpRequest, auth: Auth, data: web::Data<AppState>, page: web::Query<PageRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.moderation.pending(&caller, &page).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/questions/{id}/{action}",
    params(
        ("id" = Id, Path, description = "Question id"),
        ("action" = ModerationAction, Path, description = "approve | reject | lock | unlock | pin | unpin")
    ),
    responses(
        (status = 200, description = "Question after the transition (unchanged if already in that state)", body = Question),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn moderate_question(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, ModerationAction)>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let (id, action) = path.into_inner();
    Ok(HttpResponse::Ok().json(data.services.moderation.apply(&caller, id, action).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/questions/{id}/toggle-lock",
    params(("id" = Id, Path, description = "Question id")),
    responses((status = 200, description = "Lock flipped", body = Question))
)]
pub async fn toggle_lock(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.moderation.toggle_lock(&caller, path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/questions/{id}/toggle-pin",
    params(("id" = Id, Path, description = "Question id")),
    responses((status = 200, description = "Pin flipped", body = Question))
)]
pub async fn toggle_pin(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.moderation.toggle_pin(&caller, path.into_inner()).await?))
}

// ---------------- reports ----------------

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report filed", body = Report),
        (status = 404, description = "Reported content not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_report(req: HttpRequest, auth: Auth, data: web::Data<AppState>, payload: web::Json<NewReport>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    throttle(&data, LimitedAction::Report, &caller)?;
    let report = data.services.reports.create_report(&caller, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(get, path = "/api/v1/reports/mine", params(PageRequest), responses((status = 200, description = "Reports filed by the caller")))]
pub async fn my_reports(req: HttpRequest, auth: Auth, data: web::Data<AppState>, page: web::Query<PageRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.reports.my_reports(&caller, &page).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{id}",
    params(("id" = Id, Path, description = "Report id")),
    responses((status = 200, description = "Report", body = Report), (status = 403, description = "Not the reporter or staff"))
)]
pub async fn get_report(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.reports.get(&caller, path.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/mod/reports",
    params(ReportListQuery, PageRequest),
    responses((status = 200, description = "Reports, newest first"), (status = 403, description = "Staff only"))
)]
pub async fn list_reports(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ReportListQuery>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.reports.list(&caller, query.status, &page).await?))
}

#[utoipa::path(get, path = "/api/v1/mod/reports/counts", responses((status = 200, description = "Counts by status", body = ReportCounts)))]
pub async fn report_counts(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.reports.counts(&caller).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/reports/{id}/resolve",
    params(("id" = Id, Path, description = "Report id")),
    request_body = ResolveReportRequest,
    responses(
        (status = 200, description = "Resolved; remediation outcome included", body = Resolution),
        (status = 409, description = "Report already closed")
    )
)]
pub async fn resolve_report(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ResolveReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let outcome = data.services.reports.resolve(&caller, path.into_inner(), &payload.resolution).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    delete,
    path = "/api/v1/mod/reports/{id}",
    params(("id" = Id, Path, description = "Report id")),
    responses((status = 204, description = "Report removed"), (status = 403, description = "Staff only"), (status = 404, description = "Not found"))
)]
pub async fn delete_report(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    data.services.reports.delete(&caller, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/reports/{id}/reject",
    params(("id" = Id, Path, description = "Report id")),
    request_body = RejectReportRequest,
    responses((status = 200, description = "Rejected", body = Report), (status = 409, description = "Report already closed"))
)]
pub async fn reject_report(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<RejectReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.reports.reject(&caller, path.into_inner(), &payload.reason).await?))
}

// ---------------- notifications ----------------

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    params(NotificationListQuery),
    responses((status = 200, description = "Caller's notifications, newest first", body = [Notification]))
)]
pub async fn list_notifications(req: HttpRequest, auth: Auth, data: web::Data<AppState>, query: web::Query<NotificationListQuery>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.notifications.list_mine(&caller, query.unread).await?))
}

#[utoipa::path(get, path = "/api/v1/notifications/unread-count", responses((status = 200, description = "Unread count", body = CountResponse)))]
pub async fn unread_count(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let count = data.services.notifications.unread_count(&caller).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    params(("id" = Id, Path, description = "Notification id")),
    responses((status = 200, description = "Marked read", body = Notification))
)]
pub async fn mark_read(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.notifications.mark_as_read(&caller, path.into_inner()).await?))
}

#[utoipa::path(post, path = "/api/v1/notifications/read-all", responses((status = 200, description = "Number marked", body = CountResponse)))]
pub async fn mark_all_read(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let count = data.services.notifications.mark_all_as_read(&caller).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/notifications/{id}",
    params(("id" = Id, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not yours, or sent by an admin and caller is not one")
    )
)]
pub async fn delete_notification(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    data.services.notifications.delete(&caller, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/batch-delete",
    request_body = BatchDeleteRequest,
    responses((status = 200, description = "Deleted and skipped ids", body = BatchDeleteOutcome))
)]
pub async fn batch_delete_notifications(req: HttpRequest, auth: Auth, data: web::Data<AppState>, payload: web::Json<BatchDeleteRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.notifications.delete_batch(&caller, &payload.ids).await?))
}

#[utoipa::path(get, path = "/api/v1/mod/notifications", params(PageRequest), responses((status = 200, description = "All notifications")))]
pub async fn all_notifications(req: HttpRequest, auth: Auth, data: web::Data<AppState>, page: web::Query<PageRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.notifications.list_all(&caller, &page).await?))
}

#[utoipa::path(get, path = "/api/v1/mod/notifications/totals", responses((status = 200, description = "Totals", body = NotificationTotals)))]
pub async fn notification_totals(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.notifications.totals(&caller).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/notifications/send",
    request_body = SendNotificationRequest,
    responses((status = 201, description = "Sent", body = Notification), (status = 404, description = "Recipient not found"))
)]
pub async fn send_notification(req: HttpRequest, auth: Auth, data: web::Data<AppState>, payload: web::Json<SendNotificationRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let SendNotificationRequest { user_id, notification } = payload.into_inner();
    let n = data.services.notifications.notify_user(&caller, user_id, notification).await?;
    Ok(HttpResponse::Created().json(n))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/notifications/broadcast",
    request_body = BroadcastRequest,
    responses((status = 200, description = "Number of recipients", body = CountResponse))
)]
pub async fn broadcast_notification(req: HttpRequest, auth: Auth, data: web::Data<AppState>, payload: web::Json<BroadcastRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let BroadcastRequest { role, notification } = payload.into_inner();
    let svc = &data.services.notifications;
    let count = match role {
        Some(role) => svc.notify_by_role(&caller, role, notification).await?,
        None => svc.notify_all_users(&caller, notification).await?,
    };
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

// ---------------- administration ----------------

#[utoipa::path(get, path = "/api/v1/admin/dashboard", responses((status = 200, description = "Aggregate counts", body = DashboardStats)))]
pub async fn dashboard(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.dashboard.stats(&caller).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/activity",
    params(ActivityFilter, PageRequest),
    responses((status = 200, description = "Matching audit entries, newest first"), (status = 403, description = "Staff only"))
)]
pub async fn search_activity(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    filter: web::Query<ActivityFilter>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.audit.search(&caller, &filter, &page).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/activity/export",
    params(ActivityFilter),
    responses((status = 200, description = "CSV of matching entries", content_type = "text/csv"))
)]
pub async fn export_activity(req: HttpRequest, auth: Auth, data: web::Data<AppState>, filter: web::Query<ActivityFilter>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let csv = data.services.audit.export_csv(&caller, &filter).await?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", "attachment; filename=\"activity_logs.csv\""))
        .body(csv))
}

#[utoipa::path(get, path = "/api/v1/admin/activity/counts", responses((status = 200, description = "Totals", body = ActivityCounts)))]
pub async fn activity_counts(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.audit.counts(&caller).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/activity/counts/{action}",
    params(("action" = ActivityAction, Path, description = "Audit action, e.g. RESOLVE_REPORT")),
    responses((status = 200, description = "Entries recorded for the action", body = CountResponse), (status = 403, description = "Staff only"))
)]
pub async fn activity_count_for(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<ActivityAction>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let count = data.services.audit.count_by_action(&caller, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/activity/purge",
    request_body = PurgeRequest,
    responses((status = 200, description = "Entries deleted", body = CountResponse), (status = 403, description = "Admin only"))
)]
pub async fn purge_activity(req: HttpRequest, auth: Auth, data: web::Data<AppState>, payload: web::Json<PurgeRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let count = data.services.audit.purge(&caller, payload.days).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(get, path = "/api/v1/admin/users", params(UserListQuery), responses((status = 200, description = "Users", body = [User])))]
pub async fn list_users(req: HttpRequest, auth: Auth, data: web::Data<AppState>, query: web::Query<UserListQuery>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.users.list(&caller, query.role).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/ban",
    params(("id" = Id, Path, description = "User id")),
    request_body = BanRequest,
    responses((status = 200, description = "Banned", body = User), (status = 403, description = "Admin only"), (status = 409, description = "Cannot ban yourself"))
)]
pub async fn ban_user(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<BanRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.users.ban(&caller, path.into_inner(), payload.into_inner()).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 204, description = "Account and owned content removed"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Own account, or the user has resolved reports")
    )
)]
pub async fn delete_user(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    data.services.users.delete(&caller, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/unban",
    params(("id" = Id, Path, description = "User id")),
    responses((status = 200, description = "Unbanned", body = User))
)]
pub async fn unban_user(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.users.unban(&caller, path.into_inner()).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = Id, Path, description = "User id")),
    request_body = RoleChangeRequest,
    responses((status = 200, description = "Role changed", body = User), (status = 409, description = "Cannot change your own role"))
)]
pub async fn change_role(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<RoleChangeRequest>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    Ok(HttpResponse::Ok().json(data.services.users.change_role(&caller, path.into_inner(), payload.role).await?))
}

// ---------------- session ----------------

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses((status = 200, description = "Current account", body = MeResponse), (status = 401, description = "Unauthorized"))
)]
pub async fn auth_me(req: HttpRequest, auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = caller(&req, &auth, &data).await?;
    let user = data.services.users.get(caller.user_id).await?;
    Ok(HttpResponse::Ok().json(MeResponse { id: user.id, username: user.username, role: user.role, is_banned: caller.banned }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses((status = 200, description = "Fresh token for the same subject", body = TokenResponse), (status = 401, description = "Unauthorized"))
)]
pub async fn refresh_token(auth: Auth) -> Result<HttpResponse, ApiError> {
    let token = crate::auth::refresh_jwt(&auth.0).map_err(|_| ApiError::Unauthorized)?;
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

// schema re-exports for the OpenAPI document
pub use crate::services::activity::ActivityCounts;
pub use crate::services::dashboard::DashboardStats;
pub use crate::services::notifications::{BatchDeleteOutcome, NotificationTotals};
pub use crate::services::reports::{ReportCounts, Resolution};
