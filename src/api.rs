// HTTP API - axum router translating requests into store and workflow calls

use axum::{
    extract::{Path as AxumPath, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    app_state::AppState,
    core::{Address, Usdc},
    error::{AppError, AppResult},
    membership::{resolve_access, AbortHandle},
    store::models::{GroupSettingsUpdate, RawAdministrator},
};

fn parse_wallet(raw: &str) -> AppResult<Address> {
    Address::parse(raw).map_err(|e| AppError::Validation(e.to_string()))
}

#[derive(Deserialize)]
pub struct WalletQuery {
    pub wallet: String,
}

#[derive(Deserialize)]
pub struct ViewerQuery {
    pub viewer: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub wallet: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateNameRequest {
    pub wallet: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct UpdateDescriptionRequest {
    pub wallet: String,
    pub description: String,
}

#[derive(Deserialize, Default)]
pub struct UpdateSettingsRequest {
    pub wallet: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub about_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub gallery_urls: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: crate::store::models::Visibility,
    #[serde(default)]
    pub billing_cadence: crate::store::models::BillingCadence,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub administrators: Vec<RawAdministrator>,
}

#[derive(Deserialize)]
pub struct SubscriptionWebhookRequest {
    pub group_id: Option<i64>,
    pub subscription_id: String,
    pub ends_on: i64,
}

#[derive(Deserialize)]
pub struct ContentRequest {
    pub wallet: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct CreateCourseRequest {
    pub wallet: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateModuleRequest {
    pub wallet: String,
    pub title: String,
}

#[derive(Deserialize)]
pub struct CreateLessonRequest {
    pub wallet: String,
    pub title: String,
    pub description: Option<String>,
    pub video_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateListingRequest {
    pub wallet: String,
    pub price: String,
    pub duration_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Group handlers

pub async fn create_group_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let group = state
        .store
        .create_group(&wallet, &req.name, req.description.as_deref())
        .await?;
    Ok(Json(json!({ "group": group })))
}

pub async fn list_groups_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let groups = state.store.list_all_groups().await?;
    Ok(Json(json!({ "groups": groups })))
}

pub async fn get_group_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<Value>, AppError> {
    let group = state.store.require_group(group_id).await?;

    let (viewer_id, is_member) = match params.viewer.as_deref() {
        Some(raw) => {
            let wallet = parse_wallet(raw)?;
            let viewer = state.store.get_user_by_wallet(&wallet).await?;
            let is_member = state
                .store
                .get_membership(group_id, &wallet)
                .await?
                .is_some();
            (viewer.map(|u| u.id), is_member)
        }
        None => (None, false),
    };

    let access = resolve_access(&group, viewer_id, is_member);
    Ok(Json(json!({ "group": group, "access": access })))
}

pub async fn delete_group_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Query(params): Query<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    state.store.delete_group(group_id, &wallet).await?;
    Ok(Json(json!({ "deleted": group_id })))
}

pub async fn update_name_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<UpdateNameRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    state
        .store
        .update_group_name(group_id, &wallet, &req.name)
        .await?;
    Ok(Json(json!({ "updated": group_id })))
}

pub async fn update_description_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<UpdateDescriptionRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    state
        .store
        .update_group_description(group_id, &wallet, &req.description)
        .await?;
    Ok(Json(json!({ "updated": group_id })))
}

/// Settings update. When the group is paid and a registrar client is wired,
/// the new payout split is pushed to the course registrar in the same call.
pub async fn update_settings_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;

    let update = GroupSettingsUpdate {
        short_description: req.short_description,
        about_url: req.about_url,
        thumbnail_url: req.thumbnail_url,
        gallery_urls: req.gallery_urls,
        tags: req.tags,
        visibility: req.visibility,
        billing_cadence: req.billing_cadence,
        price: req.price,
        administrators: req.administrators,
    };

    let (group, collaborators) = state
        .store
        .update_group_settings(group_id, &wallet, &update)
        .await?;

    let mut splitter = None;
    if group.requires_payment() && state.ledger.registrar.is_some() {
        let split = crate::onchain::splits::RevenueSplit::compute(&wallet, &collaborators);
        splitter = Some(
            state
                .workflow()
                .register_course_split(&group, &split.recipients, &split.shares_bps)
                .await?,
        );
    }

    Ok(Json(json!({ "group": group, "splitter": splitter })))
}

pub async fn subscription_webhook_handler(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionWebhookRequest>,
) -> Result<Json<Value>, AppError> {
    match req.group_id {
        Some(group_id) => {
            state
                .store
                .update_subscription(group_id, &req.subscription_id, req.ends_on)
                .await?
        }
        None => {
            state
                .store
                .update_subscription_by_id(&req.subscription_id, req.ends_on)
                .await?
        }
    }
    Ok(Json(json!({ "updated": true })))
}

// ---------------------------------------------------------------------------
// Membership handlers

pub async fn join_group_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let abort = AbortHandle::new();
    let outcome = state
        .workflow()
        .join(group_id, &wallet, &abort)
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!({ "outcome": outcome })))
}

pub async fn leave_group_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    state.workflow().leave(group_id, &wallet).await?;
    Ok(Json(json!({ "left": group_id })))
}

pub async fn leave_disclosure_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Query(params): Query<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    let disclosure = state.workflow().leave_disclosure(group_id, &wallet).await?;
    Ok(Json(json!({ "disclosure": disclosure })))
}

pub async fn list_members_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let members = state.store.get_members(group_id).await?;
    Ok(Json(json!({ "members": members })))
}

pub async fn member_of_handler(
    State(state): State<AppState>,
    Query(params): Query<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    let groups = state.store.list_groups_for_member(&wallet).await?;
    Ok(Json(json!({ "groups": groups })))
}

// ---------------------------------------------------------------------------
// Classroom handlers

pub async fn create_course_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<CreateCourseRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let course = state
        .store
        .create_course(
            group_id,
            &wallet,
            &req.title,
            req.description.as_deref(),
            req.thumbnail_url.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "course": course })))
}

pub async fn list_courses_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let courses = state.store.list_courses(group_id).await?;
    Ok(Json(json!({ "courses": courses })))
}

pub async fn delete_course_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<i64>,
    Query(params): Query<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    state.store.delete_course(course_id, &wallet).await?;
    Ok(Json(json!({ "deleted": course_id })))
}

pub async fn create_module_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<i64>,
    Json(req): Json<CreateModuleRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let module = state
        .store
        .create_module(course_id, &wallet, &req.title)
        .await?;
    Ok(Json(json!({ "module": module })))
}

pub async fn list_modules_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let modules = state.store.list_modules(course_id).await?;
    Ok(Json(json!({ "modules": modules })))
}

pub async fn create_lesson_handler(
    State(state): State<AppState>,
    AxumPath(module_id): AxumPath<i64>,
    Json(req): Json<CreateLessonRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let lesson = state
        .store
        .create_lesson(
            module_id,
            &wallet,
            &req.title,
            req.description.as_deref(),
            req.video_url.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "lesson": lesson })))
}

pub async fn list_lessons_handler(
    State(state): State<AppState>,
    AxumPath(module_id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let lessons = state.store.list_lessons(module_id).await?;
    Ok(Json(json!({ "lessons": lessons })))
}

// ---------------------------------------------------------------------------
// Feed handlers

pub async fn create_post_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let post = state
        .store
        .create_post(group_id, &wallet, &req.content)
        .await?;
    Ok(Json(json!({ "post": post })))
}

/// The feed is gated by the viewer's access map, not just membership.
pub async fn list_posts_handler(
    State(state): State<AppState>,
    AxumPath(group_id): AxumPath<i64>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<Value>, AppError> {
    let group = state.store.require_group(group_id).await?;

    let (viewer_id, is_member) = match params.viewer.as_deref() {
        Some(raw) => {
            let wallet = parse_wallet(raw)?;
            let viewer = state.store.get_user_by_wallet(&wallet).await?;
            let is_member = state
                .store
                .get_membership(group_id, &wallet)
                .await?
                .is_some();
            (viewer.map(|u| u.id), is_member)
        }
        None => (None, false),
    };

    let access = resolve_access(&group, viewer_id, is_member);
    if !access.feed {
        return Err(AppError::Forbidden(
            "You do not have access to this group's feed".to_string(),
        ));
    }

    let posts = state.store.list_posts(group_id).await?;
    Ok(Json(json!({ "posts": posts })))
}

pub async fn delete_post_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<i64>,
    Query(params): Query<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&params.wallet)?;
    state.store.delete_post(post_id, &wallet).await?;
    Ok(Json(json!({ "deleted": post_id })))
}

pub async fn create_comment_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<i64>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let comment = state
        .store
        .create_comment(post_id, &wallet, &req.content)
        .await?;
    Ok(Json(json!({ "comment": comment })))
}

pub async fn list_comments_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<i64>,
) -> Result<Json<Value>, AppError> {
    let comments = state.store.list_comments(post_id).await?;
    Ok(Json(json!({ "comments": comments })))
}

// ---------------------------------------------------------------------------
// Marketplace handlers

pub async fn course_overview_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<Value>, AppError> {
    let viewer = params
        .viewer
        .as_deref()
        .map(parse_wallet)
        .transpose()?;
    let overview = state
        .marketplace()
        .course_overview(u128::from(course_id), viewer.as_ref())
        .await?;
    Ok(Json(json!({ "overview": overview })))
}

pub async fn purchase_primary_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
    Json(req): Json<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let tx = state
        .marketplace()
        .purchase_primary(u128::from(course_id), &wallet)
        .await?;
    Ok(Json(json!({ "tx_hash": tx })))
}

pub async fn create_listing_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let price = Usdc::parse(&req.price).map_err(|e| AppError::Validation(e.to_string()))?;
    let tx = state
        .marketplace()
        .create_listing(u128::from(course_id), &wallet, price, req.duration_secs)
        .await?;
    Ok(Json(json!({ "tx_hash": tx })))
}

pub async fn cancel_listing_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
) -> Result<Json<Value>, AppError> {
    let tx = state.marketplace().cancel_listing(u128::from(course_id)).await?;
    Ok(Json(json!({ "tx_hash": tx })))
}

pub async fn buy_floor_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
    Json(req): Json<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let tx = state.marketplace().buy_floor(u128::from(course_id), &wallet).await?;
    Ok(Json(json!({ "tx_hash": tx })))
}

pub async fn renew_handler(
    State(state): State<AppState>,
    AxumPath(course_id): AxumPath<u64>,
    Json(req): Json<WalletQuery>,
) -> Result<Json<Value>, AppError> {
    let wallet = parse_wallet(&req.wallet)?;
    let tx = state.marketplace().renew(u128::from(course_id), &wallet).await?;
    Ok(Json(json!({ "tx_hash": tx })))
}

// Create unified router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Group CRUD and settings
        .route("/groups", post(create_group_handler))
        .route("/groups", get(list_groups_handler))
        .route("/groups/{id}", get(get_group_handler))
        .route("/groups/{id}", delete(delete_group_handler))
        .route("/groups/{id}/name", post(update_name_handler))
        .route("/groups/{id}/description", post(update_description_handler))
        .route("/groups/{id}/settings", post(update_settings_handler))
        // Membership
        .route("/groups/{id}/join", post(join_group_handler))
        .route("/groups/{id}/leave", post(leave_group_handler))
        .route("/groups/{id}/leave-disclosure", get(leave_disclosure_handler))
        .route("/groups/{id}/members", get(list_members_handler))
        .route("/memberships", get(member_of_handler))
        // Classroom
        .route("/groups/{id}/courses", post(create_course_handler))
        .route("/groups/{id}/courses", get(list_courses_handler))
        .route("/courses/{id}", delete(delete_course_handler))
        .route("/courses/{id}/modules", post(create_module_handler))
        .route("/courses/{id}/modules", get(list_modules_handler))
        .route("/modules/{id}/lessons", post(create_lesson_handler))
        .route("/modules/{id}/lessons", get(list_lessons_handler))
        // Feed
        .route("/groups/{id}/posts", post(create_post_handler))
        .route("/groups/{id}/posts", get(list_posts_handler))
        .route("/posts/{id}", delete(delete_post_handler))
        .route("/posts/{id}/comments", post(create_comment_handler))
        .route("/posts/{id}/comments", get(list_comments_handler))
        // Marketplace
        .route("/marketplace/{course_id}", get(course_overview_handler))
        .route("/marketplace/{course_id}/purchase", post(purchase_primary_handler))
        .route("/marketplace/{course_id}/listings", post(create_listing_handler))
        .route("/marketplace/{course_id}/listings", delete(cancel_listing_handler))
        .route("/marketplace/{course_id}/buy-floor", post(buy_floor_handler))
        .route("/marketplace/{course_id}/renew", post(renew_handler))
        // Billing webhook, not exposed to browsers
        .route("/internal/subscription", post(subscription_webhook_handler))
        .with_state(state)
}
