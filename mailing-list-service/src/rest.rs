//! REST surface (§6, Ambient §6a): request decoding and response shaping
//! around the orchestration writers. Grounded on the route-registration /
//! `web::Data` wiring style used throughout `daemon`'s HTTP layer, adapted
//! from its JSON-RPC envelope to plain REST with `ETag`/`If-Match`.

use actix_web::{web, HttpRequest, HttpResponse};
use mailing_list_core::bus::RequestHeaders;
use mailing_list_core::error::CoreError;
use mailing_list_core::model::{
    CommitteeBinding, MailingList, MailingListType, Member, ServiceStatus, ServiceType, Timestamps,
};
use mailing_list_core::model::{DeliveryMode, MemberType, ModStatus, Origin as EntityOrigin, ProviderStatus, Service};
use serde::Deserialize;

use crate::http_error::ApiError;
use crate::state::AppState;
use crate::writers::{ListWriter, MemberWriter, ServiceWriter, WriteContext};

const OPENAPI_JSON: &str = include_str!("../openapi.json");

fn request_headers(req: &HttpRequest) -> RequestHeaders {
    RequestHeaders {
        authorization: req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        on_behalf_of: req
            .headers()
            .get("x-on-behalf-of")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

fn write_context(req: &HttpRequest) -> WriteContext {
    WriteContext {
        headers: request_headers(req),
    }
}

fn if_match_revision(req: &HttpRequest) -> Result<u64, ApiError> {
    req.headers()
        .get("if-match")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim_matches('"').parse::<u64>().ok())
        .ok_or_else(|| ApiError(CoreError::validation("if-match", "required and must be a valid revision")))
}

fn with_etag(mut response: HttpResponse, revision: Option<u64>) -> HttpResponse {
    if let Some(rev) = revision {
        let value = actix_web::http::header::HeaderValue::from_str(&format!("\"{rev}\""))
            .expect("revision-derived etag is always valid ASCII");
        response.headers_mut().insert(actix_web::http::header::ETAG, value);
    }
    response
}

// ---------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub provider_domain: String,
    pub status: ServiceStatus,
    pub owners: Vec<String>,
    #[serde(default)]
    pub url_prefix: Option<String>,
    pub project_uid: String,
    pub project_slug: String,
    pub project_name: String,
    pub group_name: String,
    pub public: bool,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub auditors: Vec<String>,
}

impl CreateServiceRequest {
    fn into_entity(self) -> Service {
        Service {
            uid: uuid::Uuid::new_v4().to_string(),
            service_type: self.service_type,
            provider_domain: self.provider_domain,
            external_group_id: None,
            status: self.status,
            owners: self.owners,
            url_prefix: self.url_prefix,
            project_uid: self.project_uid,
            project_slug: self.project_slug,
            project_name: self.project_name,
            group_name: self.group_name,
            public: self.public,
            writers: self.writers,
            auditors: self.auditors,
            last_reviewed: None,
            timestamps: Timestamps::new_now(),
            source: EntityOrigin::Api,
            revision: None,
        }
    }
}

async fn create_service(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateServiceRequest>,
) -> Result<HttpResponse, ApiError> {
    let service = body.into_inner().into_entity();
    let created = ServiceWriter::new(&state)
        .create(service, &write_context(&req))
        .await?;
    let revision = created.revision;
    Ok(with_etag(HttpResponse::Created().json(created), revision))
}

async fn get_service(state: web::Data<AppState>, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    match ServiceWriter::new(&state).get(&uid).await? {
        Some((service, revision)) => Ok(with_etag(HttpResponse::Ok().json(service), Some(revision))),
        None => Err(CoreError::not_found(format!("service {uid}")).into()),
    }
}

async fn update_service(
    state: web::Data<AppState>,
    req: HttpRequest,
    uid: web::Path<String>,
    body: web::Json<Service>,
) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    let updated = ServiceWriter::new(&state)
        .update(&uid, body.into_inner(), expected_rev, &write_context(&req))
        .await?;
    let revision = updated.revision;
    Ok(with_etag(HttpResponse::Ok().json(updated), revision))
}

async fn delete_service(state: web::Data<AppState>, req: HttpRequest, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    ServiceWriter::new(&state).delete(&uid, expected_rev).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------------
// Mailing lists
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateMailingListRequest {
    pub group_name: String,
    pub public: bool,
    #[serde(rename = "type")]
    pub list_type: MailingListType,
    pub description: String,
    pub title: String,
    #[serde(default)]
    pub subject_tag: Option<String>,
    pub service_uid: String,
    pub project_uid: String,
    #[serde(default)]
    pub committee_bindings: Vec<CommitteeBinding>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub auditors: Vec<String>,
}

impl CreateMailingListRequest {
    fn into_entity(self) -> MailingList {
        MailingList {
            uid: uuid::Uuid::new_v4().to_string(),
            group_name: self.group_name,
            public: self.public,
            list_type: self.list_type,
            description: self.description,
            title: self.title,
            subject_tag: self.subject_tag,
            service_uid: self.service_uid,
            project_uid: self.project_uid,
            committee_bindings: self.committee_bindings,
            writers: self.writers,
            auditors: self.auditors,
            provider_subgroup_id: None,
            subscriber_count: 0,
            timestamps: Timestamps::new_now(),
            source: EntityOrigin::Api,
            revision: None,
        }
    }
}

async fn create_list(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateMailingListRequest>,
) -> Result<HttpResponse, ApiError> {
    let list = body.into_inner().into_entity();
    let created = ListWriter::new(&state).create(list, &write_context(&req)).await?;
    let revision = created.revision;
    Ok(with_etag(HttpResponse::Created().json(created), revision))
}

async fn get_list(state: web::Data<AppState>, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    match ListWriter::new(&state).get(&uid).await? {
        Some((list, revision)) => Ok(with_etag(HttpResponse::Ok().json(list), Some(revision))),
        None => Err(CoreError::not_found(format!("mailing list {uid}")).into()),
    }
}

async fn update_list(
    state: web::Data<AppState>,
    req: HttpRequest,
    uid: web::Path<String>,
    body: web::Json<MailingList>,
) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    let updated = ListWriter::new(&state)
        .update(&uid, body.into_inner(), expected_rev, &write_context(&req))
        .await?;
    let revision = updated.revision;
    Ok(with_etag(HttpResponse::Ok().json(updated), revision))
}

async fn delete_list(state: web::Data<AppState>, req: HttpRequest, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    ListWriter::new(&state).delete(&uid, expected_rev).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateMemberRequest {
    pub list_uid: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default = "default_member_type")]
    pub member_type: MemberType,
    #[serde(default = "default_delivery_mode")]
    pub delivery_mode: DeliveryMode,
    #[serde(default = "default_mod_status")]
    pub mod_status: ModStatus,
}

fn default_member_type() -> MemberType {
    MemberType::Direct
}

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::Individual
}

fn default_mod_status() -> ModStatus {
    ModStatus::None
}

impl CreateMemberRequest {
    fn into_entity(self) -> Member {
        Member {
            uid: uuid::Uuid::new_v4().to_string(),
            list_uid: self.list_uid,
            provider_member_id: None,
            provider_group_id: None,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            organization: self.organization,
            job_title: self.job_title,
            member_type: self.member_type,
            delivery_mode: self.delivery_mode,
            mod_status: self.mod_status,
            provider_status: ProviderStatus::Pending,
            timestamps: Timestamps::new_now(),
            source: EntityOrigin::Api,
            revision: None,
        }
    }
}

async fn create_member(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateMemberRequest>,
) -> Result<HttpResponse, ApiError> {
    let member = body.into_inner().into_entity();
    let created = MemberWriter::new(&state).create(member, &write_context(&req)).await?;
    let revision = created.revision;
    Ok(with_etag(HttpResponse::Created().json(created), revision))
}

async fn get_member(state: web::Data<AppState>, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    match MemberWriter::new(&state).get(&uid).await? {
        Some((member, revision)) => Ok(with_etag(HttpResponse::Ok().json(member), Some(revision))),
        None => Err(CoreError::not_found(format!("member {uid}")).into()),
    }
}

async fn update_member(
    state: web::Data<AppState>,
    req: HttpRequest,
    uid: web::Path<String>,
    body: web::Json<Member>,
) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    let updated = MemberWriter::new(&state)
        .update(&uid, body.into_inner(), expected_rev, &write_context(&req))
        .await?;
    let revision = updated.revision;
    Ok(with_etag(HttpResponse::Ok().json(updated), revision))
}

async fn delete_member(state: web::Data<AppState>, req: HttpRequest, uid: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let uid = uid.into_inner();
    let expected_rev = if_match_revision(&req)?;
    MemberWriter::new(&state).delete(&uid, expected_rev).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------

async fn groupsio_webhook(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let signature = req
        .headers()
        .get("x-groupsio-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(CoreError::validation("x-groupsio-signature", "header required")))?
        .to_string();

    crate::webhook_processor::WebhookProcessor::new(&state)
        .process(&body, &signature)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

// ---------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------

async fn livez() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn readyz(state: web::Data<AppState>) -> HttpResponse {
    if state.kv.ping().await.is_err() {
        return HttpResponse::ServiceUnavailable().body("kv unavailable");
    }
    if state.bus.ping().await.is_err() {
        return HttpResponse::ServiceUnavailable().body("bus unavailable");
    }
    HttpResponse::Ok().body("ok")
}

async fn openapi() -> HttpResponse {
    HttpResponse::Ok().content_type("application/json").body(OPENAPI_JSON)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/groupsio")
            .service(
                web::resource("/services")
                    .route(web::post().to(create_service)),
            )
            .service(
                web::resource("/services/{uid}")
                    .route(web::get().to(get_service))
                    .route(web::put().to(update_service))
                    .route(web::delete().to(delete_service)),
            )
            .service(web::resource("/mailing-lists").route(web::post().to(create_list)))
            .service(
                web::resource("/mailing-lists/{uid}")
                    .route(web::get().to(get_list))
                    .route(web::put().to(update_list))
                    .route(web::delete().to(delete_list)),
            )
            .service(web::resource("/members").route(web::post().to(create_member)))
            .service(
                web::resource("/members/{uid}")
                    .route(web::get().to(get_member))
                    .route(web::put().to(update_member))
                    .route(web::delete().to(delete_member)),
            ),
    )
    .service(web::resource("/webhooks/groupsio").route(web::post().to(groupsio_webhook)))
    .service(web::resource("/livez").route(web::get().to(livez)))
    .service(web::resource("/readyz").route(web::get().to(readyz)))
    .service(web::resource("/openapi.json").route(web::get().to(openapi)));
}
