//! The JSON API. Handlers are stateless: parse, validate, dispatch into
//! the addressed session, render. Reads against unknown sessions 404;
//! writes create the session on first reference.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::element::Element;
use crate::error::ApiError;
use crate::ids;
use crate::registry::Registry;
use crate::session::Origin;

pub fn configure_session_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/sessions")
            .service(
                web::resource("")
                    .route(web::get().to(list_sessions))
                    .route(web::post().to(create_session)),
            )
            .service(
                web::scope("/{session_id}")
                    .service(web::resource("").route(web::get().to(show_session)))
                    .service(
                        web::resource("/elements")
                            .route(web::get().to(list_elements))
                            .route(web::post().to(create_element))
                            .route(web::delete().to(clear_elements)),
                    )
                    .service(web::resource("/elements/batch").route(web::post().to(create_batch)))
                    .service(
                        web::resource("/elements/{element_id}")
                            .route(web::get().to(show_element))
                            .route(web::put().to(update_element))
                            .route(web::delete().to(delete_element)),
                    ),
            ),
    );
}

#[derive(Deserialize)]
struct SessionPath {
    session_id: String,
}

#[derive(Deserialize)]
struct ElementPath {
    session_id: String,
    element_id: String,
}

async fn list_sessions(registry: web::Data<Registry>) -> Result<HttpResponse, ApiError> {
    let ids = registry.store().session_ids_async().await?;
    Ok(HttpResponse::Ok().json(ids))
}

async fn create_session(registry: web::Data<Registry>) -> Result<HttpResponse, ApiError> {
    let id = ids::session_token();
    registry.get_or_create(&id).await?;
    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn show_session(
    path: web::Path<SessionPath>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry
        .get(&path.session_id)
        .await?
        .ok_or(ApiError::SessionNotFound)?;
    let info = session.snapshot().await?;
    Ok(HttpResponse::Ok().json(json!({
        "id": info.id,
        "elementCount": info.elements.len(),
        "elements": info.elements,
        "userCount": info.user_count,
        "createdAt": info.created_at,
    })))
}

async fn list_elements(
    path: web::Path<SessionPath>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry
        .get(&path.session_id)
        .await?
        .ok_or(ApiError::SessionNotFound)?;
    let info = session.snapshot().await?;
    Ok(HttpResponse::Ok().json(info.elements))
}

async fn show_element(
    path: web::Path<ElementPath>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry
        .get(&path.session_id)
        .await?
        .ok_or(ApiError::SessionNotFound)?;
    let element = session
        .element(&path.element_id)
        .await?
        .ok_or(ApiError::ElementNotFound)?;
    Ok(HttpResponse::Ok().json(element))
}

async fn create_element(
    path: web::Path<SessionPath>,
    body: web::Json<Element>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let element = body.into_inner();
    element.kind()?;

    let session = registry.get_or_create(&path.session_id).await?;
    let stored = session.create(element, Origin::Api).await?;
    Ok(HttpResponse::Created().json(stored))
}

async fn create_batch(
    path: web::Path<SessionPath>,
    body: web::Json<Vec<Element>>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let elements = body.into_inner();
    // First invalid element refuses the whole batch before anything is
    // committed or broadcast.
    for element in &elements {
        element.kind()?;
    }

    let session = registry.get_or_create(&path.session_id).await?;
    let stored = session.create_batch(elements, Origin::Api).await?;
    Ok(HttpResponse::Created().json(stored))
}

async fn update_element(
    path: web::Path<ElementPath>,
    body: web::Json<Element>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry.get_or_create(&path.session_id).await?;
    let merged = session
        .update(path.element_id.clone(), body.into_inner(), Origin::Api)
        .await?;
    Ok(HttpResponse::Ok().json(merged))
}

async fn delete_element(
    path: web::Path<ElementPath>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry.get_or_create(&path.session_id).await?;
    session
        .delete(path.element_id.clone(), Origin::Api)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn clear_elements(
    path: web::Path<SessionPath>,
    registry: web::Data<Registry>,
) -> Result<HttpResponse, ApiError> {
    let session = registry.get_or_create(&path.session_id).await?;
    session.clear(Origin::Api).await?;
    Ok(HttpResponse::NoContent().finish())
}
