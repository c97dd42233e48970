use actix_web::{web, HttpResponse};
use askama::Template;
use askama_actix::TemplateToResponse;

use crate::error::ApiError;
use crate::ids;
use crate::registry::Registry;

#[derive(Template)]
#[template(path = "board.html")]
struct BoardTemplate {
    session_id: String,
}

pub fn configure_page_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/{session_id}").route(web::get().to(board)));
}

/// Mint a fresh session and send the browser there.
async fn index(registry: web::Data<Registry>) -> Result<HttpResponse, ApiError> {
    let session_id = ids::session_token();
    registry.get_or_create(&session_id).await?;
    Ok(HttpResponse::Found()
        .append_header(("Location", format!("/{}", session_id)))
        .finish())
}

async fn board(path: web::Path<String>) -> HttpResponse {
    BoardTemplate {
        session_id: path.into_inner(),
    }
    .to_response()
}
