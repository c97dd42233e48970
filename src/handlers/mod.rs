use actix_web::web;

use crate::connection::ws_index;

mod pages;
mod sessions;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(ws_index)));

    sessions::configure_session_handlers(cfg);
    // Page routes last: "/{session_id}" catches everything else.
    pages::configure_page_handlers(cfg);
}
