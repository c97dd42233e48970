use std::path::PathBuf;

use actix_web::{web, App, HttpServer};
use clap::Parser;

use sketchboard_server::error::json_error_handler;
use sketchboard_server::handlers;
use sketchboard_server::registry::Registry;
use sketchboard_server::store::BoardStore;

/// Collaborative whiteboard session server
#[derive(Parser, Debug)]
#[command(name = "sketchboard-server")]
#[command(about = "Multi-tenant collaborative whiteboard session server")]
#[command(version)]
struct Args {
    /// Port serving both the HTTP API and the websocket upgrade
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Directory backing the durable element store
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let store = BoardStore::open(&args.data_dir)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let registry = Registry::new(store);

    log::info!(
        "listening on port {} (data in {})",
        args.port,
        args.data_dir.display()
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .configure(handlers::root)
    })
    .bind(("0.0.0.0", args.port))?
    .run()
    .await
}
