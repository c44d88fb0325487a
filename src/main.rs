// src/main.rs
use actix_web::{ web, App, HttpServer };
use env_logger::Env;
use log::{ error, info };
use std::io::{ Error, ErrorKind };
use std::sync::Arc;

use mpbrowser::config::Config;
use mpbrowser::display::DisplayState;
use mpbrowser::engine::Engine;
use mpbrowser::handlers;
use mpbrowser::query::transport::UdpTransport;
use mpbrowser::storage::sources::JsonListSource;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();

    let transport = UdpTransport::bind(&config.query_bind)?;
    let receiver = transport.spawn_receiver()?;

    // HTTP list sources block on this runtime from blocking threads while
    // the main thread keeps driving it.
    let provider = JsonListSource::new(
        config.sources_dir.clone(),
        tokio::runtime::Handle::current(),
        config.http_timeout()
    ).map_err(|e| {
        error!("Failed to open list sources: {}", e);
        Error::new(ErrorKind::Other, e.to_string())
    })?;

    let display = Arc::new(DisplayState::new());
    let engine = web::Data::new(
        Engine::start(&config, Arc::new(provider), transport.clone(), display.clone())?
    );
    let display = web::Data::from(display);

    {
        let engine = engine.clone();
        match web::block(move || engine.load()).await {
            Ok(Ok(())) => info!("Server lists loaded"),
            Ok(Err(e)) => error!("Initial load failed: {}", e),
            Err(e) => error!("Initial load was cancelled: {}", e),
        }
    }

    let ticker = {
        let engine = engine.clone();
        let period = config.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                engine.tick();
            }
        })
    };

    let bind = config.bind();
    info!("Starting server on {}", bind);
    let http_engine = engine.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(http_engine.clone())
            .app_data(display.clone())
            .route("/", web::get().to(handlers::index::index))
            .route("/groups", web::get().to(handlers::groups::list_groups))
            .route("/groups", web::post().to(handlers::groups::add_group))
            .route("/groups/revert", web::post().to(handlers::groups::revert_groups))
            .route("/groups/reload", web::post().to(handlers::groups::reload_groups))
            .route("/groups/{id}", web::put().to(handlers::groups::edit_group))
            .route("/groups/{id}", web::delete().to(handlers::groups::delete_group))
            .route("/groups/{id}/select", web::post().to(handlers::groups::select_group))
            .route("/servers", web::get().to(handlers::servers::list_servers))
            .route("/servers/select", web::post().to(handlers::servers::select_server))
            .route("/servers/detail", web::get().to(handlers::servers::get_detail))
            .route("/servers/detail/select", web::post().to(handlers::servers::select_detail_line))
            .route("/favourites", web::get().to(handlers::favourites::list_favourite_lists))
            .route("/favourites/{group}", web::post().to(handlers::favourites::add_favourite))
            .route("/favourites/{group}", web::delete().to(handlers::favourites::remove_favourite))
    })
        .bind(&bind)?
        .run().await?;

    ticker.abort();
    if web::block(move || engine.shutdown()).await.is_err() {
        error!("Engine shutdown did not complete");
    }
    receiver.stop();
    Ok(())
}
