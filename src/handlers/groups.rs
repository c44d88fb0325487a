// src/handlers/groups.rs
use actix_web::{ web, HttpResponse };
use log::info;
use serde_json::json;

use crate::display::DisplayState;
use crate::engine::Engine;
use crate::models::group::Connector;
use crate::utils::{ parse_group_id, RequestError };

pub async fn list_groups(
    engine: web::Data<Engine>,
    display: web::Data<DisplayState>
) -> HttpResponse {
    HttpResponse::Ok().json(
        json!({
            "groups": engine.groups(),
            "selected": display.selected_group(),
        })
    )
}

pub async fn add_group(
    engine: web::Data<Engine>,
    connector: web::Json<Connector>
) -> Result<HttpResponse, RequestError> {
    let connector = connector.into_inner();
    info!("Adding server list {} ({})", connector.name, connector.kind);
    web::block(move || engine.add_connector(connector)).await??;
    Ok(HttpResponse::Created().finish())
}

pub async fn edit_group(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    connector: web::Json<Connector>
) -> Result<HttpResponse, RequestError> {
    let id = parse_group_id(&path)?;
    let connector = connector.into_inner();
    web::block(move || engine.edit_connector(id, connector)).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn delete_group(
    engine: web::Data<Engine>,
    path: web::Path<String>
) -> Result<HttpResponse, RequestError> {
    let id = parse_group_id(&path)?;
    web::block(move || engine.remove_connector(id)).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn revert_groups(engine: web::Data<Engine>) -> Result<HttpResponse, RequestError> {
    info!("Reverting server lists to defaults");
    web::block(move || engine.revert_to_defaults()).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn reload_groups(engine: web::Data<Engine>) -> Result<HttpResponse, RequestError> {
    web::block(move || engine.load()).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn select_group(
    engine: web::Data<Engine>,
    path: web::Path<String>
) -> Result<HttpResponse, RequestError> {
    let id = parse_group_id(&path)?;
    web::block(move || engine.select_group(id)).await??;
    Ok(HttpResponse::NoContent().finish())
}
