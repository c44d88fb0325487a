// src/handlers/favourites.rs
use actix_web::{ web, HttpResponse };
use log::info;

use crate::engine::Engine;
use crate::handlers::servers::AddressBody;
use crate::utils::{ parse_address, parse_group_id, RequestError };

pub async fn list_favourite_lists(engine: web::Data<Engine>) -> HttpResponse {
    HttpResponse::Ok().json(engine.favourite_lists())
}

pub async fn add_favourite(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    body: web::Json<AddressBody>
) -> Result<HttpResponse, RequestError> {
    let id = parse_group_id(&path)?;
    let address = parse_address(&body.address)?;
    info!("Adding {} to favourites", address);
    web::block(move || engine.add_favourite(id, &address)).await??;
    Ok(HttpResponse::Created().finish())
}

pub async fn remove_favourite(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    body: web::Json<AddressBody>
) -> Result<HttpResponse, RequestError> {
    let id = parse_group_id(&path)?;
    let address = parse_address(&body.address)?;
    info!("Removing {} from favourites", address);
    web::block(move || engine.remove_favourite(id, &address)).await??;
    Ok(HttpResponse::NoContent().finish())
}
