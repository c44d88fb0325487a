// src/handlers/servers.rs
use actix_web::{ web, HttpResponse };
use log::debug;
use serde::Deserialize;
use serde_json::json;

use crate::consumer::Presentation;
use crate::display::{ DisplayState, FilterField, RowFilter };
use crate::engine::Engine;
use crate::utils::{ parse_address, RequestError };

#[derive(Deserialize)]
pub struct ServerListQuery {
    field: Option<FilterField>,
    q: Option<String>,
}

/// Rows of the selected group. `field` and `q` replace the row filter;
/// an empty or missing `q` clears it.
pub async fn list_servers(
    engine: web::Data<Engine>,
    display: web::Data<DisplayState>,
    query: web::Query<ServerListQuery>
) -> HttpResponse {
    let query = query.into_inner();
    let filter = match query.q.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            Some(RowFilter::new(query.field.unwrap_or(FilterField::Hostname), text))
        }
        _ => None,
    };
    if display.set_filter(filter) {
        engine.reenter_selection();
    }

    let rows = display.visible_rows();
    debug!("Listing {} servers", rows.len());
    HttpResponse::Ok().json(
        json!({
            "group": display.selected_group(),
            "selected": display.selected_address(),
            "servers": rows,
        })
    )
}

#[derive(Deserialize)]
pub struct AddressBody {
    pub address: String,
}

pub async fn select_server(
    engine: web::Data<Engine>,
    display: web::Data<DisplayState>,
    body: web::Json<AddressBody>
) -> Result<HttpResponse, RequestError> {
    let address = parse_address(&body.address)?;
    if !display.select_address(&address) {
        return Err(RequestError::ServerNotFound(address.to_string()));
    }
    engine.enter_selection();
    Ok(HttpResponse::NoContent().finish())
}

pub async fn get_detail(display: web::Data<DisplayState>) -> HttpResponse {
    HttpResponse::Ok().json(display.detail())
}

#[derive(Deserialize)]
pub struct DetailLineBody {
    client: Option<usize>,
    rule: Option<usize>,
}

pub async fn select_detail_line(
    display: web::Data<DisplayState>,
    body: web::Json<DetailLineBody>
) -> HttpResponse {
    display.select_detail_line(body.client, body.rule);
    HttpResponse::Ok().json(display.detail())
}
