// src/handlers/index.rs
use actix_web::{ web, HttpResponse };
use serde_json::json;

use crate::display::DisplayState;
use crate::engine::Engine;

pub async fn index(engine: web::Data<Engine>, display: web::Data<DisplayState>) -> HttpResponse {
    HttpResponse::Ok().json(
        json!({
            "status": "ok",
            "groups": engine.groups().len(),
            "selected_group": display.selected_group(),
            "rows": display.row_count(),
        })
    )
}
