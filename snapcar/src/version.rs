use actix_web::{HttpResponse, http};

use crate::{CARGO_NAME, CARGO_VERSION};

pub(crate) async fn get() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(http::header::ContentType::plaintext())
        .body(format!("{CARGO_NAME} {CARGO_VERSION}\n"))
}
