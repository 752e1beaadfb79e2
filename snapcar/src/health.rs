use actix_web::{HttpResponse, http};

use crate::cache_control_no_store;

/// Liveness only; never touches the snapshot machinery.
pub(crate) async fn get() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(http::header::ContentType::plaintext())
        .insert_header(cache_control_no_store())
        .body("OK\n")
}
