#![warn(clippy::dbg_macro)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::{fmt::Display, time::Duration};

use actix_web::{App, HttpResponse, HttpServer, http, web};
use error::{IoErrorContext, Result, SidecarError};
use remote::RemoteStore;
use snapcar_db::SnapshotBuilder;
use url::Url;

mod config;
mod error;
mod health;
mod prometheus;
mod remote;
mod snapshot;
mod stream;
mod version;

const CARGO_NAME: &str = env!("CARGO_PKG_NAME");
const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

fn cache_control_no_store() -> http::header::CacheControl {
    http::header::CacheControl(vec![http::header::CacheDirective::NoStore])
}

#[derive(Debug)]
struct ServerError {
    err: SidecarError,
}

impl Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for ServerError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        // Every failure to build or deliver a snapshot is a server error,
        // including a source database that is missing.
        actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<SidecarError> for ServerError {
    fn from(err: SidecarError) -> ServerError {
        ServerError { err }
    }
}

type ServerResult = std::result::Result<HttpResponse, ServerError>;

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::get))
        .route("/version", web::get().to(version::get))
        .route("/snapshot", web::get().to(snapshot::download))
        .route("/snapshot/remote", web::get().to(snapshot::upload))
        // path used by earlier deployments
        .route("/snapshot/s3", web::get().to(snapshot::upload))
        .route("/metrics", web::get().to(prometheus::metrics_handler));
}

async fn inner_main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let c = config::load()?;

    let metrics = prometheus::initialize_metrics()?;

    // One client for the life of the process; credentials resolve here.
    let remote = web::Data::new(RemoteStore::from_config(&c)?);
    let builder = web::Data::new(
        SnapshotBuilder::new(&c.db_path, &c.scratch_dir)
            .busy_timeout(c.busy_timeout())
            .file_stem(c.artifact_stem.clone()),
    );
    let metrics_data = web::Data::new(metrics.clone());

    log::info!(
        "{CARGO_NAME} {CARGO_VERSION} listening on {}, source={}, store={}",
        c.bind,
        c.db_path.display(),
        remote.bucket()
    );
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(prometheus::PrometheusMiddleware::new(metrics.clone()))
            .app_data(builder.clone())
            .app_data(remote.clone())
            .app_data(metrics_data.clone())
            .configure(routes)
    })
    // default is 5 seconds, which is too small when doing mass requests on slow machines
    .client_request_timeout(Duration::from_secs(30))
    .workers(c.workers)
    .max_connection_rate(c.max_connection_rate);

    let try_url = Url::parse(&c.bind);
    let (bind, uds) = if let Ok(url) = try_url.as_ref() {
        if url.scheme() != "unix" {
            (c.bind.as_str(), false)
        } else if url.host().is_none() {
            (url.path(), true)
        } else {
            return Err(error::ServerError::Startup {
                reason: "Can only bind to file URLs without host portion.".to_string(),
            }
            .into());
        }
    } else {
        (c.bind.as_str(), false)
    };

    if uds {
        let socket_path = Path::new(bind);
        server = server
            .bind_uds(socket_path)
            .io_context("Failed to bind to Unix domain socket")?;
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o777))
            .io_context("Failed to set socket permissions")?;
    } else {
        server = server
            .bind(c.bind.clone())
            .io_context("Failed to bind server")?;
    }

    server.run().await.io_context("Failed to start server")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    inner_main().await.map_err(std::io::Error::other)
}
