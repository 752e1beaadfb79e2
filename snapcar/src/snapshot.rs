use std::sync::Arc;

use actix_web::body::SizedStream;
use actix_web::http::header::{ContentDisposition, ContentType, DispositionParam, DispositionType};
use actix_web::{HttpResponse, web};
use snapcar_db::{Artifact, SnapshotBuilder};

use crate::error::{IoErrorContext, Result, ServerError};
use crate::prometheus::{SidecarMetrics, Sink};
use crate::remote::{ObjectLocator, RemoteStore};
use crate::stream::ArtifactStream;
use crate::{ServerResult, cache_control_no_store};

/// Run the builder off the async workers; the export blocks on disk I/O.
///
/// If the caller goes away meanwhile, the finished artifact is dropped and
/// removed when the blocking task hands it back.
pub(crate) async fn build(builder: &SnapshotBuilder) -> Result<Artifact> {
    let task_builder = builder.clone();
    let artifact = web::block(move || task_builder.build())
        .await
        .map_err(|e| ServerError::Blocking {
            reason: e.to_string(),
        })??;
    log::debug!(
        "built snapshot {} from {}",
        artifact.path().display(),
        builder.source().display()
    );
    Ok(artifact)
}

async fn build_stream(
    builder: &SnapshotBuilder,
    metrics: Arc<SidecarMetrics>,
) -> Result<ArtifactStream> {
    let artifact = build(builder).await?;
    Ok(ArtifactStream::open(artifact, metrics).await?)
}

async fn build_and_upload(
    builder: &SnapshotBuilder,
    remote: &RemoteStore,
) -> Result<(ObjectLocator, u64)> {
    let artifact = build(builder).await?;
    let size = artifact
        .size()
        .io_context(format!("cannot stat {}", artifact.path().display()))?;
    let locator = remote.upload(&artifact).await?;
    Ok((locator, size))
    // artifact is removed here, before the response is produced
}

/// `GET /snapshot`: stream a fresh snapshot to the client.
///
/// The outcome is recorded once the body is dropped, when it is known
/// whether every byte went out.
pub(crate) async fn download(
    builder: web::Data<SnapshotBuilder>,
    metrics: web::Data<Arc<SidecarMetrics>>,
) -> ServerResult {
    log::info!("/snapshot requested");

    let stream = match build_stream(&builder, metrics.get_ref().clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("snapshot download failed: {e}");
            metrics.record_failure(Sink::Stream);
            return Err(e.into());
        }
    };

    let len = stream.len();
    Ok(HttpResponse::Ok()
        .insert_header(ContentType::octet_stream())
        .insert_header(cache_control_no_store())
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(stream.file_name())],
        })
        .body(SizedStream::new(len, stream)))
}

/// `GET /snapshot/remote`: upload a fresh snapshot and return its locator.
pub(crate) async fn upload(
    builder: web::Data<SnapshotBuilder>,
    remote: web::Data<RemoteStore>,
    metrics: web::Data<Arc<SidecarMetrics>>,
) -> ServerResult {
    log::info!("/snapshot/remote requested");

    match build_and_upload(&builder, &remote).await {
        Ok((locator, size)) => {
            metrics.record_success(Sink::Remote, size);
            Ok(HttpResponse::Ok()
                .insert_header(cache_control_no_store())
                .json(locator))
        }
        Err(e) => {
            log::error!("snapshot upload to {} failed: {e}", remote.bucket());
            metrics.record_failure(Sink::Remote);
            Err(e.into())
        }
    }
}
