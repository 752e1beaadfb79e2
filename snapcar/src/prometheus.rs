use crate::error;
use actix_web::{
    Error, HttpResponse,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::{
    future::{Future, Ready, ready},
    pin::Pin,
    sync::Arc,
    time::Instant,
};

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

/// Which sink consumed a snapshot.
#[derive(Debug, Clone, Copy)]
pub enum Sink {
    Stream,
    Remote,
}

impl Sink {
    fn as_str(self) -> &'static str {
        match self {
            Sink::Stream => "stream",
            Sink::Remote => "remote",
        }
    }
}

pub struct SidecarMetrics {
    pub registry: Registry,
    http_requests_total: IntCounterVec,
    http_requests_duration: HistogramVec,
    snapshots_total: IntCounterVec,
    snapshot_bytes_total: IntCounterVec,
}

impl SidecarMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "snapcar_http_requests_total",
                "Total number of HTTP requests",
            ),
            &["method", "path", "status"],
        )?;

        // Snapshots of large databases take seconds to minutes.
        let http_requests_duration = HistogramVec::new(
            HistogramOpts::new(
                "snapcar_http_request_duration_seconds",
                "HTTP request latencies in seconds",
            )
            .buckets(vec![
                0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0,
            ]),
            &["method", "path", "status"],
        )?;

        let snapshots_total = IntCounterVec::new(
            Opts::new(
                "snapcar_snapshots_total",
                "Snapshots handed to a sink, by outcome",
            ),
            &["sink", "outcome"],
        )?;

        let snapshot_bytes_total = IntCounterVec::new(
            Opts::new(
                "snapcar_snapshot_bytes_total",
                "Bytes of snapshot artifacts handed to a sink",
            ),
            &["sink"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_duration.clone()))?;
        registry.register(Box::new(snapshots_total.clone()))?;
        registry.register(Box::new(snapshot_bytes_total.clone()))?;

        Ok(SidecarMetrics {
            registry,
            http_requests_total,
            http_requests_duration,
            snapshots_total,
            snapshot_bytes_total,
        })
    }

    pub fn record_success(&self, sink: Sink, bytes: u64) {
        self.snapshots_total
            .with_label_values(&[sink.as_str(), "success"])
            .inc();
        self.snapshot_bytes_total
            .with_label_values(&[sink.as_str()])
            .inc_by(bytes);
    }

    pub fn record_failure(&self, sink: Sink) {
        self.snapshots_total
            .with_label_values(&[sink.as_str(), "failure"])
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn snapshots(&self, sink: Sink, outcome: &str) -> u64 {
        self.snapshots_total
            .with_label_values(&[sink.as_str(), outcome])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn snapshot_bytes(&self, sink: Sink) -> u64 {
        self.snapshot_bytes_total
            .with_label_values(&[sink.as_str()])
            .get()
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub struct PrometheusMiddleware {
    metrics: Arc<SidecarMetrics>,
}

impl PrometheusMiddleware {
    pub fn new(metrics: Arc<SidecarMetrics>) -> Self {
        PrometheusMiddleware { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PrometheusMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = PrometheusMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PrometheusMiddlewareService {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct PrometheusMiddlewareService<S> {
    service: S,
    metrics: Arc<SidecarMetrics>,
}

impl<S, B> Service<ServiceRequest> for PrometheusMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        // Only track metrics for paths with a match pattern
        let path = req.match_pattern().map(|p| p.to_string());
        let metrics = self.metrics.clone();

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;

            // Time to response head; streamed bodies finish later.
            if let Some(path) = path {
                let duration = start.elapsed().as_secs_f64();
                let status = res.status().as_str().to_owned();

                metrics
                    .http_requests_total
                    .with_label_values(&[&method, &path, &status])
                    .inc();

                metrics
                    .http_requests_duration
                    .with_label_values(&[&method, &path, &status])
                    .observe(duration);
            }

            Ok(res)
        })
    }
}

pub async fn metrics_handler(
    metrics: web::Data<Arc<SidecarMetrics>>,
) -> actix_web::Result<HttpResponse> {
    let body = metrics
        .render()
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

pub fn initialize_metrics() -> Result<Arc<SidecarMetrics>, error::SidecarError> {
    let metrics = SidecarMetrics::new().map_err(|e| error::ServerError::Startup {
        reason: format!("Failed to create prometheus metrics: {e}"),
    })?;
    Ok(Arc::new(metrics))
}
