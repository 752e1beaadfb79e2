use std::time::Duration;

use snapcar_utils_test::{fingerprint, integrity_check};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;


use sidecar::{Remote, Result, Source, TestSidecar, object_path};

const CLEANUP_LIMIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .source(Source::Missing)
        .build()
        .await?;

    let (status, body) = sidecar.get("/health").await?;
    assert_eq!(status, 200);
    assert_eq!(body, b"OK\n");

    Ok(())
}

#[tokio::test]
async fn test_download_snapshot() -> Result<()> {
    let sidecar = TestSidecar::start().await?;
    let before = fingerprint(&sidecar.source)?;

    let (status, body) = sidecar.get("/snapshot").await?;
    assert_eq!(status, 200);
    assert!(body.starts_with(b"SQLite format 3\0"));

    sidecar.wait_for_clean_scratch(CLEANUP_LIMIT).await?;

    // The downloaded bytes are a complete database on their own.
    let downloaded = sidecar.scratch.parent().unwrap().join("downloaded.db");
    std::fs::write(&downloaded, &body)?;
    assert!(integrity_check(&downloaded)?);

    assert_eq!(fingerprint(&sidecar.source)?, before);

    Ok(())
}

#[tokio::test]
async fn test_download_with_missing_source() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .source(Source::Missing)
        .build()
        .await?;

    let (status, body) = sidecar.get("/snapshot").await?;
    assert_eq!(status, 500);
    let body = String::from_utf8(body)?;
    assert!(body.contains("open"), "error body should mention the open failure: {body}");
    assert!(sidecar.scratch_entries().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_remote_snapshot() -> Result<()> {
    let sidecar = TestSidecar::builder().prefix("dev/").build().await?;

    let (status, body) = sidecar.get("/snapshot/remote").await?;
    assert_eq!(status, 200, "{}", String::from_utf8_lossy(&body));
    assert!(sidecar.scratch_entries().is_empty());

    let locator: serde_json::Value = serde_json::from_slice(&body)?;
    let store = locator["store"].as_str().ok_or("missing store")?;
    let key = locator["key"].as_str().ok_or("missing key")?;
    let url = locator["url"].as_str().ok_or("missing url")?;

    assert_eq!(store, "vai-snapshots");
    assert!(key.starts_with("dev/rancher-0-"), "{key}");
    assert!(key.ends_with(".db"), "{key}");
    assert_eq!(url, format!("file://{store}/{key}"));

    let stored = object_path(&sidecar.objects, key);
    assert!(integrity_check(&stored)?);

    Ok(())
}

#[tokio::test]
async fn test_large_remote_snapshot() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .source(Source::Blobs { mib: 24 })
        .build()
        .await?;

    let (status, body) = sidecar.get("/snapshot/remote").await?;
    assert_eq!(status, 200, "{}", String::from_utf8_lossy(&body));
    assert!(sidecar.scratch_entries().is_empty());

    let locator: serde_json::Value = serde_json::from_slice(&body)?;
    let key = locator["key"].as_str().ok_or("missing key")?;
    let stored = object_path(&sidecar.objects, key);
    assert!(std::fs::metadata(&stored)?.len() > 20 * 1024 * 1024);
    assert!(integrity_check(&stored)?);

    // Only the finished object, no staged parts.
    assert_eq!(sidecar::dir_entries(&sidecar.objects), vec![key.to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_remote_snapshot_with_unreachable_store() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .remote(Remote::Unreachable)
        .build()
        .await?;

    let (status, body) = sidecar.get("/snapshot/remote").await?;
    assert_eq!(status, 500);
    assert!(!body.is_empty());
    assert!(sidecar.scratch_entries().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_client_disconnect_mid_download() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .source(Source::Blobs { mib: 48 })
        .build()
        .await?;

    let mut conn = TcpStream::connect(("127.0.0.1", sidecar.port)).await?;
    conn.write_all(b"GET /snapshot HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
        .await?;

    // Read the head and a bit of the body, then hang up.
    let mut buf = vec![0u8; 64 * 1024];
    let mut received = 0;
    while received < 256 * 1024 {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if received == 0 {
            assert!(buf[..n].starts_with(b"HTTP/1.1 200"));
        }
        received += n;
    }
    assert_eq!(sidecar.scratch_entries().len(), 1);
    drop(conn);

    sidecar.wait_for_clean_scratch(CLEANUP_LIMIT).await?;

    // Still serving afterwards.
    let (status, _) = sidecar.get("/health").await?;
    assert_eq!(status, 200);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_downloads() -> Result<()> {
    let sidecar = TestSidecar::builder()
        .source(Source::Blobs { mib: 8 })
        .build()
        .await?;

    let (a, b) = tokio::join!(sidecar.get("/snapshot"), sidecar.get("/snapshot"));
    let (status_a, body_a) = a?;
    let (status_b, body_b) = b?;

    assert_eq!(status_a, 200);
    assert_eq!(status_b, 200);
    assert_eq!(body_a.len(), body_b.len());
    assert_eq!(body_a, body_b);

    sidecar.wait_for_clean_scratch(CLEANUP_LIMIT).await?;

    Ok(())
}

#[tokio::test]
async fn test_metrics_count_snapshots() -> Result<()> {
    let sidecar = TestSidecar::start().await?;

    let (status, _) = sidecar.get("/snapshot").await?;
    assert_eq!(status, 200);
    // The outcome is recorded when the server drops the body.
    sidecar.wait_for_clean_scratch(CLEANUP_LIMIT).await?;

    let (status, body) = sidecar.get("/metrics").await?;
    assert_eq!(status, 200);
    let text = String::from_utf8(body)?;
    assert!(
        text.lines().any(|l| l.starts_with("snapcar_snapshots_total{")
            && l.contains(r#"sink="stream""#)
            && l.contains(r#"outcome="success""#)
            && l.ends_with(" 1")),
        "{text}"
    );

    Ok(())
}
