use anyhow::Context;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Outcome of a backend reachability check. Only a 2xx response counts as reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub url: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthProbeConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// `GET <url>`; transport failures become an unreachable report instead of an error.
/// The only error is failing to build the HTTP client.
pub async fn probe_health(url: &str, cfg: HealthProbeConfig) -> anyhow::Result<HealthReport> {
    // Without an explicit timeout a half-open backend would hang the probe.
    let client = reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.request_timeout)
        .build()
        .context("build http client")?;

    let started = Instant::now();
    let result = client.get(url).send().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let report = match result {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let body = body.trim();
            HealthReport {
                url: url.to_string(),
                reachable: status.is_success(),
                status: Some(status.as_u16()),
                latency_ms,
                detail: (!body.is_empty()).then(|| body.chars().take(200).collect()),
            }
        }
        Err(e) => HealthReport {
            url: url.to_string(),
            reachable: false,
            status: None,
            latency_ms,
            detail: Some(format!("{e}")),
        },
    };

    if report.reachable {
        log::info!("health: {} reachable in {}ms", report.url, report.latency_ms);
    } else {
        log::warn!(
            "health: {} unreachable (status {:?}): {}",
            report.url,
            report.status,
            report.detail.as_deref().unwrap_or("")
        );
    }

    Ok(report)
}
