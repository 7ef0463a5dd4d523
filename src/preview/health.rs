//! Bounded-retry HTTP liveness probes.
//!
//! A probe attempt is an HTTP HEAD against the target port with a hard
//! per-attempt timeout. A timeout or non-success status is a miss, not an
//! error; the checker sleeps a fixed interval between misses (no backoff)
//! and exits early on the first success.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters for one liveness check run.
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    pub max_attempts: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub path: String,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(1000),
            timeout: Duration::from_millis(2000),
            path: "/".to_string(),
        }
    }
}

impl HealthCheckOptions {
    /// Low-patience variant used for stale-allocation sweeps.
    pub fn quick() -> Self {
        Self {
            max_attempts: 2,
            interval: Duration::from_millis(250),
            timeout: Duration::from_millis(1000),
            path: "/".to_string(),
        }
    }
}

/// Terminal outcome of a liveness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Attempts actually performed (the successful one, or `max_attempts`).
    pub attempts: u32,
    /// Status code of the last response, if any response arrived.
    pub status_code: Option<u16>,
    pub reason: Option<String>,
}

/// Probes host-local ports over HTTP.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    host: String,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            host: "127.0.0.1".to_string(),
        }
    }

    /// Run the bounded-retry protocol against `port`.
    ///
    /// Never returns an error: exhausting the attempt budget is a defined
    /// terminal outcome, not a failure of the check itself.
    pub async fn check(&self, port: u16, opts: &HealthCheckOptions) -> HealthReport {
        let url = format!("http://{}:{}{}", self.host, port, opts.path);
        let mut last_status: Option<u16> = None;

        for attempt in 1..=opts.max_attempts {
            match self.client.head(&url).timeout(opts.timeout).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return HealthReport {
                        healthy: true,
                        attempts: attempt,
                        status_code: Some(resp.status().as_u16()),
                        reason: None,
                    };
                }
                Ok(resp) => {
                    last_status = Some(resp.status().as_u16());
                }
                // Connection refused, reset, or per-attempt timeout: a miss.
                Err(_) => {}
            }
            if attempt < opts.max_attempts {
                tokio::time::sleep(opts.interval).await;
            }
        }

        HealthReport {
            healthy: false,
            attempts: opts.max_attempts,
            status_code: last_status,
            reason: Some("max attempts exceeded".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP responder bound to an OS-assigned port.
    async fn spawn_responder(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_first_success_exits_early() {
        let port = spawn_responder("200 OK").await;
        let checker = HealthChecker::new();
        let report = checker.check(port, &HealthCheckOptions::default()).await;
        assert!(report.healthy);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.status_code, Some(200));
        assert!(report.reason.is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_miss() {
        let port = spawn_responder("503 Service Unavailable").await;
        let checker = HealthChecker::new();
        let opts = HealthCheckOptions {
            max_attempts: 2,
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(500),
            path: "/".to_string(),
        };
        let report = checker.check(port, &opts).await;
        assert!(!report.healthy);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.status_code, Some(503));
        assert_eq!(report.reason.as_deref(), Some("max attempts exceeded"));
    }

    #[tokio::test]
    async fn test_terminates_within_attempt_budget() {
        // Nothing listens on this port: bind, grab the port, drop the socket.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let opts = HealthCheckOptions {
            max_attempts: 3,
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
            path: "/".to_string(),
        };
        let started = Instant::now();
        let report = HealthChecker::new().check(port, &opts).await;
        assert!(!report.healthy);
        assert_eq!(report.attempts, 3);
        // Bound: N * (timeout + interval) plus generous scheduling slack.
        assert!(started.elapsed() < Duration::from_millis(3 * 150 + 1000));
    }

    #[test]
    fn test_quick_options_are_low_patience() {
        let opts = HealthCheckOptions::quick();
        assert_eq!(opts.max_attempts, 2);
        assert!(opts.interval < Duration::from_secs(1));
    }
}
