//! Asks a running server to reload its configuration after an import.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::ReloadConfig;
use crate::reconciler::wait::CANCEL_CHECK_INTERVAL;
use crate::reconciler::CancelFlag;

/// Pause between attempts while the server is unreachable.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to start HTTP runtime: {0}")]
    Runtime(String),

    #[error("Reload request failed: {0}")]
    Request(String),

    #[error("Server answered the reload request with HTTP {0}")]
    Status(u16),

    #[error("Reload request cancelled")]
    Cancelled,
}

/// Something that can tell a running server to reload its configuration.
pub trait ReloadNotifier: Send + Sync {
    /// False when calling [`ReloadNotifier::notify`] would do nothing.
    fn is_enabled(&self) -> bool {
        true
    }

    fn notify(&self) -> Result<(), NotifyError>;
}

/// Used when no server endpoint is configured or reloads are switched off.
pub struct NoopNotifier;

impl ReloadNotifier for NoopNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    fn notify(&self) -> Result<(), NotifyError> {
        log::debug!("Reload notification disabled");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    service: &'a str,
    request: InvokeArgs<'a>,
}

#[derive(Debug, Serialize)]
struct InvokeArgs<'a> {
    func_name: &'a str,
}

const RELOAD_REQUEST: InvokeRequest<'static> = InvokeRequest {
    service: "server.invoker",
    request: InvokeArgs {
        func_name: "reload_config",
    },
};

/// Sends the reload call over HTTP.
///
/// Connection failures are retried until `initial_wait` has passed, since the
/// server may still be starting when an import runs. Raising the cancel flag
/// abandons the call, including a request in flight.
pub struct HttpReloadNotifier {
    url: String,
    initial_wait: Duration,
    client: Client,
    cancel: CancelFlag,
}

impl HttpReloadNotifier {
    pub fn new(url: impl Into<String>, initial_wait: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            initial_wait,
            client,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    async fn send_with_retry(&self) -> Result<(), NotifyError> {
        let deadline = Instant::now() + self.initial_wait;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.client.post(&self.url).json(&RELOAD_REQUEST).send().await {
                Ok(response) if response.status().is_success() => {
                    log::info!("Server at {} acknowledged configuration reload", self.url);
                    return Ok(());
                }
                Ok(response) => return Err(NotifyError::Status(response.status().as_u16())),
                Err(e) if e.is_connect() && Instant::now() < deadline => {
                    log::debug!(
                        "Server at {} not reachable yet (attempt {}): {}",
                        self.url,
                        attempt,
                        e
                    );
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(NotifyError::Request(e.to_string())),
            }
        }
    }
}

impl ReloadNotifier for HttpReloadNotifier {
    fn notify(&self) -> Result<(), NotifyError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NotifyError::Runtime(e.to_string()))?;
        rt.block_on(async {
            tokio::select! {
                result = self.send_with_retry() => result,
                _ = cancelled(&self.cancel) => {
                    log::warn!("Reload call to {} cancelled", self.url);
                    Err(NotifyError::Cancelled)
                }
            }
        })
    }
}

async fn cancelled(cancel: &CancelFlag) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_CHECK_INTERVAL).await;
    }
}

/// Picks the notifier the reload settings ask for.
pub fn notifier_from_config(
    config: &ReloadConfig,
    cancel: &CancelFlag,
) -> Result<Box<dyn ReloadNotifier>, NotifyError> {
    match (&config.url, config.is_requested()) {
        (Some(url), true) => Ok(Box::new(
            HttpReloadNotifier::new(url.clone(), Duration::from_secs(config.initial_wait_time))?
                .with_cancel_flag(cancel.clone()),
        )),
        _ => Ok(Box::new(NoopNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(&RELOAD_REQUEST).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "service": "server.invoker",
                "request": {"func_name": "reload_config"}
            })
        );
    }

    #[test]
    fn test_noop_notifier() {
        assert!(NoopNotifier.notify().is_ok());
    }

    fn serve_once(status_line: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/zato/api/invoke", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(500)))
                .unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&received).contains("reload_config") {
                    break;
                }
            }
            let response = format!("{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (url, handle)
    }

    #[test]
    fn test_http_notifier_posts_reload() {
        let (url, server) = serve_once("HTTP/1.1 200 OK");
        let notifier = HttpReloadNotifier::new(url, Duration::from_secs(1)).unwrap();
        notifier.notify().unwrap();
        let request = server.join().unwrap();
        assert!(request.starts_with("POST /zato/api/invoke"));
        assert!(request.contains("server.invoker"));
    }

    #[test]
    fn test_http_notifier_reports_status() {
        let (url, server) = serve_once("HTTP/1.1 503 Service Unavailable");
        let notifier = HttpReloadNotifier::new(url, Duration::from_secs(1)).unwrap();
        assert!(matches!(notifier.notify(), Err(NotifyError::Status(503))));
        server.join().unwrap();
    }

    #[test]
    fn test_http_notifier_gives_up_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let notifier = HttpReloadNotifier::new(url, Duration::from_millis(200)).unwrap();
        let started = Instant::now();
        assert!(matches!(notifier.notify(), Err(NotifyError::Request(_))));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_cancel_abandons_hanging_request() {
        // Accepted by the kernel backlog but never answered.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let notifier = HttpReloadNotifier::new(url, Duration::from_secs(10))
            .unwrap()
            .with_cancel_flag(cancel);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let started = Instant::now();
        assert!(matches!(notifier.notify(), Err(NotifyError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        drop(listener);
    }

    #[test]
    #[serial]
    fn test_notifier_from_config() {
        std::env::remove_var(crate::config::NEEDS_RELOAD_ENV);
        let config = ReloadConfig {
            enabled: true,
            url: Some("http://127.0.0.1:1/".to_string()),
            initial_wait_time: 0,
        };
        let cancel = CancelFlag::new();
        assert!(notifier_from_config(&config, &cancel).unwrap().is_enabled());

        let disabled = ReloadConfig {
            enabled: false,
            ..config
        };
        assert!(!notifier_from_config(&disabled, &cancel).unwrap().is_enabled());
    }
}
