//! App logs, with each line attributed to the main service or a brick

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::apps::arduino_app::ArduinoApp;
use crate::deploy::compose::{self, MAIN_SERVICE};
use crate::deploy::lifecycle::Lifecycle;
use crate::deploy::runtime::LogsOptions;
use crate::deploy::stream::LineSink;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct AppLogsRequest {
    pub show_app_logs: bool,
    pub show_services_logs: bool,
    pub follow: bool,
    pub tail: Option<u64>,
}

impl Default for AppLogsRequest {
    fn default() -> Self {
        Self {
            show_app_logs: true,
            show_services_logs: false,
            follow: false,
            tail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    /// Compose service the line came from
    pub name: String,
    /// Brick owning the service, `None` for the main service
    pub brick: Option<String>,
    pub content: String,
}

/// Send the app's log lines on `tx`. An app that was never started has no
/// logs and yields nothing.
pub async fn app_logs(
    lifecycle: &Lifecycle,
    app: &ArduinoApp,
    req: &AppLogsRequest,
    tx: mpsc::Sender<LogMessage>,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(project) = compose::existing_project(app).await else {
        debug!(app = %app.full_path.display(), "app was never started, no logs");
        return Ok(());
    };

    let mut owners: HashMap<String, String> = HashMap::new();
    let mut services = Vec::new();
    if req.show_app_logs {
        services.push(MAIN_SERVICE.to_string());
    }
    for brick in &app.descriptor.bricks {
        let fragment = app.brick_compose_file(&brick.id)?;
        if !fragment.exists().await {
            continue;
        }
        match compose::fragment_services(&fragment).await {
            Ok(names) => {
                for name in names {
                    if req.show_services_logs {
                        services.push(name.clone());
                    }
                    owners.insert(name, brick.id.clone());
                }
            }
            Err(e) => warn!(brick = %brick.id, "unable to read brick compose file: {}", e),
        }
    }
    if services.is_empty() {
        return Ok(());
    }

    let options = LogsOptions {
        follow: req.follow,
        tail: req.tail,
        services,
    };
    let sink = LogLineSink { owners, tx };
    lifecycle
        .runtime()
        .compose_logs(&project, &options, &sink, cancel)
        .await
}

struct LogLineSink {
    owners: HashMap<String, String>,
    tx: mpsc::Sender<LogMessage>,
}

#[async_trait]
impl LineSink for LogLineSink {
    async fn line(&self, line: String) {
        let Some((service, content)) = split_log_line(&line) else {
            return;
        };
        let message = LogMessage {
            brick: self.owners.get(service).cloned(),
            name: service.to_string(),
            content: content.to_string(),
        };
        // receiver gone, nobody is reading anymore
        let _ = self.tx.send(message).await;
    }
}

/// Split a `docker compose logs` line (`main-1  | text`) into the service
/// name and the content
fn split_log_line(line: &str) -> Option<(&str, &str)> {
    let (prefix, content) = line.split_once('|')?;
    let container = prefix.trim();
    let service = match container.rsplit_once('-') {
        Some((service, replica)) if !replica.is_empty() && replica.bytes().all(|b| b.is_ascii_digit()) => service,
        _ => container,
    };
    if service.is_empty() {
        return None;
    }
    Some((service, content.strip_prefix(' ').unwrap_or(content)))
}
