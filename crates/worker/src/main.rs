//! Worker process entry point.
//!
//! The host talks to the worker over newline-delimited JSON: requests and
//! host messages arrive on stdin, replies and notifications leave on stdout.
//! Logs go to stderr.

use std::sync::Arc;

use auditai_core::SystemClock;
use auditai_worker::{
    HostMessage, HostReply, HttpTransport, LifecycleManager, MaintenanceWorker, Notification, WorkerConfig,
    WorkerContext, WorkerRequest, WorkerResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Inbound {
    Message {
        #[serde(default)]
        id: Option<u64>,
        message: HostMessage,
    },
    Request {
        #[serde(default)]
        id: Option<u64>,
        request: WorkerRequest,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Outbound {
    Reply {
        id: Option<u64>,
        reply: HostReply,
    },
    Response {
        id: Option<u64>,
        status: u16,
        content_type: Option<String>,
        body: Value,
    },
    Notification {
        notification: Notification,
    },
    Error {
        message: String,
    },
}

impl Outbound {
    fn response(id: Option<u64>, response: WorkerResponse) -> Self {
        let body = response
            .json_body()
            .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
        Outbound::Response {
            id,
            status: response.status,
            content_type: response.content_type,
            body,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    auditai_observability::init();

    let config = WorkerConfig::from_env()?;

    let transport = HttpTransport::new(config.api_url.clone(), config.api_base());
    let transport = match &config.token {
        Some(token) => {
            tracing::info!("initializing worker with authentication token");
            transport.with_token(token.clone())
        }
        None => {
            tracing::info!("initializing worker without authentication token");
            transport
        }
    };

    let ctx = WorkerContext::build(config, Arc::new(transport), SystemClock::shared())?;
    let lifecycle = LifecycleManager::new(ctx.clone());

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(256);
    let writer = tokio::spawn(write_outbound(out_rx));

    let mut notifications = ctx.notifier.subscribe();
    let notify_tx = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    if notify_tx.send(Outbound::Notification { notification }).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "host fell behind on notifications");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let phase = lifecycle.start().await;
    tracing::info!(phase = ?phase, "worker started");

    let maintenance = MaintenanceWorker::new(&ctx);
    let shutdown = maintenance.shutdown_handle();
    let maintenance_task = maintenance.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("host closed stdin");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to read from host");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                dispatch(&line, &ctx, &lifecycle, &out_tx).await;
            }
        }
    }

    shutdown.notify_one();
    if let Err(err) = maintenance_task.await {
        tracing::warn!(error = %err, "maintenance worker ended abnormally");
    }
    drop(out_tx);
    ctx.db.close().await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;
    tracing::info!("worker stopped");
    Ok(())
}

async fn dispatch(line: &str, ctx: &WorkerContext, lifecycle: &LifecycleManager, out: &mpsc::Sender<Outbound>) {
    let inbound = match serde_json::from_str::<Inbound>(line) {
        Ok(inbound) => inbound,
        Err(err) => {
            tracing::warn!(error = %err, "unreadable host line");
            let _ = out
                .send(Outbound::Error {
                    message: format!("invalid input: {err}"),
                })
                .await;
            return;
        }
    };

    let out = out.clone();
    match inbound {
        Inbound::Message { id, message } => {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let reply = lifecycle.handle_message(message).await;
                let _ = out.send(Outbound::Reply { id, reply }).await;
            });
        }
        Inbound::Request { id, request } => {
            let router = ctx.router.clone();
            tokio::spawn(async move {
                let response = router.handle(request).await;
                let _ = out.send(Outbound::response(id, response)).await;
            });
        }
    }
}

async fn write_outbound(mut rx: mpsc::Receiver<Outbound>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode outbound message");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(err) = stdout.write_all(&line).await {
            tracing::error!(error = %err, "host output closed");
            break;
        }
        let _ = stdout.flush().await;
    }
}
