// ABOUTME: JSON-lines relay between a chat frontend and the sandbox orchestrator
// ABOUTME: Handles each request line concurrently and writes one response line per request

use anyhow::{Context, Result};
use relaybox_sandboxes::{
    CommandRequest, ExecutionResult, SandboxOrchestrator, Session, StopAllReport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One line read from the frontend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RelayRequest {
    Command(CommandRequest),
    Stop { stop: String },
    List { list: bool },
}

/// One line written back to the frontend
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Result {
        thread_id: String,
        result: ExecutionResult,
    },
    Stopped {
        stopped: String,
    },
    Sessions {
        sessions: Vec<Session>,
    },
    ShutDown {
        shutdown: StopAllReport,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        error: String,
    },
}

impl RelayResponse {
    fn error(thread_id: Option<&str>, error: impl ToString) -> Self {
        RelayResponse::Error {
            thread_id: thread_id.map(str::to_string),
            error: error.to_string(),
        }
    }
}

/// Serve requests from `input` until end of input, then stop every session
pub async fn run<R, W>(orchestrator: Arc<SandboxOrchestrator>, input: R, output: W) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<RelayResponse>();
    let writer = tokio::spawn(write_responses(rx, output));

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<RelayRequest>(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed request: {}", e);
                let _ = tx.send(RelayResponse::error(None, format!("malformed request: {}", e)));
                continue;
            }
        };

        let orchestrator = orchestrator.clone();
        let tx = tx.clone();
        in_flight.spawn(async move {
            let response = handle(&orchestrator, request).await;
            let _ = tx.send(response);
        });
    }

    debug!("Input closed, waiting for {} in-flight requests", in_flight.len());
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Request task failed: {}", e);
        }
    }

    let report = orchestrator.stop_all().await;
    let _ = tx.send(RelayResponse::ShutDown { shutdown: report });
    drop(tx);

    writer.await.context("Response writer panicked")??;
    info!("Relay finished");
    Ok(())
}

async fn handle(orchestrator: &SandboxOrchestrator, request: RelayRequest) -> RelayResponse {
    match request {
        RelayRequest::Command(command) => {
            match orchestrator
                .process_command(
                    &command.thread_id,
                    &command.channel_id,
                    &command.user_id,
                    &command.text,
                )
                .await
            {
                Ok(result) => RelayResponse::Result {
                    thread_id: command.thread_id,
                    result,
                },
                Err(e) => {
                    error!("Command for thread {} failed: {}", command.thread_id, e);
                    RelayResponse::error(Some(command.thread_id.as_str()), e)
                }
            }
        }
        RelayRequest::Stop { stop } => match orchestrator.stop_session(&stop).await {
            Ok(()) => RelayResponse::Stopped { stopped: stop },
            Err(e) => RelayResponse::error(Some(stop.as_str()), e),
        },
        RelayRequest::List { .. } => RelayResponse::Sessions {
            sessions: orchestrator.list_sessions().await,
        },
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<RelayResponse>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response).context("Failed to encode response")?;
        line.push(b'\n');
        output.write_all(&line).await.context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    Ok(())
}
