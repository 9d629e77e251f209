//! Sender and browser session backed by an external automation program.
//!
//! Every call spawns `program args...`, writes one JSON request to its stdin
//! and reads one JSON response from its stdout. The program owns the browser;
//! this side only classifies what it reports.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use outreach_core::{
    BrowserSession, Profile, SendOutcome, SendReport, Sender, SessionError, Task,
};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::DriverConfig;

/// Largest stdout accepted from one driver call.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DriverRequest<'a> {
    Open {
        profile_id: &'a str,
        profile_name: &'a str,
        proxy: Option<&'a str>,
    },
    Send {
        profile_id: &'a str,
        proxy: Option<&'a str>,
        task_id: i64,
        target: &'a str,
        message: &'a str,
    },
    Close {
        profile_id: &'a str,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionReply {
    Ready,
    SessionExpired,
    Error {
        #[serde(default)]
        detail: Option<String>,
    },
}

#[derive(Debug)]
enum CallError {
    Timeout,
    Failed(anyhow::Error),
}

/// Session state remembered between `open` and later sends.
#[derive(Debug, Default, Clone)]
struct Opened {
    profile_id: String,
    proxy: Option<String>,
}

pub struct DriverAdapter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    opened: Mutex<Option<Opened>>,
}

impl DriverAdapter {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
            opened: Mutex::new(None),
        }
    }

    fn opened(&self) -> Opened {
        self.opened
            .lock()
            .map(|o| o.clone().unwrap_or_default())
            .unwrap_or_default()
    }

    async fn call(&self, request: &DriverRequest<'_>) -> Result<Vec<u8>, CallError> {
        let payload = serde_json::to_vec(request)
            .context("Failed to encode driver request")
            .map_err(CallError::Failed)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start driver '{}'", self.program))
            .map_err(CallError::Failed)?;

        if let Some(mut stdin) = child.stdin.take() {
            // the driver may exit before reading its request
            let _ = stdin.write_all(&payload).await;
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let exchange = async {
            let mut buf = Vec::new();
            if let Some(stdout) = stdout {
                stdout
                    .take(MAX_RESPONSE_BYTES)
                    .read_to_end(&mut buf)
                    .await
                    .context("Failed to read driver output")?;
            }
            let status = child.wait().await.context("Failed to wait for driver")?;
            Ok::<_, anyhow::Error>((status, buf))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok((status, buf))) => {
                if !status.success() && buf.is_empty() {
                    return Err(CallError::Failed(anyhow!(
                        "driver exited with {} and no output",
                        status
                    )));
                }
                Ok(buf)
            }
            Ok(Err(e)) => Err(CallError::Failed(e)),
            // kill_on_drop reaps the child when it goes out of scope
            Err(_) => Err(CallError::Timeout),
        }
    }
}

/// Parses the driver's send reply; anything unreadable counts as an exception.
pub fn parse_send_reply(stdout: &[u8]) -> SendReport {
    let text = String::from_utf8_lossy(stdout);
    match serde_json::from_str::<SendReport>(text.trim()) {
        Ok(report) => report,
        Err(e) => SendReport::with_detail(
            SendOutcome::Exception,
            format!("unreadable driver reply: {}", e),
        ),
    }
}

#[async_trait]
impl Sender for DriverAdapter {
    async fn send(&self, task: &Task, message: &str) -> SendReport {
        let opened = self.opened();
        let request = DriverRequest::Send {
            profile_id: &opened.profile_id,
            proxy: opened.proxy.as_deref(),
            task_id: task.id,
            target: &task.target,
            message,
        };
        match self.call(&request).await {
            Ok(stdout) => parse_send_reply(&stdout),
            Err(CallError::Timeout) => SendReport::with_detail(
                SendOutcome::Timeout,
                format!("no reply within {:?}", self.timeout),
            ),
            Err(CallError::Failed(e)) => {
                SendReport::with_detail(SendOutcome::Exception, format!("{:#}", e))
            }
        }
    }
}

#[async_trait]
impl BrowserSession for DriverAdapter {
    async fn open(&self, profile: &Profile, proxy: Option<&str>) -> Result<(), SessionError> {
        let request = DriverRequest::Open {
            profile_id: &profile.id,
            profile_name: &profile.name,
            proxy,
        };
        let failed = |reason: String| SessionError::Failed {
            profile_id: profile.id.clone(),
            reason,
        };

        let stdout = match self.call(&request).await {
            Ok(stdout) => stdout,
            Err(CallError::Timeout) => {
                return Err(failed(format!("no reply within {:?}", self.timeout)))
            }
            Err(CallError::Failed(e)) => return Err(failed(format!("{:#}", e))),
        };

        let reply: SessionReply = serde_json::from_slice(&stdout)
            .map_err(|e| failed(format!("unreadable driver reply: {}", e)))?;
        match reply {
            SessionReply::Ready => {
                if let Ok(mut opened) = self.opened.lock() {
                    *opened = Some(Opened {
                        profile_id: profile.id.clone(),
                        proxy: proxy.map(str::to_string),
                    });
                }
                debug!(profile_id = %profile.id, ?proxy, "Driver session ready");
                Ok(())
            }
            SessionReply::SessionExpired => Err(SessionError::Expired {
                profile_id: profile.id.clone(),
            }),
            SessionReply::Error { detail } => {
                Err(failed(detail.unwrap_or_else(|| "driver error".to_string())))
            }
        }
    }

    async fn close(&self) {
        let opened = match self.opened.lock().map(|mut o| o.take()) {
            Ok(Some(opened)) => opened,
            _ => return,
        };
        let request = DriverRequest::Close {
            profile_id: &opened.profile_id,
        };
        if let Err(e) = self.call(&request).await {
            warn!(profile_id = %opened.profile_id, "Driver close failed: {:?}", e);
        }
    }
}
