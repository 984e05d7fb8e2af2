use anyhow::Result;
use chrono::{DateTime, Utc};
use promptdesk_core::{EditorEvent, EventEnvelope, TelemetryConfig, runtime_dir};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_FILE: &str = "observe.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Event,
    Warn,
    TelemetryError,
}

impl LineKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Warn => "WARN",
            Self::TelemetryError => "TELEMETRY_ERROR",
        }
    }
}

/// Append-only `observe.log` under the workspace runtime dir.
#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
}

impl LogFile {
    fn append(&self, kind: LineKind, at: DateTime<Utc>, body: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{} {} {body}", at.to_rfc3339(), kind.as_str())?;
        Ok(())
    }
}

/// Event log, warnings and optional telemetry for one editing session.
pub struct Observer {
    log: Option<LogFile>,
    telemetry: Option<TelemetrySink>,
    verbose: bool,
}

struct TelemetrySink {
    endpoint: String,
    client: Client,
}

impl Observer {
    pub fn new(workspace: &Path, telemetry_cfg: &TelemetryConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log: Some(LogFile {
                path: dir.join(LOG_FILE),
            }),
            telemetry: telemetry_sink(telemetry_cfg)?,
            verbose: false,
        })
    }

    /// Observer that writes nothing to disk and sends no telemetry.
    pub fn disabled() -> Self {
        Self {
            log: None,
            telemetry: None,
            verbose: false,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|log| log.path.as_path())
    }

    /// Log the full envelope, stamped with the envelope's own time so lines
    /// follow the session clock. Telemetry only ever sees counts.
    pub fn record_event(&self, envelope: &EventEnvelope) -> Result<()> {
        let event_type = envelope.event.event_type().as_str();
        self.verbose_log(&format!("#{} {event_type}", envelope.seq_no));
        if let Some(log) = &self.log {
            log.append(LineKind::Event, envelope.at, &serde_json::to_string(envelope)?)?;
        }
        self.emit_telemetry(
            &format!("promptdesk.{event_type}"),
            json!({
                "session_id": envelope.session_id,
                "seq_no": envelope.seq_no,
                "metrics": event_metrics(&envelope.event),
            }),
        );
        Ok(())
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[promptdesk] {msg}");
        }
    }

    /// Always written to the log file; echoed to stderr in verbose mode.
    pub fn warn_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[promptdesk WARN] {msg}");
        }
        if let Some(log) = &self.log {
            let _ = log.append(LineKind::Warn, Utc::now(), msg);
        }
    }

    fn emit_telemetry(&self, name: &str, payload: Value) {
        let Some(sink) = &self.telemetry else {
            return;
        };
        let body = json!({
            "name": name,
            "at": Utc::now().to_rfc3339(),
            "payload": payload,
        });

        // Sent off the editor thread; failures only reach the log file.
        let client = sink.client.clone();
        let endpoint = sink.endpoint.clone();
        let log = self.log.clone();
        std::thread::spawn(move || {
            if let Err(err) = client.post(&endpoint).json(&body).send()
                && let Some(log) = log
            {
                let _ = log.append(
                    LineKind::TelemetryError,
                    Utc::now(),
                    &format!("error={err}"),
                );
            }
        });
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Shape of an event without any buffer or suggestion text.
fn event_metrics(event: &EditorEvent) -> Value {
    match event {
        EditorEvent::SuggestionGenerated { suggestions, diff } => json!({
            "suggestions": suggestions.len(),
            "chunks": diff.chunks.len(),
            "overall_confidence": diff.overall_confidence,
        }),
        EditorEvent::EditApplied { chunks, .. } => json!({ "chunks": chunks.len() }),
        EditorEvent::EditRejected { suggestion_id } => json!({ "suggestion_id": suggestion_id }),
        EditorEvent::AutonomyChanged { level, config } => json!({
            "level": level.to_string(),
            "max_batch_size": config.max_batch_size,
        }),
        EditorEvent::DiffGenerated { diff } => json!({ "total_changes": diff.total_changes }),
    }
}

fn telemetry_sink(cfg: &TelemetryConfig) -> Result<Option<TelemetrySink>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let Some(endpoint) = cfg.endpoint.clone() else {
        return Ok(None);
    };
    let client = Client::builder().timeout(Duration::from_secs(3)).build()?;
    Ok(Some(TelemetrySink { endpoint, client }))
}
