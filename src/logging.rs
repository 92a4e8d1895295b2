//! Structured logging for the suppression engine.
//!
//! Every record is a single JSON line on stdout with a stable envelope
//! (`ts`, `run_id`, `seq`, `lvl`, `component`, `event`, `msg`, `data`) so the
//! moderation trail can be grepped, replayed and aggregated.
//!
//! - `LOG_LEVEL` filters by severity (default `info`)
//! - `LOG_DOMAINS` filters by component (comma-separated list or `all`)
//! - `LOG_DIR` additionally appends records to `<LOG_DIR>/<run_id>/*.jsonl`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Engine,    // Issuance decisions
    State,     // Ephemeral suppression keys, TTL rewrites
    Throttle,  // Issuance windows, probation
    Ward,      // Counter registration and consumption
    Redact,    // Message redaction statistics
    Gateway,   // Per-message policy
    Ledger,    // Durable audit rows
    Inventory, // Item effects
    Slack,     // Transport adapter
    System,    // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Engine => "engine",
            Domain::State => "state",
            Domain::Throttle => "throttle",
            Domain::Ward => "ward",
            Domain::Redact => "redact",
            Domain::Gateway => "gateway",
            Domain::Ledger => "ledger",
            Domain::Inventory => "inventory",
            Domain::Slack => "slack",
            Domain::System => "system",
        }
    }

}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

/// Filters are read once, on the first record of the process.
struct Filter {
    min_level: Level,
    domains: Option<Vec<String>>,
}

impl Filter {
    fn from_env() -> Self {
        let min_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info);
        let domains = std::env::var("LOG_DOMAINS")
            .ok()
            .filter(|v| v.trim() != "all")
            .map(|v| v.split(',').map(|d| d.trim().to_string()).filter(|d| !d.is_empty()).collect());
        Self { min_level, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self
                .domains
                .as_ref()
                .map_or(true, |ds| ds.iter().any(|d| d == domain.as_str()))
    }
}

struct RunContext {
    run_id: String,
    filter: Filter,
    sinks: Option<FileSinks>,
}

fn open_sink(dir: &Path, name: &str) -> Option<Mutex<BufWriter<File>>> {
    let path = dir.join(name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map(|f| Mutex::new(BufWriter::new(f)))
        .map_err(|err| eprintln!("[log] cannot open {}: {}", path.display(), err))
        .ok()
}

fn open_sinks(base: &str, run_id: &str) -> Option<FileSinks> {
    let dir = Path::new(base).join(run_id);
    if let Err(err) = create_dir_all(&dir) {
        eprintln!("[log] cannot create {}: {}", dir.display(), err);
        return None;
    }
    Some(FileSinks {
        events: open_sink(&dir, "events.jsonl")?,
        trace: open_sink(&dir, "trace.jsonl")?,
    })
}

fn context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| format!("muzzle-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = std::env::var("LOG_DIR").ok().and_then(|base| open_sinks(&base, &run_id));
        RunContext { run_id, filter: Filter::from_env(), sinks }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["token", "authorization", "Authorization", "signing_secret", "signature"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["team_id", "subject_id", "requestor_id", "record_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(sink: &Mutex<BufWriter<File>>, line: &str) {
    let Ok(mut w) = sink.lock() else { return };
    if writeln!(w, "{}", line).and_then(|_| w.flush()).is_err() {
        eprintln!("[log] sink write failed");
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = context();
    if !ctx.filter.allows(level, domain) {
        return;
    }
    let (mut top, data) = split_fields(sanitize_fields(fields));
    let mut record = json!({
        "ts": ts_now(),
        "run_id": ctx.run_id,
        "seq": next_seq(),
        "lvl": level.as_str().to_uppercase(),
        "component": domain.as_str(),
        "event": event,
        "msg": top.remove("msg").unwrap_or_else(|| v_str("")),
    });
    if let Value::Object(entry) = &mut record {
        entry.extend(top);
        entry.insert("data".to_string(), Value::Object(data));
    }

    let line = record.to_string();
    if let Some(sinks) = &ctx.sinks {
        let sink = if level <= Level::Debug { &sinks.trace } else { &sinks.events };
        write_line(sink, &line);
    }
    println!("{}", line);
}

// =============================================================================
// Domain helpers
// =============================================================================

/// Log the resolution of an issuance attempt.
pub fn log_outcome(subject_id: &str, requestor_id: &str, team_id: &str, rule: &str, outcome: &str) {
    log(
        Level::Info,
        Domain::Engine,
        "outcome",
        obj(&[
            ("subject_id", v_str(subject_id)),
            ("requestor_id", v_str(requestor_id)),
            ("team_id", v_str(team_id)),
            ("rule", v_str(rule)),
            ("outcome", v_str(outcome)),
        ]),
    );
}

/// Log an infrastructure failure that is deliberately not propagated.
pub fn log_swallowed(domain: Domain, operation: &str, err: &anyhow::Error) {
    log(
        Level::Warn,
        domain,
        "swallowed_error",
        obj(&[
            ("operation", v_str(operation)),
            ("error", v_str(&format!("{:#}", err))),
        ]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
