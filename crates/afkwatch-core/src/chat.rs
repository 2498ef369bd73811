use std::{
    fmt, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{domain::AccountId, errors::Error, protocol::ChatEvent, Result};

const FALLBACK_TEXT: &str = "Complex message format";

// ============== Text Extraction ==============

/// Plain-text rendering of a rich chat payload.
///
/// Order of preference: the first `with` argument of a `%s` translation
/// (skipping bold or colored decoration runs), then a top-level `extra`
/// array, then a direct `text` field.
pub fn extract_chat_text(data: &Value) -> String {
    if data.get("translate").and_then(Value::as_str) == Some("%s") {
        let runs = data
            .get("with")
            .and_then(|w| w.get(0))
            .and_then(|first| first.get("extra"))
            .and_then(Value::as_array);
        if let Some(runs) = runs {
            return runs
                .iter()
                .filter(|run| !is_truthy(run.get("bold")) && !is_truthy(run.get("color")))
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect::<String>()
                .trim()
                .to_string();
        }
    }

    if let Some(extra) = data.get("extra").and_then(Value::as_array) {
        return extra
            .iter()
            .map(|part| match part {
                Value::String(s) => s.as_str(),
                other => other.get("text").and_then(Value::as_str).unwrap_or(""),
            })
            .collect::<String>()
            .trim()
            .to_string();
    }

    match data.get("text").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => FALLBACK_TEXT.to_string(),
    }
}

fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

// ============== Log Records ==============

#[derive(Clone, Debug, Serialize)]
pub struct ChatRecord {
    pub timestamp: String,
    pub account: String,
    pub message: String,
    pub raw_data: Value,
}

impl ChatRecord {
    /// Build a record from a decoded chat event; a missing timestamp means "now".
    pub fn from_event(event: &ChatEvent) -> Self {
        let at: DateTime<Utc> = event.timestamp.unwrap_or_else(Utc::now);
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            account: event.account.to_string(),
            message: extract_chat_text(&event.data),
            raw_data: event.data.clone(),
        }
    }
}

// ============== Store ==============

/// Whole-file reads and writes used by the store.
pub trait LogFiles: Send + Sync + fmt::Debug {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct DiskFiles;

impl LogFiles for DiskFiles {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }
}

/// Per-account chat logs, one pretty-printed JSON array per file.
///
/// A store without a directory is disabled and every append is a no-op.
#[derive(Debug)]
pub struct ChatLogStore {
    dir: Option<PathBuf>,
    files: Box<dyn LogFiles>,
}

impl ChatLogStore {
    /// Create the directory and check that it is writable. Any failure yields a
    /// disabled store.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match check_writable(&dir) {
            Ok(()) => {
                tracing::info!(dir = %dir.display(), "chat logging enabled");
                Self::with_files(dir, Box::new(DiskFiles))
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "chat logging disabled: {e}");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            files: Box::new(DiskFiles),
        }
    }

    /// Store over an already-usable directory; no write check is made.
    pub fn with_files(dir: impl Into<PathBuf>, files: Box<dyn LogFiles>) -> Self {
        Self {
            dir: Some(dir.into()),
            files,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn path_for(&self, account: &AccountId) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(format!("{}_chat.json", account.as_str().to_lowercase())))
    }

    /// Append one record. Failures are logged and the record is dropped.
    pub fn append(&mut self, record: &ChatRecord) {
        let Some(path) = self.path_for(&AccountId::new(record.account.as_str())) else {
            return;
        };
        if let Err(e) = write_record(self.files.as_ref(), &path, record) {
            tracing::error!(account = %record.account, "failed to save chat: {e}");
            self.handle_write_error(&e);
        }
    }

    /// Permission problems do not fix themselves; stop trying for this run.
    fn handle_write_error(&mut self, err: &Error) {
        if let Error::Io(io) = err {
            if io.kind() == ErrorKind::PermissionDenied {
                tracing::warn!("disabling chat logging due to permission errors");
                self.dir = None;
            }
        }
    }
}

fn check_writable(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(".write-test");
    fs::write(&marker, b"test")?;
    fs::remove_file(&marker)?;
    Ok(())
}

fn write_record(files: &dyn LogFiles, path: &Path, record: &ChatRecord) -> Result<()> {
    let mut entries: Vec<Value> = match files.read(path) {
        Ok(s) if s.trim().is_empty() => Vec::new(),
        Ok(s) => serde_json::from_str(&s)?,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    entries.push(serde_json::to_value(record)?);
    files.write(path, &serde_json::to_string_pretty(&entries)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    fn record(account: &str, message: &str) -> ChatRecord {
        ChatRecord {
            timestamp: "2023-11-14T22:13:20.000Z".to_string(),
            account: account.to_string(),
            message: message.to_string(),
            raw_data: json!({"text": message}),
        }
    }

    #[test]
    fn translation_skips_decorated_runs() {
        let data = json!({
          "translate": "%s",
          "with": [{"extra": [{"text": "hello", "bold": true}, {"text": " world"}]}]
        });
        assert_eq!(extract_chat_text(&data), "world");

        let colored = json!({
          "translate": "%s",
          "with": [{"extra": [{"text": "<Steve>", "color": "gold"}, {"text": " hi "}, {"text": ""}]}]
        });
        assert_eq!(extract_chat_text(&colored), "hi");
    }

    #[test]
    fn falls_back_through_extra_then_text() {
        assert_eq!(extract_chat_text(&json!({"text": "plain"})), "plain");
        assert_eq!(
            extract_chat_text(&json!({"extra": [{"text": " a"}, "b", {"bold": true}, {"text": "c "}]})),
            "abc"
        );
        assert_eq!(extract_chat_text(&json!({"foo": 1})), FALLBACK_TEXT);
        assert_eq!(extract_chat_text(&json!("bare")), FALLBACK_TEXT);
    }

    #[test]
    fn record_from_event_uses_iso_millis() {
        let ev = ChatEvent {
            account: AccountId::from("Steve"),
            timestamp: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000),
            data: json!({"text": "gg"}),
        };
        let rec = ChatRecord::from_event(&ev);
        assert_eq!(rec.timestamp, "2023-11-14T22:13:20.000Z");
        assert_eq!(rec.account, "Steve");
        assert_eq!(rec.message, "gg");
        assert_eq!(rec.raw_data, json!({"text": "gg"}));
    }

    #[test]
    fn appends_to_lowercased_per_account_file() {
        let dir = tmp_dir("afkwatch-chat-test");
        let mut store = ChatLogStore::open(&dir);
        assert!(store.is_enabled());

        store.append(&record("Steve", "one"));
        store.append(&record("Steve", "two"));
        store.append(&record("Alex", "three"));

        let path = dir.join("steve_chat.json");
        let entries: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["message"], "two");
        assert_eq!(entries[0]["raw_data"], json!({"text": "one"}));
        assert!(dir.join("alex_chat.json").exists());
        assert!(!dir.join(".write-test").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_existing_file_is_treated_as_empty_log() {
        let dir = tmp_dir("afkwatch-chat-empty");
        let mut store = ChatLogStore::open(&dir);
        fs::write(dir.join("steve_chat.json"), "  \n").unwrap();
        store.append(&record("Steve", "hi"));

        let entries: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(dir.join("steve_chat.json")).unwrap())
                .unwrap();
        assert_eq!(entries.len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }

    /// Every write is refused as if the log directory had gone read-only.
    #[derive(Debug, Default)]
    struct DeniedFiles {
        writes: Arc<AtomicUsize>,
    }

    impl LogFiles for DeniedFiles {
        fn read(&self, _: &Path) -> io::Result<String> {
            Err(io::Error::from(ErrorKind::NotFound))
        }

        fn write(&self, _: &Path, _: &str) -> io::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from(ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn permission_denied_disables_for_good() {
        let files = DeniedFiles::default();
        let writes = files.writes.clone();
        let mut store = ChatLogStore::with_files("/var/log/afk", Box::new(files));
        assert!(store.is_enabled());

        store.append(&record("Steve", "first"));
        assert!(!store.is_enabled());
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        store.append(&record("Steve", "lost"));
        store.append(&record("Alex", "lost too"));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_errors_keep_logging_enabled() {
        let dir = tmp_dir("afkwatch-chat-corrupt");
        let mut store = ChatLogStore::open(&dir);
        fs::write(dir.join("steve_chat.json"), "{not json").unwrap();

        store.append(&record("Steve", "dropped"));
        assert!(store.is_enabled());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unusable_directory_disables_store() {
        let file = tmp_dir("afkwatch-chat-file");
        fs::write(&file, "x").unwrap();
        let store = ChatLogStore::open(file.join("logs"));
        assert!(!store.is_enabled());
        assert!(store.path_for(&AccountId::from("Steve")).is_none());
        let _ = fs::remove_file(&file);
    }
}
