// End-to-end tests for the transfer actions
// An in-process remote server stands in for FTP/SFTP; destinations are temp directories.

use ftp_actions::action::{build_action, Action, CopyAction, DeleteAction, PutAction};
use ftp_actions::config::{ActionConfig, ConnectionConfig, CopyConfig, DeleteConfig, PutConfig};
use ftp_actions::context::ActionContext;
use ftp_actions::errors::ActionError;
use ftp_actions::models::{join_remote, ConnectionSpec, OutcomeStatus, Protocol, RemoteEntry};
use ftp_actions::session::{RemoteSession, SessionFactory, StreamConsumer};
use ftp_actions::store::LocalFileStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ============================================================================
// In-process remote server
// ============================================================================

#[derive(Default)]
struct RemoteServer {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Reads of these paths fail mid-transfer
    broken: Mutex<BTreeSet<String>>,
}

impl RemoteServer {
    fn new() -> Arc<Self> {
        let server = Self::default();
        server.dirs.lock().unwrap().insert("/".to_string());
        Arc::new(server)
    }

    fn put(&self, path: &str, content: &[u8]) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            let parent = if parent.is_empty() { "/" } else { parent };
            self.dirs.lock().unwrap().insert(parent.to_string());
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn break_reads_of(&self, path: &str) {
        self.broken.lock().unwrap().insert(path.to_string());
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct RemoteConnection {
    server: Arc<RemoteServer>,
    cwd: Option<String>,
}

impl RemoteConnection {
    fn resolve(&self, path: &str) -> String {
        match &self.cwd {
            Some(cwd) if !path.starts_with('/') => join_remote(cwd, path),
            _ => path.to_string(),
        }
    }
}

impl RemoteSession for RemoteConnection {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, ActionError> {
        let dir = self.resolve(dir);
        if !self.server.dirs.lock().unwrap().contains(&dir) {
            return Err(ActionError::List {
                path: dir,
                reason: "550 Failed to open directory".to_string(),
            });
        }
        let mut entries = vec![RemoteEntry::directory(&dir, "."), RemoteEntry::directory(&dir, "..")];
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        for path in self.server.files.lock().unwrap().keys() {
            if let Some(name) = path.strip_prefix(&prefix) {
                if !name.contains('/') {
                    entries.push(RemoteEntry::file(&dir, name));
                }
            }
        }
        Ok(entries)
    }

    fn read_stream(
        &mut self,
        path: &str,
        consumer: &mut StreamConsumer<'_>,
    ) -> Result<(), ActionError> {
        let target = self.resolve(path);
        let content = self
            .server
            .get(&target)
            .ok_or_else(|| ActionError::transfer(path, "550 File not found"))?;
        if self.server.broken.lock().unwrap().contains(&target) {
            let half = &content[..content.len() / 2];
            let mut failing = half.chain(FailingReader);
            return consumer(&mut failing);
        }
        consumer(&mut content.as_slice())
    }

    fn write_stream(&mut self, path: &str, source: &mut dyn Read) -> Result<u64, ActionError> {
        let mut content = Vec::new();
        source
            .read_to_end(&mut content)
            .map_err(|e| ActionError::transfer(path, e))?;
        self.server.put(&self.resolve(path), &content);
        Ok(content.len() as u64)
    }

    fn delete(&mut self, path: &str) -> Result<(), ActionError> {
        let target = self.resolve(path);
        match self.server.files.lock().unwrap().remove(&target) {
            Some(_) => Ok(()),
            None => Err(ActionError::Delete {
                path: path.to_string(),
                reason: "550 No such file or directory".to_string(),
            }),
        }
    }

    fn change_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let target = self.resolve(dir);
        if !self.server.dirs.lock().unwrap().contains(&target) {
            return Err(ActionError::transfer(dir, "550 Failed to change directory"));
        }
        self.cwd = Some(target);
        Ok(())
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let target = self.resolve(dir);
        self.server.dirs.lock().unwrap().insert(target);
        Ok(())
    }

    fn close(&mut self) {
        self.server.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "426 Connection closed; transfer aborted",
        ))
    }
}

struct RemoteServerFactory {
    server: Arc<RemoteServer>,
}

impl SessionFactory for RemoteServerFactory {
    fn open(&self, _spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>, ActionError> {
        self.server.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RemoteConnection {
            server: self.server.clone(),
            cwd: None,
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn factory(server: &Arc<RemoteServer>) -> Arc<RemoteServerFactory> {
    Arc::new(RemoteServerFactory {
        server: server.clone(),
    })
}

fn connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "ftp.example.com".to_string(),
        port: Some(2121),
        user_name: Some("loader".to_string()),
        password: Some("secret".to_string()),
        ..Default::default()
    }
}

fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer.write_all(content).expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish zip archive")
        .into_inner()
}

fn copy_action(server: &Arc<RemoteServer>, config: CopyConfig) -> CopyAction {
    CopyAction::new(config, factory(server), Arc::new(LocalFileStore::new()))
}

fn dest_config(src: &str, dest: &Path) -> CopyConfig {
    CopyConfig::new(connection(), src, &dest.display().to_string())
}

// ============================================================================
// Copy
// ============================================================================

#[test]
fn test_copy_extracts_archive_members_into_destination() {
    let server = RemoteServer::new();
    server.put(
        "/outgoing/archive.zip",
        &zip_archive(&[("a.txt", &b"alpha"[..]), ("sub/b.txt", &b"beta"[..])]),
    );
    let dest = TempDir::new().unwrap();

    let mut ctx = ActionContext::new();
    copy_action(&server, dest_config("/outgoing", dest.path()))
        .run(&mut ctx)
        .expect("copy should succeed");

    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dest.path().join("sub/b.txt")).unwrap(), b"beta");
    assert!(!dest.path().join("archive.zip").exists());
    assert_eq!(ctx.get_variable("ftp.files.copied"), Some("/outgoing/archive.zip"));
    assert_eq!(server.closed(), 1);
}

#[test]
fn test_copy_without_extraction_keeps_archive_bytes() {
    let server = RemoteServer::new();
    let archive = zip_archive(&[("a.txt", &b"alpha"[..]), ("sub/b.txt", &b"beta"[..])]);
    server.put("/outgoing/archive.zip", &archive);
    let dest = TempDir::new().unwrap();

    let mut config = dest_config("/outgoing", dest.path());
    config.extract_zip_files = false;
    copy_action(&server, config)
        .run(&mut ActionContext::new())
        .expect("copy should succeed");

    assert_eq!(fs::read(dest.path().join("archive.zip")).unwrap(), archive);
    assert!(!dest.path().join("a.txt").exists());
}

#[test]
fn test_copy_filter_scenario_publishes_copied_paths() {
    let server = RemoteServer::new();
    server.dirs.lock().unwrap().insert("srcDir".to_string());
    server.put("srcDir/report.csv", b"id,amount\n1,42\n");
    server.put("srcDir/notes.txt", b"not wanted");
    server.put("srcDir/bundle.zip", &zip_archive(&[("x.dat", &b"\x00\x01\x02"[..])]));
    let dest = TempDir::new().unwrap();

    let mut config = dest_config("srcDir", dest.path());
    config.file_name_regex = Some("report.*|bundle.*".to_string());
    let mut ctx = ActionContext::new();
    copy_action(&server, config).run(&mut ctx).unwrap();

    let mut names: Vec<String> = fs::read_dir(dest.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["report.csv", "x.dat"]);

    // Listing order here is the server's (sorted by path)
    let published = ctx.get_variable("ftp.files.copied").unwrap();
    let mut paths: Vec<&str> = published.split(',').collect();
    paths.sort();
    assert_eq!(paths, vec!["srcDir/bundle.zip", "srcDir/report.csv"]);
}

#[test]
fn test_copy_twice_overwrites_with_identical_content() {
    let server = RemoteServer::new();
    server.put("/outgoing/a.txt", b"first");
    server.put("/outgoing/b.zip", &zip_archive(&[("c.txt", &b"charlie"[..])]));
    let dest = TempDir::new().unwrap();
    let action = copy_action(&server, dest_config("/outgoing", dest.path()));

    let mut first = ActionContext::new();
    action.run(&mut first).unwrap();
    let mut second = ActionContext::new();
    action.run(&mut second).unwrap();

    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"first");
    assert_eq!(fs::read(dest.path().join("c.txt")).unwrap(), b"charlie");
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 2);
    assert_eq!(
        first.get_variable("ftp.files.copied"),
        second.get_variable("ftp.files.copied")
    );
    assert_eq!(server.opened(), 2);
    assert_eq!(server.closed(), 2);
}

#[test]
fn test_copy_aborts_on_broken_transfer_and_still_closes() {
    let server = RemoteServer::new();
    server.put("/outgoing/a.txt", b"alpha");
    server.put("/outgoing/b.txt", b"bravo bravo bravo");
    server.put("/outgoing/c.txt", b"charlie");
    server.break_reads_of("/outgoing/b.txt");
    let dest = TempDir::new().unwrap();

    let mut ctx = ActionContext::new();
    let err = copy_action(&server, dest_config("/outgoing", dest.path()))
        .run(&mut ctx)
        .unwrap_err();

    assert!(matches!(err, ActionError::Storage(_)));
    // Files written before the failure stay; nothing after it is attempted
    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
    assert!(!dest.path().join("c.txt").exists());
    assert!(ctx.get_variable("ftp.files.copied").is_none());
    assert_eq!(ctx.outcomes[0].status, OutcomeStatus::Failed);
    assert_eq!(server.closed(), 1);
}

#[test]
fn test_listing_failure_closes_session_once() {
    let server = RemoteServer::new();
    let dest = TempDir::new().unwrap();

    let err = copy_action(&server, dest_config("/does-not-exist", dest.path()))
        .run(&mut ActionContext::new())
        .unwrap_err();

    assert!(matches!(err, ActionError::List { .. }));
    assert_eq!(server.opened(), 1);
    assert_eq!(server.closed(), 1);
}

#[test]
fn test_invalid_port_fails_before_connecting() {
    let server = RemoteServer::new();
    let dest = TempDir::new().unwrap();
    let mut config = dest_config("/outgoing", dest.path());
    config.connection.port = Some(100_000);

    let err = copy_action(&server, config)
        .run(&mut ActionContext::new())
        .unwrap_err();

    match err {
        ActionError::InvalidConfiguration(failures) => {
            assert!(failures.iter().any(|f| f.field.as_deref() == Some("port")));
        }
        other => panic!("expected configuration error, got {other}"),
    }
    assert_eq!(server.opened(), 0);
}

#[test]
fn test_macros_resolved_from_context_variables() {
    let server = RemoteServer::new();
    server.put("/outgoing/2024-01-31/a.txt", b"dated");
    let dest = TempDir::new().unwrap();

    let config = dest_config("/outgoing/${run.date}", dest.path());
    let mut ctx = ActionContext::new();
    ctx.set_variable("run.date", "2024-01-31");
    copy_action(&server, config).run(&mut ctx).unwrap();

    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"dated");
}

// ============================================================================
// Put
// ============================================================================

#[test]
fn test_upload_then_download_round_trip() {
    let server = RemoteServer::new();
    let local = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    fs::write(local.path().join("payload.bin"), &payload).unwrap();
    fs::write(local.path().join("skip.log"), b"not uploaded").unwrap();

    let mut put_config = PutConfig::new(connection(), &local.path().display().to_string(), "/incoming");
    put_config.file_name_regex = Some(".*\\.bin".to_string());
    PutAction::new(put_config, factory(&server), Arc::new(LocalFileStore::new()))
        .run(&mut ActionContext::new())
        .unwrap();
    assert!(server.get("/incoming/skip.log").is_none());

    let dest = TempDir::new().unwrap();
    let mut copy_config = dest_config("/incoming", dest.path());
    copy_config.file_name_regex = Some(".*\\.bin".to_string());
    copy_action(&server, copy_config)
        .run(&mut ActionContext::new())
        .unwrap();

    assert_eq!(fs::read(dest.path().join("payload.bin")).unwrap(), payload);
    assert_eq!(server.closed(), 2);
}

#[test]
fn test_put_missing_source_is_reported() {
    let server = RemoteServer::new();
    let local = TempDir::new().unwrap();
    let missing = local.path().join("absent");

    let config = PutConfig::new(connection(), &missing.display().to_string(), "/incoming");
    let err = PutAction::new(config, factory(&server), Arc::new(LocalFileStore::new()))
        .run(&mut ActionContext::new())
        .unwrap_err();

    assert!(err.to_string().contains("Source files don't exist"));
    assert_eq!(server.opened(), 0);
}

// ============================================================================
// Delete
// ============================================================================

fn delete_action(server: &Arc<RemoteServer>, continue_on_error: bool) -> DeleteAction {
    let config = DeleteConfig::new(connection(), "/a.txt,/missing.txt,/b.txt", continue_on_error);
    DeleteAction::new(config, factory(server))
}

#[test]
fn test_delete_continue_on_error() {
    let server = RemoteServer::new();
    server.put("/a.txt", b"a");
    server.put("/b.txt", b"b");

    let mut ctx = ActionContext::new();
    delete_action(&server, true).run(&mut ctx).unwrap();

    assert!(server.get("/a.txt").is_none());
    assert!(server.get("/b.txt").is_none());
    assert_eq!(ctx.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(server.closed(), 1);
}

#[test]
fn test_delete_stops_at_first_failure() {
    let server = RemoteServer::new();
    server.put("/a.txt", b"a");
    server.put("/b.txt", b"b");

    let err = delete_action(&server, false)
        .run(&mut ActionContext::new())
        .unwrap_err();

    assert!(matches!(err, ActionError::Delete { ref path, .. } if path == "/missing.txt"));
    assert!(server.get("/a.txt").is_none());
    assert!(server.get("/b.txt").is_some());
    assert_eq!(server.closed(), 1);
}

// ============================================================================
// Runner wiring
// ============================================================================

#[test]
fn test_build_action_from_json_config() {
    let server = RemoteServer::new();
    server.put("/old.csv", b"stale");

    let config: ActionConfig = serde_json::from_value(serde_json::json!({
        "type": "delete",
        "host": "ftp.example.com",
        "protocol": "ftp",
        "filesToDelete": "/old.csv",
        "continueOnError": false
    }))
    .unwrap();
    assert_eq!(config.name(), "delete");

    let action = build_action(config, factory(&server), Arc::new(LocalFileStore::new()), 5);
    assert_eq!(action.name(), "delete");
    action.run(&mut ActionContext::new()).unwrap();
    assert!(server.get("/old.csv").is_none());
}

#[test]
fn test_sftp_without_user_name_is_rejected() {
    let server = RemoteServer::new();
    let mut config = DeleteConfig::new(connection(), "/a.txt", false);
    config.connection.protocol = Protocol::Sftp;
    config.connection.user_name = None;

    let err = DeleteAction::new(config, factory(&server))
        .run(&mut ActionContext::new())
        .unwrap_err();

    assert!(matches!(err, ActionError::InvalidConfiguration(_)));
    assert_eq!(server.opened(), 0);
}
