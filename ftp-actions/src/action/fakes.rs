// In-memory remote server used by the action tests

use crate::errors::ActionError;
use crate::models::{join_remote, ConnectionSpec, RemoteEntry};
use crate::session::{RemoteSession, SessionFactory, StreamConsumer};
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn parent_of(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

#[derive(Default)]
pub struct MockServer {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    dirs: Mutex<BTreeSet<String>>,
    rejected_writes: Mutex<BTreeSet<String>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        let server = Self::default();
        server.add_dir("/");
        Arc::new(server)
    }

    pub fn add_dir(&self, dir: &str) {
        self.dirs.lock().unwrap().insert(dir.to_string());
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let (parent, _) = parent_of(path);
        self.add_dir(parent);
        let mut files = self.files.lock().unwrap();
        match files.iter_mut().find(|(p, _)| p == path) {
            Some(entry) => entry.1 = content.to_vec(),
            None => files.push((path.to_string(), content.to_vec())),
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
    }

    pub fn has_dir(&self, dir: &str) -> bool {
        self.dirs.lock().unwrap().contains(dir)
    }

    /// Uploads to `path` fail with a permission error
    pub fn reject_writes_to(&self, path: &str) {
        self.rejected_writes.lock().unwrap().insert(path.to_string());
    }
}

pub struct MockSession {
    server: Arc<MockServer>,
    cwd: String,
}

impl MockSession {
    fn absolute(&self, path: &str) -> String {
        if path.starts_with('/') || self.cwd.is_empty() {
            path.to_string()
        } else {
            join_remote(&self.cwd, path)
        }
    }
}

impl RemoteSession for MockSession {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, ActionError> {
        if !self.server.has_dir(dir) {
            return Err(ActionError::List {
                path: dir.to_string(),
                reason: "550 No such directory".to_string(),
            });
        }
        let mut entries = vec![RemoteEntry::directory(dir, "."), RemoteEntry::directory(dir, "..")];
        for sub in self.server.dirs.lock().unwrap().iter() {
            let (parent, name) = parent_of(sub);
            if parent == dir && !name.is_empty() {
                entries.push(RemoteEntry::directory(dir, name));
            }
        }
        for (path, _) in self.server.files.lock().unwrap().iter() {
            let (parent, name) = parent_of(path);
            if parent == dir {
                entries.push(RemoteEntry::file(dir, name));
            }
        }
        Ok(entries)
    }

    fn read_stream(
        &mut self,
        path: &str,
        consumer: &mut StreamConsumer<'_>,
    ) -> Result<(), ActionError> {
        let content = self
            .server
            .file(&self.absolute(path))
            .ok_or_else(|| ActionError::transfer(path, "550 No such file"))?;
        consumer(&mut content.as_slice())
    }

    fn write_stream(&mut self, path: &str, source: &mut dyn Read) -> Result<u64, ActionError> {
        let target = self.absolute(path);
        if self.server.rejected_writes.lock().unwrap().contains(&target) {
            return Err(ActionError::transfer(path, "553 Could not create file"));
        }
        let mut content = Vec::new();
        source
            .read_to_end(&mut content)
            .map_err(|e| ActionError::transfer(path, e))?;
        self.server.add_file(&target, &content);
        Ok(content.len() as u64)
    }

    fn delete(&mut self, path: &str) -> Result<(), ActionError> {
        let target = self.absolute(path);
        let mut files = self.server.files.lock().unwrap();
        let before = files.len();
        files.retain(|(p, _)| *p != target);
        if files.len() == before {
            return Err(ActionError::Delete {
                path: path.to_string(),
                reason: "550 No such file".to_string(),
            });
        }
        Ok(())
    }

    fn change_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let target = self.absolute(dir);
        if !self.server.has_dir(&target) {
            return Err(ActionError::transfer(dir, "550 No such directory"));
        }
        self.cwd = target;
        Ok(())
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        self.server.add_dir(&self.absolute(dir));
        Ok(())
    }

    fn close(&mut self) {
        self.server.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    pub server: Arc<MockServer>,
    pub refuse: bool,
}

impl MockFactory {
    pub fn new(server: Arc<MockServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            refuse: false,
        })
    }
}

impl SessionFactory for MockFactory {
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>, ActionError> {
        self.server.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ActionError::Connection {
                host: spec.host.clone(),
                port: spec.port,
                reason: "Connection refused".to_string(),
            });
        }
        Ok(Box::new(MockSession {
            server: self.server.clone(),
            cwd: String::new(),
        }))
    }
}
