//! Request dispatch.
//!
//! [`FileService`] turns one decoded [`Command`] into one [`Response`] and tells the
//! session whether to keep reading. It owns the id index behind a single mutex; every
//! index read or write, including the scans behind BY_ID locators, happens under it.
//!
//! A PUT holds the lock from name selection through the file write to the index insert,
//! and its response is only built once all three are done. Two PUTs therefore never pick
//! the same generated name, and no client can observe an id before its bytes are on disk.
//!
//! Status mapping:
//!
//! | Outcome | GET | PUT | DELETE |
//! |---------|-----|-----|--------|
//! | success | 200 + content | 200 + id | 200 |
//! | unknown name / id | 404 | - | 403 |
//! | name already stored | - | 403 | - |
//! | unsafe name | 404 | 403 | 403 |
//! | I/O failure | 404 | 403 | 403 |

use crate::config::CoreConfig;
use crate::index::{IdIndex, IndexStore};
use crate::CoreResult;
use filestore_files::{FileStore, FilesError};
use filestore_protocol::auth::{self, AuthError};
use filestore_protocol::{Command, Locator, Response, Status};
use filestore_types::{FileId, FileName};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where the session goes after a command has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitCommand,
    /// The session must close, and the server must stop accepting connections.
    Terminate,
}

/// Result of dispatching one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub response: Response,
    pub next: SessionState,
}

impl Outcome {
    fn reply(response: Response) -> Self {
        Self {
            response,
            next: SessionState::AwaitCommand,
        }
    }

    fn fail(status: Status) -> Self {
        Self::reply(Response::Failed(status))
    }
}

/// Storage state shared by every session of one server.
#[derive(Debug)]
pub struct FileService {
    files: FileStore,
    index: Mutex<IdIndex>,
    index_store: IndexStore,
    /// Held across snapshot and write so flushes land in snapshot order.
    flush_lock: Mutex<()>,
    admin_token: Option<String>,
}

impl FileService {
    /// Opens the storage described by `config`, loading the persisted index.
    ///
    /// # Errors
    ///
    /// Returns a `CoreError` if the storage directory cannot be created or the index file
    /// exists but cannot be loaded.
    pub fn open(config: &CoreConfig) -> CoreResult<Self> {
        let files = FileStore::new(config.data_dir());
        files.ensure_storage_dir()?;

        let index_store = IndexStore::new(config.index_path());
        let index = index_store.load()?;

        Ok(Self {
            files,
            index: Mutex::new(index),
            index_store,
            flush_lock: Mutex::new(()),
            admin_token: config.admin_token().map(str::to_owned),
        })
    }

    /// Handles one command.
    pub fn handle(&self, command: Command) -> Outcome {
        match command {
            Command::Get(locator) => Outcome::reply(self.get(&locator)),
            Command::Put {
                target_name,
                payload,
            } => Outcome::reply(self.put(&target_name, &payload)),
            Command::Delete(locator) => Outcome::reply(self.delete(&locator)),
            Command::Terminate { token } => self.terminate(&token),
            Command::Invalid(reason) => {
                tracing::warn!("rejected malformed command: {}", reason);
                Outcome::fail(Status::BadRequest)
            }
        }
    }

    /// Reads a stored file by name or id.
    pub fn get(&self, locator: &Locator) -> Response {
        let name = match locator {
            Locator::ByName(value) => match FileName::parse(value) {
                Ok(name) => name,
                Err(e) => {
                    tracing::debug!("GET rejected name {:?}: {}", value, e);
                    return Response::Failed(Status::NotFound);
                }
            },
            Locator::ById(value) => match self.name_for_id(value) {
                Some(name) => name,
                None => return Response::Failed(Status::NotFound),
            },
        };

        match self.files.read(&name) {
            Ok(content) => Response::Content(content),
            Err(FilesError::NotFound(_)) => Response::Failed(Status::NotFound),
            Err(e) => {
                tracing::error!("GET {} failed: {}", name, e);
                Response::Failed(Status::NotFound)
            }
        }
    }

    /// Stores `payload` under `target_name`, or under a generated name if it is empty.
    pub fn put(&self, target_name: &str, payload: &[u8]) -> Response {
        let mut index = self.lock_index();

        let name = if target_name.is_empty() {
            match next_generated_name(&index, &self.files) {
                Some(name) => name,
                None => {
                    tracing::error!("PUT failed: generated file names exhausted");
                    return Response::Failed(Status::Forbidden);
                }
            }
        } else {
            match FileName::parse(target_name) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("PUT rejected name {:?}: {}", target_name, e);
                    return Response::Failed(Status::Forbidden);
                }
            }
        };

        let id = name.id();
        if let Some(owner) = index.lookup_by_id(id).filter(|owner| **owner != name) {
            tracing::warn!("PUT {} refused: id {} already belongs to {}", name, id, owner);
            return Response::Failed(Status::Forbidden);
        }

        match self.files.write(&name, payload) {
            Ok(()) => {
                index.insert(name.clone(), id);
                tracing::info!("stored {} ({} bytes) as id {}", name, payload.len(), id);
                Response::Created(id)
            }
            Err(FilesError::AlreadyExists(_)) => {
                tracing::debug!("PUT {} refused: already exists", name);
                Response::Failed(Status::Forbidden)
            }
            Err(e) => {
                tracing::error!("PUT {} failed: {}", name, e);
                Response::Failed(Status::Forbidden)
            }
        }
    }

    /// Deletes a stored file by name or id and drops its index entry.
    pub fn delete(&self, locator: &Locator) -> Response {
        let mut index = self.lock_index();

        let name = match locator {
            Locator::ByName(value) => match FileName::parse(value) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("DELETE rejected name {:?}: {}", value, e);
                    return Response::Failed(Status::Forbidden);
                }
            },
            Locator::ById(value) => {
                match FileId::parse(value).and_then(|id| index.lookup_by_id(id)) {
                    Some(name) => name.clone(),
                    None => return Response::Failed(Status::Forbidden),
                }
            }
        };

        match self.files.delete(&name) {
            Ok(()) => {
                index.remove(&name);
                tracing::info!("deleted {}", name);
                Response::Done
            }
            Err(FilesError::NotFound(_)) => Response::Failed(Status::Forbidden),
            Err(e) => {
                tracing::error!("DELETE {} failed: {}", name, e);
                Response::Failed(Status::Forbidden)
            }
        }
    }

    /// Checks the admin token and, if it matches, flushes the index and ends the session.
    pub fn terminate(&self, token: &str) -> Outcome {
        if let Err(e) = auth::validate_admin_token(token, self.admin_token.as_deref()) {
            match e {
                AuthError::Disabled => tracing::warn!("termination request refused: {}", e),
                AuthError::Invalid => tracing::warn!("termination request with invalid token"),
            }
            return Outcome::fail(Status::Forbidden);
        }

        tracing::info!("termination requested, flushing index");
        let response = match self.flush_index() {
            Ok(()) => Response::Done,
            Err(e) => {
                tracing::error!("index flush during termination failed: {}", e);
                Response::Failed(Status::Forbidden)
            }
        };

        Outcome {
            response,
            next: SessionState::Terminate,
        }
    }

    /// Writes the current index to its backing file.
    ///
    /// # Errors
    ///
    /// Returns a `CoreError` if serialisation or the write fails.
    pub fn flush_index(&self) -> CoreResult<()> {
        let _flushing = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Requests only wait for the clone, not for the disk write.
        let snapshot = self.lock_index().clone();
        self.index_store.flush(&snapshot)
    }

    /// Number of entries currently in the index.
    pub fn index_len(&self) -> usize {
        self.lock_index().len()
    }

    /// Id recorded for `name`, if any.
    pub fn id_of(&self, name: &FileName) -> Option<FileId> {
        self.lock_index().lookup_by_name(name)
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    fn name_for_id(&self, value: &str) -> Option<FileName> {
        let id = FileId::parse(value)?;
        self.lock_index().lookup_by_id(id).cloned()
    }

    fn lock_index(&self) -> MutexGuard<'_, IdIndex> {
        // A panic mid-operation leaves at worst one entry stale; keep serving.
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Smallest `newFile<N>.dat`, N ≥ 1, that is neither an index key nor a file on disk.
///
/// A file can exist without an index entry when the process died before the index was
/// flushed; such names are skipped instead of failing every later anonymous PUT.
fn next_generated_name(index: &IdIndex, files: &FileStore) -> Option<FileName> {
    (1..=u32::MAX)
        .map(FileName::generated)
        .find(|candidate| !index.contains_name(candidate) && !files.exists(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(root: &Path) -> CoreConfig {
        CoreConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            root.join("data"),
            root.join("id-index").join("index.bin"),
        )
    }

    fn service(temp: &TempDir) -> FileService {
        FileService::open(&config(temp.path())).unwrap()
    }

    fn by_name(s: &str) -> Locator {
        Locator::ByName(s.into())
    }

    fn by_id(id: FileId) -> Locator {
        Locator::ById(id.to_string())
    }

    fn created(response: Response) -> FileId {
        match response {
            Response::Created(id) => id,
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn test_open_creates_storage_dir() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        assert!(svc.files().storage_dir().is_dir());
        assert_eq!(svc.index_len(), 0);
    }

    #[test]
    fn test_put_then_get_by_name() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        let id = created(svc.put("a.txt", b"hello"));

        assert_eq!(id, FileId::from_name("a.txt"));
        assert_eq!(svc.get(&by_name("a.txt")), Response::Content(b"hello".to_vec()));
        assert_eq!(svc.get(&by_id(id)), Response::Content(b"hello".to_vec()));
    }

    #[test]
    fn test_put_is_create_only() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        svc.put("a.txt", b"first");

        assert_eq!(svc.put("a.txt", b"second"), Response::Failed(Status::Forbidden));
        assert_eq!(svc.get(&by_name("a.txt")), Response::Content(b"first".to_vec()));
        assert_eq!(svc.index_len(), 1);
    }

    #[test]
    fn test_put_refuses_file_present_only_on_disk() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        fs::write(svc.files().storage_dir().join("stray.bin"), b"x").unwrap();

        assert_eq!(svc.put("stray.bin", b"y"), Response::Failed(Status::Forbidden));
        assert_eq!(svc.index_len(), 0);
    }

    #[test]
    fn test_put_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        for bad in ["../escape", "..", "a/b", "a\\b"] {
            assert_eq!(svc.put(bad, b"x"), Response::Failed(Status::Forbidden));
        }
        assert!(!temp.path().join("escape").exists());
        assert_eq!(svc.index_len(), 0);
    }

    #[test]
    fn test_put_generates_names() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        let first = created(svc.put("", b"one"));
        let second = created(svc.put("", b"two"));

        assert_eq!(first, FileId::from_name("newFile1.dat"));
        assert_eq!(second, FileId::from_name("newFile2.dat"));
        assert_eq!(svc.get(&by_name("newFile2.dat")), Response::Content(b"two".to_vec()));
    }

    #[test]
    fn test_generated_names_reuse_gaps() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        svc.put("", b"one");
        svc.put("", b"two");

        assert_eq!(svc.delete(&by_name("newFile1.dat")), Response::Done);
        let id = created(svc.put("", b"three"));

        assert_eq!(id, FileId::from_name("newFile1.dat"));
    }

    #[test]
    fn test_get_unknown() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        assert_eq!(svc.get(&by_name("missing")), Response::Failed(Status::NotFound));
        assert_eq!(
            svc.get(&Locator::ById("999999".into())),
            Response::Failed(Status::NotFound)
        );
        assert_eq!(
            svc.get(&Locator::ById("not-a-number".into())),
            Response::Failed(Status::NotFound)
        );
        assert_eq!(
            svc.get(&Locator::ById("-5".into())),
            Response::Failed(Status::NotFound)
        );
        assert_eq!(svc.get(&by_name("../etc")), Response::Failed(Status::NotFound));
    }

    #[test]
    fn test_get_by_id_when_file_vanished() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        let id = created(svc.put("a.txt", b"abc"));
        fs::remove_file(svc.files().storage_dir().join("a.txt")).unwrap();

        assert_eq!(svc.get(&by_id(id)), Response::Failed(Status::NotFound));
    }

    #[test]
    fn test_delete_by_name_removes_addressability() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        let id = created(svc.put("a.txt", b"abc"));

        assert_eq!(svc.delete(&by_name("a.txt")), Response::Done);
        assert_eq!(svc.get(&by_name("a.txt")), Response::Failed(Status::NotFound));
        assert_eq!(svc.get(&by_id(id)), Response::Failed(Status::NotFound));
        assert_eq!(svc.index_len(), 0);
    }

    #[test]
    fn test_delete_by_id() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        let id = created(svc.put("a.txt", b"abc"));

        assert_eq!(svc.delete(&by_id(id)), Response::Done);
        assert!(!svc.files().exists(&FileName::parse("a.txt").unwrap()));
        assert_eq!(svc.index_len(), 0);
    }

    #[test]
    fn test_delete_unknown_is_forbidden() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        assert_eq!(svc.delete(&by_name("missing")), Response::Failed(Status::Forbidden));
        assert_eq!(
            svc.delete(&Locator::ById("123".into())),
            Response::Failed(Status::Forbidden)
        );
        assert_eq!(
            svc.delete(&Locator::ById("abc".into())),
            Response::Failed(Status::Forbidden)
        );
        assert_eq!(svc.delete(&by_name("..")), Response::Failed(Status::Forbidden));
    }

    #[test]
    fn test_reput_after_delete_keeps_id() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        let before = created(svc.put("a.txt", b"one"));
        svc.delete(&by_name("a.txt"));

        let after = created(svc.put("a.txt", b"two"));

        assert_eq!(before, after);
    }

    #[test]
    fn test_id_collision_is_refused() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        // "Aa" and "BB" share a base-31 hash: 65*31+97 == 66*31+66.
        assert_eq!(FileId::from_name("Aa"), FileId::from_name("BB"));

        created(svc.put("Aa", b"first"));
        let second = svc.put("BB", b"second");

        assert_eq!(second, Response::Failed(Status::Forbidden));
        assert!(!svc.files().exists(&FileName::parse("BB").unwrap()));
        assert_eq!(svc.index_len(), 1);
    }

    #[test]
    fn test_invalid_command_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        let outcome = svc.handle(Command::Invalid("unknown verb \"FROB\"".into()));

        assert_eq!(outcome.response, Response::Failed(Status::BadRequest));
        assert_eq!(outcome.next, SessionState::AwaitCommand);
        assert_eq!(svc.index_len(), 0);
        assert_eq!(fs::read_dir(svc.files().storage_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_terminate_disabled_without_token() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        let outcome = svc.terminate("");

        assert_eq!(outcome.response, Response::Failed(Status::Forbidden));
        assert_eq!(outcome.next, SessionState::AwaitCommand);
    }

    #[test]
    fn test_terminate_with_wrong_token() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path()).with_admin_token(Some("s3cret".into()));
        let svc = FileService::open(&cfg).unwrap();

        let outcome = svc.terminate("guess");

        assert_eq!(outcome.response, Response::Failed(Status::Forbidden));
        assert_eq!(outcome.next, SessionState::AwaitCommand);
        assert!(!cfg.index_path().exists());
    }

    #[test]
    fn test_terminate_flushes_index() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path()).with_admin_token(Some("s3cret".into()));
        let svc = FileService::open(&cfg).unwrap();
        let id = created(svc.put("a.txt", b"abc"));

        let outcome = svc.handle(Command::Terminate {
            token: "s3cret".into(),
        });

        assert_eq!(outcome.response, Response::Done);
        assert_eq!(outcome.next, SessionState::Terminate);

        let reopened = FileService::open(&cfg).unwrap();
        assert_eq!(reopened.id_of(&FileName::parse("a.txt").unwrap()), Some(id));
        assert_eq!(reopened.get(&by_id(id)), Response::Content(b"abc".to_vec()));
    }

    #[test]
    fn test_unflushed_changes_are_lost() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let svc = FileService::open(&cfg).unwrap();
        svc.put("a.txt", b"abc");
        drop(svc);

        let reopened = FileService::open(&cfg).unwrap();

        assert_eq!(reopened.index_len(), 0);
        // Bytes survive, so GET by name still works; BY_ID does not.
        assert_eq!(reopened.get(&by_name("a.txt")), Response::Content(b"abc".to_vec()));
        assert_eq!(
            reopened.get(&by_id(FileId::from_name("a.txt"))),
            Response::Failed(Status::NotFound)
        );
    }

    #[test]
    fn test_open_fails_on_corrupt_index() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        fs::create_dir_all(cfg.index_path().parent().unwrap()).unwrap();
        fs::write(cfg.index_path(), b"garbage").unwrap();

        let result = FileService::open(&cfg);

        assert!(matches!(result, Err(CoreError::IndexDecode(_))));
    }

    #[test]
    fn test_concurrent_puts() {
        let temp = TempDir::new().unwrap();
        let svc = Arc::new(service(&temp));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || created(svc.put(&format!("file-{i}.txt"), b"x")))
            })
            .collect();
        let mut ids: Vec<FileId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 8);
        assert_eq!(svc.index_len(), 8);
    }

    #[test]
    fn test_concurrent_anonymous_puts_get_distinct_names() {
        let temp = TempDir::new().unwrap();
        let svc = Arc::new(service(&temp));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || created(svc.put("", b"x")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for n in 1..=4 {
            assert!(svc.id_of(&FileName::generated(n)).is_some());
        }
    }

    #[test]
    fn test_generated_names_skip_unindexed_files() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);
        fs::write(svc.files().storage_dir().join("newFile1.dat"), b"orphan").unwrap();

        let id = created(svc.put("", b"fresh"));

        assert_eq!(id, FileId::from_name("newFile2.dat"));
        assert_eq!(svc.get(&by_name("newFile2.dat")), Response::Content(b"fresh".to_vec()));
        let orphan = fs::read(svc.files().storage_dir().join("newFile1.dat")).unwrap();
        assert_eq!(orphan, b"orphan");
    }

    #[test]
    fn test_concurrent_flushes_all_succeed() {
        let temp = TempDir::new().unwrap();
        let svc = Arc::new(service(&temp));
        for i in 0..200 {
            created(svc.put(&format!("entry-{i}.txt"), b"x"));
        }

        for _ in 0..50 {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let svc = Arc::clone(&svc);
                    std::thread::spawn(move || svc.flush_index())
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        }

        let cfg = config(temp.path());
        let reopened = FileService::open(&cfg).unwrap();
        assert_eq!(reopened.index_len(), 200);
    }
}
