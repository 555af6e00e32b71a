use blindvote::{CandidateList, CastVote, Error, SignerKeys, Store};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const ROSTER_FILE: &str = "roster.txt";
const VOTED_FILE: &str = "voted.json";
const VOTES_FILE: &str = "votes.json";
const KEYS_FILE: &str = "keys.json";
const CANDIDATES_FILE: &str = "candidates.json";
const LOCK_FILE: &str = ".blindvote.lock";

/// Election state kept as plain files in a data directory.
///
/// The roster is one voter id per line; everything else is JSON. Every write
/// replaces the whole file through a temp file and a rename, so a reader never
/// sees a half-written file. Appends rewrite the whole list, which suits
/// elections of classroom size rather than large ones.
///
/// A writable store holds an exclusive lock file in the directory for as long
/// as it is open, so at most one process appends at a time. Read-only stores
/// take no lock and refuse writes.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    dir_lock: Option<DirLock>,
}

/// Exclusive claim on a data directory, released on drop.
///
/// A process that dies while holding it leaves the lock file behind; it has
/// to be removed by hand.
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(DirLock { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::Storage(format!(
                "{} is in use by another process (remove {} if it is stale)",
                dir.display(),
                path.display()
            ))),
            Err(e) => Err(storage_error(&path, e)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("unable to release {}: {}", self.path.display(), e);
        }
    }
}

fn storage_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{}: {}", path.display(), e))
}

// Rosters exported from spreadsheets are often UTF-16 with a byte-order mark
fn decode_text(bytes: &[u8]) -> String {
    let utf16 = |bytes: &[u8], le: bool| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| {
                if le {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16_lossy(&units)
    };
    match bytes {
        [0xff, 0xfe, rest @ ..] => utf16(rest, true),
        [0xfe, 0xff, rest @ ..] => utf16(rest, false),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

impl FileStore {
    /// Open `dir` for writing, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        let dir_lock = DirLock::acquire(&dir)?;
        debug!("using data directory {}", dir.display());
        Ok(FileStore {
            dir,
            write_lock: Mutex::new(()),
            dir_lock: Some(dir_lock),
        })
    }

    /// Open `dir` for queries only. Missing files read as empty.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Self {
        FileStore {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            dir_lock: None,
        }
    }

    fn check_writable(&self, name: &str) -> Result<(), Error> {
        match self.dir_lock {
            Some(_) => Ok(()),
            None => Err(storage_error(&self.dir.join(name), "store is read-only")),
        }
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Error> {
        match self.read(name)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| storage_error(&self.dir.join(name), e)),
            None => Ok(None),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        self.check_writable(name)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| storage_error(&path, e))
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| storage_error(&self.dir.join(name), e))?;
        self.write_atomic(name, &bytes)
    }

    // Read-modify-write of a JSON list, serialized against other writers
    fn append_json<T: Serialize + DeserializeOwned>(&self, name: &str, item: T) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items: Vec<T> = self.read_json(name)?.unwrap_or_default();
        items.push(item);
        self.write_json(name, &items)
    }

    pub fn save_roster<S: AsRef<str>>(&self, roster: &[S]) -> Result<(), Error> {
        let mut text = String::new();
        for voter_id in roster {
            text.push_str(voter_id.as_ref());
            text.push('\n');
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_atomic(ROSTER_FILE, text.as_bytes())
    }

    /// The candidate list saved with the election, or an empty list
    pub fn load_candidates(&self) -> Result<CandidateList, Error> {
        Ok(self.read_json(CANDIDATES_FILE)?.unwrap_or_default())
    }

    pub fn save_candidates(&self, candidates: &CandidateList) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_json(CANDIDATES_FILE, candidates)
    }
}

impl Store for FileStore {
    fn load_roster(&self) -> Result<Vec<String>, Error> {
        let text = match self.read(ROSTER_FILE)? {
            Some(bytes) => decode_text(&bytes),
            None => return Ok(Vec::new()),
        };
        Ok(text.lines().map(str::to_owned).collect())
    }

    fn load_voted(&self) -> Result<Vec<String>, Error> {
        Ok(self.read_json(VOTED_FILE)?.unwrap_or_default())
    }

    fn append_voted(&self, voter_id: &str) -> Result<(), Error> {
        self.append_json(VOTED_FILE, voter_id.to_owned())
    }

    fn load_cast_votes(&self) -> Result<Vec<CastVote>, Error> {
        Ok(self.read_json(VOTES_FILE)?.unwrap_or_default())
    }

    fn append_cast_vote(&self, vote: &CastVote) -> Result<(), Error> {
        self.append_json(VOTES_FILE, vote.clone())
    }

    fn load_keys(&self) -> Result<Option<SignerKeys>, Error> {
        self.read_json(KEYS_FILE)
    }

    fn save_keys(&self, keys: &SignerKeys) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_json(KEYS_FILE, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blindvote::{Config, EligibilityLedger, KeyManager};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();
        assert!(store.load_roster().unwrap().is_empty());
        assert!(store.load_voted().unwrap().is_empty());
        assert!(store.load_cast_votes().unwrap().is_empty());
        assert!(store.load_keys().unwrap().is_none());
        assert!(store.load_candidates().unwrap().is_empty());
    }

    #[test]
    fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save_roster(&["alice", "bob"]).unwrap();
        store.append_voted("alice").unwrap();
        store.append_voted("bob").unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_roster().unwrap(), vec!["alice", "bob"]);
        assert_eq!(reopened.load_voted().unwrap(), vec!["alice", "bob"]);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let first = KeyManager::load_or_generate(&store, &Config::default(), &mut rng).unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        let second = KeyManager::load_or_generate(&reopened, &Config::default(), &mut rng).unwrap();
        assert_eq!(first.public_params(), second.public_params());
    }

    #[test]
    fn utf16_roster() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0xff, 0xfe];
        for unit in "student1\r\nstudent2\r\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(dir.path().join(ROSTER_FILE), bytes).unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let ledger = EligibilityLedger::load(&store).unwrap();
        assert_eq!(ledger.total_eligible(), 2);
        assert!(ledger.is_eligible("student1"));
        assert!(ledger.is_eligible("student2"));
    }

    #[test]
    fn corrupt_json_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VOTES_FILE), b"{ not json").unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.load_cast_votes(), Err(Error::Storage(_))));
    }

    #[test]
    fn one_writer_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.append_voted("alice").unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(Error::Storage(_))));

        // Readers need no lock, but cannot write
        let reader = FileStore::open_read_only(dir.path());
        assert_eq!(reader.load_voted().unwrap(), vec!["alice"]);
        assert!(matches!(reader.append_voted("bob"), Err(Error::Storage(_))));
        assert_eq!(store.load_voted().unwrap(), vec!["alice"]);

        drop(store);
        assert!(!dir.path().join(LOCK_FILE).exists());
        let store = FileStore::open(dir.path()).unwrap();
        store.append_voted("bob").unwrap();
        assert_eq!(store.load_voted().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn read_only_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileStore::open_read_only(dir.path().join("absent"));
        assert!(reader.load_roster().unwrap().is_empty());
        assert!(reader.load_cast_votes().unwrap().is_empty());
        assert!(!dir.path().join("absent").exists());
    }
}
