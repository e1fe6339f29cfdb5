use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("не удалось создать каталог хранилища {path}: {source}")]
    CreateDir { path: String, source: io::Error },
    #[error("недопустимый ключ хранилища '{0}'")]
    InvalidKey(String),
    #[error("ошибка ввода-вывода для ключа '{key}': {source}")]
    Io { key: String, source: io::Error },
    #[error("не удалось сериализовать значение ключа '{key}': {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("не удалось разобрать значение ключа '{key}': {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

/// Directory of named slots, one file per key.
///
/// A write lands in a temporary file that is renamed over the slot, so a
/// concurrent reader in another process sees either the old or the new value.
#[derive(Debug, Clone)]
pub struct KvStore {
    root: PathBuf,
}

impl KvStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::CreateDir {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.slot_path(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.slot_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.slot_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(key, &bytes)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.get_raw(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: f64,
    }

    #[test]
    fn json_round_trip_through_a_second_handle() {
        let dir = TempDir::new().unwrap();
        let writer = KvStore::open(dir.path()).unwrap();
        let reader = KvStore::open(dir.path()).unwrap();

        let sample = Sample {
            name: "cpu".to_string(),
            value: 12.5,
        };
        writer.put_json("sample", &sample).unwrap();

        let loaded: Option<Sample> = reader.get_json("sample").unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put_json("k", &1_u32).unwrap();
        store.put_json("k", &2_u32).unwrap();
        assert_eq!(store.get_json::<u32>("k").unwrap(), Some(2));
    }

    #[test]
    fn missing_and_removed_keys_read_as_none() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.get_raw("absent").unwrap(), None);

        store.put_raw("present", b"1").unwrap();
        store.remove("present").unwrap();
        store.remove("present").unwrap();
        assert_eq!(store.get_raw("present").unwrap(), None);
    }

    #[test]
    fn torn_value_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put_raw("broken", b"{\"name\": \"cp").unwrap();
        let err = store.get_json::<Sample>("broken").unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn rejects_keys_that_escape_the_root() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.put_raw("../evil", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get_raw(""), Err(StoreError::InvalidKey(_))));
    }
}
