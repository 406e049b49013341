use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::constants::store::DEFAULT_STORE_PATH;
use crate::data::{Grid, InputMode, RowRange, TextGrid};
use crate::errors::StoreError;
use crate::store::TabularStore;
use crate::store::grid::GridState;
use crate::types::FieldName;

/// Store partition persisted as a JSON document on the local filesystem.
///
/// Each call loads the document, applies one change, and atomically replaces
/// the file, so a failed call leaves the previous contents intact.
pub struct FileGridStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl fmt::Debug for FileGridStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileGridStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileGridStore {
    /// Open (or lazily create) a store at `path`.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        ensure_parent_dir(&path).map_err(|err| map_io_err(&path, err))?;
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    /// Default store path in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_STORE_PATH)
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; a missing file is an empty store.
    pub fn load(&self) -> Result<GridState, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                StoreError::new(format!(
                    "failed to decode store file {}: {err}",
                    self.path.display()
                ))
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(GridState::default()),
            Err(err) => Err(map_io_err(&self.path, err)),
        }
    }

    fn save(&self, state: &GridState) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(state)
            .map_err(|err| StoreError::new(format!("failed to encode store state: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).map_err(|err| map_io_err(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| map_io_err(&self.path, err))
    }

    fn read_with<T>(&self, read: impl FnOnce(&GridState) -> T) -> Result<T, StoreError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| StoreError::new("file store guard poisoned"))?;
        Ok(read(&self.load()?))
    }

    fn update(&self, apply: impl FnOnce(&mut GridState)) -> Result<(), StoreError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| StoreError::new("file store guard poisoned"))?;
        let mut state = self.load()?;
        apply(&mut state);
        self.save(&state)
    }
}

impl TabularStore for FileGridStore {
    fn read_snapshot(&self) -> Result<TextGrid, StoreError> {
        self.read_with(GridState::snapshot)
    }

    fn replace_all(&self, grid: &Grid) -> Result<(), StoreError> {
        self.update(|state| state.replace_all(grid))
    }

    fn delete_row_range(&self, range: RowRange) -> Result<(), StoreError> {
        self.update(|state| {
            state.delete_rows(range);
        })
    }

    fn append_columns(&self, names: &[FieldName], after_index: usize) -> Result<(), StoreError> {
        self.update(|state| state.append_columns(names, after_index))
    }

    fn append_rows(&self, grid: &Grid, mode: InputMode) -> Result<(), StoreError> {
        self.update(|state| state.append_rows(grid, mode))
    }

    fn grow_capacity(&self, extra_rows: usize) -> Result<(), StoreError> {
        self.update(|state| state.grow(extra_rows))
    }

    fn available_row_count(&self) -> Result<usize, StoreError> {
        self.read_with(|state| state.row_capacity)
    }

    fn format_as_date(&self, columns: &[usize]) -> Result<(), StoreError> {
        self.update(|state| state.format_as_date(columns))
    }

    fn write_single_cell(&self, text: &str) -> Result<(), StoreError> {
        self.update(|state| state.write_message(text))
    }
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn map_io_err(path: &Path, err: io::Error) -> StoreError {
    let message = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::TimedOut => StoreError::new(format!("ETIMEDOUT {message}")),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
            StoreError::new(format!("UNAVAILABLE {message}"))
        }
        _ => StoreError::new(message),
    }
}
