use std::{
    fmt::Display,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

///Per-transaction item limit assumed of the backing document store. Bulk
///operations must chunk at or below this.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Debug)]
pub enum StoreError {
    NoHomeDirError(),
    IoError(PathBuf, std::io::Error),
    SerdeError(PathBuf, serde_json::Error),
    NotFound(String),
    BatchTooLarge(usize),
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHomeDirError() => f.write_str("Unable to find user home directory"),
            Self::IoError(path, err) => f.write_fmt(format_args!(
                "IoError: {err}, path: {}",
                path.to_str().unwrap_or("unknown")
            )),
            Self::SerdeError(path, err) => f.write_fmt(format_args!(
                "SerdeError: {err}, path: {}",
                path.to_str().unwrap_or("unknown")
            )),
            Self::NotFound(path) => f.write_fmt(format_args!("NotFound: no document at {path}")),
            Self::BatchTooLarge(count) => f.write_fmt(format_args!(
                "BatchTooLarge: {count} operations exceeds the {MAX_BATCH_OPS} per-commit limit"
            )),
            Self::Backend(reason) => f.write_fmt(format_args!("Backend: {reason}")),
        }
    }
}

///Course/tenant selector. Every collection path is scoped by it; switching
///scope must reload questions and history, never mix them.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Scope(String);

pub const DEFAULT_SCOPE: &str = "med-study-app";

impl Scope {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self(app_id.into())
    }

    pub fn questions(&self) -> String {
        format!("artifacts/{}/public/data/questions", self.0)
    }

    pub fn history(&self, user: &str) -> String {
        format!("artifacts/{}/users/{user}/history", self.0)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE)
    }
}

///A document read back from a collection.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

///One operation within an atomic batch commit.
#[derive(Clone, Debug)]
pub enum BatchOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

///The generic document store this core persists through. Real deployments
///sit on a hosted backend; tests inject [`MemoryStore`]. Consistency across
///devices is the store's problem and is assumed last-write-wins.
pub trait DocumentStore {
    fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;
    ///Upsert, full replace.
    fn set_document(&mut self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;
    ///Shallow merge of `partial`'s fields into an existing document.
    fn update_fields(
        &mut self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<(), StoreError>;
    fn delete_document(&mut self, collection: &str, id: &str) -> Result<(), StoreError>;
    ///Commits all operations or none. Fails up front when the batch exceeds
    ///[`MAX_BATCH_OPS`].
    fn batch_commit(&mut self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
}

fn merge_fields(existing: &mut Value, partial: Value) {
    match (existing, partial) {
        (Value::Object(existing), Value::Object(partial)) => {
            for (key, value) in partial {
                existing.insert(key, value);
            }
        }
        (existing, partial) => *existing = partial,
    }
}

///Document store backed by one JSON file per document under a base
///directory, mirroring the collection path as subdirectories.
pub struct JsonFileStore {
    base: PathBuf,
}

const DEFAULT_HOME_STORE_PATH: &str = ".config/medqb/store";

impl JsonFileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn in_user_home() -> Result<Self, StoreError> {
        let path = dirs::home_dir().ok_or(StoreError::NoHomeDirError())?;
        Ok(Self::new(path.join(DEFAULT_HOME_STORE_PATH)))
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.base.join(collection)
    }

    fn document_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection).join(format!("{id}.json"))
    }

    fn read_document(&self, path: &PathBuf) -> Result<Value, StoreError> {
        let json = std::fs::read_to_string(path)
            .map_err(|err| StoreError::IoError(path.clone(), err))?;
        serde_json::from_str(&json).map_err(|err| StoreError::SerdeError(path.clone(), err))
    }

    fn write_document(&self, path: &PathBuf, data: &Value) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::IoError(path.clone(), err))?;
            }
        }
        std::fs::write(
            path,
            serde_json::to_string(data).map_err(|err| StoreError::SerdeError(path.clone(), err))?,
        )
        .map_err(|err| StoreError::IoError(path.clone(), err))
    }
}

impl DocumentStore for JsonFileStore {
    fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|err| StoreError::IoError(dir, err))?
            .filter_map(|entry| entry.ok())
            .collect::<Vec<_>>();

        let mut documents = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = entry.path();
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json {
                continue;
            }
            let id = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem.to_owned(),
                None => continue,
            };
            let data = self.read_document(&path)?;
            documents.push(Document { id, data });
        }
        //Directory iteration order is unspecified; keep listings stable.
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    fn set_document(&mut self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let path = self.document_path(collection, id);
        self.write_document(&path, &data)
    }

    fn update_fields(
        &mut self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<(), StoreError> {
        let path = self.document_path(collection, id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("{collection}/{id}")));
        }
        let mut existing = self.read_document(&path)?;
        merge_fields(&mut existing, partial);
        self.write_document(&path, &existing)
    }

    fn delete_document(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        let path = self.document_path(collection, id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|err| StoreError::IoError(path, err))?;
        }
        Ok(())
    }

    fn batch_commit(&mut self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::BatchTooLarge(ops.len()));
        }
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                } => self.set_document(&collection, &id, data)?,
                BatchOp::Delete { collection, id } => self.delete_document(&collection, &id)?,
            }
        }
        Ok(())
    }
}

///In-memory document store for tests and dependency injection.
#[derive(Default)]
pub struct MemoryStore {
    collections: HashMap<String, HashMap<String, Value>>,
    ///When set, every write fails. Lets tests exercise persistence-fault
    ///paths.
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            Err(StoreError::Backend("simulated backend failure".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl DocumentStore for MemoryStore {
    fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> = self
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    fn set_document(&mut self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check_writable()?;
        self.collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), data);
        Ok(())
    }

    fn update_fields(
        &mut self,
        collection: &str,
        id: &str,
        partial: Value,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let existing = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
        merge_fields(existing, partial);
        Ok(())
    }

    fn delete_document(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        if let Some(docs) = self.collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    fn batch_commit(&mut self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::BatchTooLarge(ops.len()));
        }
        self.check_writable()?;
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                } => self.set_document(&collection, &id, data)?,
                BatchOp::Delete { collection, id } => self.delete_document(&collection, &id)?,
            }
        }
        Ok(())
    }
}

///Cooperative cancellation for bulk operations. Aborting stops further
///chunks from being issued; committed chunks are not rolled back.
#[derive(Default)]
pub struct AbortFlag(AtomicBool);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

///The last selected scope, remembered across runs. This is an external
///preference, not core state; losing it only costs the user a flag.
#[derive(Serialize, Deserialize)]
pub struct ScopePreference {
    pub app_id: String,
}

const DEFAULT_HOME_SCOPE_PATH: &str = ".config/medqb/scope.json";

impl ScopePreference {
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Option<Scope>, StoreError> {
        let path = path.into();
        if !path.is_file() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|err| StoreError::IoError(path.clone(), err))?;
        let pref: ScopePreference =
            serde_json::from_str(&json).map_err(|err| StoreError::SerdeError(path, err))?;
        Ok(Some(Scope::new(pref.app_id)))
    }

    pub fn load_from_user_home() -> Result<Option<Scope>, StoreError> {
        let path = dirs::home_dir().ok_or(StoreError::NoHomeDirError())?;
        Self::load_from_file(path.join(DEFAULT_HOME_SCOPE_PATH))
    }

    pub fn save_to_file(scope: &Scope, path: impl Into<PathBuf>) -> Result<(), StoreError> {
        let path: PathBuf = path.into();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::IoError(path.clone(), err))?;
            }
        }
        let pref = ScopePreference {
            app_id: scope.to_string(),
        };
        std::fs::write(
            &path,
            serde_json::to_string(&pref)
                .map_err(|err| StoreError::SerdeError(path.clone(), err))?,
        )
        .map_err(|err| StoreError::IoError(path.clone(), err))
    }

    pub fn save_to_user_home(scope: &Scope) -> Result<(), StoreError> {
        let path = dirs::home_dir().ok_or(StoreError::NoHomeDirError())?;
        Self::save_to_file(scope, path.join(DEFAULT_HOME_SCOPE_PATH))
    }
}
