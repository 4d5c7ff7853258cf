//! The file table: logical filenames, their records, and the endpoint
//! names subscribed for them.
//!
//! Endpoint keys are stored relative to the service prefix, ordered, so
//! `allow` lists and pattern folds run as range scans. Every mutation that
//! adds or removes an endpoint is paired with the matching subscribe or
//! unsubscribe on the framework.

use std::collections::{BTreeMap, HashMap};

use crate::dispatch::Dispatch;
use crate::name::{self, Method};
use crate::record::FileRecord;

/// What an endpoint name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTarget {
    /// Logical filename owning this endpoint.
    pub file: String,
    /// Method routed by the trailing segment; `None` in bare-name mode.
    pub method: Option<Method>,
}

/// Logical filename -> record, plus endpoint -> target.
#[derive(Debug, Default)]
pub struct FileTable {
    files: HashMap<String, FileRecord>,
    endpoints: BTreeMap<String, EndpointTarget>,
    /// Whether endpoints carry `/get`-style method suffixes.
    use_suffix: bool,
}

impl FileTable {
    pub fn new(use_suffix: bool) -> Self {
        Self { files: HashMap::new(), endpoints: BTreeMap::new(), use_suffix }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, file: &str) -> Option<&FileRecord> {
        self.files.get(file)
    }

    pub fn get_mut(&mut self, file: &str) -> Option<&mut FileRecord> {
        self.files.get_mut(file)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    pub fn files(&self) -> impl Iterator<Item = (&String, &FileRecord)> {
        self.files.iter()
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = (&String, &mut FileRecord)> {
        self.files.iter_mut()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Resolves an incoming name (already stripped of the prefix).
    pub fn lookup_endpoint(&self, endpoint: &str) -> Option<&EndpointTarget> {
        self.endpoints.get(endpoint)
    }

    /// Endpoint names starting with `prefix`, in order.
    pub fn endpoints_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a EndpointTarget)> {
        self.endpoints
            .range(prefix.to_owned()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, t)| (k.as_str(), t))
    }

    /// The endpoint names a record answers to, derived from its name and
    /// write capabilities.
    fn endpoint_names(&self, file: &str, record: &FileRecord) -> Vec<(String, Option<Method>)> {
        let mut names = Vec::new();
        let mut aliases = vec![file.to_owned()];
        if let Some(alias) = name::index_alias(file) {
            aliases.push(alias);
        }
        for alias in &aliases {
            if !self.use_suffix {
                names.push((alias.clone(), None));
                continue;
            }
            for method in [Method::Options, Method::Head, Method::Get] {
                names.push((name::endpoint(alias, method), Some(method)));
            }
            if record.write.truncate {
                names.push((name::endpoint(alias, Method::Put), Some(Method::Put)));
            }
            if record.write.append {
                names.push((name::endpoint(alias, Method::Post), Some(Method::Post)));
            }
        }
        names
    }

    /// Stores a record and subscribes every endpoint it answers to.
    pub async fn insert(
        &mut self,
        file: String,
        record: FileRecord,
        dispatch: &mut dyn Dispatch,
    ) {
        for (endpoint, method) in self.endpoint_names(&file, &record) {
            let target = EndpointTarget { file: file.clone(), method };
            if self.endpoints.insert(endpoint.clone(), target).is_none() {
                dispatch.subscribe(&endpoint).await;
            }
        }
        self.files.insert(file, record);
    }

    /// Removes a record and unsubscribes its endpoints.
    pub async fn remove(
        &mut self,
        file: &str,
        dispatch: &mut dyn Dispatch,
    ) -> Option<FileRecord> {
        let record = self.files.remove(file)?;
        for (endpoint, _) in self.endpoint_names(file, &record) {
            if self.endpoints.remove(&endpoint).is_some() {
                dispatch.unsubscribe(&endpoint).await;
            }
        }
        Some(record)
    }

    /// Grants a write method to an existing record, subscribing the write
    /// suffix it did not previously answer to.
    pub async fn grant_write(
        &mut self,
        file: &str,
        method: Method,
        dispatch: &mut dyn Dispatch,
    ) {
        debug_assert!(matches!(method, Method::Put | Method::Post));
        let Some(record) = self.files.get_mut(file) else {
            return;
        };
        match method {
            Method::Put if !record.write.truncate => record.write.truncate = true,
            Method::Post if !record.write.append => record.write.append = true,
            _ => return,
        }
        let mut aliases = vec![file.to_owned()];
        if let Some(alias) = name::index_alias(file) {
            aliases.push(alias);
        }
        for alias in &aliases {
            let endpoint = name::endpoint(alias, method);
            let target = EndpointTarget { file: file.to_owned(), method: Some(method) };
            if self.endpoints.insert(endpoint.clone(), target).is_none() {
                dispatch.subscribe(&endpoint).await;
            }
        }
    }

    /// Drops a write method, unsubscribing its suffix.
    pub async fn revoke_write(
        &mut self,
        file: &str,
        method: Method,
        dispatch: &mut dyn Dispatch,
    ) {
        let Some(record) = self.files.get_mut(file) else {
            return;
        };
        match method {
            Method::Put if record.write.truncate => record.write.truncate = false,
            Method::Post if record.write.append => record.write.append = false,
            _ => return,
        }
        let mut aliases = vec![file.to_owned()];
        if let Some(alias) = name::index_alias(file) {
            aliases.push(alias);
        }
        for alias in &aliases {
            let endpoint = name::endpoint(alias, method);
            if self.endpoints.remove(&endpoint).is_some() {
                dispatch.unsubscribe(&endpoint).await;
            }
        }
    }
}
