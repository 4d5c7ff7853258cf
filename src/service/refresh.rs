//! The refresh cycle: rescan the directory and bring the table, the byte
//! budget and the replacement index back in line with it.

use std::io;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::name::Method;
use crate::record::{Access, FileRecord, WriteSet};
use crate::replace::index;
use crate::scan::{self, ScanEntry};

use super::Service;

/// What the planning pass decided for one scanned candidate.
enum Plan {
    /// Read and admit.
    Admit(ScanEntry),
    /// Budget exceeded without a replacement engine: the existing record
    /// keeps its previous generation.
    KeepOld(String),
    /// Budget exceeded under replacement: the existing record is evicted.
    Evict(String),
}

impl Service {
    /// One full refresh: scan, plan admissions against the ceiling in
    /// priority order, evict, admit, prune unseen records, persist the
    /// replacement index. Only the scan itself can fail.
    pub(crate) async fn refresh(&mut self, notify_changes: bool) -> io::Result<()> {
        let entries = scan::scan(
            &self.config.directory,
            &self.allowlist,
            index::RESERVED_PREFIX,
        )
        .await?;

        self.toggle = !self.toggle;
        let current = self.toggle;
        let plans = self.plan(entries);

        for plan in &plans {
            if let Plan::Evict(file) = plan {
                debug!(file, "evicting for the byte ceiling");
                self.remove_or_empty(file, current).await;
            }
        }
        for plan in plans {
            match plan {
                Plan::Evict(_) => {}
                Plan::KeepOld(file) => {
                    if let Some(record) = self.table.get_mut(&file) {
                        record.toggle = current;
                    }
                }
                Plan::Admit(entry) => self.admit(entry, current, notify_changes).await,
            }
        }
        self.prune_unseen(current).await;

        if self.config.replace_index {
            if let Some(replacer) = &self.replacer {
                if let Err(e) =
                    index::store(&self.config.directory, self.process_index, &replacer.snapshot())
                        .await
                {
                    warn!(error = %e, "cannot persist replacement index");
                }
            }
        }
        info!(
            files = self.table.len(),
            bytes = self.budget.usage(),
            "refresh complete"
        );
        Ok(())
    }

    /// Orders candidates (priority descending, estimated size ascending
    /// under a replacement engine) and simulates admission against the
    /// ceiling. Under replacement the first candidate that does not fit
    /// closes admission for everything after it.
    fn plan(&self, entries: Vec<ScanEntry>) -> Vec<Plan> {
        let mut candidates: Vec<(u64, u64, ScanEntry)> = entries
            .into_iter()
            .map(|entry| {
                let estimate = scan::segment_len(entry.file_size, entry.segment);
                let priority = self
                    .replacer
                    .as_ref()
                    .map(|r| r.priority(&entry.name))
                    .unwrap_or(0);
                (priority, estimate, entry)
            })
            .collect();
        if self.replacer.is_some() {
            candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        }

        let ceiling = self.budget.ceiling();
        let mut planned: u64 = 0;
        let mut closed = false;
        let mut plans = Vec::with_capacity(candidates.len());
        for (_, estimate, entry) in candidates {
            let fits = !closed && ceiling.map_or(true, |c| planned + estimate <= c);
            if fits {
                planned += estimate;
                plans.push(Plan::Admit(entry));
                continue;
            }
            if !closed {
                warn!(
                    file = %entry.name,
                    bytes = estimate,
                    "skipping file: byte ceiling would be exceeded"
                );
            }
            let exists = self.table.contains(&entry.name);
            if self.replacer.is_some() {
                closed = true;
                if exists {
                    plans.push(Plan::Evict(entry.name));
                }
            } else if exists {
                planned += self.table.get(&entry.name).map(|r| r.size).unwrap_or(0);
                plans.push(Plan::KeepOld(entry.name));
            }
        }
        plans
    }

    /// Brings one admitted candidate into the table. The segment is read
    /// unconditionally so content drift hiding under an unchanged mtime
    /// is still detected (the generation counter disambiguates it).
    async fn admit(&mut self, entry: ScanEntry, current: bool, notify_changes: bool) {
        let exists = self.table.contains(&entry.name);
        if exists {
            let record = self.table.get_mut(&entry.name).expect("record present");
            record.toggle = current;
            record.access = entry.access;
            record.segment = entry.segment;
            self.reconcile_write_caps(&entry.name, entry.access).await;
        }

        let contents = match scan::read_segment(&entry.path, entry.segment).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(file = %entry.name, error = %e, "cannot read file");
                if exists && self.declared_writes(&entry.name).is_empty() {
                    self.remove_or_empty(&entry.name, current).await;
                }
                return;
            }
        };

        if exists {
            let unchanged = self
                .table
                .get(&entry.name)
                .map(|r| {
                    r.mtime_i.mtime == entry.mtime && r.contents.as_ref() == contents.as_slice()
                })
                .unwrap_or(false);
            if unchanged {
                return;
            }
        }

        let old = self.table.get(&entry.name).map(|r| r.size).unwrap_or(0);
        if let Err(e) = self.budget.check(old, contents.len() as u64) {
            warn!(
                file = %entry.name,
                attempted = e.attempted,
                ceiling = e.ceiling,
                "skipping file: byte ceiling would be exceeded"
            );
            return;
        }
        self.budget.commit(old, contents.len() as u64);

        if exists {
            let record = self.table.get_mut(&entry.name).expect("record present");
            record.replace_contents(contents, entry.mtime);
            let entries = record.notify.clone();
            let body = record.contents.clone();
            debug!(file = %entry.name, bytes = body.len(), "file updated");
            if notify_changes && !entries.is_empty() {
                crate::notify::send_all(self.dispatch.as_mut(), &entries, &body).await;
            }
        } else {
            let decorations = self.decorations_for(&entry.name);
            let mut record =
                FileRecord::new(entry.path, contents, entry.mtime, entry.access);
            record.toggle = current;
            record.segment = entry.segment;
            record.write = if entry.access.writable() {
                decorations.write
            } else {
                WriteSet::default()
            };
            record.notify = decorations.notify;
            record.redirect = decorations.redirect;
            record.headers = self.file_headers(&entry.name);
            if let Some(replacer) = self.replacer.as_mut() {
                replacer.admit(&entry.name);
            }
            let entries = record.notify.clone();
            let body = record.contents.clone();
            debug!(file = %entry.name, bytes = body.len(), "file added");
            self.table
                .insert(entry.name, record, self.dispatch.as_mut())
                .await;
            if notify_changes && !entries.is_empty() {
                crate::notify::send_all(self.dispatch.as_mut(), &entries, &body).await;
            }
        }
    }

    /// Lines a record's write capabilities up with the configured
    /// patterns and the access mode observed on disk. A capability that
    /// appears subscribes its write suffix; one that vanishes (a file
    /// turned read-only, say) unsubscribes it.
    async fn reconcile_write_caps(&mut self, file: &str, access: Access) {
        let declared = self.declared_writes(file);
        let desired = if access.writable() {
            declared
        } else {
            WriteSet::default()
        };
        let Some(current) = self.table.get(file).map(|r| r.write) else {
            return;
        };
        for (method, held, wanted) in [
            (Method::Put, current.truncate, desired.truncate),
            (Method::Post, current.append, desired.append),
        ] {
            if wanted && !held {
                debug!(file, method = method.tag(), "granting write capability");
                self.table
                    .grant_write(file, method, self.dispatch.as_mut())
                    .await;
            } else if held && !wanted {
                debug!(file, method = method.tag(), "revoking write capability");
                self.table
                    .revoke_write(file, method, self.dispatch.as_mut())
                    .await;
            }
        }
    }

    /// Removes records the latest scan did not touch. Records with
    /// declared writes survive as empty files.
    async fn prune_unseen(&mut self, current: bool) {
        let stale: Vec<String> = self
            .table
            .files()
            .filter(|(_, record)| record.toggle != current)
            .map(|(file, _)| file.clone())
            .collect();
        for file in stale {
            debug!(file = %file, "file no longer present");
            self.remove_or_empty(&file, current).await;
        }
    }

    /// The removal path: drops the record, its subscriptions, its bytes
    /// and its replacement entry. Records whose name is declared in a
    /// write pattern instead persist with empty contents.
    async fn remove_or_empty(&mut self, file: &str, current: bool) {
        if !self.table.contains(file) {
            return;
        }
        if self.declared_writes(file).is_empty() {
            if let Some(record) = self.table.remove(file, self.dispatch.as_mut()).await {
                self.budget.release(record.size);
                if let Some(replacer) = self.replacer.as_mut() {
                    replacer.remove(file);
                }
            }
            return;
        }
        let record = self.table.get_mut(file).expect("record present");
        record.toggle = current;
        if record.size > 0 {
            let old = record.size;
            record.replace_contents(Vec::new(), SystemTime::now());
            self.budget.commit(old, 0);
        }
    }
}
