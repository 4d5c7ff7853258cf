//! The service actor: owns the file table and processes one message at a
//! time (requests, refresh ticks, and append-timeout expirations).

pub mod messages;
mod refresh;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::append;
use crate::budget::SizeBudget;
use crate::config::Config;
use crate::dispatch::Dispatch;
use crate::error::{InitError, InitResult};
use crate::headers::Headers;
use crate::http::{self, Precondition, ProtocolConfig, RangeOutcome, Status};
use crate::mime;
use crate::name::{self, Method};
use crate::notify::{self, NotifyEntry};
use crate::record::{Access, FileRecord, PendingChunk, Segment, WriteSet};
use crate::replace::{index, Replacer};
use crate::table::FileTable;

use messages::{Request, Response, ServiceMessage, ServiceSender};

/// Pattern-derived attributes applied to a record when it enters the
/// table.
struct Decorations {
    write: WriteSet,
    notify: Vec<NotifyEntry>,
    redirect: Option<String>,
}

/// The filesystem content origin actor.
pub struct Service {
    config: Config,
    prefix: String,
    process_index: u32,
    proto: ProtocolConfig,
    allowlist: Vec<(String, Segment)>,
    dispatch: Box<dyn Dispatch>,
    table: FileTable,
    budget: SizeBudget,
    replacer: Option<Replacer>,
    toggle: bool,
    boundary_counter: u32,
    tx: ServiceSender,
    rx: mpsc::UnboundedReceiver<ServiceMessage>,
}

impl Service {
    /// Builds the service: validates the configuration, loads the
    /// replacement index, performs the initial scan, binds patterns, and
    /// fires start-up notifications. Every error here is fatal.
    pub async fn init(
        config: Config,
        prefix: impl Into<String>,
        process_index: u32,
        dispatch: Box<dyn Dispatch>,
    ) -> InitResult<Self> {
        config.validate()?;
        let prefix = prefix.into();
        let proto = ProtocolConfig {
            clock_skew_max: config.http_clock_skew_max,
            cache_seconds: config.cache_seconds(),
            use_expires: config.use_expires,
            accept_ranges: config.use_http_get_suffix,
        };
        let allowlist: Vec<(String, Segment)> = config
            .read
            .iter()
            .map(|t| (t.name().to_owned(), t.segment()))
            .collect();

        let mut replacer = Replacer::from_mode(config.replace);
        if let Some(replacer) = replacer.as_mut() {
            if config.replace_index {
                if let Some(snapshot) = index::load(&config.directory, process_index).await {
                    if replacer.restore(snapshot) {
                        info!("replacement index restored");
                    } else {
                        warn!("replacement index type mismatch, starting empty");
                    }
                }
            }
        }

        let (tx, rx) = messages::channel();
        let mut service = Self {
            budget: SizeBudget::new(config.files_size_bytes()),
            table: FileTable::new(config.use_http_get_suffix),
            config,
            prefix,
            process_index,
            proto,
            allowlist,
            dispatch,
            replacer,
            toggle: false,
            boundary_counter: 0,
            tx,
            rx,
        };

        if let Err(e) = service.refresh(false).await {
            if service.config.refresh.is_none() {
                return Err(InitError::DirectoryUnreachable(
                    service.config.directory.clone(),
                    e,
                ));
            }
            warn!(error = %e, "initial scan failed; retrying on refresh");
        }

        service.bind_write_patterns().await?;
        service.check_redirect_patterns()?;
        service.check_notify_patterns()?;
        service.check_read_targets()?;

        if service.config.notify_on_start {
            service.notify_all_files().await;
        }

        info!(
            files = service.table.len(),
            bytes = service.budget.usage(),
            "service initialized"
        );
        Ok(service)
    }

    /// The mailbox handle requests and events arrive on.
    pub fn handle(&self) -> ServiceSender {
        self.tx.clone()
    }

    /// Runs the actor on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        self.schedule_refresh();
        while let Some(message) = self.rx.recv().await {
            match message {
                ServiceMessage::Request { request, reply } => {
                    let response = self.handle_request(request).await;
                    let _ = reply.send(response);
                }
                ServiceMessage::Refresh => {
                    if let Err(e) = self.refresh(true).await {
                        warn!(error = %e, "refresh scan failed");
                    }
                    self.schedule_refresh();
                }
                ServiceMessage::AppendExpire { file, id } => self.expire_append(&file, &id),
            }
        }
    }

    /// Arms the next refresh tick; the period restarts after the previous
    /// refresh completed, so cycles never overlap.
    fn schedule_refresh(&self) {
        let Some(seconds) = self.config.refresh else {
            return;
        };
        let tx = self.tx.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            tx.refresh();
        });
    }

    async fn handle_request(&mut self, request: Request) -> Response {
        let Some(endpoint) = request.name.strip_prefix(&self.prefix).map(str::to_owned)
        else {
            return status_only(Status::NotFound);
        };
        let Some(target) = self.table.lookup_endpoint(&endpoint).cloned() else {
            return status_only(Status::NotFound);
        };

        if let Some(location) = self
            .table
            .get(&target.file)
            .and_then(|r| r.redirect.clone())
        {
            let mut info = Headers::new();
            info.push("status", Status::MovedPermanently.code().to_string());
            info.push("location", location);
            return Response { info, body: Vec::new() };
        }

        match target.method {
            None => self.read(&target.file, &request, false),
            Some(Method::Options) => self.options(&endpoint),
            Some(Method::Head) => self.read(&target.file, &request, true),
            Some(Method::Get) => self.read(&target.file, &request, false),
            Some(Method::Put) => self.put(&target.file, request).await,
            Some(Method::Post) => self.post(&target.file, request).await,
        }
    }

    /// GET/HEAD (and bare-name reads, which skip preconditions and
    /// ranges entirely because nothing advertised them).
    fn read(&mut self, file: &str, request: &Request, head: bool) -> Response {
        let now = SystemTime::now();
        let Some(record) = self.table.get(file) else {
            return status_only(Status::NotFound);
        };
        let etag = record.etag();
        let mtime = record.mtime_i.mtime;
        let size = record.size;
        let contents = record.contents.clone();
        let file_headers = record.headers.clone();
        let stamp = record.mtime_i.stamp();

        if !self.config.use_http_get_suffix {
            let mut info = http::response_headers(Status::Ok, &etag, mtime, now, &self.proto);
            info.extend_from(&file_headers);
            self.record_hit(file, size);
            return Response { info, body: contents.to_vec() };
        }

        match http::preconditions(&request.info, &etag, mtime, now, &self.proto) {
            Precondition::NotModified => {
                self.record_hit(file, size);
                let info =
                    http::response_headers(Status::NotModified, &etag, mtime, now, &self.proto);
                return Response { info, body: Vec::new() };
            }
            Precondition::Failed => {
                let info = http::response_headers(
                    Status::PreconditionFailed,
                    &etag,
                    mtime,
                    now,
                    &self.proto,
                );
                return Response { info, body: Vec::new() };
            }
            Precondition::Proceed => {}
        }

        match http::ranges(&request.info, &etag, mtime, size) {
            RangeOutcome::Full => {
                self.record_hit(file, size);
                let mut info = http::response_headers(Status::Ok, &etag, mtime, now, &self.proto);
                info.extend_from(&file_headers);
                let body = if head { Vec::new() } else { contents.to_vec() };
                Response { info, body }
            }
            RangeOutcome::Partial(parts) => {
                self.record_hit(file, size);
                self.boundary_counter = self.boundary_counter.wrapping_add(1);
                let mut info =
                    http::response_headers(Status::PartialContent, &etag, mtime, now, &self.proto);
                let (extra, body) =
                    http::partial_body(&contents, &parts, stamp, self.boundary_counter);
                info.extend_from(&extra);
                let body = if head { Vec::new() } else { body };
                Response { info, body }
            }
            RangeOutcome::Malformed => status_only(Status::BadRequest),
            RangeOutcome::NotSatisfiable => {
                let mut info = http::response_headers(
                    Status::RangeNotSatisfiable,
                    &etag,
                    mtime,
                    now,
                    &self.proto,
                );
                info.extend_from(&http::unsatisfiable_headers(size));
                Response { info, body: Vec::new() }
            }
            RangeOutcome::Stale => {
                self.record_hit(file, size);
                let mut info = http::response_headers(Status::Gone, &etag, mtime, now, &self.proto);
                info.extend_from(&file_headers);
                let body = if head { Vec::new() } else { contents.to_vec() };
                Response { info, body }
            }
        }
    }

    /// OPTIONS: the `allow` list is folded from the method endpoints
    /// subscribed under `path/`.
    fn options(&self, endpoint: &str) -> Response {
        let path = endpoint
            .strip_suffix("/options")
            .or_else(|| endpoint.strip_suffix("options"))
            .unwrap_or("");
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut tags: Vec<&str> = Vec::new();
        for (key, _) in self.table.endpoints_with_prefix(&prefix) {
            let tail = &key[prefix.len()..];
            if let Some(method) = Method::from_tail(tail) {
                if !tags.contains(&method.tag()) {
                    tags.push(method.tag());
                }
            }
        }
        let mut info = Headers::new();
        info.push("status", Status::Ok.code().to_string());
        info.push("allow", tags.join(", "));
        info.push("date", httpdate::fmt_http_date(SystemTime::now()));
        Response { info, body: Vec::new() }
    }

    /// PUT: truncating write-through.
    async fn put(&mut self, file: &str, request: Request) -> Response {
        let now = SystemTime::now();
        let Some(record) = self.table.get(file) else {
            return status_only(Status::NotFound);
        };
        if !record.write.truncate {
            return status_only(Status::BadRequest);
        }
        if request.info.get("range").is_some() {
            return status_only(Status::BadRequest);
        }
        let old = record.size;
        let path = record.path.clone();

        if let Err(e) = self.budget.check(old, request.body.len() as u64) {
            warn!(
                file,
                attempted = e.attempted,
                ceiling = e.ceiling,
                "truncate write would exceed the byte ceiling"
            );
            return status_only(Status::BadRequest);
        }
        if let Err(e) = tokio::fs::write(&path, &request.body).await {
            warn!(file, error = %e, "truncate write failed");
            return status_only(Status::BadRequest);
        }
        // The restat is authoritative for the new generation's mtime.
        let (mtime, access) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (
                meta.modified().unwrap_or(now),
                crate::scan::access_of(&meta),
            ),
            Err(_) => (now, Access::ReadWrite),
        };

        let record = self.table.get_mut(file).expect("record present");
        record.replace_contents(request.body, mtime);
        record.access = access;
        let new = record.size;
        let entries = record.notify.clone();
        let contents = record.contents.clone();
        self.budget.commit(old, new);

        notify::send_all(self.dispatch.as_mut(), &entries, &contents).await;
        self.record_hit(file, new);
        self.full_read_response(file, now)
    }

    /// POST: append or byte-range write, possibly one chunk of a
    /// multipart upload.
    async fn post(&mut self, file: &str, request: Request) -> Response {
        let now = SystemTime::now();
        let Some(record) = self.table.get(file) else {
            return status_only(Status::NotFound);
        };
        if !record.write.append {
            return status_only(Status::BadRequest);
        }
        let etag = record.etag();
        let mtime = record.mtime_i.mtime;
        let size = record.size;

        let params = match append::resolve_params(&request.info, &etag, mtime) {
            Ok(params) => params,
            Err(Status::RangeNotSatisfiable) => {
                let mut info = http::response_headers(
                    Status::RangeNotSatisfiable,
                    &etag,
                    mtime,
                    now,
                    &self.proto,
                );
                info.extend_from(&http::unsatisfiable_headers(size));
                return Response { info, body: Vec::new() };
            }
            Err(status) => return status_only(status),
        };

        let id = params.id.clone().unwrap_or_default();
        let chunk = PendingChunk {
            index: params.index,
            range: params.range,
            payload: request.body,
        };

        let record = self.table.get_mut(file).expect("record present");
        let first_chunk = !record.write_appends.contains_key(&id);
        record.write_appends.entry(id.clone()).or_default().insert(chunk);

        if !params.is_last {
            if first_chunk {
                self.arm_append_timer(file, &id, request.timeout_ms);
            }
            let info = http::response_headers(Status::Ok, &etag, mtime, now, &self.proto);
            return Response { info, body: Vec::new() };
        }

        let mut upload = record
            .write_appends
            .remove(&id)
            .expect("upload stored above");
        upload.cancel_timer();

        let new_contents = match append::apply_chunks(&record.contents, &upload.chunks) {
            Ok(contents) => contents,
            Err(_) => {
                let mut info = http::response_headers(
                    Status::RangeNotSatisfiable,
                    &etag,
                    mtime,
                    now,
                    &self.proto,
                );
                info.extend_from(&http::unsatisfiable_headers(size));
                return Response { info, body: Vec::new() };
            }
        };

        if let Err(e) = self.budget.check(size, new_contents.len() as u64) {
            warn!(
                file,
                attempted = e.attempted,
                ceiling = e.ceiling,
                "append write would exceed the byte ceiling"
            );
            return status_only(Status::BadRequest);
        }
        let path = self.table.get(file).expect("record present").path.clone();
        if let Err(e) = tokio::fs::write(&path, &new_contents).await {
            warn!(file, error = %e, "append write failed");
            return status_only(Status::BadRequest);
        }
        let (new_mtime, access) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (
                meta.modified().unwrap_or(now),
                crate::scan::access_of(&meta),
            ),
            Err(_) => (now, Access::ReadWrite),
        };

        let record = self.table.get_mut(file).expect("record present");
        record.replace_contents(new_contents, new_mtime);
        record.access = access;
        let new = record.size;
        let entries = record.notify.clone();
        let contents = record.contents.clone();
        self.budget.commit(size, new);

        notify::send_all(self.dispatch.as_mut(), &entries, &contents).await;
        self.record_hit(file, new);
        self.full_read_response(file, now)
    }

    /// Arms the per-id expiry timer bounded by the request timeout.
    fn arm_append_timer(&mut self, file: &str, id: &str, timeout_ms: u32) {
        let tx = self.tx.clone();
        let file_name = file.to_owned();
        let id_name = id.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms as u64)).await;
            tx.append_expire(file_name, id_name);
        });
        if let Some(record) = self.table.get_mut(file) {
            if let Some(upload) = record.write_appends.get_mut(id) {
                upload.timer = Some(timer);
            }
        }
    }

    /// Drops an incomplete multipart upload whose timer fired.
    fn expire_append(&mut self, file: &str, id: &str) {
        if let Some(record) = self.table.get_mut(file) {
            if let Some(upload) = record.write_appends.remove(id) {
                warn!(
                    file,
                    id,
                    chunks = upload.chunks.len(),
                    "dropping incomplete multipart upload"
                );
            }
        }
    }

    /// The 200 response a plain read would produce right now.
    fn full_read_response(&mut self, file: &str, now: SystemTime) -> Response {
        let Some(record) = self.table.get(file) else {
            return status_only(Status::NotFound);
        };
        let mut info = http::response_headers(
            Status::Ok,
            &record.etag(),
            record.mtime_i.mtime,
            now,
            &self.proto,
        );
        info.extend_from(&record.headers);
        Response { info, body: record.contents.to_vec() }
    }

    fn record_hit(&mut self, file: &str, size: u64) {
        if let Some(replacer) = self.replacer.as_mut() {
            replacer.hit(file, size);
        }
    }

    /// Pattern-derived decorations for a (possibly new) record.
    fn decorations_for(&self, file: &str) -> Decorations {
        let matches = |pattern: &String| name::pattern_match(pattern, file).is_some();
        let write = WriteSet {
            truncate: self.config.write_truncate.iter().any(matches),
            append: self.config.write_append.iter().any(matches),
        };
        let mut notify = Vec::new();
        for (list, mode) in [
            (&self.config.notify_one, crate::dispatch::SendMode::Unicast),
            (&self.config.notify_all, crate::dispatch::SendMode::Multicast),
        ] {
            for rule in list.iter() {
                if name::pattern_match(&rule.pattern, file).is_some() {
                    notify.push(NotifyEntry {
                        mode,
                        name: rule.name.clone(),
                        timeout_ms: rule.timeout_ms,
                        priority: rule.priority,
                    });
                }
            }
        }
        let redirect = self.config.redirect.iter().find_map(|rule| {
            name::pattern_match(&rule.pattern, file)
                .map(|caps| format!("{}{}", self.prefix, name::pattern_substitute(&rule.target, &caps)))
        });
        Decorations { write, notify, redirect }
    }

    /// The write methods the configuration declares for a file,
    /// independent of what the filesystem currently permits.
    fn declared_writes(&self, file: &str) -> WriteSet {
        self.decorations_for(file).write
    }

    /// Precomputed per-record response headers.
    fn file_headers(&self, file: &str) -> Headers {
        let mut out = Headers::new();
        if self.config.use_content_types {
            out.push("content-type", mime::content_type(file));
        }
        if self.config.use_content_disposition {
            let base = file.rsplit('/').next().unwrap_or(file);
            out.push(
                "content-disposition",
                format!("attachment; filename=\"{}\"", base),
            );
        }
        out
    }

    /// Grants write capabilities for configured patterns, preallocating
    /// empty records for literal names that matched nothing on disk.
    async fn bind_write_patterns(&mut self) -> InitResult<()> {
        let patterns: Vec<String> = self
            .config
            .write_truncate
            .iter()
            .chain(self.config.write_append.iter())
            .cloned()
            .collect();
        for pattern in patterns {
            let matched = self
                .table
                .file_names()
                .into_iter()
                .any(|file| name::pattern_match(&pattern, &file).is_some());
            if matched {
                continue;
            }
            if pattern.contains('*') {
                return Err(InitError::WritePatternUnmatched(pattern));
            }
            // A literal name is preallocated as an empty writable file.
            debug!(name = %pattern, "preallocating write endpoint");
            let decorations = self.decorations_for(&pattern);
            let mut record = FileRecord::new(
                self.config.directory.join(&pattern),
                Vec::new(),
                SystemTime::now(),
                Access::ReadWrite,
            );
            record.toggle = self.toggle;
            record.write = decorations.write;
            record.notify = decorations.notify;
            record.redirect = decorations.redirect;
            record.headers = self.file_headers(&pattern);
            if let Some(replacer) = self.replacer.as_mut() {
                replacer.admit(&pattern);
            }
            self.table
                .insert(pattern.clone(), record, self.dispatch.as_mut())
                .await;
        }
        Ok(())
    }

    fn check_redirect_patterns(&self) -> InitResult<()> {
        for rule in &self.config.redirect {
            let matched = self
                .table
                .file_names()
                .into_iter()
                .any(|file| name::pattern_match(&rule.pattern, &file).is_some());
            if !matched {
                return Err(InitError::RedirectPatternUnmatched(rule.pattern.clone()));
            }
        }
        Ok(())
    }

    fn check_notify_patterns(&self) -> InitResult<()> {
        for rule in self.config.notify_one.iter().chain(self.config.notify_all.iter()) {
            let matched = self
                .table
                .file_names()
                .into_iter()
                .any(|file| name::pattern_match(&rule.pattern, &file).is_some());
            if !matched {
                return Err(InitError::NotifyPatternUnmatched(rule.pattern.clone()));
            }
        }
        Ok(())
    }

    /// Allow-listed files with writes declared for them must be writable
    /// on disk.
    fn check_read_targets(&self) -> InitResult<()> {
        for (file, _) in &self.allowlist {
            if let Some(record) = self.table.get(file) {
                if !self.declared_writes(file).is_empty() && !record.access.writable() {
                    return Err(InitError::ReadTargetNotWritable(file.clone()));
                }
            }
        }
        Ok(())
    }

    async fn notify_all_files(&mut self) {
        let pending: Vec<(Vec<NotifyEntry>, Arc<[u8]>)> = self
            .table
            .files()
            .filter(|(_, r)| !r.notify.is_empty())
            .map(|(_, r)| (r.notify.clone(), r.contents.clone()))
            .collect();
        for (entries, contents) in pending {
            notify::send_all(self.dispatch.as_mut(), &entries, &contents).await;
        }
    }
}

fn status_only(status: Status) -> Response {
    let mut info = Headers::new();
    info.push("status", status.code().to_string());
    Response { info, body: Vec::new() }
}
