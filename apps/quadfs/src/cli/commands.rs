//! # CLI Command Implementations

use super::ExportFormat;
use crate::api;
use crate::config::Config;
use quadfs_core::{
    AccessLevel, CommitContext, FileInfo, Principal, QuadFsError, StorageBackend, Store,
    TransactionRecord, primitives::MAX_QUERY_LENGTH,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Id used for the local operator when `--user` is not given.
pub const LOCAL_OPERATOR: &str = "local";

// =============================================================================
// CONTEXT
// =============================================================================

/// Resolved settings shared by all commands.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: Config,
    pub user: Option<String>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub json: bool,
}

impl CliContext {
    pub fn open_store(&self) -> Result<Store, QuadFsError> {
        Store::open(
            StorageBackend::persistent(&self.config.data_dir),
            &self.config.store_options(),
        )
    }

    /// `--user`, admin if listed in config; otherwise the local operator,
    /// who already has the data directory and so acts as admin.
    pub fn principal(&self) -> Principal {
        match &self.user {
            Some(id) => {
                let name = self.name.clone().unwrap_or_else(|| id.clone());
                if self.config.is_admin(id) {
                    Principal::admin(id.clone(), name)
                } else {
                    Principal::new(id.clone(), name)
                }
            }
            None => Principal::admin(LOCAL_OPERATOR, LOCAL_OPERATOR),
        }
    }

    pub fn commit_context(&self) -> CommitContext {
        let ctx = CommitContext::new(self.principal());
        match &self.message {
            Some(message) => ctx.with_message(message.clone()),
            None => ctx,
        }
    }

    /// Print `value` as JSON in `--json` mode, otherwise run `human`.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<(), QuadFsError> {
        if self.json {
            let text = serde_json::to_string_pretty(value)
                .map_err(|e| QuadFsError::Serialization(e.to_string()))?;
            println!("{}", text);
        } else {
            human(value);
        }
        Ok(())
    }
}

// =============================================================================
// FILE LIMITS & PATH CHECKS
// =============================================================================

/// Maximum query file size.
const MAX_QUERY_FILE_SIZE: u64 = MAX_QUERY_LENGTH as u64;

/// Canonicalize a local input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, QuadFsError> {
    let canonical = path.canonicalize().map_err(|e| {
        QuadFsError::io(&format!("invalid file path '{}'", path.display()), e)
    })?;
    if !canonical.is_file() {
        return Err(QuadFsError::InvalidArgument(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Resolve an output path against its canonicalized parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, QuadFsError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        QuadFsError::io(&format!("invalid output directory '{}'", parent.display()), e)
    })?;
    if !canonical_parent.is_dir() {
        return Err(QuadFsError::InvalidArgument(format!(
            "'{}' is not a directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| QuadFsError::InvalidArgument("output path has no filename".into()))?;
    Ok(canonical_parent.join(filename))
}

fn create_output(path: &Path) -> Result<File, QuadFsError> {
    let path = validate_output_path(path)?;
    File::create(&path).map_err(|e| QuadFsError::io(&format!("create {}", path.display()), e))
}

fn print_entry(info: &FileInfo) {
    let kind = if info.is_directory { "d" } else { "-" };
    let access = format!(
        "{}{}",
        if info.is_readable { "r" } else { "-" },
        if info.is_writeable { "w" } else { "-" }
    );
    let modified = info
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}{} {:>12} {} {:<12} {}",
        kind,
        access,
        info.size,
        modified,
        info.owner.as_deref().unwrap_or("-"),
        info.path
    );
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(
    mut ctx: CliContext,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), QuadFsError> {
    if let Some(host) = host {
        ctx.config.host = host;
    }
    if let Some(port) = port {
        ctx.config.port = port;
    }
    let store = ctx.open_store()?;

    println!("Configuration:");
    println!("  Listen:   {}", ctx.config.bind_addr());
    println!("  Data:     {}", ctx.config.data_dir.display());
    println!("  Root IRI: {}", ctx.config.root_iri);
    println!("  Admins:   {}", ctx.config.admins.join(", "));
    println!();
    println!("Endpoints:");
    println!("  *    /dav/{{path}}  - MKCOL PUT GET PROPFIND COPY MOVE DELETE");
    println!("  POST /query        - read-only query");
    println!("  GET  /permissions  - access view; PUT to change grants");
    println!("  GET  /status       - store status");
    println!("  GET  /log/{{index}}  - committed transaction (admins)");
    println!("  GET  /health       - health check");
    println!();
    println!("Press Ctrl+C to stop");

    api::run_server(&ctx.config, store).await
}

// =============================================================================
// STORE COMMANDS
// =============================================================================

pub fn cmd_init(ctx: &CliContext) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let status = store.status()?;
    ctx.emit(&status, |s| {
        if s.log_entries <= 1 {
            println!("Initialized store in {}", ctx.config.data_dir.display());
        } else {
            println!(
                "Store in {} already holds {} transactions",
                ctx.config.data_dir.display(),
                s.log_entries
            );
        }
        println!("Root: {}", s.root_iri);
    })
}

pub fn cmd_status(ctx: &CliContext) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let status = store.status()?;
    ctx.emit(&status, |s| {
        println!("Backend:      {}", s.backend);
        if let Some(dir) = &s.data_dir {
            println!("Data dir:     {}", dir);
        }
        println!("Root IRI:     {}", s.root_iri);
        println!("Quads:        {}", s.quads);
        println!("Transactions: {}", s.log_entries);
        println!("Blobs:        {}", if s.blobs_read_only { "read-only" } else { "read-write" });
        println!("Checksum:     {}", s.checksum);
    })
}

pub fn cmd_verify(ctx: &CliContext) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let report = store.verify()?;
    ctx.emit(&report, |r| {
        println!("Transactions replayed: {}", r.log_entries);
        println!("Live checksum:         {}", r.live_checksum);
        println!("Replayed checksum:     {}", r.replayed_checksum);
        println!("Blobs checked:         {}", r.blobs_checked);
        for id in &r.blob_failures {
            println!("  FAILED: {}", id);
        }
    })?;
    if report.is_consistent() {
        Ok(())
    } else {
        Err(QuadFsError::Io("store is inconsistent".to_string()))
    }
}

// =============================================================================
// FILESYSTEM COMMANDS
// =============================================================================

pub fn cmd_mkdir(ctx: &CliContext, path: &str) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let info = store.vfs().mkdir(&ctx.commit_context(), path)?;
    ctx.emit(&info, print_entry)
}

pub fn cmd_ls(ctx: &CliContext, path: &str) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let entries = store.vfs().list(&ctx.principal(), path)?;
    ctx.emit(&entries, |entries| entries.iter().for_each(print_entry))
}

pub fn cmd_stat(ctx: &CliContext, path: &str) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let info = store.vfs().stat(&ctx.principal(), path)?;
    ctx.emit(&info, |info| {
        print_entry(info);
        if let Some(checksum) = &info.checksum {
            println!("checksum: {}", checksum);
        }
        if let Some(blob) = &info.blob_id {
            println!("blob:     {}", blob);
        }
    })
}

pub fn cmd_put(ctx: &CliContext, source: &Path, path: &str) -> Result<(), QuadFsError> {
    let source = validate_file_path(source)?;
    let mut file = File::open(&source)
        .map_err(|e| QuadFsError::io(&format!("open {}", source.display()), e))?;
    let store = ctx.open_store()?;
    let outcome = store.vfs().write(&ctx.commit_context(), path, &mut file)?;
    ctx.emit(&outcome, |o| {
        let verb = if o.replaced { "Replaced" } else { "Wrote" };
        println!("{} {} bytes at {} ({})", verb, o.blob.size, path, o.blob.checksum);
    })
}

pub fn cmd_get(
    ctx: &CliContext,
    path: &str,
    output: Option<&Path>,
    start: u64,
    end: Option<u64>,
) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let principal = ctx.principal();
    let written = match output {
        Some(output) => {
            let mut out = BufWriter::new(create_output(output)?);
            let n = store.vfs().read(&principal, path, &mut out, start, end)?;
            out.flush().map_err(|e| QuadFsError::io("flush output", e))?;
            n
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let n = store.vfs().read(&principal, path, &mut out, start, end)?;
            out.flush().map_err(|e| QuadFsError::io("flush stdout", e))?;
            n
        }
    };
    tracing::debug!(path, bytes = written, "read complete");
    Ok(())
}

pub fn cmd_transfer(
    ctx: &CliContext,
    src: &str,
    dst: &str,
    overwrite: bool,
    is_move: bool,
) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let commit = ctx.commit_context();
    let outcome = if is_move {
        store.vfs().rename(&commit, src, dst, overwrite)?
    } else {
        store.vfs().copy(&commit, src, dst, overwrite)?
    };
    ctx.emit(&outcome.info, |info| {
        let verb = if is_move { "Moved" } else { "Copied" };
        let note = if outcome.replaced { " (replaced)" } else { "" };
        println!("{} {} -> {}{}", verb, src, info.path, note);
    })
}

pub fn cmd_rm(ctx: &CliContext, path: &str) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    store.vfs().delete(&ctx.commit_context(), path)?;
    if !ctx.json {
        println!("Deleted {}", path);
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

pub fn cmd_query(
    ctx: &CliContext,
    text: Option<String>,
    file: Option<&Path>,
) -> Result<(), QuadFsError> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(file)) => {
            let file = validate_file_path(file)?;
            let size = std::fs::metadata(&file)
                .map_err(|e| QuadFsError::io("query file metadata", e))?
                .len();
            if size > MAX_QUERY_FILE_SIZE {
                return Err(QuadFsError::InvalidArgument(format!(
                    "query file exceeds {} bytes",
                    MAX_QUERY_FILE_SIZE
                )));
            }
            std::fs::read_to_string(&file).map_err(|e| QuadFsError::io("read query file", e))?
        }
        (None, None) => {
            return Err(QuadFsError::InvalidArgument(
                "query text or --file is required".into(),
            ));
        }
    };

    let store = ctx.open_store()?;
    let results = store.query(&ctx.principal(), &text)?;
    ctx.emit(&results.to_sparql_json(), |_| {
        println!("{}", results.variables.join("\t"));
        for row in &results.rows {
            let cells: Vec<String> = results
                .variables
                .iter()
                .map(|v| row.get(v).map(|t| t.to_string()).unwrap_or_default())
                .collect();
            println!("{}", cells.join("\t"));
        }
        println!("({} rows)", results.len());
    })
}

// =============================================================================
// LOG COMMAND
// =============================================================================

fn print_record_summary(record: &TransactionRecord) {
    let when = chrono::DateTime::from_timestamp_millis(record.header.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let message = if record.header.commit_message.is_empty() {
        String::new()
    } else {
        format!(" \"{}\"", record.header.commit_message)
    };
    println!(
        "#{:<6} {} {:<12} {}{} ({} changes)",
        record.index,
        when,
        record.header.user_id,
        record.header.system_message,
        message,
        record.deltas.len()
    );
}

pub fn cmd_log(ctx: &CliContext, index: Option<u64>, last: u64) -> Result<(), QuadFsError> {
    let principal = ctx.principal();
    if !principal.admin {
        return Err(QuadFsError::PermissionDenied(
            "the transaction log is restricted to admins".into(),
        ));
    }
    let store = ctx.open_store()?;
    let log = store.log();

    if let Some(index) = index {
        let entry = api::LogEntryResponse::from(log.record(index)?);
        return ctx.emit(&entry, |e| {
            println!("Transaction #{}", e.index);
            println!("  user:    {} ({})", e.user_id, e.user_name);
            println!("  action:  {}", e.system_message);
            println!("  message: {}", e.commit_message);
            for quad in &e.added {
                println!("  + {}", quad);
            }
            for quad in &e.deleted {
                println!("  - {}", quad);
            }
        });
    }

    let size = log.size();
    let records = (size.saturating_sub(last)..size)
        .map(|i| log.record(i))
        .collect::<Result<Vec<_>, _>>()?;
    let entries: Vec<api::LogEntryResponse> =
        records.iter().cloned().map(api::LogEntryResponse::from).collect();
    ctx.emit(&entries, |_| records.iter().for_each(print_record_summary))
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

pub fn cmd_export(ctx: &CliContext, output: &Path, format: ExportFormat) -> Result<(), QuadFsError> {
    if format == ExportFormat::Canonical && !ctx.principal().admin {
        return Err(QuadFsError::PermissionDenied(
            "canonical export is unfiltered and restricted to admins".into(),
        ));
    }
    let store = ctx.open_store()?;
    let mut out = BufWriter::new(create_output(output)?);
    match format {
        ExportFormat::Canonical => {
            let bytes = store.export_canonical()?;
            out.write_all(&bytes)
                .map_err(|e| QuadFsError::io("write export", e))?;
            println!("Exported {} bytes to {}", bytes.len(), output.display());
        }
        ExportFormat::Nquads => {
            let lines = store.export_nquads(&ctx.principal(), &mut out)?;
            println!("Exported {} quads to {}", lines, output.display());
        }
    }
    out.flush().map_err(|e| QuadFsError::io("flush export", e))
}

// =============================================================================
// PERMISSION COMMANDS
// =============================================================================

/// Strict level parsing: a typo must not silently revoke.
pub fn parse_level(level: &str) -> Result<AccessLevel, QuadFsError> {
    AccessLevel::ALL
        .into_iter()
        .find(|l| l.as_str().eq_ignore_ascii_case(level.trim()))
        .ok_or_else(|| {
            QuadFsError::InvalidArgument(format!(
                "unknown access level '{}' (expected none, list, read, write or manage)",
                level
            ))
        })
}

#[derive(Debug, Serialize)]
struct GrantOutcome<'a> {
    path: &'a str,
    subject: &'a str,
    previous: AccessLevel,
    level: AccessLevel,
}

fn set_level(
    ctx: &CliContext,
    path: &str,
    subject: &str,
    level: AccessLevel,
) -> Result<(), QuadFsError> {
    let store = ctx.open_store()?;
    let previous = store
        .vfs()
        .set_permission(&ctx.principal(), path, subject, level)?;
    let outcome = GrantOutcome {
        path,
        subject,
        previous,
        level,
    };
    ctx.emit(&outcome, |o| {
        println!("{} on {}: {} -> {}", o.subject, o.path, o.previous, o.level);
    })
}

pub fn cmd_grant(
    ctx: &CliContext,
    path: &str,
    subject: &str,
    level: &str,
) -> Result<(), QuadFsError> {
    set_level(ctx, path, subject, parse_level(level)?)
}

pub fn cmd_revoke(ctx: &CliContext, path: &str, subject: &str) -> Result<(), QuadFsError> {
    set_level(ctx, path, subject, AccessLevel::None)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn context(dir: &Path, user: Option<&str>) -> CliContext {
        CliContext {
            config: Config {
                data_dir: dir.to_path_buf(),
                admins: vec!["ops".to_string()],
                ..Config::default()
            },
            user: user.map(str::to_string),
            name: None,
            message: Some("from cli".to_string()),
            json: true,
        }
    }

    #[test]
    fn level_parsing_is_strict() {
        assert_eq!(parse_level("Write").unwrap(), AccessLevel::Write);
        assert_eq!(parse_level("none").unwrap(), AccessLevel::None);
        assert!(parse_level("wirte").is_err());
    }

    #[test]
    fn principal_resolution() {
        let dir = tempfile::tempdir().unwrap();
        assert!(context(dir.path(), None).principal().admin);
        assert!(context(dir.path(), Some("ops")).principal().admin);
        let alice = context(dir.path(), Some("alice")).principal();
        assert!(!alice.admin);
        assert_eq!(alice.name, "alice");
    }

    #[test]
    fn commands_share_one_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        cmd_init(&ctx).unwrap();
        cmd_mkdir(&ctx, "/team/docs").unwrap();

        let source = dir.path().join("note.txt");
        std::fs::write(&source, b"hello quadfs").unwrap();
        cmd_put(&ctx, &source, "/team/docs/note.txt").unwrap();

        let output = dir.path().join("copy.txt");
        cmd_get(&ctx, "/team/docs/note.txt", Some(&output), 6, None).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"quadfs");

        cmd_grant(&ctx, "/team", "alice", "read").unwrap();
        let alice = context(dir.path(), Some("alice"));
        let store = alice.open_store().unwrap();
        let info = store
            .vfs()
            .stat(&alice.principal(), "/team/docs/note.txt")
            .unwrap();
        assert!(info.is_readable && !info.is_writeable);
        drop(store);

        let denied = cmd_mkdir(&alice, "/team/private").unwrap_err();
        assert!(matches!(denied, QuadFsError::PermissionDenied(_)));
        assert!(cmd_log(&alice, None, 5).is_err());
        cmd_verify(&ctx).unwrap();
    }

    #[test]
    fn last_message_lands_in_log() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        cmd_mkdir(&ctx, "/a").unwrap();
        let store = ctx.open_store().unwrap();
        let log = store.log();
        let record = log.record(log.size() - 1).unwrap();
        assert_eq!(record.header.commit_message, "from cli");
        assert_eq!(record.header.system_message, "mkdir /a");
        assert_eq!(record.header.user_id, LOCAL_OPERATOR);
    }

    #[test]
    fn transfer_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        cmd_mkdir(&ctx, "/src").unwrap();
        cmd_transfer(&ctx, "/src", "/dst", false, true).unwrap();
        let store = ctx.open_store().unwrap();
        assert!(store.vfs().stat(&ctx.principal(), "/src").is_err());
        drop(store);
        cmd_transfer(&ctx, "/dst", "/dst2", false, false).unwrap();
        cmd_rm(&ctx, "/dst").unwrap();
        let store = ctx.open_store().unwrap();
        assert!(store.vfs().stat(&ctx.principal(), "/dst2").is_ok());
    }
}
