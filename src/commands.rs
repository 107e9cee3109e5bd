use std::fs;
use std::path::{Path, PathBuf};

use crate::attachments::{
    ingest_batch, materialize, write_download, AttachmentView, IncomingFile,
};
use crate::config::load_config;
use crate::events::{Notification, StatePayload};
#[cfg(all(feature = "app", not(test)))]
use crate::events::{EVENT_NOTIFICATION, EVENT_STATE_UPDATED};
use crate::models::{Attachment, AttachmentId, Priority, Task, TaskFilter, TaskId, TaskStats};
use crate::state::AppState;
use crate::storage::{FileStore, Storage, StorageError};

#[cfg(all(feature = "app", not(test)))]
use tauri::{AppHandle, Emitter, Manager, Runtime, State};
#[cfg(all(feature = "app", not(test)))]
use tauri_plugin_opener::OpenerExt;

pub const SAVE_FAILED_MESSAGE: &str = "Failed to save data to local storage";
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load saved data";

const VIEWER_DIR: &str = "viewer";
const DOWNLOAD_DIR: &str = "downloads";

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Everything a command needs from the hosting shell.
pub trait CommandCtx {
    fn app_data_dir(&self) -> Result<PathBuf, StorageError>;
    fn emit_state_updated(&self, payload: StatePayload);
    fn notify(&self, notification: Notification);
    fn open_path(&self, path: &Path) -> Result<(), String>;
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

fn state_payload(state: &AppState) -> StatePayload {
    let persisted = state.persisted();
    StatePayload {
        stats: TaskStats::from_tasks(&persisted.tasks),
        tasks: persisted.tasks,
        plans: persisted.plans,
        filter: state.current_filter(),
    }
}

fn open_storage(ctx: &impl CommandCtx) -> Result<Storage, StorageError> {
    let root = ctx.app_data_dir()?;
    let config = load_config(&root);
    let store = FileStore::new(root).with_quota(config.storage_quota_bytes);
    store.ensure_dirs()?;
    Ok(Storage::new(store))
}

/// Saves and emits `state_updated`. The emit happens even when the write fails so the
/// view keeps showing the in-memory state.
fn persist(ctx: &impl CommandCtx, state: &AppState) -> Result<(), StorageError> {
    let saved = {
        let _saving = state.lock_saves();
        open_storage(ctx).and_then(|storage| storage.save(&state.persisted()))
    };
    ctx.emit_state_updated(state_payload(state));
    saved
}

fn commit<T>(
    ctx: &impl CommandCtx,
    state: &AppState,
    data: T,
    success: Option<String>,
) -> CommandResult<T> {
    if let Err(error) = persist(ctx, state) {
        log::error!("failed to save data: {error}");
        ctx.notify(Notification::error(SAVE_FAILED_MESSAGE));
        return err(&format!("storage error: {error}"));
    }
    if let Some(message) = success {
        ctx.notify(Notification::success(message));
    }
    ok(data)
}

pub fn load_state_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<StatePayload> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => {
            ctx.notify(Notification::error(LOAD_FAILED_MESSAGE));
            return err(&format!("storage error: {error}"));
        }
    };
    let outcome = storage.load();
    if outcome.error.is_some() {
        ctx.notify(Notification::error(LOAD_FAILED_MESSAGE));
    }
    state.replace(outcome.state);
    let payload = state_payload(state);
    ctx.emit_state_updated(payload.clone());
    ok(payload)
}

/// Blank text is a silent no-op: `ok` with no data.
pub fn create_task_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    text: String,
    priority: Option<Priority>,
) -> CommandResult<Option<Task>> {
    let priority = match priority {
        Some(priority) => priority,
        None => ctx
            .app_data_dir()
            .map(|root| load_config(&root).default_priority)
            .unwrap_or_default(),
    };
    let Some(task) = state.create_task(&text, priority) else {
        return ok(None);
    };
    log::debug!("task created id={} priority={:?}", task.id, task.priority);
    commit(ctx, state, Some(task), Some("Task added successfully!".to_string()))
}

pub fn toggle_task_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
) -> CommandResult<Option<Task>> {
    match state.toggle_completed(task_id) {
        Some(task) => commit(ctx, state, Some(task), None),
        None => ok(None),
    }
}

pub fn edit_task_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    text: String,
) -> CommandResult<Option<Task>> {
    match state.edit_task(task_id, &text) {
        Some(task) => commit(ctx, state, Some(task), None),
        None => ok(None),
    }
}

pub fn delete_task_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
) -> CommandResult<bool> {
    if !state.delete_task(task_id) {
        return ok(false);
    }
    commit(ctx, state, true, None)
}

pub fn set_comment_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    text: String,
) -> CommandResult<Option<Task>> {
    match state.set_comment(task_id, &text) {
        Some(task) => commit(
            ctx,
            state,
            Some(task),
            Some("Comment updated successfully!".to_string()),
        ),
        None => ok(None),
    }
}

pub fn clear_completed_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<usize> {
    let removed = state.clear_completed();
    if removed == 0 {
        ctx.notify(Notification::error("No completed tasks to clear."));
        return ok(0);
    }
    log::info!("cleared completed tasks count={removed}");
    commit(ctx, state, removed, None)
}

pub fn clear_all_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<usize> {
    let removed = state.clear_all();
    if removed == 0 {
        ctx.notify(Notification::error("No tasks to clear."));
        return ok(0);
    }
    log::info!("cleared all tasks count={removed}");
    commit(ctx, state, removed, None)
}

/// Changes the transient view filter; nothing is persisted.
pub fn set_filter_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    filter: TaskFilter,
) -> CommandResult<Vec<Task>> {
    state.set_filter(filter);
    ctx.emit_state_updated(state_payload(state));
    ok(state.visible_tasks())
}

pub fn filter_tasks_impl(state: &AppState, filter: TaskFilter) -> CommandResult<Vec<Task>> {
    ok(state.filter(filter))
}

pub fn task_stats_impl(state: &AppState) -> CommandResult<TaskStats> {
    ok(state.stats())
}

pub fn save_plans_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    text: String,
) -> CommandResult<String> {
    state.set_plans(&text);
    commit(ctx, state, text, Some("Plans saved successfully!".to_string()))
}

/// File handed over by the webview: a path on disk plus the MIME type it reported.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AttachmentUpload {
    pub path: PathBuf,
    #[serde(default)]
    pub mime_type: String,
}

impl From<AttachmentUpload> for IncomingFile {
    fn from(value: AttachmentUpload) -> Self {
        IncomingFile::from_path(value.path, &value.mime_type)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BatchSummary {
    pub added: Vec<Attachment>,
    pub rejected: Vec<String>,
}

pub async fn add_attachments_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    files: Vec<IncomingFile>,
) -> CommandResult<BatchSummary> {
    if files.is_empty() {
        return ok(BatchSummary {
            added: Vec::new(),
            rejected: Vec::new(),
        });
    }
    if state.task(task_id).is_none() {
        return err("task not found");
    }

    ctx.notify(Notification::success(format!(
        "Processing {} attachment(s)...",
        files.len()
    )));
    let report = ingest_batch(state, task_id, files, |report| {
        for rejected in &report.rejected {
            ctx.notify(Notification::error(rejected.to_string()));
        }
    })
    .await;

    let summary = BatchSummary {
        rejected: report.rejected.iter().map(|e| e.to_string()).collect(),
        added: report.added,
    };
    if summary.added.is_empty() {
        ctx.emit_state_updated(state_payload(state));
        return ok(summary);
    }
    let message = format!("{} attachment(s) added successfully!", summary.added.len());
    commit(ctx, state, summary, Some(message))
}

pub fn delete_attachment_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    attachment_id: AttachmentId,
) -> CommandResult<bool> {
    if !state.remove_attachment(task_id, attachment_id) {
        return ok(false);
    }
    commit(
        ctx,
        state,
        true,
        Some("Attachment deleted successfully!".to_string()),
    )
}

/// Writes a viewer page for the attachment and asks the shell to open it.
pub fn view_attachment_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    attachment_id: AttachmentId,
) -> CommandResult<AttachmentView> {
    let Some(attachment) = state.find_attachment(task_id, attachment_id) else {
        return err("attachment not found");
    };
    let view = materialize(&attachment);
    let root = match ctx.app_data_dir() {
        Ok(path) => path,
        Err(e) => return err(&format!("app_data_dir error: {e}")),
    };
    let dir = root.join(VIEWER_DIR);
    let page = dir.join(format!("attachment-{}.html", attachment.id));
    if let Err(error) = fs::create_dir_all(&dir).and_then(|_| fs::write(&page, view.to_html())) {
        return err(&format!("viewer error: {error}"));
    }
    if let Err(error) = ctx.open_path(&page) {
        return err(&format!("open error: {error}"));
    }
    ok(view)
}

pub fn download_attachment_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: TaskId,
    attachment_id: AttachmentId,
    dir: Option<PathBuf>,
) -> CommandResult<PathBuf> {
    let Some(attachment) = state.find_attachment(task_id, attachment_id) else {
        return err("attachment not found");
    };
    let dir = match dir {
        Some(dir) => dir,
        None => match ctx.app_data_dir() {
            Ok(root) => root.join(DOWNLOAD_DIR),
            Err(e) => return err(&format!("app_data_dir error: {e}")),
        },
    };
    match write_download(&attachment, &dir) {
        Ok(path) => ok(path),
        Err(error) => {
            ctx.notify(Notification::error(error.to_string()));
            err(&error.to_string())
        }
    }
}

#[cfg(all(feature = "app", not(test)))]
struct TauriCommandCtx<'a, R: Runtime> {
    app: &'a AppHandle<R>,
}

#[cfg(all(feature = "app", not(test)))]
impl<R: Runtime> CommandCtx for TauriCommandCtx<'_, R> {
    fn app_data_dir(&self) -> Result<PathBuf, StorageError> {
        self.app
            .path()
            .app_data_dir()
            .map_err(|err| StorageError::Io(std::io::Error::other(err.to_string())))
    }

    fn emit_state_updated(&self, payload: StatePayload) {
        let _ = self.app.emit(EVENT_STATE_UPDATED, payload);
    }

    fn notify(&self, notification: Notification) {
        let _ = self.app.emit(EVENT_NOTIFICATION, notification);
    }

    fn open_path(&self, path: &Path) -> Result<(), String> {
        self.app
            .opener()
            .open_path(path.to_string_lossy(), None::<&str>)
            .map_err(|e| e.to_string())
    }
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn load_state(app: AppHandle, state: State<AppState>) -> CommandResult<StatePayload> {
    let ctx = TauriCommandCtx { app: &app };
    load_state_impl(&ctx, state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn create_task(
    app: AppHandle,
    state: State<AppState>,
    text: String,
    priority: Option<Priority>,
) -> CommandResult<Option<Task>> {
    let ctx = TauriCommandCtx { app: &app };
    create_task_impl(&ctx, state.inner(), text, priority)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn toggle_task(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
) -> CommandResult<Option<Task>> {
    let ctx = TauriCommandCtx { app: &app };
    toggle_task_impl(&ctx, state.inner(), task_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn edit_task(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
    text: String,
) -> CommandResult<Option<Task>> {
    let ctx = TauriCommandCtx { app: &app };
    edit_task_impl(&ctx, state.inner(), task_id, text)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn delete_task(app: AppHandle, state: State<AppState>, task_id: TaskId) -> CommandResult<bool> {
    let ctx = TauriCommandCtx { app: &app };
    delete_task_impl(&ctx, state.inner(), task_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn set_comment(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
    text: String,
) -> CommandResult<Option<Task>> {
    let ctx = TauriCommandCtx { app: &app };
    set_comment_impl(&ctx, state.inner(), task_id, text)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn clear_completed(app: AppHandle, state: State<AppState>) -> CommandResult<usize> {
    let ctx = TauriCommandCtx { app: &app };
    clear_completed_impl(&ctx, state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn clear_all(app: AppHandle, state: State<AppState>) -> CommandResult<usize> {
    let ctx = TauriCommandCtx { app: &app };
    clear_all_impl(&ctx, state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn set_filter(
    app: AppHandle,
    state: State<AppState>,
    filter: TaskFilter,
) -> CommandResult<Vec<Task>> {
    let ctx = TauriCommandCtx { app: &app };
    set_filter_impl(&ctx, state.inner(), filter)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn filter_tasks(state: State<AppState>, filter: TaskFilter) -> CommandResult<Vec<Task>> {
    filter_tasks_impl(state.inner(), filter)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn task_stats(state: State<AppState>) -> CommandResult<TaskStats> {
    task_stats_impl(state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn save_plans(app: AppHandle, state: State<AppState>, text: String) -> CommandResult<String> {
    let ctx = TauriCommandCtx { app: &app };
    save_plans_impl(&ctx, state.inner(), text)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub async fn add_attachments(
    app: AppHandle,
    state: State<'_, AppState>,
    task_id: TaskId,
    files: Vec<AttachmentUpload>,
) -> Result<CommandResult<BatchSummary>, String> {
    let ctx = TauriCommandCtx { app: &app };
    let files = files.into_iter().map(IncomingFile::from).collect();
    Ok(add_attachments_impl(&ctx, state.inner(), task_id, files).await)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn delete_attachment(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
    attachment_id: AttachmentId,
) -> CommandResult<bool> {
    let ctx = TauriCommandCtx { app: &app };
    delete_attachment_impl(&ctx, state.inner(), task_id, attachment_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn view_attachment(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
    attachment_id: AttachmentId,
) -> CommandResult<AttachmentView> {
    let ctx = TauriCommandCtx { app: &app };
    view_attachment_impl(&ctx, state.inner(), task_id, attachment_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn download_attachment(
    app: AppHandle,
    state: State<AppState>,
    task_id: TaskId,
    attachment_id: AttachmentId,
    dir: Option<PathBuf>,
) -> CommandResult<PathBuf> {
    let ctx = TauriCommandCtx { app: &app };
    download_attachment_impl(&ctx, state.inner(), task_id, attachment_id, dir)
}
