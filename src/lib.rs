pub mod attachments;
pub mod commands;
pub mod config;
pub mod events;
pub mod logging;
pub mod models;
pub mod state;
pub mod storage;

#[cfg(all(feature = "app", not(test)))]
use tauri::Manager;

#[cfg(all(feature = "app", not(test)))]
use crate::commands::*;
#[cfg(all(feature = "app", not(test)))]
use crate::config::load_config;
#[cfg(all(feature = "app", not(test)))]
use crate::logging::init_logging;
#[cfg(all(feature = "app", not(test)))]
use crate::state::AppState;
#[cfg(all(feature = "app", not(test)))]
use crate::storage::{FileStore, Storage};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
#[cfg(all(feature = "app", not(test)))]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let root = app.path().app_data_dir()?;
            if let Err(error) = init_logging(&root) {
                eprintln!("logger init failed: {error}");
            }

            let config = load_config(&root);
            let store = FileStore::new(root).with_quota(config.storage_quota_bytes);
            store.ensure_dirs()?;
            let outcome = Storage::new(store).load();
            if let Some(error) = &outcome.error {
                log::warn!("starting with empty state: {error}");
            }

            app.manage(AppState::new(outcome.state, config.initial_filter));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            load_state,
            create_task,
            toggle_task,
            edit_task,
            delete_task,
            set_comment,
            clear_completed,
            clear_all,
            set_filter,
            filter_tasks,
            task_stats,
            save_plans,
            add_attachments,
            delete_attachment,
            view_attachment,
            download_attachment,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
