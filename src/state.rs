use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::models::{
    filter_tasks, Attachment, AttachmentId, PersistedState, Priority, Task, TaskFilter, TaskId,
    TaskStats,
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<AppData>>,
    save_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(persisted: PersistedState, filter: TaskFilter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppData {
                tasks: persisted.tasks,
                plans: persisted.plans,
                current_filter: filter,
            })),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Held from snapshot to write so saves land in the order their snapshots were taken.
    pub fn lock_saves(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock().expect("save lock poisoned")
    }

    pub fn persisted(&self) -> PersistedState {
        let guard = self.inner.lock().expect("state poisoned");
        PersistedState {
            tasks: guard.tasks.clone(),
            plans: guard.plans.clone(),
        }
    }

    pub fn replace(&self, persisted: PersistedState) {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.tasks = persisted.tasks;
        guard.plans = persisted.plans;
    }

    pub fn tasks(&self) -> Vec<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        guard.tasks.clone()
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        guard.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn plans(&self) -> String {
        let guard = self.inner.lock().expect("state poisoned");
        guard.plans.clone()
    }

    /// Returns `None` when `text` is blank after trimming.
    pub fn create_task(&self, text: &str, priority: Priority) -> Option<Task> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let now = Utc::now();
        let mut guard = self.inner.lock().expect("state poisoned");
        // Millisecond clock ids; bump past the newest id so two creates in one tick differ.
        let newest = guard.tasks.iter().map(|t| t.id).max();
        let id = match newest {
            Some(last) if last >= now.timestamp_millis() => last + 1,
            _ => now.timestamp_millis(),
        };
        let task = Task {
            id,
            text: text.to_string(),
            priority,
            completed: false,
            created_at: now,
            comments: String::new(),
            attachments: Vec::new(),
        };
        guard.tasks.push(task.clone());
        Some(task)
    }

    pub fn toggle_completed(&self, task_id: TaskId) -> Option<Task> {
        let mut guard = self.inner.lock().expect("state poisoned");
        let task = guard.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.completed = !task.completed;
        Some(task.clone())
    }

    /// Returns the task only when its text actually changed.
    pub fn edit_task(&self, task_id: TaskId, new_text: &str) -> Option<Task> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return None;
        }
        let mut guard = self.inner.lock().expect("state poisoned");
        let task = guard.tasks.iter_mut().find(|t| t.id == task_id)?;
        if task.text == new_text {
            return None;
        }
        task.text = new_text.to_string();
        Some(task.clone())
    }

    pub fn delete_task(&self, task_id: TaskId) -> bool {
        let mut guard = self.inner.lock().expect("state poisoned");
        let before = guard.tasks.len();
        guard.tasks.retain(|task| task.id != task_id);
        guard.tasks.len() != before
    }

    pub fn set_comment(&self, task_id: TaskId, text: &str) -> Option<Task> {
        let mut guard = self.inner.lock().expect("state poisoned");
        let task = guard.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.comments = text.trim().to_string();
        Some(task.clone())
    }

    pub fn clear_completed(&self) -> usize {
        let mut guard = self.inner.lock().expect("state poisoned");
        let before = guard.tasks.len();
        guard.tasks.retain(|task| !task.completed);
        before - guard.tasks.len()
    }

    pub fn clear_all(&self) -> usize {
        let mut guard = self.inner.lock().expect("state poisoned");
        let removed = guard.tasks.len();
        guard.tasks.clear();
        removed
    }

    pub fn filter(&self, filter: TaskFilter) -> Vec<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        filter_tasks(&guard.tasks, filter).cloned().collect()
    }

    pub fn current_filter(&self) -> TaskFilter {
        let guard = self.inner.lock().expect("state poisoned");
        guard.current_filter
    }

    pub fn set_filter(&self, filter: TaskFilter) {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.current_filter = filter;
    }

    pub fn visible_tasks(&self) -> Vec<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        filter_tasks(&guard.tasks, guard.current_filter)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let guard = self.inner.lock().expect("state poisoned");
        TaskStats::from_tasks(&guard.tasks)
    }

    /// Stored verbatim; plans are not trimmed.
    pub fn set_plans(&self, text: &str) {
        let mut guard = self.inner.lock().expect("state poisoned");
        guard.plans = text.to_string();
    }

    /// Looks the task up again by id; returns `false` if it was deleted meanwhile.
    pub fn add_attachment(&self, task_id: TaskId, attachment: Attachment) -> bool {
        let mut guard = self.inner.lock().expect("state poisoned");
        match guard.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                task.attachments.push(attachment);
                true
            }
            None => false,
        }
    }

    pub fn remove_attachment(&self, task_id: TaskId, attachment_id: AttachmentId) -> bool {
        let mut guard = self.inner.lock().expect("state poisoned");
        let Some(task) = guard.tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };
        let before = task.attachments.len();
        task.attachments.retain(|a| a.id != attachment_id);
        task.attachments.len() != before
    }

    pub fn find_attachment(
        &self,
        task_id: TaskId,
        attachment_id: AttachmentId,
    ) -> Option<Attachment> {
        let guard = self.inner.lock().expect("state poisoned");
        guard
            .tasks
            .iter()
            .find(|t| t.id == task_id)?
            .attachments
            .iter()
            .find(|a| a.id == attachment_id)
            .cloned()
    }
}

#[derive(Debug)]
struct AppData {
    tasks: Vec<Task>,
    plans: String,
    current_filter: TaskFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_attachment(id: f64) -> Attachment {
        Attachment {
            id: AttachmentId(id),
            name: format!("file-{id}.txt"),
            mime_type: "text/plain".to_string(),
            size: 2,
            data: "data:text/plain;base64,aGk=".to_string(),
        }
    }

    fn make_state() -> AppState {
        AppState::new(PersistedState::default(), TaskFilter::All)
    }

    #[test]
    fn create_trims_text_and_appends_pending_task() {
        let state = make_state();
        let task = state.create_task("  buy milk  ", Priority::Low).expect("created");
        assert_eq!(task.text, "buy milk");
        assert_eq!(task.priority, Priority::Low);
        assert!(!task.completed);
        assert!(task.comments.is_empty());
        assert!(task.attachments.is_empty());
        assert_eq!(state.tasks(), vec![task]);
    }

    #[test]
    fn create_with_blank_text_is_a_no_op() {
        let state = make_state();
        assert!(state.create_task("", Priority::High).is_none());
        assert!(state.create_task("   \n\t", Priority::High).is_none());
        assert!(state.tasks().is_empty());
    }

    #[test]
    fn create_assigns_unique_increasing_ids_within_one_millisecond() {
        let state = make_state();
        let ids: Vec<TaskId> = (0..50)
            .map(|i| state.create_task(&format!("t{i}"), Priority::Medium).unwrap().id)
            .collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let state = make_state();
        let task = state.create_task("a", Priority::Medium).unwrap();
        assert!(state.toggle_completed(task.id).unwrap().completed);
        assert!(!state.toggle_completed(task.id).unwrap().completed);
        assert!(state.toggle_completed(task.id + 999).is_none());
    }

    #[test]
    fn edit_replaces_only_changed_non_blank_text() {
        let state = make_state();
        let task = state.create_task("draft", Priority::Medium).unwrap();
        assert!(state.edit_task(task.id, "   ").is_none());
        assert!(state.edit_task(task.id, " draft ").is_none());
        assert!(state.edit_task(task.id + 1, "other").is_none());
        let edited = state.edit_task(task.id, "  final  ").expect("edited");
        assert_eq!(edited.text, "final");
        assert_eq!(edited.created_at, task.created_at);
        assert_eq!(state.task(task.id).unwrap().text, "final");
    }

    #[test]
    fn delete_removes_matching_task_only() {
        let state = make_state();
        let a = state.create_task("a", Priority::Medium).unwrap();
        let b = state.create_task("b", Priority::Medium).unwrap();
        assert!(state.delete_task(a.id));
        assert!(!state.delete_task(a.id));
        assert_eq!(state.tasks(), vec![b]);
    }

    #[test]
    fn set_comment_overwrites_and_clears() {
        let state = make_state();
        let task = state.create_task("a", Priority::Medium).unwrap();
        assert_eq!(state.set_comment(task.id, "  first ").unwrap().comments, "first");
        assert_eq!(state.set_comment(task.id, "second").unwrap().comments, "second");
        assert_eq!(state.set_comment(task.id, "   ").unwrap().comments, "");
        assert!(state.set_comment(task.id + 1, "x").is_none());
    }

    #[test]
    fn clear_completed_keeps_pending_tasks_in_order() {
        let state = make_state();
        let a = state.create_task("a", Priority::Medium).unwrap();
        let b = state.create_task("b", Priority::Medium).unwrap();
        let c = state.create_task("c", Priority::Medium).unwrap();
        let d = state.create_task("d", Priority::Medium).unwrap();
        state.toggle_completed(b.id);
        state.toggle_completed(d.id);

        assert_eq!(state.clear_completed(), 2);
        let ids: Vec<TaskId> = state.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(state.clear_completed(), 0);
        assert_eq!(state.tasks().len(), 2);
    }

    #[test]
    fn clear_all_empties_tasks_but_keeps_plans() {
        let state = make_state();
        state.create_task("a", Priority::Medium);
        state.create_task("b", Priority::Medium);
        state.set_plans("keep");
        assert_eq!(state.clear_all(), 2);
        assert!(state.tasks().is_empty());
        assert_eq!(state.plans(), "keep");
        assert_eq!(state.clear_all(), 0);
    }

    #[test]
    fn filters_and_stats_match_scenario() {
        let state = make_state();
        let a = state.create_task("A", Priority::High).unwrap();
        let b = state.create_task("B", Priority::Low).unwrap();
        state.toggle_completed(b.id);

        let ids = |filter| state.filter(filter).iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(TaskFilter::Pending), vec![a.id]);
        assert_eq!(ids(TaskFilter::Completed), vec![b.id]);
        assert_eq!(ids(TaskFilter::High), vec![a.id]);
        assert_eq!(ids(TaskFilter::All), vec![a.id, b.id]);
        assert_eq!(
            state.stats(),
            TaskStats {
                total: 2,
                completed: 1,
                pending: 1
            }
        );
    }

    #[test]
    fn current_filter_drives_visible_tasks() {
        let state = AppState::new(PersistedState::default(), TaskFilter::Completed);
        let a = state.create_task("A", Priority::High).unwrap();
        assert!(state.visible_tasks().is_empty());
        state.set_filter(TaskFilter::High);
        assert_eq!(state.current_filter(), TaskFilter::High);
        assert_eq!(state.visible_tasks(), vec![a]);
        assert!(state.persisted().tasks.len() == 1);
    }

    #[test]
    fn plans_are_stored_verbatim() {
        let state = make_state();
        state.set_plans("  spaced  \n");
        assert_eq!(state.plans(), "  spaced  \n");
        assert_eq!(state.persisted().plans, "  spaced  \n");
    }

    #[test]
    fn attachments_are_added_found_and_removed_by_id() {
        let state = make_state();
        let task = state.create_task("a", Priority::Medium).unwrap();
        assert!(state.add_attachment(task.id, make_attachment(1.5)));
        assert!(state.add_attachment(task.id, make_attachment(2.5)));
        assert!(!state.add_attachment(task.id + 1, make_attachment(3.5)));

        let found = state.find_attachment(task.id, AttachmentId(2.5)).unwrap();
        assert_eq!(found.name, "file-2.5.txt");
        assert!(state.find_attachment(task.id, AttachmentId(9.0)).is_none());

        assert!(state.remove_attachment(task.id, AttachmentId(1.5)));
        assert!(!state.remove_attachment(task.id, AttachmentId(1.5)));
        assert!(!state.remove_attachment(task.id + 1, AttachmentId(2.5)));
        let names: Vec<String> = state
            .task(task.id)
            .unwrap()
            .attachments
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["file-2.5.txt".to_string()]);
    }

    #[test]
    fn deleting_task_drops_its_attachments_and_blocks_late_adds() {
        let state = make_state();
        let task = state.create_task("a", Priority::Medium).unwrap();
        state.add_attachment(task.id, make_attachment(1.0));
        state.delete_task(task.id);
        assert!(!state.add_attachment(task.id, make_attachment(2.0)));
        assert!(state.find_attachment(task.id, AttachmentId(1.0)).is_none());
    }

    #[test]
    fn replace_swaps_persisted_content() {
        let state = make_state();
        state.create_task("old", Priority::Medium);
        state.replace(PersistedState {
            tasks: Vec::new(),
            plans: "fresh".to_string(),
        });
        assert!(state.tasks().is_empty());
        assert_eq!(state.plans(), "fresh");
    }
}
