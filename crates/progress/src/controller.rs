//! Progress controller - the wizard state machine.
//!
//! Sits between a multi-step form UI and a [`ProgressStore`]:
//!
//! ```text
//! UI step → next_step(data) → merge → upsert → advance step → UI re-renders
//! ```
//!
//! Answers are merged before they are persisted and the step pointer only
//! moves once the store has confirmed the write. A failed write leaves the
//! controller exactly as it was before the call.
//!
//! Fields edited with `update_field` while a write is in flight are laid back
//! over the stored answers once the write lands. Step navigation is frozen
//! while saving.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use formkeep_core::{FormData, FormProgress, FormType, StepRange, Time, UserId};
use formkeep_storage::{ProgressStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ProgressError;
use crate::identity::IdentityWatch;
use crate::notify::{Notice, Notifier, TracingNotifier};

/// Coarse state shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    /// Saved progress is being fetched
    Loading,
    /// Ready for input
    Idle,
    /// A write is in flight
    Saving,
}

/// How a load ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No user is bound; state is local only
    Anonymous,
    /// No saved record; starting on step 1
    Fresh,
    /// A saved record was restored
    Resumed,
    /// The store failed; starting on step 1
    Failed(ProgressError),
    /// A newer load started before this one finished; nothing was applied
    Superseded,
}

/// Snapshot of everything a step indicator, navigation buttons and a submit
/// action need.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    /// Wizard being driven
    pub form_type: FormType,
    /// Bound user (None for anonymous sessions)
    pub user_id: Option<UserId>,
    /// Controller state
    pub state: ControllerState,
    /// Visible step (1-based)
    pub current_step: u32,
    /// Number of steps
    pub total_steps: u32,
    /// Answers so far
    pub data: FormData,
    /// Whether the final submission succeeded
    pub is_completed: bool,
    /// Last persisted mutation
    pub updated_at: Option<Time>,
    /// `state == Loading`
    pub is_loading: bool,
    /// `state == Saving`
    pub is_saving: bool,
}

type CompletionCallback = Box<dyn Fn(&ProgressView) + Send + Sync>;

struct Inner {
    state: ControllerState,
    user_id: Option<UserId>,
    load_seq: u64,
    current_step: u32,
    data: FormData,
    is_completed: bool,
    updated_at: Option<Time>,
    pending: Option<FormData>,
    /// Fields set locally while the current write was in flight
    edited_while_saving: Option<FormData>,
}

impl Inner {
    fn clear(&mut self) {
        self.current_step = 1;
        self.data = FormData::new();
        self.is_completed = false;
        self.updated_at = None;
        self.pending = None;
        self.edited_while_saving = None;
    }
}

enum Target {
    Stay,
    Step(u32),
    Next,
    Last,
}

enum WritePlan {
    Local,
    Remote(FormProgress),
}

/// Returns the controller to `Idle` if a write future is dropped mid-flight,
/// and wakes anyone waiting for the write to end.
struct SavingGuard<'a> {
    inner: &'a Mutex<Inner>,
    idle: &'a Notify,
    armed: bool,
}

impl SavingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.state == ControllerState::Saving {
                inner.state = ControllerState::Idle;
                inner.edited_while_saving = None;
            }
        }
        self.idle.notify_waiters();
    }
}

/// Why a store call did not produce a value.
enum StoreFailure {
    TimedOut(Duration),
    Backend(StorageError),
}

impl StoreFailure {
    /// Short cause suitable for showing to a user.
    fn summary(&self) -> String {
        match self {
            StoreFailure::TimedOut(_) => "storage did not respond in time",
            StoreFailure::Backend(StorageError::Unavailable(_)) => "storage is unavailable",
            StoreFailure::Backend(_) => "storage could not process the request",
        }
        .to_string()
    }
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreFailure::TimedOut(limit) => {
                write!(f, "no response within {}s", limit.as_secs_f32())
            }
            StoreFailure::Backend(e) => e.fmt(f),
        }
    }
}

/// Drives one wizard for one (possibly absent) user.
pub struct ProgressController<S: ProgressStore + ?Sized> {
    store: Arc<S>,
    identity: IdentityWatch,
    form_type: FormType,
    config: ControllerConfig,
    notifier: Arc<dyn Notifier>,
    on_complete: Option<CompletionCallback>,
    inner: Mutex<Inner>,
    idle: Notify,
}

impl<S: ProgressStore + ?Sized> ProgressController<S> {
    /// Create a controller in the `Loading` state. Call [`load`](Self::load)
    /// once mounted.
    pub fn new(
        store: Arc<S>,
        identity: IdentityWatch,
        form_type: impl Into<FormType>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            identity,
            form_type: form_type.into(),
            config,
            notifier: Arc::new(TracingNotifier),
            on_complete: None,
            inner: Mutex::new(Inner {
                state: ControllerState::Loading,
                user_id: None,
                load_seq: 0,
                current_step: 1,
                data: FormData::new(),
                is_completed: false,
                updated_at: None,
                pending: None,
                edited_while_saving: None,
            }),
            idle: Notify::new(),
        }
    }

    /// Set the notice sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register the callback run after a successful final submission.
    pub fn on_complete(mut self, callback: impl Fn(&ProgressView) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn range(&self) -> StepRange {
        self.config.total_steps
    }

    fn saving_guard(&self) -> SavingGuard<'_> {
        SavingGuard {
            inner: &self.inner,
            idle: &self.idle,
            armed: true,
        }
    }

    // === Lifecycle ===

    /// Fetch saved progress for the current user.
    ///
    /// Store failures are not fatal: the controller starts fresh and the
    /// failure is reported through the outcome and the notifier.
    pub async fn load(&self) -> Result<LoadOutcome, ProgressError> {
        let user_id = self.identity.current();
        let seq = {
            let mut inner = self.lock();
            if inner.state == ControllerState::Saving {
                return Err(ProgressError::Busy);
            }
            inner.load_seq += 1;
            inner.state = ControllerState::Loading;
            inner.user_id = user_id.clone();
            inner.load_seq
        };

        let Some(user_id) = user_id else {
            let mut inner = self.lock();
            if inner.load_seq == seq {
                inner.clear();
                inner.state = ControllerState::Idle;
            }
            debug!(form = %self.form_type, "no user bound, progress stays local");
            return Ok(LoadOutcome::Anonymous);
        };

        let result = self
            .call_store(self.store.load(&user_id, &self.form_type))
            .await;

        let mut inner = self.lock();
        if inner.load_seq != seq {
            debug!(user = %user_id, form = %self.form_type, "discarding superseded load");
            return Ok(LoadOutcome::Superseded);
        }
        inner.clear();
        inner.state = ControllerState::Idle;

        let outcome = match result {
            Ok(Some(record)) => {
                inner.current_step = self.range().clamp(record.current_step);
                inner.data = record.data;
                inner.is_completed = record.is_completed;
                inner.updated_at = Some(record.updated_at);
                info!(
                    user = %user_id,
                    form = %self.form_type,
                    step = inner.current_step,
                    completed = inner.is_completed,
                    "resumed saved progress"
                );
                LoadOutcome::Resumed
            }
            Ok(None) => {
                debug!(user = %user_id, form = %self.form_type, "no saved progress");
                LoadOutcome::Fresh
            }
            Err(message) => {
                drop(inner);
                warn!(user = %user_id, form = %self.form_type, error = %message, "load failed, starting fresh");
                self.notifier.notify(&Notice::error(
                    "Your saved progress could not be restored; starting from the first step.",
                ));
                return Ok(LoadOutcome::Failed(ProgressError::Load(message.summary())));
            }
        };
        Ok(outcome)
    }

    /// Reload if the watched user differs from the one the last load used.
    pub async fn refresh_identity(&self) -> Result<Option<LoadOutcome>, ProgressError> {
        let current = self.identity.current();
        let stale = {
            let inner = self.lock();
            inner.load_seq == 0 || inner.user_id != current
        };
        if !stale {
            return Ok(None);
        }
        info!(form = %self.form_type, user = ?current, "identity changed, reloading progress");
        self.load().await.map(Some)
    }

    /// Reload on every identity change until the identity source goes away.
    ///
    /// A change that arrives while a write is in flight is applied as soon as
    /// that write ends.
    pub async fn follow_identity(&self) {
        let mut watch = self.identity.clone();
        while watch.changed().await {
            self.reload_when_idle().await;
        }
    }

    async fn reload_when_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            // register before checking state so a write ending in between is not missed
            idle.as_mut().enable();

            match self.refresh_identity().await {
                Err(ProgressError::Busy) => {
                    debug!(form = %self.form_type, "identity changed during a write, waiting");
                    idle.await;
                }
                Err(e) => {
                    warn!(form = %self.form_type, error = %e, "could not reload after identity change");
                    return;
                }
                Ok(_) => return,
            }
        }
    }

    /// A clone of the injected identity watch.
    pub fn identity(&self) -> IdentityWatch {
        self.identity.clone()
    }

    // === Persisting operations ===

    /// Merge `step_data` and persist it, landing on `target_step` (default:
    /// the current step; out-of-range targets are clamped).
    ///
    /// On failure nothing changes and `step_data` is kept in
    /// [`pending_data`](Self::pending_data) for a retry.
    pub async fn save_progress(
        &self,
        step_data: FormData,
        target_step: Option<u32>,
    ) -> Result<(), ProgressError> {
        let target = match target_step {
            Some(step) => Target::Step(step),
            None => Target::Stay,
        };
        self.write(step_data, target, false).await.map(|_| ())
    }

    /// Persist `step_data` and move forward one step.
    ///
    /// The step pointer only moves when the write succeeded; returns the new
    /// step.
    pub async fn next_step(&self, step_data: FormData) -> Result<u32, ProgressError> {
        self.write(step_data, Target::Next, false)
            .await
            .map(|view| view.current_step)
    }

    /// Persist `final_data` as the finished submission.
    ///
    /// On success the completion callback runs once. On failure the form
    /// stays incomplete and resumable.
    pub async fn complete(&self, final_data: FormData) -> Result<ProgressView, ProgressError> {
        let view = self.write(final_data, Target::Last, true).await?;

        if let Some(callback) = &self.on_complete {
            callback(&view);
        }
        self.notifier.notify(&Notice::success("Your form has been submitted."));
        info!(user = ?view.user_id, form = %self.form_type, "form completed");
        Ok(view)
    }

    /// Delete saved progress and start over on step 1, completed or not.
    pub async fn reset(&self) -> Result<(), ProgressError> {
        let user_id = {
            let mut inner = self.lock();
            match inner.state {
                ControllerState::Loading => return Err(ProgressError::NotReady),
                ControllerState::Saving => return Err(ProgressError::Busy),
                ControllerState::Idle => {}
            }
            match inner.user_id.clone() {
                Some(user_id) => {
                    inner.state = ControllerState::Saving;
                    user_id
                }
                None => {
                    inner.clear();
                    return Ok(());
                }
            }
        };

        let mut guard = self.saving_guard();
        let result = self
            .call_store(self.store.delete(&user_id, &self.form_type))
            .await;

        let mut inner = self.lock();
        guard.disarm();
        inner.state = ControllerState::Idle;
        match result {
            Ok(()) => {
                inner.clear();
                info!(user = %user_id, form = %self.form_type, "progress reset");
                Ok(())
            }
            Err(message) => {
                inner.edited_while_saving = None;
                drop(inner);
                warn!(user = %user_id, form = %self.form_type, error = %message, "reset failed");
                self.notifier
                    .notify(&Notice::error("Your progress could not be cleared. Please try again."));
                Err(ProgressError::Reset(message.summary()))
            }
        }
    }

    async fn write(
        &self,
        step_data: FormData,
        target: Target,
        completing: bool,
    ) -> Result<ProgressView, ProgressError> {
        let (plan, target_step) = self.begin_write(&step_data, target, completing)?;
        let record = match plan {
            WritePlan::Local => return Ok(self.view()),
            WritePlan::Remote(record) => record,
        };

        let mut guard = self.saving_guard();
        let result = self.call_store(self.store.upsert(&record)).await;

        let mut inner = self.lock();
        guard.disarm();
        inner.state = ControllerState::Idle;
        match result {
            Ok(stored) => {
                inner.current_step = target_step;
                inner.data = match inner.edited_while_saving.take() {
                    Some(edits) => stored.data.merged(&edits),
                    None => stored.data,
                };
                inner.is_completed = stored.is_completed;
                inner.updated_at = Some(stored.updated_at);
                inner.pending = None;
                debug!(
                    user = %record.user_id,
                    form = %self.form_type,
                    step = target_step,
                    "progress saved"
                );
                drop(inner);
                Ok(self.view())
            }
            Err(message) => {
                inner.pending = Some(step_data);
                inner.edited_while_saving = None;
                drop(inner);
                warn!(
                    user = %record.user_id,
                    form = %self.form_type,
                    error = %message,
                    "progress write failed"
                );
                if completing {
                    self.notifier
                        .notify(&Notice::error("Your form could not be submitted. Please try again."));
                    Err(ProgressError::Complete(message.summary()))
                } else {
                    self.notifier
                        .notify(&Notice::error("Your progress could not be saved. Please try again."));
                    Err(ProgressError::Save(message.summary()))
                }
            }
        }
    }

    /// Check guards, compute the merged record and enter `Saving`, all under
    /// one lock.
    fn begin_write(
        &self,
        step_data: &FormData,
        target: Target,
        completing: bool,
    ) -> Result<(WritePlan, u32), ProgressError> {
        let range = self.range();
        let mut inner = self.lock();
        match inner.state {
            ControllerState::Loading => return Err(ProgressError::NotReady),
            ControllerState::Saving => return Err(ProgressError::Busy),
            ControllerState::Idle => {}
        }
        if inner.is_completed {
            return Err(ProgressError::Completed);
        }

        let target_step = match target {
            Target::Stay => inner.current_step,
            Target::Step(step) => range.clamp(step),
            Target::Next => range.next(inner.current_step),
            Target::Last => range.last(),
        };
        let merged = inner.data.merged(step_data);

        let Some(user_id) = inner.user_id.clone() else {
            inner.current_step = target_step;
            inner.data = merged;
            inner.is_completed = completing;
            inner.pending = None;
            return Ok((WritePlan::Local, target_step));
        };

        inner.state = ControllerState::Saving;
        inner.edited_while_saving = None;
        let record = FormProgress {
            user_id,
            form_type: self.form_type.clone(),
            current_step: target_step,
            data: merged,
            is_completed: completing,
            updated_at: inner.updated_at.unwrap_or_else(chrono::Utc::now),
        };
        Ok((WritePlan::Remote(record), target_step))
    }

    async fn call_store<T, F>(&self, call: F) -> Result<T, StoreFailure>
    where
        F: Future<Output = formkeep_storage::Result<T>>,
    {
        match self.config.store_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(StoreFailure::Backend),
                Err(_) => Err(StoreFailure::TimedOut(limit)),
            },
            None => call.await.map_err(StoreFailure::Backend),
        }
    }

    // === Local-only operations ===

    /// Move back one step without persisting. Returns the new step.
    ///
    /// While a write is in flight the step is left alone, since the write
    /// decides where the wizard lands.
    pub fn prev_step(&self) -> u32 {
        let range = self.range();
        let mut inner = self.lock();
        if inner.state != ControllerState::Saving {
            inner.current_step = range.prev(inner.current_step);
        }
        inner.current_step
    }

    /// Jump to `step` without persisting. Returns `false`, changing nothing,
    /// when `step` is out of range or a write is in flight.
    pub fn go_to_step(&self, step: u32) -> bool {
        if !self.range().contains(step) {
            return false;
        }
        let mut inner = self.lock();
        if inner.state == ControllerState::Saving {
            return false;
        }
        inner.current_step = step;
        true
    }

    /// Set one field in memory only. Use `save_progress` to persist.
    ///
    /// Edits made during a write survive it and are kept on top of the
    /// stored answers.
    pub fn update_field(&self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        let mut inner = self.lock();
        if inner.state == ControllerState::Saving {
            inner
                .edited_while_saving
                .get_or_insert_with(FormData::new)
                .insert(name.clone(), value.clone());
        }
        inner.data.insert(name, value);
    }

    // === Accessors ===

    /// Full snapshot for rendering.
    pub fn view(&self) -> ProgressView {
        let inner = self.lock();
        ProgressView {
            form_type: self.form_type.clone(),
            user_id: inner.user_id.clone(),
            state: inner.state,
            current_step: inner.current_step,
            total_steps: self.range().total(),
            data: inner.data.clone(),
            is_completed: inner.is_completed,
            updated_at: inner.updated_at,
            is_loading: inner.state == ControllerState::Loading,
            is_saving: inner.state == ControllerState::Saving,
        }
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        self.lock().state
    }

    /// Visible step.
    pub fn current_step(&self) -> u32 {
        self.lock().current_step
    }

    /// Number of steps.
    pub fn total_steps(&self) -> u32 {
        self.range().total()
    }

    /// Answers so far.
    pub fn data(&self) -> FormData {
        self.lock().data.clone()
    }

    /// Answers deserialized into a typed record.
    pub fn data_as<T: DeserializeOwned>(&self) -> formkeep_core::Result<T> {
        self.lock().data.to_typed()
    }

    /// Whether the final submission succeeded.
    pub fn is_completed(&self) -> bool {
        self.lock().is_completed
    }

    /// Whether a load is in progress.
    pub fn is_loading(&self) -> bool {
        self.state() == ControllerState::Loading
    }

    /// Whether a write is in flight.
    pub fn is_saving(&self) -> bool {
        self.state() == ControllerState::Saving
    }

    /// Step data of the last failed write, kept for re-submission.
    pub fn pending_data(&self) -> Option<FormData> {
        self.lock().pending.clone()
    }

    /// Wizard this controller drives.
    pub fn form_type(&self) -> &FormType {
        &self.form_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySource;
    use crate::notify::NoticeLevel;
    use async_trait::async_trait;
    use formkeep_storage::{MemoryStorage, StorageError};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Memory store that can be switched into an outage.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStorage,
        failing: AtomicBool,
        upserts: AtomicUsize,
    }

    impl FlakyStore {
        fn outage(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        fn check(&self) -> formkeep_storage::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StorageError::Unavailable("backend offline".into()))
            } else {
                Ok(())
            }
        }

        async fn stored(&self, user: &str, form: &str) -> Option<FormProgress> {
            self.inner.load(&user.into(), &form.into()).await.unwrap()
        }
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn load(&self, user_id: &UserId, form_type: &FormType) -> formkeep_storage::Result<Option<FormProgress>> {
            self.check()?;
            self.inner.load(user_id, form_type).await
        }
        async fn upsert(&self, record: &FormProgress) -> formkeep_storage::Result<FormProgress> {
            self.check()?;
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(record).await
        }
        async fn delete(&self, user_id: &UserId, form_type: &FormType) -> formkeep_storage::Result<()> {
            self.check()?;
            self.inner.delete(user_id, form_type).await
        }
        async fn list(&self, user_id: &UserId) -> formkeep_storage::Result<Vec<FormProgress>> {
            self.check()?;
            self.inner.list(user_id).await
        }
    }

    /// Upserts wait until the gate is opened.
    #[derive(Default)]
    struct GateStore {
        inner: MemoryStorage,
        gate: Notify,
    }

    #[async_trait]
    impl ProgressStore for GateStore {
        async fn load(&self, user_id: &UserId, form_type: &FormType) -> formkeep_storage::Result<Option<FormProgress>> {
            self.inner.load(user_id, form_type).await
        }
        async fn upsert(&self, record: &FormProgress) -> formkeep_storage::Result<FormProgress> {
            self.gate.notified().await;
            self.inner.upsert(record).await
        }
        async fn delete(&self, user_id: &UserId, form_type: &FormType) -> formkeep_storage::Result<()> {
            self.inner.delete(user_id, form_type).await
        }
        async fn list(&self, user_id: &UserId) -> formkeep_storage::Result<Vec<FormProgress>> {
            self.inner.list(user_id).await
        }
    }

    /// Writes never return.
    struct HangingStore;

    #[async_trait]
    impl ProgressStore for HangingStore {
        async fn load(&self, _user_id: &UserId, _form_type: &FormType) -> formkeep_storage::Result<Option<FormProgress>> {
            Ok(None)
        }
        async fn upsert(&self, _record: &FormProgress) -> formkeep_storage::Result<FormProgress> {
            std::future::pending().await
        }
        async fn delete(&self, _user_id: &UserId, _form_type: &FormType) -> formkeep_storage::Result<()> {
            std::future::pending().await
        }
        async fn list(&self, _user_id: &UserId) -> formkeep_storage::Result<Vec<FormProgress>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        fn errors(&self) -> usize {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter(|n| n.level == NoticeLevel::Error)
                .count()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    fn config(total: u32) -> ControllerConfig {
        ControllerConfig::new(StepRange::new(total).unwrap())
    }

    async fn mounted<S: ProgressStore + ?Sized>(
        store: Arc<S>,
        user: Option<&str>,
        total: u32,
    ) -> (ProgressController<S>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = ProgressController::new(
            store,
            IdentityWatch::fixed(user.map(UserId::from)),
            "structuring",
            config(total),
        )
        .with_notifier(notifier.clone());
        controller.load().await.unwrap();
        (controller, notifier)
    }

    #[tokio::test]
    async fn test_first_time_user_next_step_persists() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;
        assert_eq!(ctrl.current_step(), 1);

        let step = ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap();

        assert_eq!(step, 2);
        let view = ctrl.view();
        assert_eq!(view.current_step, 2);
        assert_eq!(view.data, FormData::new().with("name", "Alice"));
        assert!(!view.is_completed);

        let stored = store.stored("alice", "structuring").await.unwrap();
        assert_eq!(stored.current_step, 2);
        assert_eq!(stored.data.get("name"), Some(&json!("Alice")));
        assert!(!stored.is_completed);
    }

    #[tokio::test]
    async fn test_failed_next_step_does_not_advance() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, notifier) = mounted(store.clone(), Some("alice"), 3).await;
        ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap();
        assert_eq!(ctrl.current_step(), 2);

        store.outage(true);
        let err = ctrl
            .next_step(FormData::new().with("budget", 1000))
            .await
            .unwrap_err();

        // advancing here would silently drop the unsaved budget
        assert!(matches!(err, ProgressError::Save(_)));
        assert!(err.is_retryable());
        assert_eq!(ctrl.current_step(), 2);
        assert_eq!(ctrl.data(), FormData::new().with("name", "Alice"));
        assert_eq!(ctrl.pending_data(), Some(FormData::new().with("budget", 1000)));
        assert_eq!(ctrl.state(), ControllerState::Idle);
        assert_eq!(notifier.errors(), 1);
        assert_eq!(store.stored("alice", "structuring").await.unwrap().current_step, 2);

        store.outage(false);
        let retry = ctrl.pending_data().unwrap();
        assert_eq!(ctrl.next_step(retry).await.unwrap(), 3);
        assert_eq!(ctrl.data().get("budget"), Some(&json!(1000)));
        assert!(ctrl.pending_data().is_none());
    }

    #[tokio::test]
    async fn test_save_sequence_is_left_to_right_merge() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 4).await;

        ctrl.save_progress(FormData::new().with("name", "Alice").with("city", "Lyon"), None)
            .await
            .unwrap();
        ctrl.save_progress(FormData::new().with("city", "Paris"), Some(2))
            .await
            .unwrap();
        ctrl.save_progress(FormData::new().with("budget", 1000), Some(3))
            .await
            .unwrap();

        let expected = FormData::new()
            .with("name", "Alice")
            .with("city", "Paris")
            .with("budget", 1000);
        assert_eq!(ctrl.data(), expected);
        assert_eq!(store.stored("alice", "structuring").await.unwrap().data, expected);
        assert_eq!(ctrl.current_step(), 3);
    }

    #[tokio::test]
    async fn test_save_progress_defaults_to_current_step_and_clamps() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;

        ctrl.save_progress(FormData::new().with("a", 1), None).await.unwrap();
        assert_eq!(ctrl.current_step(), 1);

        ctrl.save_progress(FormData::new(), Some(42)).await.unwrap();
        assert_eq!(ctrl.current_step(), 3);
        assert_eq!(store.stored("alice", "structuring").await.unwrap().current_step, 3);
    }

    #[tokio::test]
    async fn test_complete_fires_callback_once() {
        let store = Arc::new(FlakyStore::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let ctrl = ProgressController::new(
            store.clone(),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3),
        )
        .on_complete(move |view| {
            assert!(view.is_completed);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ctrl.load().await.unwrap();
        ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap();
        ctrl.next_step(FormData::new().with("budget", 1000)).await.unwrap();
        assert_eq!(ctrl.current_step(), 3);

        let view = ctrl
            .complete(FormData::new().with("signature", "ok"))
            .await
            .unwrap();

        assert!(view.is_completed);
        assert_eq!(view.current_step, 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let stored = store.stored("alice", "structuring").await.unwrap();
        assert!(stored.is_completed);
        assert_eq!(stored.data.get("signature"), Some(&json!("ok")));

        assert_eq!(
            ctrl.complete(FormData::new()).await.unwrap_err(),
            ProgressError::Completed
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_is_monotonic() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 2).await;
        ctrl.complete(FormData::new().with("signature", "ok")).await.unwrap();
        let writes = store.upserts.load(Ordering::SeqCst);

        assert_eq!(
            ctrl.save_progress(FormData::new().with("name", "Mallory"), None)
                .await
                .unwrap_err(),
            ProgressError::Completed
        );
        assert_eq!(
            ctrl.next_step(FormData::new()).await.unwrap_err(),
            ProgressError::Completed
        );
        assert_eq!(store.upserts.load(Ordering::SeqCst), writes);
        assert!(store.stored("alice", "structuring").await.unwrap().is_completed);

        // a fresh session sees the frozen record too
        let (again, _) = mounted(store.clone(), Some("alice"), 2).await;
        assert!(again.is_completed());
        assert_eq!(
            again.save_progress(FormData::new(), None).await.unwrap_err(),
            ProgressError::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_complete_stays_resumable() {
        let store = Arc::new(FlakyStore::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let ctrl = ProgressController::new(
            store.clone(),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3),
        )
        .on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ctrl.load().await.unwrap();
        ctrl.go_to_step(3);

        store.outage(true);
        let err = ctrl
            .complete(FormData::new().with("signature", "ok"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::Complete(_)));
        assert!(!ctrl.is_completed());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(ctrl.data().get("signature").is_none());

        store.outage(false);
        ctrl.complete(ctrl.pending_data().unwrap()).await.unwrap();
        assert!(ctrl.is_completed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_completed_record() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;
        ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap();
        ctrl.complete(FormData::new().with("signature", "ok")).await.unwrap();

        ctrl.reset().await.unwrap();

        assert!(store.stored("alice", "structuring").await.is_none());
        let view = ctrl.view();
        assert_eq!(view.current_step, 1);
        assert!(view.data.is_empty());
        assert!(!view.is_completed);

        assert_eq!(ctrl.load().await.unwrap(), LoadOutcome::Fresh);
        assert_eq!(ctrl.current_step(), 1);
        // editable again after reset
        ctrl.save_progress(FormData::new().with("name", "Bob"), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reset_changes_nothing() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, notifier) = mounted(store.clone(), Some("alice"), 3).await;
        ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap();

        store.outage(true);
        assert!(matches!(ctrl.reset().await, Err(ProgressError::Reset(_))));
        assert_eq!(ctrl.current_step(), 2);
        assert_eq!(ctrl.data().len(), 1);
        assert_eq!(notifier.errors(), 1);
    }

    #[tokio::test]
    async fn test_local_navigation_never_persists() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 4).await;

        assert!(ctrl.go_to_step(4));
        assert_eq!(ctrl.prev_step(), 3);
        assert!(!ctrl.go_to_step(0));
        assert!(!ctrl.go_to_step(5));
        assert_eq!(ctrl.current_step(), 3);
        ctrl.update_field("draft", json!("typing..."));
        assert_eq!(ctrl.data().get("draft"), Some(&json!("typing...")));

        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
        assert!(store.stored("alice", "structuring").await.is_none());
    }

    #[tokio::test]
    async fn test_prev_step_stops_at_first() {
        let (ctrl, _) = mounted(Arc::new(FlakyStore::default()), Some("alice"), 3).await;
        assert_eq!(ctrl.prev_step(), 1);
        assert_eq!(ctrl.prev_step(), 1);
    }

    #[tokio::test]
    async fn test_load_resumes_saved_record() {
        let store = Arc::new(FlakyStore::default());
        let mut record = FormProgress::new("alice".into(), "structuring".into());
        record.current_step = 3;
        record.data = FormData::new().with("name", "Alice");
        store.inner.upsert(&record).await.unwrap();

        let ctrl = ProgressController::new(
            store.clone(),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(4),
        );
        assert!(ctrl.is_loading());
        assert_eq!(ctrl.load().await.unwrap(), LoadOutcome::Resumed);
        assert!(!ctrl.is_loading());
        assert_eq!(ctrl.current_step(), 3);
        assert_eq!(ctrl.data().get("name"), Some(&json!("Alice")));
        assert!(ctrl.view().updated_at.is_some());
    }

    #[tokio::test]
    async fn test_load_clamps_out_of_range_step() {
        let store = Arc::new(FlakyStore::default());
        let mut record = FormProgress::new("alice".into(), "structuring".into());
        record.current_step = 9;
        store.inner.upsert(&record).await.unwrap();

        let (ctrl, _) = mounted(store, Some("alice"), 4).await;
        assert_eq!(ctrl.current_step(), 4);
    }

    #[tokio::test]
    async fn test_load_failure_starts_fresh() {
        let store = Arc::new(FlakyStore::default());
        store.outage(true);
        let notifier = Arc::new(RecordingNotifier::default());
        let ctrl = ProgressController::new(
            store.clone(),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3),
        )
        .with_notifier(notifier.clone());

        let outcome = ctrl.load().await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Failed(ProgressError::Load(_))));
        assert_eq!(ctrl.state(), ControllerState::Idle);
        assert_eq!(ctrl.current_step(), 1);
        assert_eq!(notifier.errors(), 1);
    }

    #[tokio::test]
    async fn test_writes_before_load_are_rejected() {
        let ctrl = ProgressController::new(
            Arc::new(FlakyStore::default()),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3),
        );
        assert_eq!(
            ctrl.next_step(FormData::new()).await.unwrap_err(),
            ProgressError::NotReady
        );
        assert_eq!(ctrl.reset().await.unwrap_err(), ProgressError::NotReady);
    }

    #[tokio::test]
    async fn test_anonymous_session_stays_local() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), None, 3).await;
        assert!(ctrl.view().user_id.is_none());

        assert_eq!(ctrl.next_step(FormData::new().with("name", "Alice")).await.unwrap(), 2);
        assert_eq!(ctrl.data().get("name"), Some(&json!("Alice")));
        let view = ctrl.complete(FormData::new().with("signature", "ok")).await.unwrap();
        assert!(view.is_completed);
        ctrl.reset().await.unwrap();
        assert_eq!(ctrl.current_step(), 1);

        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_identity_arrival_triggers_load() {
        let store = Arc::new(FlakyStore::default());
        let mut record = FormProgress::new("alice".into(), "structuring".into());
        record.current_step = 2;
        store.inner.upsert(&record).await.unwrap();

        let (source, watch) = IdentitySource::new(None);
        let ctrl = ProgressController::new(store.clone(), watch, "structuring", config(3));
        assert_eq!(ctrl.load().await.unwrap(), LoadOutcome::Anonymous);
        assert_eq!(ctrl.refresh_identity().await.unwrap(), None);

        source.sign_in("alice".into());
        assert_eq!(
            ctrl.refresh_identity().await.unwrap(),
            Some(LoadOutcome::Resumed)
        );
        assert_eq!(ctrl.current_step(), 2);
        assert_eq!(ctrl.view().user_id, Some(UserId::from("alice")));
    }

    #[tokio::test]
    async fn test_follow_identity_reloads_until_source_dropped() {
        let store = Arc::new(FlakyStore::default());
        let mut record = FormProgress::new("alice".into(), "structuring".into());
        record.current_step = 3;
        store.inner.upsert(&record).await.unwrap();

        let (source, watch) = IdentitySource::new(None);
        let ctrl = ProgressController::new(store.clone(), watch, "structuring", config(3));
        ctrl.load().await.unwrap();

        tokio::join!(ctrl.follow_identity(), async move {
            source.sign_in("alice".into());
            tokio::task::yield_now().await;
            drop(source);
        });

        assert_eq!(ctrl.current_step(), 3);
    }

    #[tokio::test]
    async fn test_second_write_while_saving_is_rejected() {
        let store = Arc::new(GateStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;

        let (first, second) = tokio::join!(
            ctrl.next_step(FormData::new().with("name", "Alice")),
            async {
                while !ctrl.is_saving() {
                    tokio::task::yield_now().await;
                }
                let second = ctrl
                    .save_progress(FormData::new().with("name", "Bob"), None)
                    .await;
                let reset = ctrl.reset().await;
                store.gate.notify_one();
                (second, reset)
            }
        );

        assert_eq!(first, Ok(2));
        assert_eq!(second.0, Err(ProgressError::Busy));
        assert_eq!(second.1, Err(ProgressError::Busy));
        assert_eq!(ctrl.data().get("name"), Some(&json!("Alice")));
        assert_eq!(ctrl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_sign_out_during_write_is_applied_after_it() {
        let store = Arc::new(GateStore::default());
        let (source, watch) = IdentitySource::new(Some("alice".into()));
        let ctrl = ProgressController::new(store.clone(), watch, "structuring", config(3));
        ctrl.load().await.unwrap();

        let (ctrl_ref, store_ref) = (&ctrl, &store);
        let session = async move {
            tokio::join!(
                ctrl_ref.follow_identity(),
                ctrl_ref.next_step(FormData::new().with("name", "Alice")),
                async move {
                    while !ctrl_ref.is_saving() {
                        tokio::task::yield_now().await;
                    }
                    source.sign_out();
                    for _ in 0..5 {
                        tokio::task::yield_now().await;
                    }
                    store_ref.gate.notify_one();
                    while ctrl_ref.view().user_id.is_some() {
                        tokio::task::yield_now().await;
                    }
                    drop(source);
                }
            )
        };
        let (_, saved, _) = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("sign-out was never applied");

        // the write started for alice still lands in her record
        assert_eq!(saved, Ok(2));
        let stored = store
            .inner
            .load(&"alice".into(), &"structuring".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_step, 2);

        let view = ctrl.view();
        assert_eq!(view.user_id, None);
        assert_eq!(view.state, ControllerState::Idle);
        assert_eq!(view.current_step, 1);
        assert!(view.data.is_empty());
    }

    #[tokio::test]
    async fn test_field_edited_during_write_survives_it() {
        let store = Arc::new(GateStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;

        let (saved, _) = tokio::join!(
            ctrl.next_step(FormData::new().with("name", "Alice")),
            async {
                while !ctrl.is_saving() {
                    tokio::task::yield_now().await;
                }
                ctrl.update_field("draft", json!("typed while saving"));
                ctrl.update_field("name", json!("Alicia"));
                // navigation is frozen until the write lands
                assert!(!ctrl.go_to_step(3));
                assert_eq!(ctrl.prev_step(), 1);
                store.gate.notify_one();
            }
        );

        assert_eq!(saved, Ok(2));
        assert_eq!(ctrl.current_step(), 2);
        assert_eq!(ctrl.data().get("draft"), Some(&json!("typed while saving")));
        assert_eq!(ctrl.data().get("name"), Some(&json!("Alicia")));

        // local edits stay local until the next save
        let stored = store
            .inner
            .load(&"alice".into(), &"structuring".into())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.data.get("draft").is_none());
        assert_eq!(stored.data.get("name"), Some(&json!("Alice")));
    }

    #[tokio::test]
    async fn test_store_failure_message_hides_backend_detail() {
        let store = Arc::new(FlakyStore::default());
        let (ctrl, _) = mounted(store.clone(), Some("alice"), 3).await;
        store.outage(true);

        let err = ctrl.next_step(FormData::new().with("a", 1)).await.unwrap_err();
        assert_eq!(err, ProgressError::Save("storage is unavailable".into()));
        assert!(!err.to_string().contains("backend offline"));

        assert_eq!(
            ctrl.reset().await.unwrap_err(),
            ProgressError::Reset("storage is unavailable".into())
        );
        assert_eq!(
            ctrl.load().await.unwrap(),
            LoadOutcome::Failed(ProgressError::Load("storage is unavailable".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_times_out() {
        let store = Arc::new(HangingStore);
        let ctrl = ProgressController::new(
            store,
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3).with_store_timeout(Some(Duration::from_secs(5))),
        );
        ctrl.load().await.unwrap();

        let err = ctrl
            .next_step(FormData::new().with("name", "Alice"))
            .await
            .unwrap_err();
        assert_eq!(err, ProgressError::Save("storage did not respond in time".into()));
        assert_eq!(ctrl.current_step(), 1);
        assert!(!ctrl.is_saving());
        assert!(ctrl.pending_data().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_write_returns_to_idle() {
        let ctrl = ProgressController::new(
            Arc::new(HangingStore),
            IdentityWatch::fixed(Some("alice".into())),
            "structuring",
            config(3).with_store_timeout(None),
        );
        ctrl.load().await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            ctrl.next_step(FormData::new().with("name", "Alice")),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(ctrl.state(), ControllerState::Idle);
        assert_eq!(ctrl.current_step(), 1);
        assert!(ctrl.data().is_empty());
    }

    #[tokio::test]
    async fn test_typed_data() {
        #[derive(serde::Deserialize)]
        struct Contact {
            name: String,
            budget: u32,
        }

        let (ctrl, _) = mounted(Arc::new(FlakyStore::default()), Some("alice"), 3).await;
        ctrl.next_step(FormData::new().with("name", "Alice").with("budget", 1000))
            .await
            .unwrap();
        let contact: Contact = ctrl.data_as().unwrap();
        assert_eq!(contact.name, "Alice");
        assert_eq!(contact.budget, 1000);
    }

    #[derive(Debug, Clone)]
    enum Nav {
        Next,
        Prev,
        Jump(u32),
    }

    fn nav() -> impl Strategy<Value = Nav> {
        prop_oneof![
            Just(Nav::Next),
            Just(Nav::Prev),
            (0u32..12).prop_map(Nav::Jump),
        ]
    }

    proptest! {
        #[test]
        fn prop_step_stays_in_range(total in 1u32..8, moves in proptest::collection::vec(nav(), 0..30)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let steps = runtime.block_on(async {
                let (ctrl, _) = mounted(Arc::new(MemoryStorage::new()), Some("alice"), total).await;
                let mut seen = vec![ctrl.current_step()];
                for m in moves {
                    match m {
                        Nav::Next => {
                            ctrl.next_step(FormData::new()).await.unwrap();
                        }
                        Nav::Prev => {
                            ctrl.prev_step();
                        }
                        Nav::Jump(n) => {
                            ctrl.go_to_step(n);
                        }
                    }
                    seen.push(ctrl.current_step());
                }
                seen
            });
            for step in steps {
                prop_assert!(step >= 1 && step <= total);
            }
        }
    }
}
