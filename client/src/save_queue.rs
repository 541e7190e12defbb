//! Save queue: single-flight, debounced persistence of one story's edits.
//!
//! Edits land in an in-memory draft holding only the fields that differ from
//! the last confirmed save. A debounced request takes the whole draft and
//! hands it to the [`SaveTarget`]. While that write is in flight, new edits
//! accumulate in a fresh draft and further requests only set a pending flag;
//! when the write finishes the pending request is drained once after a short
//! backoff. A failed write folds its changes back under any newer edits and
//! re-arms the debounce, unless the story itself is gone: then the edits are
//! dropped and the failure reported once.

use crate::config::SaveConfig;
use crate::error::{ClientError, Result};
use crate::timing::Debouncer;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use storyloom_engine::{text, Story, StoryChanges, MAX_CONTENT_CHARS};
use tokio::sync::{broadcast, watch};

/// Where confirmed edits go.
#[async_trait]
pub trait SaveTarget: Send + Sync + 'static {
    async fn persist(&self, story_id: &str, changes: &StoryChanges) -> Result<()>;
}

/// Queue state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Clean,
    Dirty,
    Saving,
}

/// What a save request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// A save was in flight; this request was folded into the pending flag.
    Queued,
    NothingToSave,
    Failed(String),
}

/// Notifications about finished save attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Saved { story_id: String },
    Failed { story_id: String, reason: String },
}

/// Field values as of the last confirmed save.
#[derive(Debug, Default)]
struct Baseline {
    title: String,
    scene_titles: HashMap<String, String>,
    scene_contents: HashMap<String, String>,
}

impl Baseline {
    fn from_story(story: &Story) -> Self {
        Self {
            title: story.title.clone(),
            scene_titles: story
                .scenes()
                .map(|s| (s.id.clone(), s.title.clone()))
                .collect(),
            scene_contents: story
                .scenes()
                .map(|s| (s.id.clone(), s.content.clone()))
                .collect(),
        }
    }

    fn confirm(&mut self, changes: &StoryChanges) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        for (scene_id, change) in &changes.scenes {
            if let Some(title) = &change.title {
                self.scene_titles.insert(scene_id.clone(), title.clone());
            }
            if let Some(content) = &change.content {
                self.scene_contents.insert(scene_id.clone(), content.clone());
            }
        }
    }
}

struct QueueState {
    draft: StoryChanges,
    baseline: Baseline,
    phase: SavePhase,
    pending: bool,
    last_error: Option<String>,
}

impl QueueState {
    /// Whether an edit restores the confirmed value. Always false while a
    /// save is in flight: that save may move the baseline.
    fn settled_matches(&self, check: impl FnOnce(&Baseline) -> bool) -> bool {
        self.phase != SavePhase::Saving && check(&self.baseline)
    }

    fn settle(&mut self) {
        self.phase = if self.draft.is_empty() {
            SavePhase::Clean
        } else {
            SavePhase::Dirty
        };
    }
}

struct QueueInner {
    story_id: String,
    target: Arc<dyn SaveTarget>,
    config: SaveConfig,
    state: Mutex<QueueState>,
    debouncer: Debouncer,
    attempts: watch::Sender<u64>,
    events: broadcast::Sender<SaveEvent>,
}

/// Save queue for one story.
#[derive(Clone)]
pub struct SaveQueue {
    inner: Arc<QueueInner>,
}

impl SaveQueue {
    /// Queue for `story` as last loaded from the store.
    pub fn new(story: &Story, target: Arc<dyn SaveTarget>, config: SaveConfig) -> Self {
        let (attempts, _) = watch::channel(0);
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(QueueInner {
                story_id: story.id.clone(),
                target,
                debouncer: Debouncer::new(config.debounce),
                config,
                state: Mutex::new(QueueState {
                    draft: StoryChanges::default(),
                    baseline: Baseline::from_story(story),
                    phase: SavePhase::Clean,
                    pending: false,
                    last_error: None,
                }),
                attempts,
                events,
            }),
        }
    }

    pub fn story_id(&self) -> &str {
        &self.inner.story_id
    }

    pub fn phase(&self) -> SavePhase {
        self.inner.state.lock().phase
    }

    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending
    }

    /// Unsaved edits exist, in the draft or in flight.
    pub fn is_dirty(&self) -> bool {
        self.phase() != SavePhase::Clean
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// A copy of the edits not yet handed to the target.
    pub fn draft(&self) -> StoryChanges {
        self.inner.state.lock().draft.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.inner.events.subscribe()
    }

    /// Record new scene content. Payloads over the cap are truncated.
    pub fn edit_scene_content(&self, scene_id: &str, mut content: String) {
        let kept = text::truncate_chars(&content, MAX_CONTENT_CHARS).len();
        if kept < content.len() {
            tracing::warn!(
                story_id = %self.inner.story_id,
                scene_id,
                "Scene content over {} characters truncated",
                MAX_CONTENT_CHARS
            );
            content.truncate(kept);
        }
        self.edit(|state| {
            let unchanged = state.settled_matches(|b| b.scene_contents.get(scene_id) == Some(&content));
            let entry = state.draft.scenes.entry(scene_id.to_string()).or_default();
            entry.content = (!unchanged).then_some(content);
        });
    }

    pub fn edit_scene_title(&self, scene_id: &str, title: String) {
        self.edit(|state| {
            let unchanged = state.settled_matches(|b| b.scene_titles.get(scene_id) == Some(&title));
            let entry = state.draft.scenes.entry(scene_id.to_string()).or_default();
            entry.title = (!unchanged).then_some(title);
        });
    }

    pub fn edit_story_title(&self, title: String) {
        self.edit(|state| {
            let unchanged = state.settled_matches(|b| b.title == title);
            state.draft.title = (!unchanged).then_some(title);
        });
    }

    fn edit(&self, apply: impl FnOnce(&mut QueueState)) {
        let dirty = {
            let mut state = self.inner.state.lock();
            apply(&mut state);
            state.draft.scenes.retain(|_, change| !change.is_empty());
            if state.phase != SavePhase::Saving {
                state.settle();
            }
            !state.draft.is_empty()
        };
        if dirty {
            self.schedule();
        }
    }

    /// Restart the debounce timer.
    pub fn schedule(&self) {
        let queue = self.clone();
        self.inner.debouncer.schedule(move || queue.request_save().map(|_| ()));
    }

    /// Save the draft now unless a save is already running.
    pub fn request_save(&self) -> BoxFuture<'static, SaveOutcome> {
        let queue = self.clone();
        async move { queue.run_save().await }.boxed()
    }

    async fn run_save(self) -> SaveOutcome {
        let inner = &self.inner;
        let changes = {
            let mut state = inner.state.lock();
            if state.phase == SavePhase::Saving {
                state.pending = true;
                return SaveOutcome::Queued;
            }
            if state.draft.is_empty() {
                state.phase = SavePhase::Clean;
                return SaveOutcome::NothingToSave;
            }
            state.phase = SavePhase::Saving;
            std::mem::take(&mut state.draft)
        };

        tracing::debug!(story_id = %inner.story_id, scenes = changes.scenes.len(), "Saving story");
        let result = inner.target.persist(&inner.story_id, &changes).await;

        let (outcome, drain, redirty) = {
            let mut state = inner.state.lock();
            let outcome = match result {
                Ok(()) => {
                    state.baseline.confirm(&changes);
                    state.last_error = None;
                    SaveOutcome::Saved
                }
                Err(ClientError::StoryNotFound(_)) => {
                    // Nothing left to save into; retrying cannot succeed.
                    let reason = format!("story {} no longer exists", inner.story_id);
                    tracing::warn!(story_id = %inner.story_id, "Save dropped; story is gone");
                    state.draft = StoryChanges::default();
                    state.pending = false;
                    state.last_error = Some(reason.clone());
                    SaveOutcome::Failed(reason)
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(story_id = %inner.story_id, error = %reason, "Save failed; will retry");
                    let mut newer = std::mem::take(&mut state.draft);
                    newer.absorb_older(changes);
                    state.draft = newer;
                    state.last_error = Some(reason.clone());
                    SaveOutcome::Failed(reason)
                }
            };
            state.settle();
            let drain = std::mem::take(&mut state.pending);
            (outcome, drain, state.phase == SavePhase::Dirty)
        };

        inner.attempts.send_modify(|n| *n += 1);
        let event = match &outcome {
            SaveOutcome::Failed(reason) => SaveEvent::Failed {
                story_id: inner.story_id.clone(),
                reason: reason.clone(),
            },
            _ => SaveEvent::Saved {
                story_id: inner.story_id.clone(),
            },
        };
        let _ = inner.events.send(event);

        if drain {
            let queue = self.clone();
            let backoff = inner.config.retry_backoff;
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                queue.request_save().await;
            });
        } else if redirty && matches!(outcome, SaveOutcome::Failed(_)) {
            self.schedule();
        }
        outcome
    }

    /// Persist everything now and report the result.
    ///
    /// Waits out an in-flight save first. Used by callers that must not
    /// proceed against stale persisted content.
    pub async fn persist_now(&self) -> Result<()> {
        self.inner.debouncer.cancel();
        loop {
            let mut finished = self.inner.attempts.subscribe();
            match self.request_save().await {
                SaveOutcome::Saved | SaveOutcome::NothingToSave => return Ok(()),
                SaveOutcome::Failed(reason) => return Err(ClientError::SaveFailed(reason)),
                SaveOutcome::Queued => {
                    if finished.changed().await.is_err() {
                        return Err(ClientError::SaveFailed("save queue closed".into()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        saved: Mutex<Vec<StoryChanges>>,
    }

    #[async_trait]
    impl SaveTarget for Recorder {
        async fn persist(&self, _story_id: &str, changes: &StoryChanges) -> Result<()> {
            self.saved.lock().push(changes.clone());
            Ok(())
        }
    }

    fn queue() -> (SaveQueue, Arc<Recorder>, String) {
        let story = Story::new("story_1", "Title", 1000);
        let scene_id = story.chapters[0].scenes[0].id.clone();
        let recorder = Arc::new(Recorder {
            saved: Mutex::new(Vec::new()),
        });
        let queue = SaveQueue::new(&story, recorder.clone(), SaveConfig::default());
        (queue, recorder, scene_id)
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_an_edit_cleans_the_draft() {
        let (queue, _, scene_id) = queue();
        queue.edit_scene_content(&scene_id, "changed".into());
        assert_eq!(queue.phase(), SavePhase::Dirty);

        queue.edit_scene_content(&scene_id, String::new());
        assert_eq!(queue.phase(), SavePhase::Clean);
        assert!(queue.draft().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_changed_fields_are_saved() {
        let (queue, recorder, scene_id) = queue();
        queue.edit_story_title("Title".into());
        queue.edit_scene_title(&scene_id, "Opening".into());
        queue.persist_now().await.unwrap();

        let saved = recorder.saved.lock().clone();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].title.is_none());
        assert_eq!(saved[0].scenes[&scene_id].title.as_deref(), Some("Opening"));
        assert!(saved[0].scenes[&scene_id].content.is_none());
        assert_eq!(queue.phase(), SavePhase::Clean);
    }

    struct Vanished {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl SaveTarget for Vanished {
        async fn persist(&self, story_id: &str, _changes: &StoryChanges) -> Result<()> {
            *self.attempts.lock() += 1;
            Err(ClientError::StoryNotFound(story_id.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_story_fails_once_and_clears_the_draft() {
        let story = Story::new("story_1", "Title", 1000);
        let target = Arc::new(Vanished {
            attempts: Mutex::new(0),
        });
        let queue = SaveQueue::new(&story, target.clone(), SaveConfig::default());
        let mut events = queue.subscribe();

        queue.edit_story_title("Renamed".into());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*target.attempts.lock(), 1);
        assert_eq!(queue.phase(), SavePhase::Clean);
        assert!(queue.draft().is_empty());
        assert!(queue.last_error().unwrap().contains("no longer exists"));
        assert!(matches!(events.try_recv(), Ok(SaveEvent::Failed { .. })));
        assert!(queue.persist_now().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_save_when_clean() {
        let (queue, recorder, _) = queue();
        assert_eq!(queue.request_save().await, SaveOutcome::NothingToSave);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(recorder.saved.lock().is_empty());
    }
}
