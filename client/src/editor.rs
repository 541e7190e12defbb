//! Editor session: the in-memory story behind an open editor.
//!
//! Content notifications reach the save queue at once. Derived work on the
//! in-memory model (applying the content, recounting words) is throttled so a
//! burst of keystrokes runs it on the first and last edit only.

use crate::config::SaveConfig;
use crate::error::Result;
use crate::save_queue::{SaveEvent, SavePhase, SaveQueue, SaveTarget};
use crate::timing::Throttler;
use parking_lot::RwLock;
use std::sync::Arc;
use storyloom_engine::{text, Story, MAX_CONTENT_CHARS};
use tokio::sync::broadcast;

/// Changes to the in-memory model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    ContentApplied { scene_id: String, word_count: usize },
    SceneRenamed { scene_id: String },
    StoryRenamed,
}

/// An open story.
pub struct EditorSession {
    story: Arc<RwLock<Story>>,
    queue: SaveQueue,
    content: Throttler<(String, String)>,
    events: broadcast::Sender<EditorEvent>,
}

impl EditorSession {
    pub fn new(story: Story, target: Arc<dyn SaveTarget>, config: SaveConfig) -> Self {
        let queue = SaveQueue::new(&story, target, config.clone());
        let story = Arc::new(RwLock::new(story));
        let (events, _) = broadcast::channel(64);

        let model = Arc::clone(&story);
        let notify = events.clone();
        let content = Throttler::new(config.content_throttle, move |(scene_id, content): (String, String)| {
            let word_count = text::word_count(&content);
            {
                let mut story = model.write();
                match story.scene_mut(&scene_id) {
                    Some(scene) => scene.content = content,
                    None => {
                        tracing::warn!(scene_id = %scene_id, "Content for unknown scene ignored");
                        return;
                    }
                }
            }
            let _ = notify.send(EditorEvent::ContentApplied {
                scene_id,
                word_count,
            });
        });

        Self {
            story,
            queue,
            content,
            events,
        }
    }

    pub fn story_id(&self) -> String {
        self.story.read().id.clone()
    }

    /// Copy of the in-memory story.
    pub fn story(&self) -> Story {
        self.story.read().clone()
    }

    /// Content to load into the editor.
    pub fn scene_content(&self, scene_id: &str) -> Option<String> {
        self.story
            .read()
            .scene(scene_id)
            .map(|scene| scene.content.clone())
    }

    /// The editor reported new content for a scene.
    pub fn content_changed(&self, scene_id: &str, content: String) {
        if self.story.read().scene(scene_id).is_none() {
            tracing::warn!(scene_id, "Content for unknown scene ignored");
            return;
        }
        let content = text::truncate_chars(&content, MAX_CONTENT_CHARS).to_string();
        self.queue.edit_scene_content(scene_id, content.clone());
        self.content.call((scene_id.to_string(), content));
    }

    pub fn rename_scene(&self, scene_id: &str, title: String) {
        {
            let mut story = self.story.write();
            let Some(scene) = story.scene_mut(scene_id) else {
                tracing::warn!(scene_id, "Rename of unknown scene ignored");
                return;
            };
            scene.title = title.clone();
        }
        self.queue.edit_scene_title(scene_id, title);
        let _ = self.events.send(EditorEvent::SceneRenamed {
            scene_id: scene_id.to_string(),
        });
    }

    pub fn rename_story(&self, title: String) {
        self.story.write().title = title.clone();
        self.queue.edit_story_title(title);
        let _ = self.events.send(EditorEvent::StoryRenamed);
    }

    /// Persist every pending edit and report the outcome.
    ///
    /// Gate for work that must run against persisted content, such as a
    /// generation request.
    pub async fn persist_now(&self) -> Result<()> {
        self.queue.persist_now().await
    }

    pub fn save_phase(&self) -> SavePhase {
        self.queue.phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }

    pub fn save_events(&self) -> broadcast::Receiver<SaveEvent> {
        self.queue.subscribe()
    }

    pub fn queue(&self) -> &SaveQueue {
        &self.queue
    }
}
