use crate::models::FeedbackEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

/// Events of one user session, delivered once its idle window elapses
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedBatch {
    pub user_id: Uuid,
    /// In submission order, never empty
    pub events: Vec<FeedbackEvent>,
}

struct UserSession {
    events: Vec<FeedbackEvent>,
    /// Bumped on every track; a timer only flushes its own generation
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Registry {
    sessions: Mutex<HashMap<Uuid, UserSession>>,
    window: Duration,
    flush_tx: mpsc::Sender<FlushedBatch>,
}

/// Per-user debounce buffer in front of the preference learner
///
/// Each tracked event pushes the user's flush deadline to one full window
/// from now. When a window passes without activity the session is removed
/// from the registry and only then handed to the flush channel, so an event
/// arriving during delivery opens a fresh session. Pending sessions live in
/// memory only and are lost on restart.
#[derive(Clone)]
pub struct SessionAggregator {
    registry: Arc<Registry>,
}

impl SessionAggregator {
    pub fn new(window: Duration, flush_tx: mpsc::Sender<FlushedBatch>) -> Self {
        Self {
            registry: Arc::new(Registry {
                sessions: Mutex::new(HashMap::new()),
                window,
                flush_tx,
            }),
        }
    }

    /// Builds an aggregator together with the receiving end of its flushes
    pub fn channel(window: Duration, capacity: usize) -> (Self, mpsc::Receiver<FlushedBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(window, tx), rx)
    }

    pub fn window(&self) -> Duration {
        self.registry.window
    }

    /// Buffers `event` and restarts its user's idle countdown
    pub async fn track(&self, event: FeedbackEvent) {
        let user_id = event.user_id;
        let mut sessions = self.registry.sessions.lock().await;

        let session = sessions.entry(user_id).or_insert_with(|| UserSession {
            events: Vec::new(),
            generation: 0,
            timer: None,
        });
        session.events.push(event);
        session.generation += 1;
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }

        let deadline = Instant::now() + self.registry.window;
        session.timer = Some(tokio::spawn(flush_after(
            self.registry.clone(),
            user_id,
            session.generation,
            deadline,
        )));

        tracing::debug!(
            user_id = %user_id,
            buffered = session.events.len(),
            window_secs = self.registry.window.as_secs(),
            "Feedback event buffered"
        );
    }

    /// Events waiting in the user's open session
    pub async fn pending(&self, user_id: Uuid) -> usize {
        self.registry
            .sessions
            .lock()
            .await
            .get(&user_id)
            .map_or(0, |s| s.events.len())
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.sessions.lock().await.len()
    }
}

async fn flush_after(registry: Arc<Registry>, user_id: Uuid, generation: u64, deadline: Instant) {
    sleep_until(deadline).await;

    let events = {
        let mut sessions = registry.sessions.lock().await;
        match sessions.get(&user_id) {
            Some(session) if session.generation == generation => {
                sessions.remove(&user_id).map(|s| s.events)
            }
            _ => None,
        }
    };

    let Some(events) = events else {
        return;
    };

    tracing::info!(user_id = %user_id, events = events.len(), "Feedback session flushed");

    if registry
        .flush_tx
        .send(FlushedBatch { user_id, events })
        .await
        .is_err()
    {
        tracing::warn!(user_id = %user_id, "Flush receiver closed, batch dropped");
    }
}
