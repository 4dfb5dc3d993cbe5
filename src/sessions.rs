use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use rand::prelude::*;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::engine::{AudioPlayer, SessionController, SessionInput, SessionView};
use crate::models::QuizResult;

const INPUT_BACKLOG: usize = 16;

/// Cues are played by the client, which reads the current URL off the
/// session view, so the server side has nothing to drive.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientCue;

impl AudioPlayer for ClientCue {
    fn start(&mut self, url: &str) -> Result<()> {
        debug!("cue {} handed to client", url);
        Ok(())
    }

    fn stop(&mut self) {}
}

#[derive(Clone, Debug)]
pub enum Outcome {
    Pending,
    Ready {
        result: Arc<QuizResult>,
        at: Instant,
    },
    Abandoned {
        at: Instant,
    },
}

impl Outcome {
    fn settled_at(&self) -> Option<Instant> {
        match self {
            Outcome::Pending => None,
            Outcome::Ready { at, .. } | Outcome::Abandoned { at } => Some(*at),
        }
    }
}

struct SessionHandle {
    inputs: mpsc::Sender<SessionInput>,
    view: watch::Receiver<SessionView>,
    outcome: watch::Receiver<Outcome>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct SessionHub {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    retention: Duration,
}

impl SessionHub {
    pub fn new(retention: Duration) -> SessionHub {
        SessionHub {
            sessions: Default::default(),
            retention,
        }
    }

    pub fn start(&self, controller: SessionController) -> Result<String> {
        self.prune();

        let id = {
            let mut id = [0u8; 16];
            rand::rngs::OsRng.fill(&mut id);
            hex::encode(id)
        };

        let (inputs, rx) = mpsc::channel(INPUT_BACKLOG);
        let (outcome_tx, outcome) = watch::channel(Outcome::Pending);
        let view = controller.subscribe();

        let session_id = id.clone();
        let task = tokio::spawn(async move {
            let outcome = match controller.run(rx).await {
                Ok(result) => {
                    info!(
                        "session {} finished with {}/{}, stored: {}",
                        session_id,
                        result.score,
                        result.max_score,
                        result.is_persisted()
                    );
                    Outcome::Ready {
                        result: Arc::new(result),
                        at: Instant::now(),
                    }
                }
                Err(err) => {
                    warn!("session {} ended early: {}", session_id, err);
                    Outcome::Abandoned { at: Instant::now() }
                }
            };
            outcome_tx.send_replace(outcome);
        });

        self.sessions
            .lock()
            .map_err(|_err| anyhow!("couldn't lock sessions"))?
            .insert(
                id.clone(),
                SessionHandle {
                    inputs,
                    view,
                    outcome,
                    task,
                },
            );

        info!("session {} started", id);
        Ok(id)
    }

    pub fn view(&self, id: &str) -> Option<SessionView> {
        let sessions = self.sessions.lock().ok()?;
        let view = sessions.get(id).map(|handle| handle.view.borrow().clone());
        view
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        let sessions = self.sessions.lock().ok()?;
        let outcome = sessions.get(id).map(|handle| handle.outcome.borrow().clone());
        outcome
    }

    pub fn answer(&self, id: &str, input: SessionInput) -> Result<()> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_err| anyhow!("couldn't lock sessions"))?;
        let handle = sessions
            .get(id)
            .ok_or_else(|| anyhow!("unknown session {}", id))?;

        handle
            .inputs
            .try_send(input)
            .map_err(|err| anyhow!("session {} not accepting input: {}", id, err))
    }

    /// Drops the session. Aborting the task stops its timer and audio.
    pub fn abandon(&self, id: &str) -> bool {
        let handle = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(id),
            Err(_err) => None,
        };

        match handle {
            Some(handle) => {
                handle.task.abort();
                info!("session {} abandoned", id);
                true
            }
            None => false,
        }
    }

    fn prune(&self) {
        let retention = self.retention;
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|_id, handle| match handle.outcome.borrow().settled_at() {
                Some(at) => at.elapsed() < retention,
                None => true,
            });
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}
