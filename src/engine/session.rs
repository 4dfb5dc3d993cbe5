use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time,
};

use super::{
    scoring::{self, max_score, total_score},
    timer::{Expiry, Timer},
    AttemptFinalizer, AudioPlayer, Catalog, EngineError,
};
use crate::models::{Answer, EngineConfig, Identity, Question, Quiz, QuizResult, QuizStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Countdown { remaining: u32 },
    Playing,
    Feedback { correct: bool },
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionInput {
    pub question: usize,
    pub choice: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub quiz_id: String,
    pub phase: Phase,
    pub question: usize,
    pub total: usize,
    pub prompt: Option<String>,
    pub choices: Vec<String>,
    pub remaining_ms: u64,
    pub limit_ms: u64,
    pub audio: Option<String>,
    pub last_answer: Option<Answer>,
    pub score: u32,
}

impl SessionView {
    fn loading(quiz_id: &str) -> SessionView {
        SessionView {
            quiz_id: quiz_id.into(),
            phase: Phase::Loading,
            question: 0,
            total: 0,
            prompt: None,
            choices: Vec::new(),
            remaining_ms: 0,
            limit_ms: 0,
            audio: None,
            last_answer: None,
            score: 0,
        }
    }
}

/// Drives one play of a quiz from the countdown to the finalized result.
pub struct SessionController {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    finalizer: AttemptFinalizer,
    identity: Option<Identity>,
    audio: Box<dyn AudioPlayer>,
    audio_url: Option<String>,
    quiz: Quiz,
    questions: Vec<Question>,
    answers: Vec<Answer>,
    index: usize,
    limit: Duration,
    phase: Phase,
    timer: Timer,
    view: watch::Sender<SessionView>,
}

impl SessionController {
    /// Fetches the quiz and its questions. A missing, unpublished or empty quiz
    /// never gets past loading.
    pub async fn load(
        catalog: Arc<dyn Catalog>,
        finalizer: AttemptFinalizer,
        config: EngineConfig,
        quiz_id: &str,
        identity: Option<Identity>,
        audio: Box<dyn AudioPlayer>,
    ) -> Result<SessionController, EngineError> {
        let quiz = catalog
            .quiz(quiz_id)
            .await
            .map_err(EngineError::Catalog)?
            .filter(|quiz| quiz.status == QuizStatus::Published)
            .ok_or_else(|| EngineError::QuizNotFound(quiz_id.into()))?;

        let mut questions = catalog
            .quiz_questions(&quiz.id)
            .await
            .map_err(EngineError::Catalog)?;

        if quiz.question_count > 0 {
            questions.truncate(quiz.question_count);
        }
        if questions.is_empty() {
            return Err(EngineError::NoQuestions(quiz.id));
        }

        let (view, _) = watch::channel(SessionView::loading(&quiz.id));
        let timer = Timer::new(config.tick());

        let mut controller = SessionController {
            config,
            catalog,
            finalizer,
            identity,
            audio,
            audio_url: None,
            quiz,
            questions,
            answers: Vec::new(),
            index: 0,
            limit: Duration::ZERO,
            phase: Phase::Loading,
            timer,
            view,
        };

        controller.phase = Phase::Countdown {
            remaining: controller.config.countdown_ticks,
        };
        controller.publish();

        info!(
            "loaded quiz {} with {} questions ({})",
            controller.quiz.id,
            controller.questions.len(),
            if controller.identity.is_some() { "signed in" } else { "guest" }
        );

        Ok(controller)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Plays every question, then hands the answer sheet to the finalizer.
    /// Closing `inputs` abandons the session.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
    ) -> Result<QuizResult, EngineError> {
        for remaining in (1..=self.config.countdown_ticks).rev() {
            self.phase = Phase::Countdown { remaining };
            self.publish();
            self.dwell(Duration::from_secs(1), &mut inputs).await?;
        }

        loop {
            let expired = self.begin_question().wait();
            tokio::pin!(expired);
            let mut remaining = self.timer.subscribe();

            // the lookup is dropped with the question, resolved or not
            let cue = self.cue_lookup();
            tokio::pin!(cue);
            let mut cue_pending = true;

            loop {
                tokio::select! {
                    input = inputs.recv() => match input {
                        Some(input) => {
                            if self.select(input) {
                                break;
                            }
                        }
                        None => return Err(EngineError::Abandoned),
                    },
                    _ = &mut expired => {
                        self.expire();
                        break;
                    }
                    (sound, url) = &mut cue, if cue_pending => {
                        cue_pending = false;
                        self.start_audio(&sound, url);
                    }
                    Ok(()) = remaining.changed() => self.publish(),
                }
            }

            self.dwell(self.config.feedback_dwell(), &mut inputs).await?;

            if !self.advance() {
                break;
            }
        }

        Ok(self.finish().await)
    }

    fn begin_question(&mut self) -> Expiry {
        self.limit = self.questions[self.index].time_limit(self.quiz.difficulty);
        self.phase = Phase::Playing;
        let expiry = self.timer.start(self.limit);

        debug!(
            "quiz {} question {}/{} playing, {}ms",
            self.quiz.id,
            self.index + 1,
            self.questions.len(),
            self.limit.as_millis()
        );

        self.publish();
        expiry
    }

    /// Resolves the current question's cue off the answer path. Questions
    /// without a sound never resolve.
    fn cue_lookup(
        &self,
    ) -> impl Future<Output = (String, anyhow::Result<String>)> + Send + 'static {
        let catalog = self.catalog.clone();
        let sound = self.questions[self.index].sound.clone();

        async move {
            match sound {
                Some(sound) => {
                    let url = catalog.audio_url(&sound).await;
                    (sound, url)
                }
                None => std::future::pending().await,
            }
        }
    }

    fn select(&mut self, input: SessionInput) -> bool {
        if self.phase != Phase::Playing || input.question != self.index {
            debug!("ignoring {:?} while {:?} on question {}", input, self.phase, self.index);
            return false;
        }

        let question = &self.questions[self.index];
        if input.choice >= question.choices.len() {
            warn!(
                "choice {} out of range for question {}",
                input.choice, question.id
            );
            return false;
        }

        let correct = question.is_correct(input.choice);
        let question_id = question.id.clone();
        let remaining = self.timer.remaining();
        let elapsed = self.limit.saturating_sub(remaining);

        self.timer.stop();
        self.stop_audio();

        self.record(Answer {
            question_id,
            chosen: Some(input.choice),
            correct,
            elapsed_ms: elapsed.as_millis() as u64,
            points: scoring::points(correct, remaining, self.limit),
        });

        true
    }

    fn expire(&mut self) {
        if self.phase != Phase::Playing || !self.timer.is_running() {
            return;
        }

        self.timer.stop();
        self.stop_audio();

        let question_id = self.questions[self.index].id.clone();
        self.record(Answer::timed_out(question_id, self.limit));
    }

    fn record(&mut self, answer: Answer) {
        debug!(
            "quiz {} question {} answered: {:?}",
            self.quiz.id, answer.question_id, answer
        );

        self.phase = Phase::Feedback {
            correct: answer.correct,
        };
        self.answers.push(answer);
        self.publish();
    }

    fn advance(&mut self) -> bool {
        if self.index + 1 < self.questions.len() {
            self.index += 1;
            true
        } else {
            self.phase = Phase::Finished;
            self.publish();
            false
        }
    }

    async fn dwell(
        &mut self,
        duration: Duration,
        inputs: &mut mpsc::Receiver<SessionInput>,
    ) -> Result<(), EngineError> {
        let sleep = time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                input = inputs.recv() => match input {
                    Some(input) => {
                        self.select(input);
                    }
                    None => return Err(EngineError::Abandoned),
                },
            }
        }
    }

    async fn finish(mut self) -> QuizResult {
        let questions = std::mem::take(&mut self.questions);
        let answers = std::mem::take(&mut self.answers);
        let max_score = max_score(questions.len());

        info!(
            "quiz {} finished: {}/{}",
            self.quiz.id,
            total_score(&answers),
            max_score
        );

        self.finalizer
            .finalize(
                self.identity.as_ref(),
                &self.quiz,
                questions,
                answers,
                max_score,
            )
            .await
    }

    fn start_audio(&mut self, sound: &str, url: anyhow::Result<String>) {
        let url = match url {
            Ok(url) => url,
            Err(err) => {
                warn!("couldn't resolve sound {}: {:#}", sound, err);
                return;
            }
        };

        match self.audio.start(&url) {
            Ok(()) => {
                self.audio_url = Some(url);
                self.publish();
            }
            Err(err) => warn!("couldn't play sound {}: {:#}", sound, err),
        }
    }

    fn stop_audio(&mut self) {
        self.audio.stop();
        self.audio_url = None;
    }

    fn publish(&self) {
        let current = match self.phase {
            Phase::Loading | Phase::Countdown { .. } => None,
            _ => self.questions.get(self.index),
        };

        self.view.send_replace(SessionView {
            quiz_id: self.quiz.id.clone(),
            phase: self.phase,
            question: self.index,
            total: self.questions.len(),
            prompt: current.map(|question| question.prompt.clone()),
            choices: current
                .map(|question| question.choices.iter().map(|c| c.label.clone()).collect())
                .unwrap_or_default(),
            remaining_ms: self.timer.remaining().as_millis() as u64,
            limit_ms: self.limit.as_millis() as u64,
            audio: self.audio_url.clone(),
            last_answer: self.answers.last().cloned(),
            score: total_score(&self.answers),
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.timer.stop();
        self.audio.stop();
    }
}
