use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::prelude::*;
use ring::hmac;
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::engine::{
    scoring::{stars, total_score},
    AttemptStore, Catalog,
};
use crate::models::{
    Answer, Attempt, AttemptRecord, AudioConfig, Identity, Question, Quiz, Sound, UserId,
};

#[derive(Clone, Debug)]
pub struct QuizController {
    secret_key: Arc<hmac::Key>,
    quiz: Arc<BTreeMap<String, Quiz>>,
    questions: Arc<BTreeMap<String, Vec<Question>>>,
    sounds: Arc<BTreeMap<String, PathBuf>>,
    audio: AudioConfig,
    attempts: Arc<Mutex<Vec<Attempt>>>,
    plays: Arc<Mutex<BTreeMap<String, u64>>>,
    attempt_writer: AttemptWriter,
}

impl QuizController {
    pub fn new<'a>(
        secret_key: hmac::Key,
        quiz: impl Iterator<Item = &'a Quiz>,
        questions: impl Iterator<Item = &'a Question>,
        sounds: impl Iterator<Item = &'a Sound>,
        audio: AudioConfig,
        attempt_writer: AttemptWriter,
        attempts: Vec<Attempt>,
    ) -> QuizController {
        let quiz = quiz.map(|quiz| (quiz.id.clone(), quiz.clone())).collect();

        let mut by_quiz: BTreeMap<String, Vec<Question>> = BTreeMap::new();
        for question in questions {
            by_quiz
                .entry(question.quiz.clone())
                .or_default()
                .push(question.clone());
        }
        for questions in by_quiz.values_mut() {
            questions.sort_by_key(|question| question.position);
        }

        let sounds = sounds
            .map(|sound| (sound.name.clone(), sound.path.clone()))
            .collect();

        QuizController {
            secret_key: Arc::new(secret_key),
            quiz: Arc::new(quiz),
            questions: Arc::new(by_quiz),
            sounds: Arc::new(sounds),
            audio,
            attempts: Arc::new(Mutex::new(attempts)),
            plays: Default::default(),
            attempt_writer,
        }
    }

    pub fn create_identity(&self, display_name: &str, avatar: &str) -> Identity {
        let id = {
            let mut id = [0u8; 16];
            rand::rngs::OsRng.fill(&mut id);
            UserId(id)
        };

        Identity {
            id,
            display_name: display_name.trim().into(),
            avatar: avatar.trim().into(),
        }
    }

    pub fn decode_identity(&self, token: &str) -> Result<Identity> {
        let mut parts = token.splitn(2, ':');
        let identity = parts
            .next()
            .ok_or_else(|| anyhow!("bad authorization token"))?;
        let identity = URL_SAFE_NO_PAD.decode(identity)?;

        let signature = parts
            .next()
            .ok_or_else(|| anyhow!("bad authorization token"))?;
        let signature = URL_SAFE_NO_PAD.decode(signature)?;

        hmac::verify(&self.secret_key, &identity, &signature)
            .map_err(|_err| anyhow!("invalid signature"))?;

        let identity = bincode::deserialize(&identity)?;
        Ok(identity)
    }

    pub fn encode_identity(&self, identity: &Identity) -> Result<String> {
        let identity = bincode::serialize(identity)?;

        let signature = hmac::sign(&self.secret_key, &identity);

        let token = format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(identity),
            URL_SAFE_NO_PAD.encode(signature),
        );

        Ok(token)
    }

    pub fn play_count(&self, quiz_id: &str) -> u64 {
        self.plays
            .lock()
            .map(|plays| plays.get(quiz_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn question_total(&self, quiz_id: &str) -> usize {
        self.questions.get(quiz_id).map(Vec::len).unwrap_or(0)
    }

    pub fn sign_audio(&self, sound: &str, expires: DateTime<Utc>) -> String {
        let message = format!("{}:{}", sound, expires.timestamp());
        let signature = hmac::sign(&self.secret_key, message.as_bytes());

        format!(
            "{}/audio/{}?expires={}&sig={}",
            self.audio.base_url,
            sound,
            expires.timestamp(),
            hex::encode(signature)
        )
    }

    pub fn verify_audio(&self, sound: &str, expires: i64, signature: &str) -> Result<&Path> {
        if expires < Utc::now().timestamp() {
            return Err(anyhow!("audio link expired"));
        }

        let signature = hex::decode(signature)?;
        let message = format!("{}:{}", sound, expires);
        hmac::verify(&self.secret_key, message.as_bytes(), &signature)
            .map_err(|_err| anyhow!("invalid signature"))?;

        self.sounds
            .get(sound)
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow!("unknown sound {}", sound))
    }
}

#[async_trait]
impl Catalog for QuizController {
    async fn quiz(&self, id: &str) -> Result<Option<Quiz>> {
        Ok(self.quiz.get(id).cloned())
    }

    async fn quiz_questions(&self, quiz_id: &str) -> Result<Vec<Question>> {
        Ok(self.questions.get(quiz_id).cloned().unwrap_or_default())
    }

    async fn audio_url(&self, sound: &str) -> Result<String> {
        if !self.sounds.contains_key(sound) {
            return Err(anyhow!("unknown sound {}", sound));
        }

        let expires = Utc::now() + chrono::Duration::seconds(self.audio.url_ttl_secs);
        Ok(self.sign_audio(sound, expires))
    }
}

#[async_trait]
impl AttemptStore for QuizController {
    async fn submit_attempt(
        &self,
        identity: &Identity,
        quiz_id: &str,
        answers: &[Answer],
        max_score: u32,
    ) -> Result<Attempt> {
        let id = {
            let mut id = [0u8; 16];
            rand::rngs::OsRng.fill(&mut id);
            hex::encode(id)
        };

        let score = total_score(answers);
        let attempt = Attempt {
            id,
            user_id: identity.id.to_hex(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            quiz_id: quiz_id.into(),
            answers: answers.to_vec(),
            score,
            max_score,
            stars: stars(score, max_score),
            completed_at: Utc::now(),
        };

        let record = AttemptRecord::from_attempt(&attempt)?;
        let attempt_writer = self.attempt_writer.clone();
        tokio::task::spawn_blocking(move || attempt_writer.write(record)).await??;

        self.attempts
            .lock()
            .map_err(|_err| anyhow!("couldn't lock attempts"))?
            .push(attempt.clone());

        debug!("attempt {} written for quiz {}", attempt.id, quiz_id);
        Ok(attempt)
    }

    async fn increment_play_count(&self, quiz_id: &str) -> Result<u64> {
        let mut plays = self
            .plays
            .lock()
            .map_err(|_err| anyhow!("couldn't lock play counts"))?;
        let count = plays.entry(quiz_id.into()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn leaderboard(&self, quiz_id: &str, limit: usize) -> Result<Vec<Attempt>> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_err| anyhow!("couldn't lock attempts"))?;

        let mut board = attempts
            .iter()
            .filter(|attempt| attempt.quiz_id == quiz_id)
            .cloned()
            .collect::<Vec<_>>();

        // stable, so equal scores stay in the order they were stored
        board.sort_by(|a, b| b.score.cmp(&a.score));
        board.truncate(limit);

        Ok(board)
    }
}

#[derive(Clone, Debug)]
pub struct AttemptWriter {
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl AttemptWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<AttemptWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let writer = Arc::new(Mutex::new(writer));

        Ok(AttemptWriter { writer })
    }

    pub fn write(&self, record: AttemptRecord) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_err| anyhow!("couldn't lock writer"))?;
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}

pub fn load_attempts(path: impl AsRef<Path>) -> Result<Vec<Attempt>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let attempts = reader
        .deserialize::<AttemptRecord>()
        .filter_map(|record| match record.map_err(anyhow::Error::from) {
            Ok(record) => match record.into_attempt() {
                Ok(attempt) => Some(attempt),
                Err(err) => {
                    warn!("skipping attempt with bad answers column: {}", err);
                    None
                }
            },
            Err(err) => {
                warn!("skipping unreadable attempt row: {:#}", err);
                None
            }
        })
        .collect();

    Ok(attempts)
}
