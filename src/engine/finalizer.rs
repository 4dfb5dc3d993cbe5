use log::{debug, info, warn};
use std::sync::Arc;

use super::{
    scoring::{stars, total_score},
    AttemptStore,
};
use crate::models::{Answer, Identity, Question, Quiz, QuizResult};

#[derive(Clone)]
pub struct AttemptFinalizer {
    store: Arc<dyn AttemptStore>,
}

impl AttemptFinalizer {
    pub fn new(store: Arc<dyn AttemptStore>) -> AttemptFinalizer {
        AttemptFinalizer { store }
    }

    pub async fn finalize(
        &self,
        identity: Option<&Identity>,
        quiz: &Quiz,
        questions: Vec<Question>,
        answers: Vec<Answer>,
        max_score: u32,
    ) -> QuizResult {
        let score = total_score(&answers);
        let stars = stars(score, max_score);

        let attempt_id = match identity {
            None => {
                debug!("guest finished quiz {}, result stays transient", quiz.id);
                None
            }
            Some(identity) => {
                match self
                    .store
                    .submit_attempt(identity, &quiz.id, &answers, max_score)
                    .await
                {
                    Ok(attempt) => {
                        info!(
                            "stored attempt {} for {} on quiz {} ({}/{})",
                            attempt.id, identity.display_name, quiz.id, score, max_score
                        );

                        if let Err(err) = self.store.increment_play_count(&quiz.id).await {
                            warn!("couldn't bump play count of quiz {}: {:#}", quiz.id, err);
                        }

                        Some(attempt.id)
                    }
                    Err(err) => {
                        warn!(
                            "couldn't store attempt on quiz {}, falling back to a transient result: {:#}",
                            quiz.id, err
                        );
                        None
                    }
                }
            }
        };

        QuizResult {
            attempt_id,
            quiz_id: quiz.id.clone(),
            score,
            max_score,
            stars,
            answers,
            questions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{fakes::*, scoring::max_score};

    fn answers() -> Vec<Answer> {
        vec![
            answer("q1", Some(0), 138),
            answer("q2", Some(1), 0),
            answer("q3", None, 0),
        ]
    }

    #[tokio::test]
    async fn signed_in_players_get_a_stored_attempt() {
        let store = Arc::new(FakeStore::default());
        let finalizer = AttemptFinalizer::new(store.clone());
        let (quiz, questions) = medium_quiz(3);

        let result = finalizer
            .finalize(Some(&player()), &quiz, questions, answers(), max_score(3))
            .await;

        assert_eq!(result.attempt_id.as_deref(), Some("attempt-1"));
        assert_eq!(result.score, 138);
        assert_eq!(result.max_score, 450);
        assert_eq!(result.stars, 0);
        assert_eq!(store.submitted().len(), 1);
        assert_eq!(store.plays(), 1);
    }

    #[tokio::test]
    async fn guests_never_touch_the_store() {
        let store = Arc::new(FakeStore::default());
        let finalizer = AttemptFinalizer::new(store.clone());
        let (quiz, questions) = medium_quiz(3);

        let result = finalizer
            .finalize(None, &quiz, questions, answers(), max_score(3))
            .await;

        assert!(!result.is_persisted());
        assert_eq!(result.score, 138);
        assert_eq!(result.max_score, 450);
        assert_eq!(result.stars, 0);
        assert_eq!(result.answers, answers());
        assert_eq!(result.questions.len(), 3);
        assert!(store.submitted().is_empty());
        assert_eq!(store.plays(), 0);
    }

    #[tokio::test]
    async fn failed_submission_falls_back_to_transient_result() {
        let store = Arc::new(FakeStore {
            fail_submit: true,
            ..Default::default()
        });
        let finalizer = AttemptFinalizer::new(store.clone());
        let (quiz, questions) = medium_quiz(3);

        let result = finalizer
            .finalize(Some(&player()), &quiz, questions, answers(), max_score(3))
            .await;

        assert_eq!(result.attempt_id, None);
        assert_eq!(result.score, 138);
        assert_eq!(result.answers.len(), 3);
        assert_eq!(store.plays(), 0);
    }

    #[tokio::test]
    async fn play_count_failure_is_ignored() {
        let store = Arc::new(FakeStore {
            fail_play_count: true,
            ..Default::default()
        });
        let finalizer = AttemptFinalizer::new(store.clone());
        let (quiz, questions) = medium_quiz(3);

        let result = finalizer
            .finalize(Some(&player()), &quiz, questions, answers(), max_score(3))
            .await;

        assert!(result.is_persisted());
        assert_eq!(store.submitted().len(), 1);
    }
}
