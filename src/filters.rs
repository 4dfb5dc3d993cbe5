use warp::{
    reject::{self, Reject},
    Filter,
};

use crate::controllers::QuizController;
use crate::models::Identity;
use crate::sessions::SessionHub;

#[derive(Debug)]
pub struct Unauthorized;

impl Reject for Unauthorized {}

pub fn with_quiz_controller(
    quiz_controller: QuizController,
) -> impl Filter<Extract = (QuizController,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || quiz_controller.clone())
}

pub fn with_hub(
    hub: SessionHub,
) -> impl Filter<Extract = (SessionHub,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

pub fn identity(
    quiz_controller: QuizController,
) -> impl Filter<Extract = (Option<Identity>,), Error = warp::Rejection> + Clone {
    warp::header::optional("Authorization")
        .and(with_quiz_controller(quiz_controller))
        .and_then(
            move |auth: Option<String>, quiz_controller: QuizController| async move {
                match auth {
                    None => Ok(None),
                    Some(auth) => {
                        let mut parts = auth.splitn(2, ' ');
                        let kind = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;
                        let value = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;

                        if !kind.eq_ignore_ascii_case("identity") {
                            return Err(reject::custom(Unauthorized));
                        }

                        quiz_controller
                            .decode_identity(value.trim())
                            .map(Some)
                            .map_err(|_err| reject::custom(Unauthorized))
                    }
                }
            },
        )
}
