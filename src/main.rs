use anyhow::{Error, Result};
use log::{info, warn};
use rand::prelude::*;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, env, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::fs;
use warp::{
    http::{self, Response},
    reply::{self, Reply},
    Filter,
};

use controllers::{load_attempts, QuizController};
use engine::{
    AttemptFinalizer, AttemptStore, Catalog, EngineError, SessionController, SessionInput,
};
use models::{Config, EngineConfig, Identity, Quiz};
use sessions::{ClientCue, Outcome, SessionHub};

mod controllers;
mod engine;
mod filters;
mod models;
mod sessions;

const SESSION_RETENTION: Duration = Duration::from_secs(10 * 60);
const DEFAULT_LEADERBOARD_SIZE: usize = 10;
const MAX_LEADERBOARD_SIZE: usize = 100;

#[derive(Clone, Debug, Deserialize, Serialize)]
struct IdentityRequest {
    display_name: String,
    #[serde(default)]
    avatar: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct IdentityReply<'a> {
    token: &'a str,
    user_id: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct QuizReply<'a> {
    quiz: &'a Quiz,
    questions: usize,
    plays: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct PlayReply<'a> {
    session: &'a str,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AudioQuery {
    expires: i64,
    sig: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ErrorReply {
    error: ErrorCode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
enum ErrorCode {
    NotFound,
    QuizUnavailable,
    Pending,
    BadRequest,
    Unauthorized,
    Internal,
}

fn error_reply(error: ErrorCode, status: http::StatusCode) -> reply::Response {
    reply::with_status(reply::json(&ErrorReply { error }), status).into_response()
}

fn with_engine_config(
    engine: EngineConfig,
) -> impl Filter<Extract = (EngineConfig,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

async fn handle_rejection(err: warp::Rejection) -> Result<reply::Response, Infallible> {
    let reply = if err.is_not_found() {
        error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
    } else if err.find::<filters::Unauthorized>().is_some() {
        error_reply(ErrorCode::Unauthorized, http::StatusCode::UNAUTHORIZED)
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
        || err.find::<warp::reject::InvalidQuery>().is_some()
    {
        error_reply(ErrorCode::BadRequest, http::StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(ErrorCode::NotFound, http::StatusCode::METHOD_NOT_ALLOWED)
    } else {
        warn!("unhandled rejection: {:?}", err);
        error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
    };

    Ok(reply)
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let bind_addr = env::var("BIND").unwrap_or_else(|_err| "127.0.0.1:3030".into());
    let bind_addr: SocketAddr = bind_addr.parse()?;

    let cors_origin = env::var("CORS_ORIGIN").unwrap_or_else(|_err| "http://localhost:1313".into());

    let secret_key = env::var("SECRET_KEY")
        .map_err(Error::new)
        .and_then(|env| {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            hex::decode_to_slice(env, &mut secret_key)?;
            Ok(secret_key)
        })
        .or_else(|_err| -> Result<_> {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            rand::rngs::OsRng.fill(&mut secret_key);

            warn!("No secret key was specified, generated a new secret key.");
            warn!("Rerun with SECRET_KEY={}", hex::encode(secret_key));

            Ok(secret_key)
        })?;

    let secret_key = hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_ref());

    let config_path = env::var("QUIZ_CONFIG").unwrap_or_else(|_err| "quiz.toml".into());
    let config = fs::read_to_string(&config_path).await?;
    let config: Config = toml::from_str(&config)?;

    let attempts_path = env::var("ATTEMPTS_PATH").unwrap_or_else(|_err| "attempts.csv".into());
    let attempts = load_attempts(&attempts_path)?;
    let attempt_writer = controllers::AttemptWriter::new(&attempts_path)?;

    info!(
        "loaded {} quizzes, {} questions and {} past attempts",
        config.quiz.len(),
        config.question.len(),
        attempts.len()
    );

    let quiz_controller = QuizController::new(
        secret_key,
        config.quiz.iter(),
        config.question.iter(),
        config.sound.iter(),
        config.audio.clone(),
        attempt_writer,
        attempts,
    );

    let hub = SessionHub::new(SESSION_RETENTION);

    let post_identity = warp::path!("identity")
        .and(warp::post())
        .and(warp::filters::body::json())
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .map(|body: IdentityRequest, quiz_controller: QuizController| {
            if body.display_name.trim().is_empty() {
                return error_reply(ErrorCode::BadRequest, http::StatusCode::BAD_REQUEST);
            }

            let identity = quiz_controller.create_identity(&body.display_name, &body.avatar);

            match quiz_controller.encode_identity(&identity) {
                Ok(token) => reply::json(&IdentityReply {
                    token: &token,
                    user_id: &identity.id.to_hex(),
                })
                .into_response(),
                Err(err) => {
                    warn!("couldn't encode identity: {:#}", err);
                    error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        });

    let get_quiz = warp::path!("quiz" / String)
        .and(warp::get())
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(|quiz_id: String, quiz_controller: QuizController| async move {
            let reply = match quiz_controller.quiz(&quiz_id).await {
                Ok(Some(quiz)) => reply::json(&QuizReply {
                    quiz: &quiz,
                    questions: quiz_controller.question_total(&quiz.id),
                    plays: quiz_controller.play_count(&quiz.id),
                })
                .into_response(),
                Ok(None) => error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND),
                Err(err) => {
                    warn!("couldn't look up quiz {}: {:#}", quiz_id, err);
                    error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
                }
            };

            Ok::<_, warp::Rejection>(reply)
        });

    let post_play = warp::path!("play" / String)
        .and(warp::post())
        .and(filters::identity(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and(filters::with_hub(hub.clone()))
        .and(with_engine_config(config.engine.clone()))
        .and_then(
            |quiz_id: String,
             identity: Option<Identity>,
             quiz_controller: QuizController,
             hub: SessionHub,
             engine: EngineConfig| async move {
                let catalog: Arc<dyn Catalog> = Arc::new(quiz_controller.clone());
                let store: Arc<dyn AttemptStore> = Arc::new(quiz_controller);

                let controller = SessionController::load(
                    catalog,
                    AttemptFinalizer::new(store),
                    engine,
                    &quiz_id,
                    identity,
                    Box::new(ClientCue),
                )
                .await;

                let reply = match controller {
                    Ok(controller) => match hub.start(controller) {
                        Ok(session) => reply::with_status(
                            reply::json(&PlayReply { session: &session }),
                            http::StatusCode::CREATED,
                        )
                        .into_response(),
                        Err(err) => {
                            warn!("couldn't start session: {:#}", err);
                            error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    },
                    Err(err @ EngineError::Catalog(_)) => {
                        warn!("unable to start quiz {}: {}", quiz_id, err);
                        error_reply(ErrorCode::QuizUnavailable, http::StatusCode::SERVICE_UNAVAILABLE)
                    }
                    Err(err) => {
                        info!("unable to start quiz {}: {}", quiz_id, err);
                        error_reply(ErrorCode::QuizUnavailable, http::StatusCode::NOT_FOUND)
                    }
                };

                Ok::<_, warp::Rejection>(reply)
            },
        );

    let get_session = warp::path!("session" / String)
        .and(warp::get())
        .and(filters::with_hub(hub.clone()))
        .map(|session: String, hub: SessionHub| match hub.view(&session) {
            Some(view) => reply::json(&view).into_response(),
            None => error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND),
        });

    let post_answer = warp::path!("session" / String / "answer")
        .and(warp::post())
        .and(warp::filters::body::json())
        .and(filters::with_hub(hub.clone()))
        .map(|session: String, input: SessionInput, hub: SessionHub| {
            match hub.answer(&session, input) {
                Ok(()) => http::StatusCode::ACCEPTED.into_response(),
                Err(err) => {
                    info!("answer rejected: {:#}", err);
                    error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
                }
            }
        });

    let get_result = warp::path!("session" / String / "result")
        .and(warp::get())
        .and(filters::with_hub(hub.clone()))
        .map(|session: String, hub: SessionHub| match hub.outcome(&session) {
            Some(Outcome::Ready { result, .. }) => reply::json(&*result).into_response(),
            Some(Outcome::Pending) => error_reply(ErrorCode::Pending, http::StatusCode::CONFLICT),
            Some(Outcome::Abandoned { .. }) | None => {
                error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
            }
        });

    let delete_session = warp::path!("session" / String)
        .and(warp::delete())
        .and(filters::with_hub(hub.clone()))
        .map(|session: String, hub: SessionHub| {
            if hub.abandon(&session) {
                http::StatusCode::NO_CONTENT.into_response()
            } else {
                error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
            }
        });

    let get_leaderboard = warp::path!("leaderboard" / String)
        .and(warp::get())
        .and(warp::query::<LeaderboardQuery>())
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |quiz_id: String, query: LeaderboardQuery, quiz_controller: QuizController| async move {
                let limit = query
                    .limit
                    .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
                    .min(MAX_LEADERBOARD_SIZE);

                let reply = match quiz_controller.leaderboard(&quiz_id, limit).await {
                    Ok(board) => reply::json(&board).into_response(),
                    Err(err) => {
                        warn!("couldn't read leaderboard of {}: {:#}", quiz_id, err);
                        error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
                    }
                };

                Ok::<_, warp::Rejection>(reply)
            },
        );

    let get_audio = warp::path!("audio" / String)
        .and(warp::get())
        .and(warp::query::<AudioQuery>())
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |sound: String, query: AudioQuery, quiz_controller: QuizController| async move {
                let path = match quiz_controller.verify_audio(&sound, query.expires, &query.sig) {
                    Ok(path) => path.to_path_buf(),
                    Err(err) => {
                        info!("refusing audio {}: {:#}", sound, err);
                        return Ok::<_, warp::Rejection>(error_reply(
                            ErrorCode::NotFound,
                            http::StatusCode::NOT_FOUND,
                        ));
                    }
                };

                let reply = match fs::read(&path).await {
                    Ok(bytes) => Response::builder()
                        .header("Content-Type", content_type(&path))
                        .header("Cache-Control", "private, max-age=60")
                        .body(bytes)
                        .into_response(),
                    Err(err) => {
                        warn!("couldn't read sound {}: {}", path.display(), err);
                        error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
                    }
                };

                Ok(reply)
            },
        );

    let cors = warp::cors()
        .allow_origin(cors_origin.as_str())
        .allow_methods(vec!["GET", "POST", "DELETE"])
        .allow_headers(vec!["Authorization", "Content-Type"]);

    let server = post_identity
        .or(get_quiz)
        .or(post_play)
        .or(get_session)
        .or(post_answer)
        .or(get_result)
        .or(delete_session)
        .or(get_leaderboard)
        .or(get_audio)
        .recover(handle_rejection)
        .with(cors);

    info!("listening on {}", bind_addr);
    warp::serve(server).run(bind_addr).await;

    Ok(())
}
