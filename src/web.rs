use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{error, info, info_span};
use uuid::Uuid;

use crate::backend::{match_backend, Database};
use crate::candidates::{build_candidates, CandidatePair, PairKey};
use crate::config::Config;
use crate::error::MatchError;
use crate::graph::{CompatibilityGraph, Scores};
use crate::select::{select_matching_with, SelectOptions};

#[derive(Clone)]
pub struct AppState {
    tera: Arc<Tera>,
    db: Database,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Result<AppState, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![(
            "matches.html",
            include_str!("../templates/matches.html"),
        )])?;
        Ok(AppState {
            tera: Arc::new(tera),
            db,
            config: Arc::new(config),
        })
    }

    fn deadline(&self) -> Option<Instant> {
        self.config
            .solve_timeout()
            .map(|timeout| Instant::now() + timeout)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/matches", get(matches))
        .route("/availability", post(add_availability))
        .route("/exclusions", post(add_exclusion))
        .route("/api/matches", post(api_matches))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("solve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
struct ApiError {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Match(MatchError::Validation(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            AppError::Match(MatchError::Data(_)) => (StatusCode::UNPROCESSABLE_ENTITY, "DATA_ERROR"),
            AppError::Match(MatchError::DeadlineExceeded { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DEADLINE_EXCEEDED")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(event = "request_failed", error = %self);
        }
        let body = ApiError {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn root() -> Html<&'static str> {
    Html(include_str!("../templates/index.html"))
}

#[derive(Debug, Deserialize)]
pub struct ScoreEntry {
    pub pair: PairKey<String>,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub availability: Vec<(String, String)>,
    #[serde(default)]
    pub exclusions: Vec<(String, String)>,
    pub scores: Option<Vec<ScoreEntry>>,
    pub max_cardinality: Option<bool>,
    #[serde(default)]
    pub return_graph: bool,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub candidate_count: usize,
    pub matches: Vec<CandidatePair<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<CompatibilityGraph<String>>,
}

fn score_map(entries: Vec<ScoreEntry>) -> Result<Scores<String>, MatchError> {
    let mut scores = Scores::new();
    for ScoreEntry { pair, score } in entries {
        if scores.contains_key(&pair) {
            return Err(MatchError::Validation(format!(
                "pair {pair} is scored more than once"
            )));
        }
        scores.insert(pair, score);
    }
    Ok(scores)
}

pub async fn api_matches(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let run_id = Uuid::new_v4();
    let deadline = state.deadline();
    info!(
        event = "api_matches",
        %run_id,
        availability = request.availability.len(),
        exclusions = request.exclusions.len(),
    );

    let response = tokio::task::spawn_blocking(move || {
        let _span = info_span!("solve", %run_id).entered();
        let scores = request.scores.map(score_map).transpose()?;
        let candidates = build_candidates(&request.availability, &request.exclusions)?;
        let selection = select_matching_with(
            &candidates,
            scores.as_ref(),
            &SelectOptions {
                max_cardinality: request.max_cardinality,
                return_graph: request.return_graph,
                deadline,
            },
        )?;
        Ok::<_, MatchError>(MatchResponse {
            run_id,
            generated_at: Utc::now(),
            candidate_count: candidates.len(),
            matches: selection.matches,
            graph: selection.graph,
        })
    })
    .await??;

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct MatchRow {
    first: String,
    second: String,
    slots: Vec<String>,
}

pub async fn matches(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let run_id = Uuid::new_v4();
    let options = SelectOptions {
        max_cardinality: state.config.max_cardinality,
        return_graph: false,
        deadline: state.deadline(),
    };
    let db = state.db.clone();
    let report = tokio::task::spawn_blocking(move || {
        let _span = info_span!("solve", %run_id).entered();
        match_backend(&db, None, &options)
    })
    .await??;

    let unmatched = report.unmatched();
    let rows: Vec<MatchRow> = report
        .selection
        .matches
        .into_iter()
        .map(|m| {
            let (first, second): (String, String) = m.key.into();
            MatchRow {
                first,
                second,
                slots: m.slots,
            }
        })
        .collect();

    let mut context = Context::new();
    context.insert("run_id", &run_id.to_string());
    context.insert("generated_at", &Utc::now().to_rfc3339());
    context.insert("candidate_count", &report.candidate_count);
    context.insert("matches", &rows);
    context.insert("unmatched", &unmatched);
    Ok(Html(state.tera.render("matches.html", &context)?))
}

fn required_field(name: &str, value: &str) -> Result<String, MatchError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(MatchError::Validation(format!("{name} must not be empty")));
    }
    Ok(value.to_owned())
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityForm {
    subject: String,
    slot: String,
}

pub async fn add_availability(
    State(state): State<AppState>,
    Form(form): Form<AvailabilityForm>,
) -> Result<Redirect, AppError> {
    let subject = required_field("subject", &form.subject)?;
    let slot = required_field("slot", &form.slot)?;
    state.db.add_availability(&subject, &slot)?;
    info!(event = "availability_added", %subject, %slot);
    Ok(Redirect::to("/matches"))
}

#[derive(Debug, Deserialize)]
pub struct ExclusionForm {
    subject1: String,
    subject2: String,
}

pub async fn add_exclusion(
    State(state): State<AppState>,
    Form(form): Form<ExclusionForm>,
) -> Result<Redirect, AppError> {
    let subject1 = required_field("subject1", &form.subject1)?;
    let subject2 = required_field("subject2", &form.subject2)?;
    state.db.add_exclusion(&subject1, &subject2)?;
    info!(event = "exclusion_added", %subject1, %subject2);
    Ok(Redirect::to("/matches"))
}
