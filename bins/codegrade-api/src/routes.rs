use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/sandbox/languages", get(handlers::list_languages))
        .route(
            "/sandbox/files/:id",
            put(handlers::stage_file).head(handlers::check_file),
        )
        .route("/upload", post(handlers::upload_student_files))
        .route("/upload/check", get(handlers::check_student_files))
        .route("/submissions/:id/testcase", put(handlers::put_testcase))
        .route("/submissions/:id/run", post(handlers::run_submission))
        .route("/submissions/:id/runs", get(handlers::list_runs))
}
