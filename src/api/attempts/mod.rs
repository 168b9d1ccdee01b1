mod handlers;

use axum::routing::{get, post, put};
use axum::Router;

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:student_id/exams/:exam_id/lobby", get(handlers::lobby))
        .route(
            "/:student_id/exams/:exam_id/attempt",
            post(handlers::open_attempt).get(handlers::get_attempt).delete(handlers::close_attempt),
        )
        .route(
            "/:student_id/exams/:exam_id/attempt/answers/:question_id",
            put(handlers::record_answer),
        )
        .route(
            "/:student_id/exams/:exam_id/attempt/review/:question_id",
            post(handlers::toggle_review),
        )
        .route("/:student_id/exams/:exam_id/attempt/submit", post(handlers::submit_attempt))
}
