use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::{
    controller::{ControllerHandle, Event},
    notation::parse_placement,
    server_types::{BoardRequestError, BoardResult, ModeRequest, NewGameRequest, SensedRequest},
};

/// HTTP surface for a running controller.
///
/// Every route answers with the status as it stands when the request is
/// handled. Posted events are queued, so their effect shows up in later
/// status reads.
pub fn board_router(handle: ControllerHandle) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/sensed", post(post_sensed))
        .route("/mode", post(post_mode))
        .route("/new-game", post(post_new_game))
        .with_state(handle)
}

async fn get_status(State(handle): State<ControllerHandle>) -> BoardResult {
    BoardResult::Ok(handle.status())
}

async fn post_sensed(
    State(handle): State<ControllerHandle>,
    Json(request): Json<SensedRequest>,
) -> BoardResult {
    if parse_placement(&request.placement).is_none() {
        return BoardResult::RequestError(BoardRequestError::MalformedPlacement {
            placement: request.placement,
        });
    }
    submit(&handle, Event::Sensed(request.placement))
}

async fn post_mode(
    State(handle): State<ControllerHandle>,
    Json(request): Json<ModeRequest>,
) -> BoardResult {
    submit(&handle, Event::SetMode(request.mode))
}

async fn post_new_game(
    State(handle): State<ControllerHandle>,
    Json(request): Json<NewGameRequest>,
) -> BoardResult {
    submit(&handle, Event::NewGame(request.start))
}

fn submit(handle: &ControllerHandle, event: Event) -> BoardResult {
    match handle.send(event) {
        Ok(()) => BoardResult::Ok(handle.status()),
        Err(_) => BoardResult::Closed,
    }
}
