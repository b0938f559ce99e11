use std::sync::Arc;
use warp::Filter;
use crate::coordinator::Coordinator;
pub mod ws;

pub fn routes(
  coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  ws::ws_route(coordinator)
    .or(warp::path("health").map(|| "ok"))
}
