//! Chat rooms between two duos and their message logs.

mod group;
mod msg;
mod new;
mod room;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use group::{group_bursts, BURST_GAP};
pub use msg::{append, history, Message};
pub use room::{authorize, ensure_room, room, room_for_pair, rooms_for_user, ChatRoom, Ensured};
pub use ws::{subscribe, Subscription};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::my_rooms).post(new::new_room))
        .route("/{uuid}", get(room::get_room))
        .route("/{uuid}/messages", get(msg::list_msgs).post(msg::send_msg))
        .route("/{uuid}/messages/grouped", get(msg::grouped_msgs))
        .route("/{uuid}/ws", get(ws::room_ws))
}
