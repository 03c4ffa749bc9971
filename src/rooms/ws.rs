use std::collections::VecDeque;

use axum::{
    debug_handler,
    extract::{ws::{Message as Frame, WebSocketUpgrade}, Path, State},
    response::Response,
};
use futures_util::{SinkExt, Stream, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::{
    caller::Caller,
    config::Config,
    topics::{Event, Hub, Topic},
    AppResult,
};

use super::{msg, room, Message};

/// Live feed of a room, starting at the moment of subscription.
///
/// If the broadcast buffer overflows, the missed messages are read back
/// from the store, so a slow subscriber still sees every message once and
/// in append order.
pub struct Subscription {
    db_pool: SqlitePool,
    room_id: Uuid,
    rx: broadcast::Receiver<Event>,
    last_seq: i64,
    backlog: VecDeque<Message>,
}

pub async fn subscribe(db_pool: &SqlitePool, hub: &Hub, room_id: Uuid) -> AppResult<Subscription> {
    room::room(db_pool, room_id).await?;

    // No append can interleave between taking the receiver and reading the
    // current high-water mark.
    let topic = Topic::Room(room_id);
    let sequencer = hub.sequencer(topic);
    let _turn = sequencer.lock().await;
    let rx = hub.subscribe(topic);
    let last_seq = msg::latest_seq(db_pool, room_id).await?;

    Ok(Subscription {
        db_pool: db_pool.clone(),
        room_id,
        rx,
        last_seq,
        backlog: VecDeque::new(),
    })
}

impl Subscription {
    /// `Ok(None)` once the topic is gone.
    pub async fn next(&mut self) -> AppResult<Option<Event>> {
        loop {
            if let Some(message) = self.backlog.pop_front() {
                return Ok(Some(Event::MessageAppended(message)));
            }

            match self.rx.recv().await {
                Ok(Event::MessageAppended(message)) => {
                    if message.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = message.seq;
                    return Ok(Some(Event::MessageAppended(message)));
                }
                Ok(event) => return Ok(Some(event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %self.room_id, skipped, "subscriber lagged, backfilling");
                    let missed = msg::since(&self.db_pool, self.room_id, self.last_seq).await?;
                    if let Some(last) = missed.last() {
                        self.last_seq = last.seq;
                    }
                    self.backlog.extend(missed);
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = AppResult<Event>> {
        futures_util::stream::unfold(self, |mut sub| async move {
            match sub.next().await {
                Ok(Some(event)) => Some((Ok(event), sub)),
                Ok(None) => None,
                Err(err) => Some((Err(err), sub)),
            }
        })
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    State(config): State<Config>,
    caller: Caller,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room = room::room(&db_pool, room_id).await?;
    room::authorize(&db_pool, &room, caller.user_id()).await?;
    let subscription = subscribe(&db_pool, &hub, room_id).await?;

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut broadcast_task = tokio::spawn(async move {
            let mut events = Box::pin(subscription.into_stream());
            while let Some(event) = events.next().await {
                let Ok(event) = event else {
                    break;
                };
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if sender.send(Frame::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let user_id = caller.0;
        loop {
            tokio::select! {
                _ = &mut broadcast_task => break,
                frame = receiver.next() => {
                    let Some(Ok(frame)) = frame else {
                        break;
                    };
                    if matches!(frame, Frame::Close(_)) {
                        break;
                    }
                    let Ok(msg::SendMessageQuery { content }) = serde_json::from_slice(&frame.into_data()) else {
                        continue;
                    };
                    if let Err(err) = msg::append(&db_pool, &hub, room_id, &user_id, &content, config.max_message_len).await {
                        tracing::debug!(%room_id, error = %err, "websocket message rejected");
                    }
                }
            }
        }

        broadcast_task.abort();
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{db, fixtures, rooms::room::ensure_room};

    async fn setup(capacity: usize) -> (SqlitePool, Hub, Uuid) {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], None).await;
        let b = fixtures::duo(&db_pool, "B", ["cat", "dan"], None).await;
        let room_id = ensure_room(&db_pool, a, b, None).await.unwrap().room.id;
        (db_pool, Hub::new(capacity), room_id)
    }

    async fn next_content(sub: &mut Subscription) -> String {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("event in time")
            .unwrap()
            .unwrap();
        match event {
            Event::MessageAppended(message) => message.content,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_messages_after_subscription_are_delivered() {
        let (db_pool, hub, room_id) = setup(16).await;
        msg::append(&db_pool, &hub, room_id, "ann", "before", 100).await.unwrap();

        let mut sub = subscribe(&db_pool, &hub, room_id).await.unwrap();
        msg::append(&db_pool, &hub, room_id, "cat", "after", 100).await.unwrap();

        assert_eq!(next_content(&mut sub).await, "after");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_subscriber_sees_the_same_order() {
        let (db_pool, hub, room_id) = setup(64).await;
        let mut subs = vec![
            subscribe(&db_pool, &hub, room_id).await.unwrap(),
            subscribe(&db_pool, &hub, room_id).await.unwrap(),
            subscribe(&db_pool, &hub, room_id).await.unwrap(),
        ];

        let senders: Vec<_> = [("ann", "hello"), ("cat", "world")]
            .into_iter()
            .map(|(user, content)| {
                let (db_pool, hub) = (db_pool.clone(), hub.clone());
                tokio::spawn(async move { msg::append(&db_pool, &hub, room_id, user, content, 100).await.unwrap() })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        let stored: Vec<String> = msg::history(&db_pool, room_id).await.unwrap().into_iter().map(|m| m.content).collect();
        for sub in &mut subs {
            let seen = vec![next_content(sub).await, next_content(sub).await];
            assert_eq!(seen, stored);
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_is_backfilled_without_gaps() {
        let (db_pool, hub, room_id) = setup(2).await;
        let mut sub = subscribe(&db_pool, &hub, room_id).await.unwrap();

        for i in 0..6 {
            msg::append(&db_pool, &hub, room_id, "ann", &format!("m{i}"), 100).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(next_content(&mut sub).await);
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);

        msg::append(&db_pool, &hub, room_id, "ann", "m6", 100).await.unwrap();
        assert_eq!(next_content(&mut sub).await, "m6");
    }

    #[tokio::test]
    async fn unknown_room_cannot_be_subscribed() {
        let (db_pool, hub, _) = setup(2).await;
        assert!(subscribe(&db_pool, &hub, Uuid::now_v7()).await.is_err());
    }
}
