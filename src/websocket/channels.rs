//! Stock channels served by the binary.
//!
//! | channel     | message                                       | effect                                  |
//! |-------------|-----------------------------------------------|-----------------------------------------|
//! | `echo`      | anything                                      | replies on `echo` with the same message |
//! | `whoami`    | -                                             | replies on `whoami` with `{"id"}`       |
//! | `join`      | `{"group"}`                                   | joins, replies on `joined`              |
//! | `leave`     | `{"group"}`                                   | leaves, replies on `left`               |
//! | `broadcast` | `{"channel"?, "payload"}`                     | to everyone but the sender              |
//! | `group`     | `{"group", "channel"?, "payload"}`            | to every member of the group            |
//! | `direct`    | `{"to", "channel"?, "payload"}`               | to one connection by identity           |

use serde_json::{json, Map, Value};
use tracing::warn;

use super::hub::Hub;
use super::router::ChannelContext;

pub async fn register_default_channels(hub: &Hub) {
    hub.on("echo", |ctx: ChannelContext| async move {
        let message = Value::Object(ctx.message);
        ctx.hub.emit(&ctx.connection, ctx.frame_kind, "echo", &message).await;
    })
    .await;

    hub.on("whoami", |ctx: ChannelContext| async move {
        let reply = json!({ "id": ctx.connection.id() });
        ctx.hub.emit(&ctx.connection, ctx.frame_kind, "whoami", &reply).await;
    })
    .await;

    hub.on("join", |ctx: ChannelContext| async move {
        let Some(group) = required_str(&ctx, "group") else {
            return;
        };
        ctx.hub.join_group(&ctx.connection, group).await;
        let reply = json!({ "group": group });
        ctx.hub.emit(&ctx.connection, ctx.frame_kind, "joined", &reply).await;
    })
    .await;

    hub.on("leave", |ctx: ChannelContext| async move {
        let Some(group) = required_str(&ctx, "group") else {
            return;
        };
        ctx.hub.leave_group(&ctx.connection, group).await;
        let reply = json!({ "group": group });
        ctx.hub.emit(&ctx.connection, ctx.frame_kind, "left", &reply).await;
    })
    .await;

    hub.on("broadcast", |ctx: ChannelContext| async move {
        let channel = str_or(&ctx.message, "channel", "broadcast");
        let payload = payload(&ctx.message);
        ctx.hub
            .broadcast(Some(&*ctx.connection), ctx.frame_kind, channel, payload)
            .await;
    })
    .await;

    hub.on("group", |ctx: ChannelContext| async move {
        let Some(group) = required_str(&ctx, "group") else {
            return;
        };
        let channel = str_or(&ctx.message, "channel", "group");
        ctx.hub
            .emit_to_group(group, ctx.frame_kind, channel, payload(&ctx.message))
            .await;
    })
    .await;

    hub.on("direct", |ctx: ChannelContext| async move {
        let Some(to) = required_str(&ctx, "to") else {
            return;
        };
        let channel = str_or(&ctx.message, "channel", "direct");
        ctx.hub
            .emit_to_client(to, channel, ctx.frame_kind, payload(&ctx.message))
            .await;
    })
    .await;
}

fn required_str<'a>(ctx: &'a ChannelContext, key: &str) -> Option<&'a str> {
    let value = ctx.message.get(key).and_then(Value::as_str);
    if value.is_none() {
        warn!(
            "Connection {} sent request {:?} without string field {:?}",
            ctx.connection.id(),
            ctx.request_id,
            key
        );
    }
    value
}

fn str_or<'a>(message: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    message.get(key).and_then(Value::as_str).unwrap_or(default)
}

static NO_PAYLOAD: Value = Value::Null;

fn payload(message: &Map<String, Value>) -> &Value {
    message.get("payload").unwrap_or(&NO_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::websocket::connection::{Connection, FrameKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    async fn hub() -> Hub {
        let (hub, dispatcher) = Hub::new(&DispatchConfig::default());
        tokio::spawn(dispatcher.run());
        register_default_channels(&hub).await;
        hub
    }

    async fn client(hub: &Hub) -> (Arc<Connection>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.connect(Box::new(tx)).await, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    async fn send(hub: &Hub, conn: &Arc<Connection>, frame: Value) {
        hub.submit_frame(conn, FrameKind::Text, frame.to_string().as_bytes()).await;
    }

    #[tokio::test]
    async fn test_echo_and_whoami() {
        let hub = hub().await;
        let (conn, mut rx) = client(&hub).await;

        send(&hub, &conn, json!({"Channel": "echo", "Message": {"a": [1, 2]}})).await;
        assert_eq!(next(&mut rx).await, json!({"channel": "echo", "message": {"a": [1, 2]}}));

        send(&hub, &conn, json!({"Channel": "whoami"})).await;
        assert_eq!(next(&mut rx).await, json!({"channel": "whoami", "message": {"id": conn.id()}}));
    }

    #[tokio::test]
    async fn test_join_then_group_then_leave() {
        let hub = hub().await;
        let (a, mut a_rx) = client(&hub).await;

        send(&hub, &a, json!({"Channel": "join", "Message": {"group": "room"}})).await;
        assert_eq!(next(&mut a_rx).await["channel"], "joined");
        assert!(a.is_member("room").await);

        send(
            &hub,
            &a,
            json!({"Channel": "group", "Message": {"group": "room", "channel": "say", "payload": "hi"}}),
        )
        .await;
        assert_eq!(next(&mut a_rx).await, json!({"channel": "say", "message": "hi"}));

        send(&hub, &a, json!({"Channel": "leave", "Message": {"group": "room"}})).await;
        assert_eq!(next(&mut a_rx).await["channel"], "left");
        assert!(!a.is_member("room").await);
    }

    #[tokio::test]
    async fn test_direct_and_broadcast() {
        let hub = hub().await;
        let (a, mut a_rx) = client(&hub).await;
        let (_b, mut b_rx) = client(&hub).await;

        send(&hub, &a, json!({"Channel": "direct", "Message": {"to": a.id(), "payload": 7}})).await;
        assert_eq!(next(&mut a_rx).await, json!({"channel": "direct", "message": 7}));

        send(&hub, &a, json!({"Channel": "broadcast", "Message": {"payload": {"x": 1}}})).await;
        assert_eq!(next(&mut b_rx).await, json!({"channel": "broadcast", "message": {"x": 1}}));
        assert!(timeout(Duration::from_millis(100), a_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_field_sends_nothing() {
        let hub = hub().await;
        let (a, mut a_rx) = client(&hub).await;

        send(&hub, &a, json!({"Channel": "join", "Message": {"room": "typo"}})).await;
        assert!(timeout(Duration::from_millis(100), a_rx.recv()).await.is_err());
        assert!(a.groups().await.is_empty());
    }
}
