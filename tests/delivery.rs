mod common;

use std::collections::HashSet;

use common::{drain, RecordingGateway, World};
use whisperhub::{
    error::{ChatError, Missing},
    model::{ConversationId, MessageId, MessageStatus, UserId},
    protocol::{ClientCommand, ServerEvent},
};

fn received_ids(events: &[ServerEvent]) -> Vec<MessageId> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::ReceiveMessage { message_id, .. } => Some(*message_id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn group_send_reaches_live_devices_and_pushes_the_offline() {
    let world = World::new().await;
    let (sender, mut sender_rx) = world.connect(2).await;
    let (_ana_phone, mut ana_phone_rx) = world.connect(1).await;
    let (_ana_laptop, mut ana_laptop_rx) = world.connect(1).await;

    let receipt = world
        .hub
        .router
        .send_message(&sender, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();

    assert_eq!(receipt.delivered_live, 2);
    assert_eq!(receipt.echoed, 1);
    assert_eq!(receipt.status, MessageStatus::Received);
    assert_eq!(receipt.offline_recipients, vec![UserId(3)]);

    let messages = world.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Received);
    assert_eq!(
        world.store.status_log().await,
        vec![
            (receipt.message_id, MessageStatus::Sent),
            (receipt.message_id, MessageStatus::Received),
        ]
    );

    for rx in [&mut sender_rx, &mut ana_phone_rx, &mut ana_laptop_rx] {
        let events = drain(rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ServerEvent::ReceiveMessage {
                conversation_id,
                sender_id,
                content,
                message_type,
                status,
                message_id,
                send_timestamp,
            } => {
                assert_eq!(*conversation_id, ConversationId(42));
                assert_eq!(*sender_id, UserId(2));
                assert_eq!(content, "hi");
                assert_eq!(message_type, "Text");
                assert_eq!(*status, MessageStatus::Sent);
                assert_eq!(*message_id, receipt.message_id);
                assert_eq!(*send_timestamp, messages[0].sent_at);
            }
            other => panic!("expected ReceiveMessage, got {other:?}"),
        }
        assert_eq!(
            events[1],
            ServerEvent::UpdateMessageStatus {
                message_id: receipt.message_id,
                status: MessageStatus::Received,
            }
        );
    }

    let calls = world.push.calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (tokens, message) = &calls[0];
    assert_eq!(
        tokens.iter().cloned().collect::<HashSet<_>>(),
        HashSet::from(["tok-3-phone".to_owned(), "tok-3-tablet".to_owned()])
    );
    assert_eq!(message.title, "Binh");
    assert_eq!(message.body, "hi");
    assert_eq!(message.data["conversationId"], "42");
    assert_eq!(message.data["messageId"], receipt.message_id.to_string());
    assert_eq!(message.data["senderId"], "2");

    assert_eq!(
        world.store.last_message_at(ConversationId(42)).await,
        Some(messages[0].sent_at)
    );
}

#[tokio::test]
async fn outsiders_cannot_send() {
    let world = World::new().await;
    let (outsider, mut outsider_rx) = world.connect(4).await;
    let (_member, mut member_rx) = world.connect(1).await;

    let err = world
        .hub
        .router
        .send_message(&outsider, ConversationId(42), UserId(4), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ChatError::Authorization { user_id: UserId(4), conversation_id: ConversationId(42) }
    ));
    assert!(world.store.messages().await.is_empty());
    assert!(drain(&mut member_rx).is_empty());
    assert!(drain(&mut outsider_rx).is_empty());
    assert!(world.push.calls.lock().await.is_empty());
}

#[tokio::test]
async fn sender_id_must_match_the_connection() {
    let world = World::new().await;
    let (ana, _rx) = world.connect(1).await;

    let err = world
        .hub
        .router
        .send_message(&ana, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Authorization { user_id: UserId(1), .. }));
    assert!(world.store.messages().await.is_empty());
}

#[tokio::test]
async fn empty_content_and_unknown_conversations_are_rejected() {
    let world = World::new().await;
    let (ana, _rx) = world.connect(1).await;

    let err = world
        .hub
        .router
        .send_message(&ana, ConversationId(42), UserId(1), String::new(), "Text".to_owned())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let err = world
        .hub
        .router
        .send_message(&ana, ConversationId(7), UserId(1), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(Missing::Conversation(ConversationId(7)))));
    assert!(world.store.messages().await.is_empty());
}

#[tokio::test]
async fn nobody_online_keeps_status_sent() {
    let world = World::new().await;
    let (sender, mut sender_rx) = world.connect(2).await;

    let receipt = world
        .hub
        .router
        .send_message(&sender, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();

    assert_eq!(receipt.status, MessageStatus::Sent);
    assert_eq!(receipt.delivered_live, 0);
    assert_eq!(receipt.echoed, 1);
    assert_eq!(world.store.messages().await[0].status, MessageStatus::Sent);

    // only the echo, no status broadcast
    let events = drain(&mut sender_rx);
    assert_eq!(received_ids(&events), vec![receipt.message_id]);
    assert_eq!(events.len(), 1);

    let calls = world.push.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.len(), 3);
}

#[tokio::test]
async fn recipient_gone_after_partition_gets_no_push() {
    let world = World::new().await;
    let (sender, _sender_rx) = world.connect(2).await;
    let (_ana, ana_rx) = world.connect(1).await;
    let (_chi, mut chi_rx) = world.connect(3).await;

    // Ana's socket dies while the registry still lists her
    drop(ana_rx);

    let receipt = world
        .hub
        .router
        .send_message(&sender, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();

    assert_eq!(receipt.delivered_live, 1);
    assert!(receipt.offline_recipients.is_empty());
    assert!(world.push.calls.lock().await.is_empty());
    assert_eq!(received_ids(&drain(&mut chi_rx)), vec![receipt.message_id]);
}

#[tokio::test]
async fn failed_push_tokens_do_not_fail_the_send() {
    let world = World::with_gateway(RecordingGateway {
        failing: vec!["tok-3-phone".to_owned()],
        ..Default::default()
    })
    .await;
    let (sender, _rx) = world.connect(2).await;

    let receipt = world
        .hub
        .router
        .send_message(&sender, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();

    assert_eq!(receipt.push.attempted, 3);
    assert_eq!(
        receipt.push.failed,
        vec![("tok-3-phone".to_owned(), "not registered".to_owned())]
    );
    assert_eq!(world.store.messages().await.len(), 1);
}

#[tokio::test]
async fn concurrent_senders_are_seen_in_persistence_order() {
    let world = World::new().await;
    let (ana, mut ana_rx) = world.connect(1).await;
    let (binh, mut binh_rx) = world.connect(2).await;
    let (_chi, mut chi_rx) = world.connect(3).await;

    let mut tasks = Vec::new();
    for (caller, user) in [(ana, 1), (binh, 2)] {
        let hub = world.hub.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..20 {
                hub.router
                    .send_message(&caller, ConversationId(42), UserId(user), format!("m{n}"), "Text".to_owned())
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for rx in [&mut ana_rx, &mut binh_rx, &mut chi_rx] {
        let ids = received_ids(&drain(rx));
        assert_eq!(ids.len(), 40);
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}

#[tokio::test]
async fn mark_read_moves_status_forward_once() {
    let world = World::new().await;
    let (binh, mut binh_rx) = world.connect(2).await;
    let (ana, mut ana_rx) = world.connect(1).await;

    let receipt = world
        .hub
        .router
        .send_message(&binh, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();
    drain(&mut binh_rx);
    drain(&mut ana_rx);

    let status = world.hub.router.mark_read(&ana, receipt.message_id).await.unwrap();
    assert_eq!(status, MessageStatus::Read);
    let update = ServerEvent::UpdateMessageStatus {
        message_id: receipt.message_id,
        status: MessageStatus::Read,
    };
    assert_eq!(drain(&mut binh_rx), vec![update.clone()]);
    assert_eq!(drain(&mut ana_rx), vec![update]);

    let again = world.hub.router.mark_read(&ana, receipt.message_id).await.unwrap();
    assert_eq!(again, MessageStatus::Read);
    assert!(drain(&mut binh_rx).is_empty());

    assert!(matches!(
        world.hub.router.mark_read(&binh, receipt.message_id).await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        world.hub.router.mark_read(&ana, MessageId(999)).await,
        Err(ChatError::NotFound(Missing::Message(MessageId(999))))
    ));
}

#[tokio::test]
async fn dispatch_reports_failures_to_the_caller_only() {
    let world = World::new().await;
    let (outsider, mut outsider_rx) = world.connect(4).await;
    let (_ana, mut ana_rx) = world.connect(1).await;

    let result = world
        .hub
        .dispatch(
            &outsider,
            ClientCommand::SendMessage {
                conversation_id: ConversationId(42),
                sender_id: UserId(4),
                content: "hi".to_owned(),
                message_type: "Text".to_owned(),
            },
        )
        .await;
    assert!(result.is_err());

    match drain(&mut outsider_rx).as_slice() {
        [ServerEvent::Error { kind, op, .. }] => {
            assert_eq!(kind, "authorization");
            assert_eq!(op.as_deref(), Some("SendMessage"));
        }
        other => panic!("expected one error event, got {other:?}"),
    }
    assert!(drain(&mut ana_rx).is_empty());
}

#[tokio::test]
async fn disconnect_removes_presence() {
    let world = World::new().await;
    let (ana, _rx) = world.connect(1).await;
    assert!(world.hub.registry.is_online(UserId(1)).await);

    world.hub.disconnect(&ana).await;
    assert!(!world.hub.registry.is_online(UserId(1)).await);

    let (binh, _binh_rx) = world.connect(2).await;
    let receipt = world
        .hub
        .router
        .send_message(&binh, ConversationId(42), UserId(2), "hi".to_owned(), "Text".to_owned())
        .await
        .unwrap();
    assert!(receipt.offline_recipients.contains(&UserId(1)));
}
