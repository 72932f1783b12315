// DANS : tests/relay_flow.rs
//
// Parcours complet du relais : stream amont simulé, contrôleur, fanout,
// et serveur WebSocket réel sur un port éphémère.

use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use geyser_relay::{
    communication::{subscribe_message, Frame, SlotUpdate},
    error::RelayError,
    fanout::{Fanout, Readiness},
    server::{self, Shutdown},
    stream::{ControlCommand, ControllerSettings, StreamController},
    subscription::TokenWatch,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use yellowstone_grpc_proto::prelude::{
    subscribe_update::UpdateOneof, SubscribeRequest, SubscribeUpdate, SubscribeUpdateAccount,
    SubscribeUpdateAccountInfo, SubscribeUpdateSlot,
};

fn watch(mint: &str, creator: &str) -> TokenWatch {
    TokenWatch { mint: mint.into(), creator: creator.into() }
}

fn slot_update(slot: u64) -> SubscribeUpdate {
    SubscribeUpdate {
        update_oneof: Some(UpdateOneof::Slot(SubscribeUpdateSlot { slot, ..Default::default() })),
        ..Default::default()
    }
}

fn account_update(slot: u64, lamports: u64) -> SubscribeUpdate {
    SubscribeUpdate {
        update_oneof: Some(UpdateOneof::Account(SubscribeUpdateAccount {
            account: Some(SubscribeUpdateAccountInfo {
                pubkey: vec![7; 32],
                owner: vec![0; 32],
                lamports,
                data: vec![1, 2, 3],
                ..Default::default()
            }),
            slot,
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        frames.push(serde_json::from_str(&payload).unwrap());
    }
    frames
}

fn written(rx: &mut fmpsc::UnboundedReceiver<SubscribeRequest>) -> Vec<SubscribeRequest> {
    let mut requests = Vec::new();
    while let Ok(Some(request)) = rx.try_next() {
        requests.push(request);
    }
    requests
}

#[tokio::test]
async fn subscribed_frames_reach_every_open_consumer_in_order() {
    let fanout = Arc::new(Fanout::new(16));
    let (a, mut rx_a) = fanout.register();
    let (b, mut rx_b) = fanout.register();
    a.set_readiness(Readiness::Open);
    b.set_readiness(Readiness::Open);

    let (sink, mut requests) = fmpsc::unbounded();
    let controller = StreamController::new(sink, fanout.clone(), ControllerSettings::default());

    let (commands_tx, commands_rx) = mpsc::channel(4);
    commands_tx.send(ControlCommand::Subscribe(vec![watch("M1", "C1")])).await.unwrap();

    let upstream = futures::stream::iter(vec![
        Ok::<_, String>(slot_update(10)),
        Ok(account_update(10, 5_000)),
        Ok(slot_update(11)),
    ]);

    let result = controller.run(upstream, commands_rx).await;
    assert!(matches!(result, Err(RelayError::UpstreamStream(_))));

    let requests = written(&mut requests);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], SubscribeRequest::default());
    assert_eq!(requests[1].accounts["token_0"].account, vec!["M1", "C1"]);
    assert_eq!(requests[1].transactions["token_txs"].account_include, vec!["M1", "C1"]);

    let frames_a = drain(&mut rx_a);
    let frames_b = drain(&mut rx_b);
    assert_eq!(frames_a, frames_b);
    assert_eq!(frames_a.iter().map(Frame::kind).collect::<Vec<_>>(), vec!["slot", "account", "slot"]);
    match &frames_a[1] {
        Frame::Account(account) => {
            assert_eq!(account.lamports, 5_000);
            assert_eq!(account.data_len, 3);
            assert_eq!(account.pubkey, bs58::encode([7u8; 32]).into_string());
        }
        other => panic!("trame inattendue : {other:?}"),
    }
}

#[tokio::test]
async fn second_subscribe_clears_before_new_filter() {
    let fanout = Arc::new(Fanout::new(4));
    let (sink, mut requests) = fmpsc::unbounded();
    let controller = StreamController::new(sink, fanout, ControllerSettings::default());

    let (commands_tx, commands_rx) = mpsc::channel(4);
    commands_tx.send(ControlCommand::Subscribe(vec![watch("M1", "C1")])).await.unwrap();
    commands_tx.send(ControlCommand::Subscribe(vec![watch("M2", "C2"), watch("M3", "C3")])).await.unwrap();
    drop(commands_tx);

    let upstream = futures::stream::iter(Vec::<Result<SubscribeUpdate, String>>::new());
    assert!(controller.run(upstream, commands_rx).await.is_err());

    let requests = written(&mut requests);
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0], SubscribeRequest::default());
    assert_eq!(requests[1].accounts["token_0"].account, vec!["M1", "C1"]);
    assert_eq!(requests[2], SubscribeRequest::default());
    assert_eq!(requests[3].accounts["token_0"].account, vec!["M2", "C2"]);
    assert_eq!(requests[3].accounts["token_1"].account, vec!["M3", "C3"]);
    assert_eq!(requests[3].transactions["token_txs"].account_include, vec!["M2", "C2", "M3", "C3"]);
}

#[tokio::test]
async fn websocket_consumers_subscribe_and_receive_broadcasts() {
    let fanout = Arc::new(Fanout::new(16));
    let (commands_tx, mut commands_rx) = mpsc::channel(8);
    let shutdown = Shutdown::new();
    let listener = server::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server::serve(listener, fanout.clone(), commands_tx, shutdown.handle()));

    let url = format!("ws://127.0.0.1:{port}");
    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = connect_async(url.as_str()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while fanout.open_consumers() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("les deux consommateurs doivent être prêts");

    let request = subscribe_message(&[watch("M1", "C1")]);
    first.send(Message::Text(request.to_string())).await.unwrap();
    let command = tokio::time::timeout(Duration::from_secs(5), commands_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(command, ControlCommand::Subscribe(vec![watch("M1", "C1")]));

    // Un message invalide ne ferme pas la connexion.
    second.send(Message::Text("pas du json".into())).await.unwrap();

    let frame = Frame::Slot(SlotUpdate { slot: 42, parent: Some(41), status: "SLOT_CONFIRMED".into() });
    assert_eq!(fanout.broadcast(&frame), 2);

    for client in [&mut first, &mut second] {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = message else {
            panic!("message texte attendu");
        };
        assert_eq!(serde_json::from_str::<Frame>(&text).unwrap(), frame);
    }

    first.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while fanout.len() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("le consommateur fermé doit être retiré");
}

#[tokio::test]
async fn shutdown_flushes_queued_frames_then_closes() {
    let fanout = Arc::new(Fanout::new(16));
    let (commands_tx, _commands_rx) = mpsc::channel(8);
    let shutdown = Shutdown::new();
    let listener = server::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_task = tokio::spawn(server::serve(listener, fanout.clone(), commands_tx, shutdown.handle()));

    let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}").as_str()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while fanout.open_consumers() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("le consommateur doit être prêt");

    // Le serveur s'arrête d'abord, comme dans le binaire.
    server_task.abort();
    let _ = server_task.await;

    for slot in 1..=3 {
        let frame = Frame::Slot(SlotUpdate { slot, parent: None, status: "SLOT_PROCESSED".into() });
        assert_eq!(fanout.broadcast(&frame), 1);
    }
    let drain = tokio::spawn({
        let fanout = fanout.clone();
        async move { shutdown.drain(&fanout, Duration::from_secs(5)).await }
    });

    let mut slots = Vec::new();
    let mut closed = false;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text).unwrap() {
                Frame::Slot(update) => slots.push(update.slot),
                other => panic!("trame inattendue : {other:?}"),
            },
            Ok(Message::Close(_)) => {
                closed = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    assert_eq!(slots, vec![1, 2, 3]);
    assert!(closed, "une trame de fermeture doit suivre les trames en file");
    assert!(drain.await.unwrap());
    assert_eq!(fanout.broadcast(&Frame::Slot(SlotUpdate { slot: 4, parent: None, status: "SLOT_PROCESSED".into() })), 0);
}
