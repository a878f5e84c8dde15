//! Upload runs against a collection server on a local TCP listener

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use cellscan::bearer::{BearerInfo, DataBearer};
use cellscan::config::UploadConfig;
use cellscan::error::Result;
use cellscan::event::{self, Event, Generation, Position, Site, UploadOutcome};
use cellscan::store::{MemoryStore, NewObservation, RecordStore};
use cellscan::upload::protocol::{read_message, write_message, Request, Response};
use cellscan::upload::{uploader_worker, Uploader};

/// Bearer that is always up
#[derive(Default)]
struct LoopbackBearer {
    disconnects: AtomicUsize,
}

#[async_trait]
impl DataBearer for LoopbackBearer {
    async fn connect(&self) -> Result<BearerInfo> {
        Ok(BearerInfo {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            prefix: 30,
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            mtu: 1500,
        })
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collection server that answers every request with `status`
async fn spawn_server(status: &'static str) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let _request: Request = read_message(&mut socket).await.unwrap();
            write_message(&mut socket, &Response { status: status.to_string() })
                .await
                .unwrap();
        }
    });

    (port, connections)
}

fn upload_config(port: u16) -> UploadConfig {
    UploadConfig {
        target: Ipv4Addr::LOCALHOST,
        port,
        device_id: "cellscan-it".to_string(),
        max_attempts: 5,
        retry_delay_ms: 0,
        io_timeout_ms: 2000,
    }
}

async fn store_with(count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for n in 0..count {
        store
            .insert(NewObservation::now(
                Site {
                    generation: Generation::G3,
                    mcc: "310".to_string(),
                    mnc: "260".to_string(),
                    lac: "11001".to_string(),
                    cell_id: format!("{}", 4_000_000 + n),
                    signal_level: "-88".to_string(),
                },
                Position { lat: 47.6062, lon: -122.3321, alt: 54.0 },
            ))
            .await
            .unwrap();
    }
    store
}

async fn run_upload(store: Arc<MemoryStore>, port: u16) -> (UploadOutcome, Arc<LoopbackBearer>) {
    let bearer = Arc::new(LoopbackBearer::default());
    let uploader = Uploader::new(bearer.clone(), store, &upload_config(port));
    let (tx, mut rx) = event::channel();

    uploader_worker(uploader, tx, CancellationToken::new()).await;

    match rx.recv().await {
        Some(Event::UploadComplete { outcome }) => (outcome, bearer),
        other => panic!("Expected UploadComplete, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_rejecting_server_sees_five_attempts_and_nothing_is_marked() {
    let (port, connections) = spawn_server("FAIL").await;
    let store = store_with(3).await;

    let (outcome, bearer) = run_upload(store.clone(), port).await;

    assert_eq!(outcome, UploadOutcome::Failed);
    assert_eq!(connections.load(Ordering::SeqCst), 5);
    assert_eq!(store.select_unuploaded().await.unwrap().len(), 3);
    assert_eq!(bearer.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accepting_server_marks_everything_sent() {
    let (port, connections) = spawn_server("OK").await;
    let store = store_with(3).await;

    let (outcome, _bearer) = run_upload(store.clone(), port).await;

    assert_eq!(outcome, UploadOutcome::Uploaded(3));
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(store.select_unuploaded().await.unwrap().is_empty());
    assert!(store.all().iter().all(|o| o.uploaded));
}

#[tokio::test]
async fn test_empty_store_opens_no_connection() {
    let (port, connections) = spawn_server("OK").await;

    let (outcome, bearer) = run_upload(store_with(0).await, port).await;

    assert_eq!(outcome, UploadOutcome::NothingToSend);
    assert_eq!(connections.load(Ordering::SeqCst), 0);
    assert_eq!(bearer.disconnects.load(Ordering::SeqCst), 1);
}
