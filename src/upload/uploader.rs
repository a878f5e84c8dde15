//! # Uploader
//!
//! One upload run owns the modem for data:
//!
//! ```text
//! bearer connect -> read pending -> (TCP exchange, retried) -> mark -> bearer disconnect
//! ```
//!
//! The run always ends with an `UploadComplete` event so the coordinator can
//! hand the radio back to the scanner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::{read_message, write_message, Request, Response};
use crate::bearer::DataBearer;
use crate::config::UploadConfig;
use crate::error::{CellscanError, Result};
use crate::event::{Event, EventSender, UploadOutcome};
use crate::store::RecordStore;

/// One-shot request/response client for the collection server
#[derive(Debug, Clone)]
pub struct UploadClient {
    addr: SocketAddr,
    io_timeout: Duration,
}

impl UploadClient {
    pub fn new(addr: SocketAddr, io_timeout: Duration) -> Self {
        Self { addr, io_timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a connection, send `request` and wait for the reply
    ///
    /// Connect, write and read are each bounded by the I/O timeout.
    pub async fn exchange(&self, request: &Request) -> Result<Response> {
        let mut stream = timeout(self.io_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| timed_out("connect", self.addr))?
            .map_err(|e| CellscanError::Transport(format!("connect to {}: {}", self.addr, e)))?;

        timeout(self.io_timeout, write_message(&mut stream, request))
            .await
            .map_err(|_| timed_out("send", self.addr))??;

        timeout(self.io_timeout, read_message(&mut stream))
            .await
            .map_err(|_| timed_out("reply", self.addr))?
    }
}

fn timed_out(stage: &str, addr: SocketAddr) -> CellscanError {
    CellscanError::Transport(format!("{} timed out talking to {}", stage, addr))
}

pub struct Uploader {
    bearer: Arc<dyn DataBearer>,
    store: Arc<dyn RecordStore>,
    client: UploadClient,
    device_id: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Uploader {
    pub fn new(bearer: Arc<dyn DataBearer>, store: Arc<dyn RecordStore>, config: &UploadConfig) -> Self {
        Self {
            bearer,
            store,
            client: UploadClient::new(SocketAddr::from((config.target, config.port)), config.io_timeout()),
            device_id: config.device_id.clone(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Bring the bearer up, send everything pending, then tear the bearer down
    ///
    /// Never fails; the outcome says what happened.
    pub async fn upload(&self) -> UploadOutcome {
        info!("Connecting data bearer for upload");
        let outcome = match self.bearer.connect().await {
            Ok(info) => {
                info!("Data bearer up with {}/{} via {}", info.ip, info.prefix, info.gateway);
                match self.send_pending().await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Upload failed: {}", e);
                        UploadOutcome::Failed
                    }
                }
            }
            Err(e) => {
                error!("Could not bring up data bearer: {}", e);
                UploadOutcome::Failed
            }
        };

        self.bearer.disconnect().await;
        outcome
    }

    /// Send every unsent observation, retrying the whole exchange on failure
    ///
    /// Only the ids read here are marked, so observations stored while the
    /// exchange is in flight wait for the next run.
    ///
    /// # Errors
    ///
    /// Returns store failures. Transport failures and rejections are retried
    /// and end in `UploadOutcome::Failed`.
    pub async fn send_pending(&self) -> Result<UploadOutcome> {
        let pending = self.store.select_unuploaded().await?;
        if pending.is_empty() {
            info!("No observations pending upload");
            return Ok(UploadOutcome::NothingToSend);
        }

        let ids: Vec<i64> = pending.iter().map(|o| o.id).collect();
        let request = Request::upload(&self.device_id, &pending);
        debug!("Uploading {} observations to {}", ids.len(), self.client.addr());

        for attempt in 1..=self.max_attempts {
            match self.client.exchange(&request).await {
                Ok(response) if response.is_ok() => {
                    self.store.mark_uploaded(&ids).await?;
                    info!("Uploaded {} observations", ids.len());
                    return Ok(UploadOutcome::Uploaded(ids.len()));
                }
                Ok(response) => warn!(
                    "Server answered {:?} (attempt {}/{})",
                    response.status, attempt, self.max_attempts
                ),
                Err(e) => warn!("Upload attempt {}/{} failed: {}", attempt, self.max_attempts, e),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        error!("Giving up on upload after {} attempts", self.max_attempts);
        Ok(UploadOutcome::Failed)
    }
}

/// Uploader task body: one run, always reported with `UploadComplete`
pub async fn uploader_worker(uploader: Uploader, events: EventSender, cancel: CancellationToken) {
    let finished = tokio::select! {
        outcome = uploader.upload() => Some(outcome),
        _ = cancel.cancelled() => None,
    };

    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            warn!("Upload cancelled, tearing down bearer");
            uploader.bearer.disconnect().await;
            UploadOutcome::Failed
        }
    };

    let _ = events.send(Event::UploadComplete { outcome });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearer::BearerInfo;
    use crate::event::{self, Generation, Position, Site};
    use crate::store::{MemoryStore, NewObservation};
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeBearer {
        fail_connect: bool,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl DataBearer for FakeBearer {
        async fn connect(&self) -> Result<BearerInfo> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(CellscanError::ConnectTimeout { attempts: 10 });
            }
            Ok(BearerInfo {
                ip: Ipv4Addr::new(10, 64, 12, 7),
                prefix: 30,
                gateway: Ipv4Addr::new(10, 64, 12, 8),
                mtu: 1430,
            })
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(port: u16) -> UploadConfig {
        UploadConfig {
            target: Ipv4Addr::LOCALHOST,
            port,
            device_id: "cellscan-test".to_string(),
            max_attempts: 3,
            retry_delay_ms: 0,
            io_timeout_ms: 2000,
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(NewObservation::now(
                Site {
                    generation: Generation::G2,
                    mcc: "310".to_string(),
                    mnc: "410".to_string(),
                    lac: "7841".to_string(),
                    cell_id: "29331".to_string(),
                    signal_level: "-71".to_string(),
                },
                Position { lat: 35.08, lon: -106.65, alt: 1619.0 },
            ))
            .await
            .unwrap();
        store
    }

    /// Accept one connection, read one request and answer `status`
    async fn answer_once(listener: &TcpListener, status: &str) -> Request {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request: Request = read_message(&mut socket).await.unwrap();
        write_message(&mut socket, &Response { status: status.to_string() })
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn test_bearer_failure_reports_failed_and_still_disconnects() {
        let bearer = Arc::new(FakeBearer { fail_connect: true, ..Default::default() });
        let store = seeded_store().await;
        // Nothing listens on port 9; no traffic should be attempted anyway
        let uploader = Uploader::new(bearer.clone(), store.clone(), &config(9));

        assert_eq!(uploader.upload().await, UploadOutcome::Failed);
        assert_eq!(bearer.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(store.select_unuploaded().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_then_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let bearer = Arc::new(FakeBearer::default());
        let store = seeded_store().await;
        let uploader = Uploader::new(bearer.clone(), store.clone(), &config(port));

        let server = tokio::spawn(async move {
            answer_once(&listener, "BUSY").await;
            answer_once(&listener, "OK").await
        });

        assert_eq!(uploader.upload().await, UploadOutcome::Uploaded(1));

        match server.await.unwrap() {
            Request::Upload { device, sites } => {
                assert_eq!(device, "cellscan-test");
                assert_eq!(sites.len(), 1);
                assert_eq!(sites[0].cellid, "29331");
            }
        }
        assert!(store.select_unuploaded().await.unwrap().is_empty());
        assert_eq!(bearer.connects.load(Ordering::SeqCst), 1);
        assert_eq!(bearer.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_attempts() {
        // Bind then drop to get a port nobody is listening on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let store = seeded_store().await;
        let uploader = Uploader::new(Arc::new(FakeBearer::default()), store.clone(), &config(port));

        assert_eq!(uploader.send_pending().await.unwrap(), UploadOutcome::Failed);
        assert_eq!(store.select_unuploaded().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_worker_reports_cancelled_upload() {
        struct HangingBearer(AtomicUsize);

        #[async_trait]
        impl DataBearer for HangingBearer {
            async fn connect(&self) -> Result<BearerInfo> {
                std::future::pending().await
            }
            async fn disconnect(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let bearer = Arc::new(HangingBearer(AtomicUsize::new(0)));
        let uploader = Uploader::new(bearer.clone(), Arc::new(MemoryStore::new()), &config(9));
        let (tx, mut rx) = event::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        uploader_worker(uploader, tx, cancel).await;

        assert_eq!(
            rx.recv().await,
            Some(Event::UploadComplete { outcome: UploadOutcome::Failed })
        );
        assert_eq!(bearer.0.load(Ordering::SeqCst), 1);
    }
}
