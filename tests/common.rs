use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use p256::{SecretKey, ecdsa::SigningKey, elliptic_curve::rand_core::OsRng};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use web_push_sender::{
    clients::{push::PushClient, store::SubscriptionStore},
    crypto::{
        ece,
        keys::{AUTH_SECRET_LEN, encode_base64url, public_key_bytes},
        vapid::VapidSigner,
    },
    fanout::{FanoutConfig, FanoutCoordinator},
    models::{retry::RetryConfig, subscription::Subscription},
};

pub const SUBJECT: &str = "mailto:ops@example.com";

/// A browser-side subscription plus the secrets needed to read what was sent to it.
pub struct TestSubscriber {
    pub subscription: Subscription,
    pub secret: SecretKey,
    pub auth: [u8; AUTH_SECRET_LEN],
}

impl TestSubscriber {
    pub fn new(endpoint: &str) -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let auth: [u8; AUTH_SECRET_LEN] = rand::random();

        let subscription = Subscription::new(
            endpoint,
            encode_base64url(&public_key_bytes(&secret.public_key())),
            encode_base64url(&auth),
        );

        Self {
            subscription,
            secret,
            auth,
        }
    }

    pub fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>> {
        Ok(ece::decrypt(body, &self.secret, &self.auth)?)
    }
}

pub fn test_signer() -> Arc<VapidSigner> {
    let key = SigningKey::random(&mut OsRng);
    Arc::new(
        VapidSigner::new(key, SUBJECT, Duration::from_secs(12 * 60 * 60))
            .expect("valid VAPID signer"),
    )
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 20,
        max_delay_ms: 200,
        backoff_multiplier: 2,
        max_retry_after_ms: 5_000,
    }
}

pub fn fanout_config(concurrency: usize, retry: RetryConfig) -> FanoutConfig {
    FanoutConfig {
        concurrency,
        retry,
        allow_insecure_endpoints: true,
    }
}

pub fn coordinator(
    store: Arc<dyn SubscriptionStore>,
    signer: Arc<VapidSigner>,
    config: FanoutConfig,
) -> Result<FanoutCoordinator> {
    let push_client = PushClient::new(Duration::from_secs(5))?;
    Ok(FanoutCoordinator::new(store, push_client, signer, config))
}

pub fn header<'a>(request: &'a wiremock::Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Push endpoint that answers 201 after a delay and records how many
/// requests it was handling at the same time.
pub struct InFlightServer {
    pub uri: String,
    pub max_in_flight: Arc<AtomicUsize>,
    pub handled: Arc<AtomicUsize>,
}

impl InFlightServer {
    pub async fn start(delay: Duration) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let uri = format!("http://{}", listener.local_addr()?);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));

        let (current, max, count) = (in_flight.clone(), max_in_flight.clone(), handled.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (current, max, count) = (current.clone(), max.clone(), count.clone());
                tokio::spawn(async move {
                    if read_request(stream, delay, &current, &max).await.is_ok() {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        Ok(Self {
            uri,
            max_in_flight,
            handled,
        })
    }
}

async fn read_request(
    mut stream: TcpStream,
    delay: Duration,
    current: &AtomicUsize,
    max: &AtomicUsize,
) -> Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before headers");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let content_length = String::from_utf8_lossy(&buf[..header_end])
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
    max.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    current.fetch_sub(1, Ordering::SeqCst);

    stream
        .write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await?;
    stream.shutdown().await?;

    Ok(())
}
