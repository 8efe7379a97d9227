use anyhow::Result;
use std::time::Duration;
use web_push_sender::{
    clients::push::PushClient,
    crypto::{ece::PayloadEncryptor, vapid::verify_token},
    error::PushError,
    models::{
        notification::{NotificationRequest, PushPayload, Urgency},
        status::DeliveryStatus,
    },
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

use crate::common::{self, TestSubscriber};

fn request() -> NotificationRequest {
    NotificationRequest::new("Test", "12:00:00\nThis is a test\nUrgency: normal")
}

/// Test: A delivery is a single encrypted POST with the Web Push headers
#[tokio::test]
async fn test_send_posts_encrypted_payload_with_headers() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/a"))
        .and(header("Content-Encoding", "aes128gcm"))
        .and(header("TTL", "3600"))
        .and(header("Urgency", "normal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/a", server.uri());
    let subscriber = TestSubscriber::new(&endpoint);
    let signer = common::test_signer();
    let request = request();

    let message = PayloadEncryptor::default()
        .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
    let authorization = signer.authorization(&server.uri()).await?;

    let client = PushClient::new(Duration::from_secs(5))?;
    let status = client
        .send(&endpoint, &message, &authorization, request.ttl, request.urgency)
        .await?;

    assert_eq!(status, 201);

    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 1, "Exactly one request should be sent");

    let sent = &received[0];
    assert!(!sent.body.is_empty());
    assert_eq!(
        common::header(sent, "Content-Type"),
        Some("application/octet-stream")
    );

    let plaintext = subscriber.decrypt(&sent.body)?;
    let payload: PushPayload = serde_json::from_slice(&plaintext)?;
    assert_eq!(payload, request.payload());

    Ok(())
}

/// Test: The Authorization header carries a VAPID token for the endpoint origin
#[tokio::test]
async fn test_authorization_header_is_valid_vapid() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/vapid", server.uri());
    let subscriber = TestSubscriber::new(&endpoint);
    let signer = common::test_signer();
    let request = request().with_urgency(Urgency::High).with_ttl(60);

    let message = PayloadEncryptor::default()
        .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
    let authorization = signer.authorization(&server.uri()).await?;

    PushClient::new(Duration::from_secs(5))?
        .send(&endpoint, &message, &authorization, request.ttl, request.urgency)
        .await?;

    let received = server.received_requests().await.unwrap_or_default();
    let sent = &received[0];

    assert_eq!(common::header(sent, "Urgency"), Some("high"));
    assert_eq!(common::header(sent, "TTL"), Some("60"));

    let value = common::header(sent, "Authorization").unwrap_or_default();
    let rest = value.strip_prefix("vapid t=").expect("vapid scheme");
    let (token, key) = rest.split_once(", k=").expect("token and key");

    assert_eq!(key, signer.public_key_base64url());

    let claims = verify_token(token, &signer.verifying_key(), &server.uri())?;
    assert_eq!(claims.aud, server.uri());
    assert_eq!(claims.sub, common::SUBJECT);

    Ok(())
}

/// Test: Push service status codes map onto delivery outcomes
#[tokio::test]
async fn test_status_codes_are_classified() -> Result<()> {
    let cases = [
        (200, DeliveryStatus::Delivered),
        (201, DeliveryStatus::Delivered),
        (202, DeliveryStatus::Delivered),
        (404, DeliveryStatus::Expired),
        (410, DeliveryStatus::Expired),
        (413, DeliveryStatus::PermanentFailure),
        (400, DeliveryStatus::PermanentFailure),
        (403, DeliveryStatus::PermanentFailure),
        (429, DeliveryStatus::TransientFailure),
        (500, DeliveryStatus::TransientFailure),
        (503, DeliveryStatus::TransientFailure),
    ];

    let signer = common::test_signer();
    let client = PushClient::new(Duration::from_secs(5))?;

    for (code, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
            .mount(&server)
            .await;

        let endpoint = format!("{}/push/{}", server.uri(), code);
        let subscriber = TestSubscriber::new(&endpoint);
        let request = request();
        let message = PayloadEncryptor::default()
            .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
        let authorization = signer.authorization(&server.uri()).await?;

        let outcome = client
            .deliver(
                &subscriber.subscription,
                &message,
                &authorization,
                request.ttl,
                request.urgency,
            )
            .await;

        assert_eq!(outcome.status, expected, "status {}", code);
        let expected_code = if code == 413 { None } else { Some(code) };
        assert_eq!(outcome.status_code, expected_code, "status code {}", code);
    }

    Ok(())
}

/// Test: Retry-After on a 429 is exposed on the error
#[tokio::test]
async fn test_retry_after_is_parsed() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/limited", server.uri());
    let subscriber = TestSubscriber::new(&endpoint);
    let signer = common::test_signer();
    let request = request();
    let message = PayloadEncryptor::default()
        .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
    let authorization = signer.authorization(&server.uri()).await?;

    let result = PushClient::new(Duration::from_secs(5))?
        .send(&endpoint, &message, &authorization, request.ttl, request.urgency)
        .await;

    assert_eq!(
        result,
        Err(PushError::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        })
    );

    Ok(())
}

/// Test: A 413 reports the size of the body that was rejected
#[tokio::test]
async fn test_payload_too_large_reports_body_size() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(413))
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/big", server.uri());
    let subscriber = TestSubscriber::new(&endpoint);
    let signer = common::test_signer();
    let request = request();
    let message = PayloadEncryptor::default()
        .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
    let authorization = signer.authorization(&server.uri()).await?;

    let result = PushClient::new(Duration::from_secs(5))?
        .send(&endpoint, &message, &authorization, request.ttl, request.urgency)
        .await;

    assert_eq!(result, Err(PushError::PayloadTooLarge(message.body().len())));

    Ok(())
}

/// Test: Connection failures are transient transport errors
#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() -> Result<()> {
    let endpoint = "http://127.0.0.1:1/push/unreachable";
    let subscriber = TestSubscriber::new(endpoint);
    let signer = common::test_signer();
    let request = request();
    let message = PayloadEncryptor::default()
        .encrypt_notification(&request, &subscriber.subscription.subscriber_keys()?)?;
    let authorization = signer.authorization("http://127.0.0.1:1").await?;

    let result = PushClient::new(Duration::from_secs(2))?
        .send(endpoint, &message, &authorization, request.ttl, request.urgency)
        .await;

    match result {
        Err(e @ PushError::Transport(_)) => {
            assert_eq!(e.status(), DeliveryStatus::TransientFailure)
        }
        other => panic!("expected transport error, got {:?}", other),
    }

    Ok(())
}
