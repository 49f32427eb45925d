//! Retry behaviour as seen through the engine.

mod common;

use common::{engine_with, MockProvider};
use llm_exec::{Error, GenerateRequest, ProviderError, StandardErrorCode};
use tokio_test::{assert_err, assert_ok};

fn question() -> GenerateRequest {
    GenerateRequest::new("Summarize the plot of Hamlet in one line.")
}

#[tokio::test]
async fn test_transient_errors_are_retried_until_success() {
    let provider = MockProvider::new("A prince avenges his father.")
        .fail_next(ProviderError::new("openai", "Rate limit reached for requests").with_status(429))
        .fail_next(ProviderError::new("openai", "upstream connect error").with_status(502));
    let fx = engine_with(provider);

    let response = assert_ok!(fx.engine.generate(question()).await);
    assert_eq!(response.text, "A prince avenges his father.");
    assert_eq!(fx.provider.calls(), 3);
    assert_eq!(fx.events.count("retry_scheduled"), 2);
    assert_eq!(fx.events.count("request_failed"), 0);
}

#[tokio::test]
async fn test_timeout_message_is_transient() {
    let provider = MockProvider::new("ok")
        .fail_next(ProviderError::new("bedrock", "Read timed out after 30s"));
    let fx = engine_with(provider);

    fx.engine.generate(question()).await.unwrap();
    assert_eq!(fx.provider.calls(), 2);
}

#[tokio::test]
async fn test_fatal_errors_are_not_retried() {
    let provider = MockProvider::new("never").fail_next(
        ProviderError::new("openai", "Invalid value for 'max_tokens'")
            .with_status(400)
            .with_code("invalid_request_error"),
    );
    let fx = engine_with(provider);

    let err = fx.engine.generate(question()).await.unwrap_err();
    assert_eq!(fx.provider.calls(), 1);
    assert_eq!(fx.events.count("retry_scheduled"), 0);
    let provider_error = err.provider_error().unwrap();
    assert_eq!(provider_error.status, Some(400));
    assert_eq!(provider_error.standard_code(), StandardErrorCode::InvalidRequest);
}

#[tokio::test]
async fn test_exhausted_retries_return_the_last_error() {
    let unavailable = ProviderError::new("openai", "Service Unavailable").with_status(503);
    let fx = engine_with(MockProvider::new("never").fail_times(10, unavailable));

    let err = assert_err!(fx.engine.generate(question()).await);
    // One initial attempt plus three retries.
    assert_eq!(fx.provider.calls(), 4);
    assert!(matches!(err, Error::Provider(ref p) if p.status == Some(503)), "{:?}", err);
    assert_eq!(fx.events.count("retry_scheduled"), 3);
    assert_eq!(fx.events.count("request_failed"), 1);
    assert!(fx.local.is_empty(), "failures are never cached");
}

#[tokio::test]
async fn test_retry_notices_are_numbered_from_one() {
    let unavailable = ProviderError::new("openai", "Service Unavailable").with_status(503);
    let fx = engine_with(MockProvider::new("ok").fail_times(2, unavailable));
    fx.engine.generate(question()).await.unwrap();

    let attempts: Vec<u32> = fx
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            llm_exec::EngineEvent::RetryScheduled {
                attempt,
                max_retries,
                ..
            } => {
                assert_eq!(max_retries, 3);
                Some(attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}
