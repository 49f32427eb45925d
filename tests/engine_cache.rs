//! Engine behaviour around the two-tier cache.

mod common;

use common::{engine_with, engine_with_remote, file_store, temp_cache_dir, MockProvider};
use llm_exec::cache::{CacheBackend, MemoryStore};
use llm_exec::provider::ProviderKind;
use llm_exec::types::{Message, Prompt};
use llm_exec::{CacheSource, Engine, EngineConfig, GenerateRequest};
use std::time::Duration;
use std::sync::{Arc, Mutex};

fn france() -> GenerateRequest {
    GenerateRequest::new("What is the capital of France?")
        .model("gpt-4o-mini")
        .temperature(0.0)
}

#[tokio::test]
async fn test_repeated_deterministic_call_is_free() {
    let fx = engine_with(MockProvider::new("Paris"));

    let first = fx.engine.generate(france()).await.unwrap();
    assert_eq!(first.text, "Paris");
    assert_eq!(first.cache_source, CacheSource::Miss);
    assert_eq!(fx.provider.calls(), 1);

    let second = fx.engine.generate(france()).await.unwrap();
    assert_eq!(second.text, "Paris");
    assert_eq!(second.cache_source, CacheSource::Local);
    assert_eq!(fx.provider.calls(), 1, "second call must not reach the provider");
    assert_eq!(fx.engine.cache().stats().hits_local, 1);
}

#[tokio::test]
async fn test_clear_cache_forces_exactly_one_fresh_call() {
    let fx = engine_with(MockProvider::new("Paris"));
    fx.engine.generate(france()).await.unwrap();

    let fresh = fx.engine.generate(france().clear_cache(true)).await.unwrap();
    assert_eq!(fresh.cache_source, CacheSource::Miss);
    assert_eq!(fresh.metadata["call"], 2);
    assert_eq!(fx.provider.calls(), 2);

    // The fresh result replaced the old entry.
    let again = fx.engine.generate(france()).await.unwrap();
    assert!(again.cache_source.is_hit());
    assert_eq!(again.metadata["call"], 2);
    assert_eq!(fx.provider.calls(), 2);
}

#[tokio::test]
async fn test_nonzero_temperature_is_never_cached() {
    let fx = engine_with(MockProvider::new("Lyon?"));
    let warm = france().temperature(0.7);

    assert!(fx.engine.fingerprint(&warm).unwrap().is_none());
    fx.engine.generate(warm.clone()).await.unwrap();
    let second = fx.engine.generate(warm).await.unwrap();
    assert_eq!(second.cache_source, CacheSource::Miss);
    assert_eq!(fx.provider.calls(), 2);
    assert!(fx.local.is_empty());
}

#[tokio::test]
async fn test_use_cache_false_neither_reads_nor_writes() {
    let fx = engine_with(MockProvider::new("Paris"));

    fx.engine.generate(france().use_cache(false)).await.unwrap();
    assert!(fx.local.is_empty());

    fx.engine.generate(france()).await.unwrap();
    assert_eq!(fx.provider.calls(), 2);

    let bypass = fx.engine.generate(france().use_cache(false)).await.unwrap();
    assert_eq!(bypass.cache_source, CacheSource::Miss);
    assert_eq!(fx.provider.calls(), 3);
}

#[tokio::test]
async fn test_output_affecting_fields_change_the_fingerprint() {
    let fx = engine_with(MockProvider::new("Paris"));
    let base = france();
    let key = fx.engine.fingerprint(&base).unwrap().unwrap();

    let variants = [
        base.clone().system_prompt("Answer in French."),
        base.clone().max_tokens(64),
        base.clone().model("gpt-4o"),
        base.clone().top_p(0.5),
    ];
    for variant in &variants {
        let other = fx.engine.fingerprint(variant).unwrap().unwrap();
        assert_ne!(key, other, "{:?}", variant);
    }

    // Cache-control flags and callbacks are not part of the fingerprint.
    let same = base.clone().clear_cache(true).on_progress(|_| {});
    assert_eq!(fx.engine.fingerprint(&same).unwrap().unwrap(), key);
}

#[tokio::test]
async fn test_conversation_prompts_are_cached() {
    let fx = engine_with(MockProvider::new("Paris"));
    let chat = GenerateRequest::new(Prompt::from(vec![
        Message::user("Hi"),
        Message::assistant("Hello!"),
        Message::user("What is the capital of France?"),
    ]));

    fx.engine.generate(chat.clone()).await.unwrap();
    let again = fx.engine.generate(chat).await.unwrap();
    assert!(again.cache_source.is_hit());
    assert_eq!(fx.provider.calls(), 1);

    // The same text as a single prompt is a different request.
    fx.engine.generate(GenerateRequest::new("What is the capital of France?")).await.unwrap();
    assert_eq!(fx.provider.calls(), 2);
}

#[tokio::test]
async fn test_remote_hit_is_written_back_to_local() {
    let remote = Arc::new(MemoryStore::new(100));

    let writer = engine_with_remote(MockProvider::new("Paris"), Some(remote.clone()));
    writer.engine.generate(france()).await.unwrap();
    assert_eq!(remote.len(), 1);

    let reader = engine_with_remote(MockProvider::new("unused"), Some(remote.clone()));
    let hit = reader.engine.generate(france()).await.unwrap();
    assert_eq!(hit.text, "Paris");
    assert_eq!(hit.cache_source, CacheSource::Remote);
    assert_eq!(reader.provider.calls(), 0);
    assert_eq!(reader.local.len(), 1, "remote hit must be written back");

    let local = reader.engine.generate(france()).await.unwrap();
    assert_eq!(local.cache_source, CacheSource::Local);
    assert_eq!(reader.engine.cache().stats().hits_remote, 1);
    assert_eq!(reader.engine.cache().stats().hits_local, 1);
}

#[tokio::test]
async fn test_clear_cache_removes_every_tier() {
    let remote = Arc::new(MemoryStore::new(100));
    let fx = engine_with_remote(MockProvider::new("Paris"), Some(remote.clone()));
    let req = france();
    fx.engine.generate(req.clone()).await.unwrap();

    assert!(fx.engine.clear_cache(&req).await.unwrap());
    assert!(fx.local.is_empty());
    assert!(remote.is_empty());
    assert!(!fx.engine.clear_cache(&req).await.unwrap());
}

#[tokio::test]
async fn test_file_cache_survives_engine_restart() {
    let dir = temp_cache_dir();

    let first = Arc::new(MockProvider::new("Paris"));
    let engine = Engine::builder()
        .provider(first.clone())
        .local_cache(file_store(&dir))
        .build()
        .unwrap();
    engine.generate(france()).await.unwrap();
    let key = engine.fingerprint(&france()).unwrap().unwrap();
    drop(engine);

    let store = file_store(&dir);
    let entry = store.get(&key).await.unwrap().expect("entry on disk");
    assert_eq!(entry.payload.text, "Paris");
    assert_eq!(entry.metadata.model, "gpt-4o-mini");
    assert_eq!(entry.metadata.request_preview, "What is the capital of France?");

    let second = Arc::new(MockProvider::new("unused"));
    let restarted = Engine::builder()
        .provider(second.clone())
        .local_cache(store)
        .build()
        .unwrap();
    let hit = restarted.generate(france()).await.unwrap();
    assert_eq!(hit.text, "Paris");
    assert_eq!(hit.cache_source, CacheSource::Local);
    assert_eq!(second.calls(), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_local_entries_outlive_the_remote_ttl() {
    let dir = temp_cache_dir();
    let config = EngineConfig {
        cache_dir: dir.clone(),
        cache_ttl_days: 0,
        ..Default::default()
    };
    let provider = Arc::new(MockProvider::new("Paris"));
    let engine = Engine::builder()
        .config(config)
        .provider(provider.clone())
        .build()
        .unwrap();

    engine.generate(france()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let again = engine.generate(france()).await.unwrap();

    assert_eq!(again.cache_source, CacheSource::Local);
    assert_eq!(provider.calls(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_progress_callback_sees_each_step() {
    let fx = engine_with(MockProvider::new("Paris"));
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let req = france().on_progress(move |e| log.lock().unwrap().push(e.name()));
    fx.engine.generate(req.clone()).await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["request_started", "cache_miss", "api_call_started", "api_call_finished"]
    );

    seen.lock().unwrap().clear();
    fx.engine.generate(req).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["request_started", "cache_hit"]);

    // The engine-wide sink saw both requests.
    assert_eq!(fx.events.count("request_started"), 2);
    assert_eq!(fx.events.count("cache_hit"), 1);
}

#[tokio::test]
async fn test_panicking_progress_callback_is_contained() {
    let fx = engine_with(MockProvider::new("Paris"));
    let req = france().on_progress(|_| panic!("observer bug"));

    let response = fx.engine.generate(req).await.unwrap();
    assert_eq!(response.text, "Paris");
}

#[tokio::test]
async fn test_invalid_requests_fail_before_the_provider() {
    let fx = engine_with(MockProvider::new("Paris"));

    let empty = fx.engine.generate(GenerateRequest::new("")).await.unwrap_err();
    assert!(empty.is_configuration());

    let unregistered = fx
        .engine
        .generate(france().provider(ProviderKind::Bedrock))
        .await
        .unwrap_err();
    assert!(unregistered.is_configuration());

    let zero = fx.engine.generate(france().max_tokens(0)).await.unwrap_err();
    assert_eq!(
        zero.context().and_then(|c| c.field_path.as_deref()),
        Some("request.max_tokens")
    );

    assert_eq!(fx.provider.calls(), 0);
}

#[tokio::test]
async fn test_clear_all_cache_empties_local_tier() {
    let fx = engine_with(MockProvider::new("Paris"));
    fx.engine.generate(france()).await.unwrap();
    fx.engine.generate(france().model("gpt-4o")).await.unwrap();
    assert_eq!(fx.local.len(), 2);

    fx.engine.clear_all_cache().await;
    assert!(fx.local.is_empty());
    fx.engine.generate(france()).await.unwrap();
    assert_eq!(fx.provider.calls(), 3);
}
