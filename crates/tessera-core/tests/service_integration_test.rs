//! End-to-end tests for the inference service over the mock backend.

mod common;

use std::time::Duration;

use common::{test_config, test_service};
use tessera_abstraction::{ModelError, ModelOutput, ModelType};
use tessera_core::{PipelineOutput, PipelineRequest, PredictRequest, PreloadModel, ServiceError};
use tessera_models::{MOCK_EMBEDDING_DIMS, mock_embedding};

const CLIP: &str = "ViT-B-32__openai";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_predict_text_embedding() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 2, 300));

    let output = service.predict(PredictRequest::text(CLIP, "clip", "a cat")).await.unwrap();

    assert_eq!(output, ModelOutput::Embedding(mock_embedding(b"a cat")));
    assert_eq!(output.as_embedding().unwrap().len(), MOCK_EMBEDDING_DIMS);
    assert_eq!(backend.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inference_options_share_one_entry() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 2, 300));

    let strict = service
        .predict(PredictRequest::image("resnet50", "image-classification", vec![1, 2, 3]))
        .await
        .unwrap();
    let relaxed = service
        .predict(
            PredictRequest::image("resnet50", "image-classification", vec![1, 2, 3])
                .with_options(r#"{"minScore": 0.1}"#),
        )
        .await
        .unwrap();

    assert_eq!(strict, ModelOutput::Labels(vec!["cat".to_string()]));
    assert_eq!(relaxed, ModelOutput::Labels(vec!["cat".to_string(), "tabby".to_string()]));
    assert_eq!(service.cache().len().await, 1);
    assert_eq!(backend.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_options_fragment_the_cache() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 2, 300));

    service
        .predict(PredictRequest::text(CLIP, "clip", "a cat").with_options(r#"{"mode": "text"}"#))
        .await
        .unwrap();
    service.predict(PredictRequest::text(CLIP, "clip", "a cat")).await.unwrap();

    assert_eq!(service.cache().len().await, 2);
    assert_eq!(backend.loads(), 2);
}

#[tokio::test]
async fn test_bad_requests_are_client_errors() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 0, 300));

    let mut missing = PredictRequest::text(CLIP, "clip", "");
    missing.text = None;
    let err = service.predict(missing).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = service
        .predict(PredictRequest::text(CLIP, "clip", "x").with_options("[1, 2]"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadInput(_)));

    let err = service
        .predict(
            PredictRequest::image(CLIP, "clip", vec![0; 4]).with_options(r#"{"mode": "text"}"#),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadInput(_)));

    let err = service
        .predict(
            PredictRequest::image("buffalo_l", "facial-recognition", vec![0; 4])
                .with_options(r#"{"minScore": 3}"#),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadInput(_)));

    // Only the two requests that got past parsing loaded a model.
    assert_eq!(backend.loads(), 2);
}

#[tokio::test]
async fn test_load_failure_is_retried_on_next_request() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 0, 300));
    backend.fail_next_load(ModelError::Other("unsupported opset".to_string()));

    let err = service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap_err();
    assert!(matches!(err, ServiceError::LoadFailure(ModelError::Other(_))));
    assert_eq!(err.status_code(), 500);
    // Unrecognized errors are not retried.
    assert_eq!(backend.load_attempts(), 1);

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    assert_eq!(backend.load_attempts(), 2);
    assert_eq!(service.cache().len().await, 1);
}

#[tokio::test]
async fn test_recognized_load_failure_recovers_within_request() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 0, 300));
    backend.fail_next_load(ModelError::MissingArchiveMember("model.onnx".to_string()));

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();

    assert_eq!(backend.load_attempts(), 2);
    assert_eq!(service.cache().stats().total_load_retries, 1);
}

#[tokio::test]
async fn test_path_like_model_name_never_touches_disk() {
    let temp = tempfile::tempdir().unwrap();
    let cache_folder = temp.path().join("cache");
    std::fs::create_dir_all(cache_folder.join("clip")).unwrap();
    let victim = temp.path().join("victim");
    std::fs::create_dir_all(&victim).unwrap();
    std::fs::write(victim.join("precious.txt"), b"keep").unwrap();

    let (service, backend) = test_service(test_config(&cache_folder, 0, 300));
    backend.fail_next_load(ModelError::Io("corrupt download".to_string()));

    let err = service
        .predict(PredictRequest::text("../../victim", "clip", "x"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::BadInput(_)));
    assert_eq!(err.status_code(), 400);
    assert!(victim.join("precious.txt").exists());
    assert_eq!(backend.load_attempts(), 0);
    assert!(service.cache().is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_adds_then_searches() {
    let temp = tempfile::tempdir().unwrap();
    let (service, _backend) = test_service(test_config(temp.path(), 2, 300));

    for (text, id) in [("a cat", "cat-1"), ("a dog", "dog-1")] {
        let output = service
            .pipeline(PipelineRequest {
                predict: PredictRequest::text(CLIP, "clip", text),
                index_name: Some("photos".to_string()),
                embedding_id: Some(id.to_string()),
                k: None,
            })
            .await
            .unwrap();
        assert!(matches!(output, PipelineOutput::Prediction(ModelOutput::Embedding(_))));
    }
    assert_eq!(service.vectors().get("photos").unwrap().len(), 2);

    let output = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::text(CLIP, "clip", "a cat"),
            index_name: Some("photos".to_string()),
            embedding_id: None,
            k: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(output, PipelineOutput::Matches(vec!["cat-1".to_string()]));
}

#[tokio::test]
async fn test_pipeline_searches_before_adding() {
    let temp = tempfile::tempdir().unwrap();
    let (service, _backend) = test_service(test_config(temp.path(), 0, 300));
    service
        .create_index("photos", vec!["dog-1".to_string()], &serde_json::json!(mock_embedding(b"a dog")))
        .await
        .unwrap();

    let output = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::text(CLIP, "clip", "a cat"),
            index_name: Some("photos".to_string()),
            embedding_id: Some("cat-1".to_string()),
            k: Some(5),
        })
        .await
        .unwrap();

    assert_eq!(output, PipelineOutput::Matches(vec!["dog-1".to_string()]));
    assert_eq!(service.vectors().get("photos").unwrap().handle_of("cat-1"), Some(1));
}

#[tokio::test]
async fn test_pipeline_errors() {
    let temp = tempfile::tempdir().unwrap();
    let (service, _backend) = test_service(test_config(temp.path(), 0, 300));

    let err = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::text(CLIP, "clip", "a cat"),
            index_name: Some("missing".to_string()),
            embedding_id: None,
            k: Some(1),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.to_string(), "Not found: Index 'missing' not found");

    let err = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::text(CLIP, "clip", "a cat"),
            index_name: Some("photos".to_string()),
            embedding_id: None,
            k: Some(0),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadInput(_)));

    let err = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::image("resnet50", "image-classification", vec![1]),
            index_name: Some("photos".to_string()),
            embedding_id: Some("x".to_string()),
            k: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadInput(_)));
    assert!(!service.vectors().contains("photos"));
}

#[tokio::test]
async fn test_pipeline_without_index_returns_prediction() {
    let temp = tempfile::tempdir().unwrap();
    let (service, _backend) = test_service(test_config(temp.path(), 0, 300));

    let output = service
        .pipeline(PipelineRequest {
            predict: PredictRequest::image("buffalo_l", "facial-recognition", vec![9; 8]),
            index_name: None,
            embedding_id: Some("ignored".to_string()),
            k: Some(3),
        })
        .await
        .unwrap();

    let PipelineOutput::Prediction(ModelOutput::Faces(faces)) = output else {
        panic!("expected faces, got {output:?}");
    };
    assert_eq!(faces.len(), 1);
}

#[tokio::test]
async fn test_warm_up_loads_configured_models() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path(), 0, 300);
    config.models.preload = vec![
        PreloadModel {
            model_name: CLIP.to_string(),
            model_type: ModelType::Clip,
            options: Default::default(),
        },
        PreloadModel {
            model_name: "buffalo_l".to_string(),
            model_type: ModelType::FacialRecognition,
            options: Default::default(),
        },
    ];
    let (service, backend) = test_service(config);

    assert_eq!(service.warm_up().await.unwrap(), 2);
    assert_eq!(backend.loads(), 2);

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    assert_eq!(backend.loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_models_are_unloaded() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 0, 4));
    assert!(service.start());

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;

    assert!(service.cache().is_empty().await);
    assert_eq!(service.cache().stats().total_evictions, 1);

    // The next request loads from scratch.
    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    assert_eq!(backend.loads(), 2);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_never_evicts() {
    let temp = tempfile::tempdir().unwrap();
    let (service, backend) = test_service(test_config(temp.path(), 0, 0));
    assert!(!service.start());

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(service.cache().len().await, 1);
    assert_eq!(service.cache().stats().total_evictions, 0);
    assert_eq!(backend.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_unloads_and_closes_pool() {
    let temp = tempfile::tempdir().unwrap();
    let (service, _backend) = test_service(test_config(temp.path(), 2, 300));
    service.start();

    service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap();
    assert_eq!(service.cache().keys().await.len(), 1);

    service.shutdown().await;

    assert!(service.cache().is_empty().await);
    let err = service.predict(PredictRequest::text(CLIP, "clip", "x")).await.unwrap_err();
    assert!(matches!(err, ServiceError::LoadFailure(ModelError::Worker(_))));
}
