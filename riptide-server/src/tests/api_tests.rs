#[cfg(test)]
mod api_tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::tests::test_utils::*;

    const VALID_URL: &str = "https://www.youtube.com/watch?v=abc123";

    #[tokio::test]
    async fn submit_rejects_a_missing_url() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        let (status, body) = post_json(&app, "/api/v1/jobs", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("URL"));
    }

    #[tokio::test]
    async fn submit_rejects_foreign_hosts() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        let (status, _) = post_json(
            &app,
            "/api/v1/jobs",
            json!({ "url": "https://example.com/watch?v=abc123" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_queues_a_valid_url() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        let (status, body) = post_json(&app, "/api/v1/jobs", json!({ "url": VALID_URL })).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["queue_position"], 1);
        assert!(body["job_id"].is_string());
    }

    #[tokio::test]
    async fn submissions_beyond_capacity_get_service_unavailable() {
        let dir = TempDir::new().unwrap();
        let state = build_state(test_config(dir.path()));
        let app = build_app(state);

        // Default capacity is 3; no workers are draining the queue.
        for _ in 0..3 {
            let (status, _) = post_json(&app, "/api/v1/jobs", json!({ "url": VALID_URL })).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        let (status, body) = post_json(&app, "/api/v1/jobs", json!({ "url": VALID_URL })).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"]["message"].is_string());

        // The rejected submission created no job record.
        let (_, health) = get(&app, "/api/v1/health").await;
        assert_eq!(health["total_jobs"], 3);
    }

    #[tokio::test]
    async fn unknown_job_ids_answer_not_found() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        let (status, _) = get(
            &app,
            "/api/v1/jobs/00000000-0000-0000-0000-000000000000",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&app, "/api/v1/jobs/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_names_never_reach_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        for encoded in [
            "..%2F..%2Fetc%2Fpasswd",
            "a%2F..%2Fb",
            "a%5Cb",
            "..",
        ] {
            let (status, _) = get(&app, &format!("/api/v1/files/{encoded}")).await;
            assert!(
                status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND,
                "{encoded} answered {status}"
            );
        }
    }

    #[tokio::test]
    async fn listing_is_pure_even_above_the_retention_cap() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        // Two more files than the default cap of 10.
        for index in 0..12 {
            std::fs::write(dir.path().join(format!("track-{index:02}.mp3")), b"data").unwrap();
        }

        let (status, body) = get(&app, "/api/v1/files").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"].as_array().unwrap().len(), 12);

        // And again: the read deleted nothing.
        let (_, body) = get(&app, "/api/v1/files").await;
        assert_eq!(body["files"].as_array().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn files_are_served_as_audio_attachments() {
        let dir = TempDir::new().unwrap();
        let state = build_state(test_config(dir.path()));
        let app = build_app(state);

        std::fs::write(dir.path().join("song.mp3"), b"mp3-bytes").unwrap();

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/files/song.mp3")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        assert!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("attachment")
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"mp3-bytes");
    }

    #[tokio::test]
    async fn delete_removes_a_file_once() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        std::fs::write(dir.path().join("song.mp3"), b"data").unwrap();

        let (status, body) = delete(&app, "/api/v1/files/song.mp3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(!dir.path().join("song.mp3").exists());

        let (status, _) = delete(&app, "/api/v1/files/song.mp3").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn purge_reports_the_deleted_count() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        std::fs::write(dir.path().join("a.mp3"), b"data").unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"data").unwrap();

        let (status, body) = post_json(&app, "/api/v1/files/purge", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted_count"], 2);

        let (_, body) = get(&app, "/api/v1/files").await;
        assert!(body["files"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_exposes_queue_and_disk_counters() {
        let dir = TempDir::new().unwrap();
        let app = build_app(build_state(test_config(dir.path())));

        post_json(&app, "/api/v1/jobs", json!({ "url": VALID_URL })).await;

        let (status, body) = get(&app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["queue_depth"], 1);
        assert_eq!(body["active_downloads"], 0);
        assert!(body["disk_usage_percent"].is_number());
    }

    #[tokio::test]
    async fn full_disk_answers_insufficient_storage() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        // A threshold every filesystem exceeds: the guard sweeps, finds no
        // headroom, and refuses the submission.
        config.disk.max_used_percent = -1.0;
        let app = build_app(build_state(config));

        let (status, body) = post_json(&app, "/api/v1/jobs", json!({ "url": VALID_URL })).await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
        assert!(body["error"]["message"].is_string());

        let (_, health) = get(&app, "/api/v1/health").await;
        assert_eq!(health["total_jobs"], 0);
    }
}
