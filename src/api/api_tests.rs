#[cfg(test)]
mod auth_handler_tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{HeaderMap, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::api::{app_state::AppState, create_router};
    use crate::observability::SecurityMetrics;
    use crate::security::{SecurityService, SecuritySettings, TracingAuditSink};
    use crate::storage::kv::MemoryKeyValueStore;
    use crate::storage::users::InMemoryUserDirectory;

    fn test_app() -> (Router, AppState) {
        let security = Arc::new(SecurityService::new(
            SecuritySettings::default(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(TracingAuditSink::development()),
            Arc::new(SecurityMetrics::default()),
        ));
        let state = AppState::new(security, Arc::new(InMemoryUserDirectory::new()));
        (create_router(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Forwarded-For", "192.0.2.10")
            .header("X-Device-Id", "phone-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_returns_201_with_session() {
        let (app, state) = test_app();

        let (status, headers, body) = send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": " Runner@Example.com ", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(body["user"]["email"], "runner@example.com");
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["session"]["deviceId"], "phone-1");
        assert_eq!(body["session"]["accessToken"].as_str().unwrap().len(), 64);
        assert_eq!(state.security.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password() {
        let (app, _) = test_app();

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": "runner@example.com", "password": "short" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "WEAK_PASSWORD");
        assert_eq!(body["error"]["statusCode"], 400);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email_and_duplicates() {
        let (app, _) = test_app();

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": "not-an-email", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let payload = json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" });
        let (first, _, _) = send(&app, post_json("/api/v1/auth/register", payload.clone())).await;
        let (second, _, _) = send(&app, post_json("/api/v1/auth/register", payload)).await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_blocks_after_five_failures() {
        let (app, _) = test_app();
        send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;

        for _ in 0..5 {
            let (status, _, body) = send(
                &app,
                post_json(
                    "/api/v1/auth/login",
                    json!({ "email": "runner@example.com", "password": "Wrong-pass1" }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["message"], "Invalid email or password");
        }

        let (status, headers, body) = send(
            &app,
            post_json(
                "/api/v1/auth/login",
                json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        let retry_after: u64 = headers
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 800 && retry_after <= 900);
    }

    #[tokio::test]
    async fn test_successful_login_resets_attempts() {
        let (app, _) = test_app();
        send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;

        for _ in 0..4 {
            send(
                &app,
                post_json(
                    "/api/v1/auth/login",
                    json!({ "email": "runner@example.com", "password": "Wrong-pass1" }),
                ),
            )
            .await;
        }

        let good = json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" });
        let (status, _, body) = send(&app, post_json("/api/v1/auth/login", good.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["deviceId"], "phone-1");

        let (status, _, _) = send(&app, post_json("/api/v1/auth/login", good)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_requires_bearer() {
        let (app, _) = test_app();

        let (status, headers, body) = send(
            &app,
            Request::builder()
                .uri("/api/v1/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");

        let (_, _, registered) = send(
            &app,
            post_json(
                "/api/v1/auth/register",
                json!({ "email": "runner@example.com", "password": "Tr0ub4dor&3X" }),
            ),
        )
        .await;
        let token = registered["session"]["accessToken"].as_str().unwrap();

        let (status, _, body) = send(
            &app,
            Request::builder()
                .uri("/api/v1/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "runner@example.com");
    }

    #[tokio::test]
    async fn test_refresh_with_unknown_token_is_401() {
        let (app, _) = test_app();

        let (status, _, body) = send(
            &app,
            post_json("/api/v1/auth/refresh", json!({ "refreshToken": "deadbeef" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "Refresh token is invalid or expired");
    }
}
