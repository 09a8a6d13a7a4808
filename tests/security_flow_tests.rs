// End-to-end tests for the FitGuard HTTP surface
//
// Tests cover:
// - Registration, login and token refresh
// - CSRF and device binding on account changes
// - Admin-only endpoints
// - Observability endpoints

#[cfg(test)]
mod security_flow_tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use fitguard::api::{app_state::AppState, create_app};
    use fitguard::observability::{ObservabilityState, SecurityMetrics};
    use fitguard::security::{SecurityService, SecuritySettings, TracingAuditSink, rbac::Role};
    use fitguard::storage::{InMemoryUserDirectory, MemoryKeyValueStore, UserDirectory, UserRecord};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const PASSWORD: &str = "Tr0ub4dor&3X";

    struct TestApp {
        router: Router,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let metrics = Arc::new(SecurityMetrics::default());
            let security = Arc::new(SecurityService::new(
                SecuritySettings::default(),
                Arc::new(MemoryKeyValueStore::new()),
                Arc::new(TracingAuditSink::development()),
                metrics.clone(),
            ));
            let state = AppState::new(security, Arc::new(InMemoryUserDirectory::new()));
            let observability = Arc::new(ObservabilityState::new("test".into(), metrics));
            let router = create_app(state.clone(), observability);
            Self { router, state }
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            (status, body)
        }

        async fn register(&self, email: &str, device: &str) -> Value {
            let (status, body) = self
                .call(build(
                    "POST",
                    "/api/v1/auth/register",
                    Auth::device(device),
                    Some(json!({ "email": email, "password": PASSWORD })),
                ))
                .await;
            assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
            body
        }

        async fn csrf_token(&self, access_token: &str) -> String {
            let (status, body) = self
                .call(build("GET", "/api/v1/csrf-token", Auth::bearer(access_token), None))
                .await;
            assert_eq!(status, StatusCode::OK);
            body["csrfToken"].as_str().unwrap().to_string()
        }
    }

    #[derive(Default)]
    struct Auth<'a> {
        token: Option<&'a str>,
        device: Option<&'a str>,
        csrf: Option<&'a str>,
    }

    impl<'a> Auth<'a> {
        fn device(device: &'a str) -> Self {
            Self {
                device: Some(device),
                ..Self::default()
            }
        }

        fn bearer(token: &'a str) -> Self {
            Self {
                token: Some(token),
                ..Self::default()
            }
        }

        fn with_device(mut self, device: &'a str) -> Self {
            self.device = Some(device);
            self
        }

        fn with_csrf(mut self, csrf: &'a str) -> Self {
            self.csrf = Some(csrf);
            self
        }
    }

    fn build(method: &str, uri: &str, auth: Auth<'_>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Forwarded-For", "198.51.100.20");
        if let Some(token) = auth.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(device) = auth.device {
            builder = builder.header("X-Device-Id", device);
        }
        if let Some(csrf) = auth.csrf {
            builder = builder.header("X-CSRF-Token", csrf);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn access_token(auth_body: &Value) -> String {
        auth_body["session"]["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_password_change_logs_out_everywhere() {
        let app = TestApp::new();
        let registered = app.register("runner@example.com", "phone-1").await;
        let token = access_token(&registered);
        let csrf = app.csrf_token(&token).await;
        assert_eq!(csrf.len(), 48);

        let (_, second_login) = app
            .call(build(
                "POST",
                "/api/v1/auth/login",
                Auth::device("watch-1"),
                Some(json!({ "email": "runner@example.com", "password": PASSWORD })),
            ))
            .await;
        let watch_token = access_token(&second_login);

        let (status, body) = app
            .call(build(
                "POST",
                "/api/v1/account/password",
                Auth::bearer(&token).with_device("phone-1").with_csrf(&csrf),
                Some(json!({ "currentPassword": PASSWORD, "newPassword": "N3w-Secur3-Pass!" })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["sessionsInvalidated"], 2);

        for stale in [&token, &watch_token] {
            let (status, _) = app
                .call(build("GET", "/api/v1/me", Auth::bearer(stale), None))
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        let (old_login, _) = app
            .call(build(
                "POST",
                "/api/v1/auth/login",
                Auth::device("phone-1"),
                Some(json!({ "email": "runner@example.com", "password": PASSWORD })),
            ))
            .await;
        assert_eq!(old_login, StatusCode::UNAUTHORIZED);

        let (new_login, _) = app
            .call(build(
                "POST",
                "/api/v1/auth/login",
                Auth::device("phone-1"),
                Some(json!({ "email": "runner@example.com", "password": "N3w-Secur3-Pass!" })),
            ))
            .await;
        assert_eq!(new_login, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_password_change_requires_device_and_csrf() {
        let app = TestApp::new();
        let token = access_token(&app.register("runner@example.com", "phone-1").await);
        let csrf = app.csrf_token(&token).await;
        let body = json!({ "currentPassword": PASSWORD, "newPassword": "N3w-Secur3-Pass!" });

        let (status, response) = app
            .call(build(
                "POST",
                "/api/v1/account/password",
                Auth::bearer(&token).with_csrf(&csrf),
                Some(body.clone()),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["error"]["message"], "Device verification failed");

        let (status, response) = app
            .call(build(
                "POST",
                "/api/v1/account/password",
                Auth::bearer(&token).with_device("phone-1"),
                Some(body),
            ))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(response["error"]["code"], "CSRF_TOKEN_MISSING");

        let (status, response) = app
            .call(build(
                "POST",
                "/api/v1/account/password",
                Auth::bearer(&token).with_device("phone-1").with_csrf(&csrf),
                Some(json!({ "currentPassword": PASSWORD, "newPassword": "weak" })),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["code"], "WEAK_PASSWORD");
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let app = TestApp::new();
        let registered = app.register("runner@example.com", "phone-1").await;
        let old_access = access_token(&registered);
        let old_refresh = registered["session"]["refreshToken"].as_str().unwrap();

        let (status, renewed) = app
            .call(build(
                "POST",
                "/api/v1/auth/refresh",
                Auth::default(),
                Some(json!({ "refreshToken": old_refresh })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renewed["deviceId"], "phone-1");
        let new_access = renewed["accessToken"].as_str().unwrap();
        assert_ne!(new_access, old_access);

        let (status, _) = app
            .call(build("GET", "/api/v1/me", Auth::bearer(&old_access), None))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, me) = app
            .call(build("GET", "/api/v1/me", Auth::bearer(new_access), None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "runner@example.com");

        let (status, _) = app
            .call(build(
                "POST",
                "/api/v1/auth/refresh",
                Auth::default(),
                Some(json!({ "refreshToken": old_refresh })),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_needs_csrf_and_ends_session() {
        let app = TestApp::new();
        let token = access_token(&app.register("runner@example.com", "phone-1").await);

        let (status, _) = app
            .call(build("POST", "/api/v1/auth/logout", Auth::bearer(&token), None))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let csrf = app.csrf_token(&token).await;
        let (status, _) = app
            .call(build(
                "POST",
                "/api/v1/auth/logout",
                Auth::bearer(&token).with_csrf(&csrf),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call(build("GET", "/api/v1/me", Auth::bearer(&token), None))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.state.security.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_admin_endpoints_require_admin_role() {
        let app = TestApp::new();
        let user_token = access_token(&app.register("runner@example.com", "phone-1").await);

        let hashed = app.state.security.hash_password(PASSWORD, None).await.unwrap();
        app.state
            .users
            .insert_user(UserRecord {
                id: "admin-1".into(),
                email: "admin@example.com".into(),
                role: Role::Admin,
                password_hash: hashed.hash,
                password_salt: hashed.salt,
            })
            .await
            .unwrap();
        let (status, admin_login) = app
            .call(build(
                "POST",
                "/api/v1/auth/login",
                Auth::device("admin-laptop"),
                Some(json!({ "email": "admin@example.com", "password": PASSWORD })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(admin_login["user"]["role"], "admin");
        let admin_token = access_token(&admin_login);

        let (status, body) = app
            .call(build(
                "GET",
                "/api/v1/admin/security-events",
                Auth::bearer(&user_token).with_device("phone-1"),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");

        let (status, body) = app
            .call(build(
                "GET",
                "/api/v1/admin/security-events?limit=5&severity=high",
                Auth::bearer(&admin_token).with_device("admin-laptop"),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let events = body["events"].as_array().unwrap();
        assert!(!events.is_empty() && events.len() <= 5);
        assert_eq!(events[0]["event"], "ADMIN_ACCESS_DENIED");
        assert!(body["total"].as_u64().unwrap() >= 1);

        let csrf = app.csrf_token(&admin_token).await;
        let (status, report) = app
            .call(build(
                "POST",
                "/api/v1/admin/sessions/sweep",
                Auth::bearer(&admin_token)
                    .with_device("admin-laptop")
                    .with_csrf(&csrf),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["sessionsRemoved"], 0);
    }

    #[tokio::test]
    async fn test_observability_endpoints() {
        let app = TestApp::new();
        app.register("runner@example.com", "phone-1").await;

        let (status, health) = app
            .call(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");

        let (status, metrics) = app
            .call(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        let text = metrics.as_str().unwrap();
        assert!(text.contains("sessions_created_total 1"));
        assert!(text.contains("sessions_active 1"));
    }

    #[tokio::test]
    async fn test_security_headers_outside_guard_chains() {
        let app = TestApp::new();

        for (uri, expected) in [
            ("/health", StatusCode::OK),
            ("/version", StatusCode::OK),
            ("/api/v1/nope", StatusCode::NOT_FOUND),
            ("/unknown", StatusCode::NOT_FOUND),
        ] {
            let response = app
                .router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{}", uri);

            let headers = response.headers();
            assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY", "{}", uri);
            assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff", "{}", uri);
            assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY), "{}", uri);
            assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY), "{}", uri);
        }
    }
}
