//! Router-level tests: every request goes through the full stage chain.

use axum::{body::Body, http::StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use super::fixtures::*;
use crate::{
    config::{CacheConfig, DeploymentMode, TenantGateConfig, MemoryCacheConfig, TierLimits},
    tenant::TenantContext,
};

fn get(uri: &str) -> axum::http::request::Builder {
    request("GET", uri)
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn login_body(username: &str, password: &str) -> Body {
    Body::from(json!({"username": username, "password": password}).to_string())
}

fn login_request(username: &str, password: &str) -> axum::http::Request<Body> {
    request("POST", "/auth/login")
        .header("content-type", "application/json")
        .body(login_body(username, password))
        .unwrap()
}

fn tenant_of(body: &Value) -> Uuid {
    body["tenantId"].as_str().unwrap().parse().unwrap()
}

fn dev() -> TenantGateConfig {
    test_config(DeploymentMode::Development)
}

fn prod() -> TenantGateConfig {
    test_config(DeploymentMode::Production)
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_anonymous_request_gets_default_tenant() {
    let (app, _) = test_app(dev());

    let response = send(&app, get("/api/context").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-tenant-id"], Uuid::nil().to_string().as_str());
    assert_eq!(headers["x-tenant-name"], "system");
    assert_eq!(headers["x-tenant-status"], "ACTIVE");
    assert_eq!(headers["x-rate-limit-limit"], "20");

    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["authStatus"], "anonymous");
    assert_eq!(body["tenantSource"], "default");
}

#[tokio::test]
async fn test_valid_token_installs_principal_and_tenant() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-tenant-name"], "Acme");

    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["principal"]["username"], "alice");
    assert_eq!(tenant_of(&body), ACME);
    assert_eq!(body["tenantSource"], "token");
    // The task-local agrees with the extension
    assert_eq!(body["scopedTenantId"], ACME.to_string());
}

#[tokio::test]
async fn test_tenant_context_does_not_outlive_request() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(TenantContext::current().is_none());
}

#[tokio::test]
async fn test_expired_token_flagged() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token_at(&alice(), -7200).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-auth-status"], "token-expired");

    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["authStatus"], "token-expired");
    assert_eq!(tenant_of(&body), Uuid::nil());
}

#[tokio::test]
async fn test_refresh_token_is_not_a_bearer_credential() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_refresh_token(&alice()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["authStatus"], "anonymous");
}

#[tokio::test]
async fn test_disabled_account_stays_anonymous() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&dave()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["authStatus"], "account-rejected");
    assert_eq!(tenant_of(&body), Uuid::nil());
}

#[tokio::test]
async fn test_query_token_only_on_allowed_paths() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();

    let response = send(
        &app,
        get(&format!("/api/context?token={token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], false);

    let response = send(
        &app,
        get(&format!("/api/context?token={token}"))
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant resolution and validation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_header_disagreeing_with_token_rejected() {
    let (app, state) = test_app(dev());
    let token = state.tokens.issue_access_token(&alice()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .header("x-tenant-id", GLOBEX.to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(tenant_of(&body), Uuid::nil());
}

#[tokio::test]
async fn test_header_agreeing_with_token_accepted() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .header("x-tenant-id", ACME.to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(tenant_of(&body), ACME);
    assert_eq!(body["tenantSource"], "token");
}

#[tokio::test]
async fn test_header_honored_outside_production_only() {
    for (config, expected) in [(dev(), GLOBEX), (prod(), Uuid::nil())] {
        let (app, _) = test_app(config);
        let response = send(
            &app,
            get("/api/context")
                .header("x-tenant-id", GLOBEX.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(tenant_of(&body), expected);
    }
}

#[tokio::test]
async fn test_query_param_ignored_in_production() {
    for (config, expected) in [(dev(), GLOBEX), (prod(), Uuid::nil())] {
        let (app, _) = test_app(config);
        let response = send(
            &app,
            get(&format!("/api/context?tenantId={GLOBEX}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(tenant_of(&body), expected);
    }
}

#[tokio::test]
async fn test_host_subdomain_resolves_tenant() {
    let (app, _) = test_app(prod());

    let response = send(
        &app,
        get("/api/context")
            .header("host", "globex.example.com:8443")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(tenant_of(&body), GLOBEX);
    assert_eq!(body["tenantSource"], "host");
}

#[tokio::test]
async fn test_host_of_other_tenant_rejected_for_principal() {
    let (app, state) = test_app(prod());
    // Without a companyId claim the host becomes the candidate
    let mut claims = state
        .tokens
        .claims(&state.tokens.issue_access_token(&alice()).unwrap())
        .unwrap();
    claims.company_id = None;
    let token = state.tokens.encode_claims(&claims).unwrap();

    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(&token))
            .header("host", "globex.example.com")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(tenant_of(&body), Uuid::nil());
}

#[tokio::test]
async fn test_suspended_tenant_not_granted() {
    let (app, _) = test_app(prod());

    let response = send(
        &app,
        get("/api/context")
            .header("host", "initech.example.com")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let headers = response.headers().clone();
    let body = json_body(response).await;
    assert_eq!(tenant_of(&body), Uuid::nil());
    assert_eq!(headers["x-tenant-status"], "ACTIVE");
}

// ─────────────────────────────────────────────────────────────────────────────
// Session security
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_ip_pinning() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();
    let req = || {
        get("/api/context")
            .header("authorization", bearer(&token))
            .header("x-session-id", "sess-pinned")
            .body(Body::empty())
            .unwrap()
    };

    let body = json_body(send(&app, with_peer(req(), "203.0.113.10")).await).await;
    assert_eq!(tenant_of(&body), ACME);

    let body = json_body(send(&app, with_peer(req(), "198.51.100.7")).await).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(tenant_of(&body), Uuid::nil());

    // The legitimate holder is unaffected
    let body = json_body(send(&app, with_peer(req(), "203.0.113.10")).await).await;
    assert_eq!(tenant_of(&body), ACME);
}

#[tokio::test]
async fn test_session_cookie_is_tracked() {
    let (app, state) = test_app(prod());
    let token = state.tokens.issue_access_token(&alice()).unwrap();
    let req = || {
        get("/api/context")
            .header("authorization", bearer(&token))
            .header("cookie", "SESSION=cookie-session")
            .body(Body::empty())
            .unwrap()
    };

    let body = json_body(send(&app, with_peer(req(), "203.0.113.10")).await).await;
    assert_eq!(tenant_of(&body), ACME);
    let body = json_body(send(&app, with_peer(req(), "198.51.100.7")).await).await;
    assert_eq!(tenant_of(&body), Uuid::nil());
}

#[tokio::test]
async fn test_tenant_switch_velocity() {
    let mut config = prod();
    config.session_security.switch_threshold = 2;
    let (app, _) = test_app(config);

    let hop = |host: &str| {
        get("/api/context")
            .header("host", host)
            .header("x-session-id", "sess-hopper")
            .body(Body::empty())
            .unwrap()
    };

    let mut tenants = Vec::new();
    for host in [
        "acme.example.com",
        "globex.example.com",
        "acme.example.com",
        "globex.example.com",
    ] {
        let body = json_body(send(&app, hop(host)).await).await;
        tenants.push(tenant_of(&body));
    }

    assert_eq!(tenants, vec![ACME, GLOBEX, ACME, Uuid::nil()]);
}

#[tokio::test]
async fn test_request_without_session_is_stateless() {
    let mut config = prod();
    config.session_security.switch_threshold = 0;
    let (app, _) = test_app(config);

    for host in ["acme.example.com", "globex.example.com", "acme.example.com"] {
        let body = json_body(
            send(
                &app,
                get("/api/context").header("host", host).body(Body::empty()).unwrap(),
            )
            .await,
        )
        .await;
        assert_ne!(tenant_of(&body), Uuid::nil(), "{host}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_public_tier_exhaustion_returns_429() {
    let mut config = prod();
    config.limits.rate_limits.public = TierLimits {
        capacity: 2,
        refill_tokens: 1,
        refill_period_secs: 60,
    };
    let (app, _) = test_app(config);
    let req = || {
        get("/api/context")
            .header("x-request-id", "req-throttled")
            .body(Body::empty())
            .unwrap()
    };

    let first = send(&app, req()).await;
    assert_eq!(first.headers()["x-rate-limit-remaining"], "1");
    assert_eq!(send(&app, req()).await.status(), StatusCode::OK);

    let third = send(&app, req()).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = third.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = json_body(third).await;
    assert_eq!(body["status"], 429);
    assert_eq!(body["path"], "/api/context");
    assert_eq!(body["details"]["tier"], "public");
    assert_eq!(body["requestId"], "req-throttled");
}

#[tokio::test]
async fn test_buckets_are_per_ip() {
    let mut config = prod();
    config.limits.rate_limits.public = TierLimits {
        capacity: 1,
        refill_tokens: 1,
        refill_period_secs: 60,
    };
    let (app, _) = test_app(config);
    let req = || get("/api/context").body(Body::empty()).unwrap();

    assert_eq!(send(&app, with_peer(req(), "203.0.113.1")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, with_peer(req(), "203.0.113.1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&app, with_peer(req(), "203.0.113.2")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tier_follows_roles() {
    let (app, state) = test_app(prod());

    for (principal, limit) in [(alice(), "100"), (carol(), "1000")] {
        let token = state.tokens.issue_access_token(&principal).unwrap();
        let response = send(
            &app,
            get("/api/context")
                .header("authorization", bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.headers()["x-rate-limit-limit"], limit);
    }
}

#[tokio::test]
async fn test_health_is_exempt() {
    let mut config = prod();
    config.limits.rate_limits.public = TierLimits {
        capacity: 1,
        refill_tokens: 1,
        refill_period_secs: 60,
    };
    let (app, _) = test_app(config);

    for _ in 0..3 {
        let response = send(&app, get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-rate-limit-limit"));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login and refresh
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_issues_usable_tokens() {
    let (app, _) = test_app(prod());

    let response = send(&app, login_request("alice", PASSWORD)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["tenantId"], ACME.to_string());

    let access = body["accessToken"].as_str().unwrap();
    let response = send(
        &app,
        get("/api/context")
            .header("authorization", bearer(access))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let context = json_body(response).await;
    assert_eq!(context["principal"]["username"], "alice");
}

#[tokio::test]
async fn test_login_failures_are_uniform() {
    let (app, _) = test_app(prod());

    for (username, password) in [("alice", "wrong"), ("nobody", PASSWORD), ("dave", PASSWORD)] {
        let response = send(&app, login_request(username, password)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{username}");
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "invalid_credentials");
    }
}

#[tokio::test]
async fn test_login_lockout() {
    let mut config = prod();
    config.limits.login.lock_threshold = 3;
    let (app, _) = test_app(config);

    for _ in 0..3 {
        let response = send(&app, login_request("alice", "wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Locked even with the right password
    let response = send(&app, login_request("alice", PASSWORD)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = json_body(response).await;
    assert_eq!(body["path"], "/auth/login");
    assert!(body["details"]["lockExpiry"].is_string());

    // Another account from another address is unaffected
    let response = send(
        &app,
        with_peer(login_request("bob", PASSWORD), "198.51.100.99"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_guesses_cannot_pass_lock_threshold() {
    let mut config = prod();
    config.limits.login.lock_threshold = 3;
    let (app, _) = test_app(config);

    let mut handles = Vec::new();
    for i in 0..15u8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let ip = format!("198.51.100.{}", i + 1);
            send(&app, with_peer(login_request("alice", "wrong"), &ip))
                .await
                .status()
        }));
    }

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    let judged = statuses
        .iter()
        .filter(|s| **s == StatusCode::UNAUTHORIZED)
        .count();
    let throttled = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!((judged, throttled), (3, 12), "{statuses:?}");

    let response = send(
        &app,
        with_peer(login_request("alice", PASSWORD), "198.51.100.200"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_session_flood_keeps_login_lock() {
    let mut config = prod();
    config.limits.login.lock_threshold = 3;
    config.cache = CacheConfig::Memory(MemoryCacheConfig {
        max_entries: 50,
        eviction_batch_size: 10,
    });
    let (app, _) = test_app(config);

    for _ in 0..3 {
        let response = send(&app, login_request("alice", "wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    for i in 0..100u16 {
        let ip = format!("10.0.{}.{}", i / 200, i % 200 + 1);
        let req = get("/api/context")
            .header("x-session-id", format!("flood-{i}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, with_peer(req, &ip)).await.status(), StatusCode::OK);
    }

    let response = send(
        &app,
        with_peer(login_request("alice", PASSWORD), "198.51.100.99"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_login_delay_cancelled_on_shutdown() {
    let mut config = prod();
    config.limits.login.base_delay_ms = 10_000;
    config.limits.login.max_delay_secs = 30;
    let (app, state) = test_app(config);

    let response = send(&app, login_request("alice", "wrong")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    state.shutdown.cancel();
    let response = send(&app, login_request("alice", PASSWORD)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "request_cancelled");
}

#[tokio::test]
async fn test_refresh_exchanges_refresh_token_only() {
    let (app, _) = test_app(prod());
    let tokens = json_body(send(&app, login_request("alice", PASSWORD)).await).await;

    let refresh = |token: &str| {
        request("POST", "/auth/refresh")
            .header("content-type", "application/json")
            .body(Body::from(json!({"refreshToken": token}).to_string()))
            .unwrap()
    };

    let response = send(&app, refresh(tokens["refreshToken"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["accessToken"].is_string());

    let response = send(&app, refresh(tokens["accessToken"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_token");
    assert!(body["error"]["request_id"].is_string());
}
