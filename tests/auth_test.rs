//! Tests for the authorization flow and token refresh against a mocked server.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use baidu_pan::{AppCredentials, AuthState, Authenticator, Credential, Endpoints, EnvFile, PanError, Tokens};
use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::TempDir;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn own_app() -> AppCredentials {
    AppCredentials::Own {
        client_id: "cid".to_string(),
        client_key: "ckey".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: "oob".to_string(),
    }
}

fn expired_tokens() -> Tokens {
    Tokens {
        access_token: "old-access".to_string(),
        refresh_token: "old-refresh".to_string(),
        expires_at: now_secs().saturating_sub(10),
    }
}

fn token_body(access: &str, refresh: &str) -> String {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 2592000,
        "scope": "basic netdisk"
    })
    .to_string()
}

mod refresh {
    use super::*;

    #[tokio::test]
    async fn test_expired_token_refreshed_exactly_once() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("new-access", "new-refresh"))
            .expect(1)
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));

        assert_eq!(auth.get_access_token().await.unwrap(), "new-access");
        // Still valid: no second refresh.
        assert_eq!(auth.get_access_token().await.unwrap(), "new-access");

        refresh.assert_async().await;
        let tokens = auth.tokens().await.unwrap();
        assert_eq!(tokens.refresh_token, "new-refresh");
        assert!(tokens.expires_at > now_secs());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(token_body("new-access", "new-refresh"))
            .expect(1)
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));
        let other = auth.clone();

        let (a, b) = tokio::join!(auth.get_access_token(), other.get_access_token());
        assert_eq!(a.unwrap(), "new-access");
        assert_eq!(b.unwrap(), "new-access");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_persists_tokens() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(token_body("new-access", "new-refresh"))
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env.baidu");
        fs::write(&path, "# tokens\nACCESS_TOKEN=old-access\n").unwrap();

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()))
            .with_store(EnvFile::load(&path).unwrap());

        auth.get_access_token().await.unwrap();

        let stored = EnvFile::load(&path).unwrap();
        assert_eq!(stored.get("ACCESS_TOKEN"), Some("new-access"));
        assert_eq!(stored.get("REFRESH_TOKEN"), Some("new-refresh"));
        assert!(stored.get("EXPIRES_AT").is_some());
        assert!(fs::read_to_string(&path).unwrap().starts_with("# tokens\n"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_requires_authorization() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(
                json!({"error": "invalid_grant", "error_description": "refresh token expired"})
                    .to_string(),
            )
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));

        let err = auth.get_access_token().await.unwrap_err();
        assert!(matches!(err, PanError::TokenRefresh(_)));
        assert!(err.to_string().contains("invalid_grant"));
        assert_eq!(auth.state().await, AuthState::NeedsAuthorization);
    }

    #[tokio::test]
    async fn test_server_outage_keeps_tokens() {
        let mut server = Server::new_async().await;
        let outage = server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("<html>Service Unavailable</html>")
            .expect(1)
            .create_async()
            .await;
        let recovered = server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(token_body("new-access", "new-refresh"))
            .expect(1)
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));

        let err = auth.get_access_token().await.unwrap_err();
        assert!(matches!(err, PanError::RemoteApi { code: 503, .. }));
        assert_eq!(auth.state().await, AuthState::Authorized);

        assert_eq!(auth.get_access_token().await.unwrap(), "new-access");
        outage.assert_async().await;
        recovered.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_without_json_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: Some(expired_tokens()),
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));

        let err = auth.get_access_token().await.unwrap_err();
        assert!(matches!(err, PanError::TokenRefresh(_)));
        assert_eq!(auth.state().await, AuthState::NeedsAuthorization);
    }
}

mod authorization {
    use super::*;

    #[tokio::test]
    async fn test_own_app_code_exchange() {
        let mut server = Server::new_async().await;
        let exchange = server
            .mock("POST", "/oauth/2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "user-code".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "oob".into()),
            ]))
            .with_status(200)
            .with_body(token_body("first-access", "first-refresh"))
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let credential = Credential {
            app: own_app(),
            tokens: None,
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()))
            .with_store(EnvFile::open_or_create(&path).unwrap());

        assert_eq!(auth.state().await, AuthState::NeedsAuthorization);
        let url = auth.begin_authorization().await.unwrap();
        assert!(url.starts_with(&format!("{}/oauth/2.0/authorize?", server.url())));
        assert_eq!(auth.state().await, AuthState::AwaitingUserCode);

        auth.submit_code(" user-code\n").await.unwrap();

        exchange.assert_async().await;
        assert_eq!(auth.state().await, AuthState::Authorized);
        assert_eq!(auth.get_access_token().await.unwrap(), "first-access");

        let stored = EnvFile::load(&path).unwrap();
        assert_eq!(stored.get("ACCESS_TOKEN"), Some("first-access"));
        assert_eq!(stored.get("CLIENT_ID"), None);
    }

    #[tokio::test]
    async fn test_rejected_code_keeps_awaiting() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/2.0/token")
            .with_status(400)
            .with_body(json!({"error": "invalid_grant", "error_description": "bad code"}).to_string())
            .create_async()
            .await;

        let credential = Credential {
            app: own_app(),
            tokens: None,
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()));
        auth.begin_authorization().await.unwrap();

        let err = auth.submit_code("wrong").await.unwrap_err();
        assert!(matches!(err, PanError::Authorization(_)));
        assert_eq!(auth.state().await, AuthState::AwaitingUserCode);
    }

    #[tokio::test]
    async fn test_shared_app_goes_through_relay() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/baiducloud/state")
            .with_status(200)
            .with_body(json!({"state": "relay-state"}).to_string())
            .create_async()
            .await;
        let callback = server
            .mock("POST", "/baiducloud/callback")
            .match_body(Matcher::PartialJson(json!({
                "client_id": "shared-id",
                "code": "user-code",
                "state": "relay-state"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "access_token": "relay-access",
                        "refresh_token": "relay-refresh",
                        "expires_in": "2592000"
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env.baidu");
        let credential = Credential {
            app: AppCredentials::Shared {
                client_id: "shared-id".to_string(),
                redirect_uri: "https://relay.example/callback".to_string(),
            },
            tokens: None,
        };
        let auth = Authenticator::new(credential, Endpoints::with_base(&server.url()))
            .with_store(EnvFile::open_or_create(&path).unwrap());

        let url = auth.begin_authorization().await.unwrap();
        assert!(url.contains("state=relay-state"));
        assert!(url.contains("client_id=shared-id"));

        auth.submit_code("user-code").await.unwrap();
        callback.assert_async().await;

        let stored = EnvFile::load(&path).unwrap();
        assert_eq!(stored.get("ACCESS_TOKEN"), Some("relay-access"));
        assert_eq!(stored.get("CLIENT_ID"), Some("shared-id"));
        assert_eq!(
            stored.get("REDIRECT_URI"),
            Some("https://relay.example/callback")
        );
    }
}
