use axum::{
    body::Bytes,
    extract::{Path, Query, State as AxumState},
    http::{header, HeaderMap},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tapgame_execution::{Store, DEFAULT_BAN_MINUTES};
use tapgame_types::api::{
    AdminOpResponse, BanRequest, GrantRequest, PlayerStats, ADMIN_USERS_DEFAULT_LIMIT,
    LEADERBOARD_LIMIT,
};
use tapgame_types::{LeaderboardEntry, Totals};
use tracing::{info, warn};

use super::http::{parse_json, ApiError};
use crate::notify::Notice;
use crate::Backend;

/// Alternative to `Authorization: Bearer` for the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Checks the operator token. With no token configured every request is refused.
pub(super) fn admin_auth_error(headers: &HeaderMap, token: Option<&str>) -> Option<ApiError> {
    let Some(token) = token else {
        return Some(ApiError::unauthorized());
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let matches = |candidate: Option<&str>| {
        candidate
            .is_some_and(|candidate| bool::from(candidate.as_bytes().ct_eq(token.as_bytes())))
    };
    if matches(bearer) || matches(header_token) {
        None
    } else {
        Some(ApiError::unauthorized())
    }
}

fn require_admin<S: Store + 'static>(
    backend: &Backend<S>,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    match admin_auth_error(headers, backend.admin_token()) {
        Some(err) => {
            warn!("admin request rejected");
            Err(err)
        }
        None => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct UsersQuery {
    limit: Option<usize>,
}

pub(super) async fn stats<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    headers: HeaderMap,
) -> Result<Json<Totals>, ApiError> {
    require_admin(&backend, &headers)?;
    let totals = backend.run(|layer| layer.totals()).await?;
    Ok(Json(totals))
}

pub(super) async fn list_users<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Query(query): Query<UsersQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    require_admin(&backend, &headers)?;
    let limit = query
        .limit
        .unwrap_or(ADMIN_USERS_DEFAULT_LIMIT)
        .clamp(1, LEADERBOARD_LIMIT);
    let users = backend.run(move |layer| layer.leaderboard(limit)).await?;
    Ok(Json(users))
}

/// Stored snapshot of one player. Never creates a row.
pub(super) async fn player_stats<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PlayerStats>, ApiError> {
    require_admin(&backend, &headers)?;
    let stats = backend
        .run(move |layer| layer.player_stats(&user_id))
        .await?;
    Ok(Json(stats))
}

pub(super) async fn grant<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdminOpResponse>, ApiError> {
    require_admin(&backend, &headers)?;
    let GrantRequest { coins } = parse_json(&body)?;
    let id = user_id.clone();
    let state = backend
        .run(move |layer| layer.grant_coins(&id, coins))
        .await?;
    backend.invalidate_leaderboard().await;
    backend.publish(Notice::coins_granted(&user_id, coins));
    Ok(Json(AdminOpResponse {
        success: true,
        message: format!("Granted {coins} coins to {user_id}"),
        data: Some(state),
    }))
}

pub(super) async fn ban<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdminOpResponse>, ApiError> {
    require_admin(&backend, &headers)?;
    let request: BanRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BanRequest::default()
    } else {
        parse_json(&body)?
    };
    let minutes = request.minutes.unwrap_or(DEFAULT_BAN_MINUTES);
    let id = user_id.clone();
    let state = backend
        .run(move |layer| layer.ban(&id, Some(minutes)))
        .await?;
    backend.publish(Notice::banned(&user_id, minutes));
    Ok(Json(AdminOpResponse {
        success: true,
        message: format!("Banned {user_id} for {minutes} minutes"),
        data: Some(state),
    }))
}

pub(super) async fn reset<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AdminOpResponse>, ApiError> {
    require_admin(&backend, &headers)?;
    let id = user_id.clone();
    let state = backend.run(move |layer| layer.reset(&id)).await?;
    backend.invalidate_leaderboard().await;
    backend.publish(Notice::progress_reset(&user_id));
    info!(user_id = %user_id, "admin reset player");
    Ok(Json(AdminOpResponse {
        success: true,
        message: format!("Reset progress of {user_id}"),
        data: Some(state),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{credential, harness, send, ADMIN_TOKEN};
    use crate::notify::Notice;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::time::Duration;
    use tapgame_execution::now_ms;
    use tapgame_types::api::INIT_DATA_HEADER;
    use tapgame_types::PlayerState;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn admin_get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    fn admin_post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(ADMIN_TOKEN_HEADER, ADMIN_TOKEN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn next_notice(notices: &mut UnboundedReceiver<Notice>) -> Notice {
        tokio::time::timeout(Duration::from_secs(5), notices.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn seeded(coins: f64) -> PlayerState {
        PlayerState {
            coins,
            ..PlayerState::new("ann", "Ann", now_ms())
        }
    }

    #[test]
    fn token_matching() {
        let mut headers = HeaderMap::new();
        assert!(admin_auth_error(&headers, None).is_some());
        assert!(admin_auth_error(&headers, Some("t")).is_some());

        headers.insert(header::AUTHORIZATION, "Bearer t".parse().unwrap());
        assert!(admin_auth_error(&headers, Some("t")).is_none());
        assert!(admin_auth_error(&headers, Some("u")).is_some());
        assert!(admin_auth_error(&headers, None).is_some());
        assert!(admin_auth_error(&headers, Some("tt")).is_some());
        assert!(admin_auth_error(&headers, Some("")).is_some());

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, "t".parse().unwrap());
        assert!(admin_auth_error(&headers, Some("t")).is_none());
    }

    #[tokio::test]
    async fn admin_routes_require_the_token() {
        let harness = harness();
        for uri in ["/admin/stats", "/admin/users", "/admin/users/1"] {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            let (status, body) = send(&harness.router, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body, json!({ "error": "unauthorized" }));
        }

        // A player credential is not an admin credential.
        let request = Request::post("/admin/users/42/grant")
            .header(INIT_DATA_HEADER, credential(42))
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::from(r#"{"coins":10}"#))
            .unwrap();
        let (status, _) = send(&harness.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stats_and_listing() {
        let harness = harness();
        let (status, body) = send(&harness.router, admin_get("/admin/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_users"], 0);
        assert_eq!(body["top_player"], serde_json::Value::Null);

        for (id, coins) in [("1", 10.0), ("2", 30.0), ("3", 20.0)] {
            harness.backend.layer().store().seed(id, seeded(coins));
        }
        let (_, body) = send(&harness.router, admin_get("/admin/stats")).await;
        assert_eq!(body["total_users"], 3);
        assert_eq!(body["total_coins"], 60.0);
        assert_eq!(body["top_player"]["user_id"], "2");

        let (status, body) = send(&harness.router, admin_get("/admin/users?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["user_id"], "2");
        assert_eq!(rows[1]["user_id"], "3");

        let (_, body) = send(&harness.router, admin_get("/admin/users")).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn player_stats_never_creates_rows() {
        let harness = harness();
        let (status, body) = send(&harness.router, admin_get("/admin/users/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "not_found" }));
        assert!(harness.backend.layer().store().is_empty());

        harness.backend.layer().store().seed("42", seeded(5.0));
        let (status, body) = send(&harness.router, admin_get("/admin/users/42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "42");
        assert_eq!(body["data"]["coins"], 5.0);
        assert_eq!(body["banned_for_secs"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn grant_adds_coins_and_notifies() {
        let mut harness = harness();
        harness.backend.layer().store().seed("42", seeded(5.0));

        let (status, body) =
            send(&harness.router, admin_post("/admin/users/42/grant", r#"{"coins":100}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["coins"], 105.0);

        let notice = next_notice(&mut harness.notices).await;
        assert_eq!(notice, Notice::coins_granted("42", 100.0));
    }

    #[tokio::test]
    async fn grant_validation() {
        let harness = harness();
        harness.backend.layer().store().seed("42", seeded(5.0));

        let (status, body) =
            send(&harness.router, admin_post("/admin/users/42/grant", r#"{"coins":0}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "invalid_coins" }));

        let (status, body) =
            send(&harness.router, admin_post("/admin/users/42/grant", r#"{"coins":"lots"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "invalid_json" }));

        let (status, _) =
            send(&harness.router, admin_post("/admin/users/7/grant", r#"{"coins":10}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(harness.backend.layer().store().len(), 1);
    }

    #[tokio::test]
    async fn ban_blocks_taps_and_notifies() {
        let mut harness = harness();
        harness.backend.layer().store().seed("42", seeded(5.0));

        let before = now_ms();
        let (status, body) = send(&harness.router, admin_post("/admin/users/42/ban", "")).await;
        assert_eq!(status, StatusCode::OK);
        let until = body["data"]["ban_end_time"].as_u64().unwrap();
        assert!(until >= before + DEFAULT_BAN_MINUTES * 60_000);
        assert_eq!(
            next_notice(&mut harness.notices).await,
            Notice::banned("42", DEFAULT_BAN_MINUTES)
        );

        let request = Request::post("/api/action/42")
            .header(INIT_DATA_HEADER, credential(42))
            .body(Body::from(r#"{"action":"tap"}"#))
            .unwrap();
        let (status, body) = send(&harness.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"]["status"], "banned");
        assert_eq!(body["data"]["coins"], 5.0);

        let (status, body) =
            send(&harness.router, admin_post("/admin/users/42/ban", r#"{"minutes":5}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let until = body["data"]["ban_end_time"].as_u64().unwrap();
        assert!(until < before + DEFAULT_BAN_MINUTES * 60_000);

        let (status, body) =
            send(&harness.router, admin_post("/admin/users/42/ban", r#"{"minutes":0}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "invalid_minutes" }));
    }

    #[tokio::test]
    async fn reset_restores_defaults_and_keeps_names() {
        let mut harness = harness();
        let mut state = seeded(5_000.0);
        state.multi_tap_level = 4;
        state.skin_bought = true;
        harness.backend.layer().store().seed("42", state);

        let (status, body) = send(&harness.router, admin_post("/admin/users/42/reset", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["coins"], 0.0);
        assert_eq!(body["data"]["multi_tap_level"], 1);
        assert_eq!(body["data"]["skin_bought"], false);
        assert_eq!(body["data"]["username"], "ann");
        assert_eq!(
            next_notice(&mut harness.notices).await,
            Notice::progress_reset("42")
        );

        let (status, _) = send(&harness.router, admin_post("/admin/users/9/reset", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
