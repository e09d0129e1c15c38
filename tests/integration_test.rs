use chrono::{DateTime, TimeDelta};
use courtside_server::args::Args;
use courtside_server::auth::AuthSecret;
use courtside_server::clock::{Clock, ManualClock};
use courtside_server::state::ServerState;
use courtside_server::store::SqliteStore;
use courtside_server::{app, AppState};
use reqwest::Client;
use serde_json::{json, Value};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};

struct TestApp {
    addr: SocketAddr,
    clock: ManualClock,
    state: ServerState,
    client: Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn admin_token(&self) -> String {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({ "username": "admin", "password": "hunter2" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": "admin", "password": "hunter2" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn delete(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    /// Registers a player and returns `(id, username, temp_password)`.
    async fn player(&self, token: &str, first_name: &str) -> (String, String, String) {
        let response = self
            .post(token, "/players", json!({ "first_name": first_name, "last_name": "Test" }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        (
            body["id"].as_str().unwrap().to_string(),
            body["username"].as_str().unwrap().to_string(),
            body["temp_password"].as_str().unwrap().to_string(),
        )
    }

    async fn court(&self, token: &str, name: &str) -> String {
        let response = self.post(token, "/courts", json!({ "name": name })).await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }
}

async fn spawn_app() -> TestApp {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let state = ServerState::new(Arc::new(store), Arc::new(clock.clone()));
    let app_state = AppState {
        state: state.clone(),
        secret: AuthSecret("test-secret".into()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(app_state)).await.unwrap();
    });

    TestApp {
        addr,
        clock,
        state,
        client: Client::new(),
    }
}

#[tokio::test]
#[serial]
async fn test_run_serves_health() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let args = Args {
        host: addr,
        database_url: "sqlite::memory:".into(),
        jwt_secret: "test-secret".into(),
        sweep_interval_secs: 1,
    };
    tokio::spawn(async move {
        courtside_server::run(args).await.unwrap();
    });
    sleep(Duration::from_millis(200)).await;

    let response = Client::new()
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_admin_authentication_flow() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    assert!(!token.is_empty());

    // bootstrap is closed once an admin exists
    let response = app
        .client
        .post(app.url("/auth/register"))
        .json(&json!({ "username": "intruder", "password": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // but an admin can add another
    let response = app
        .post(&token, "/auth/register", json!({ "username": "second", "password": "pw" }))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app
        .post(&token, "/auth/register", json!({ "username": "second", "password": "pw" }))
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let response = app
        .client
        .post(app.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app.client.get(app.url("/courts")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app.get("not-a-token", "/courts").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn test_players_cannot_log_in_as_admin() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let (_, username, password) = app.player(&token, "Mia").await;

    let response = app
        .client
        .post(app.url("/auth/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn test_player_registry() {
    let app = spawn_app().await;
    let token = app.admin_token().await;

    let (_, first, password) = app.player(&token, "Mia").await;
    let (second_id, second, _) = app.player(&token, "mia").await;
    assert_eq!(first, "mia");
    assert_eq!(second, "mia2");
    assert_eq!(password.len(), 8);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));

    let response = app.get(&token, "/players").await;
    assert_eq!(response.status().as_u16(), 200);
    let players: Vec<Value> = response.json().await.unwrap();
    assert_eq!(players.len(), 2);
    assert!(players.iter().all(|p| p.get("password_hash").is_none()));

    let response = app.delete(&token, &format!("/players/{second_id}")).await;
    assert_eq!(response.status().as_u16(), 204);
    let response = app.delete(&token, &format!("/players/{second_id}")).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[serial]
async fn test_check_in_and_leave() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;
    let (_, mia, mia_pw) = app.player(&token, "Mia").await;
    let (_, leo, leo_pw) = app.player(&token, "Leo").await;

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/queue"),
            json!({ "players": [
                { "username": mia, "password": mia_pw },
                { "username": leo, "password": "wrong" },
            ]}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "leo");

    // the failed group left no trace
    let snapshot: Value = app.get(&token, &format!("/courts/{court}")).await.json().await.unwrap();
    assert_eq!(snapshot["active_players"].as_array().unwrap().len(), 0);

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/queue"),
            json!({ "players": [
                { "username": mia, "password": mia_pw },
                { "username": leo, "password": leo_pw },
            ]}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["placement"], "active");
    assert_eq!(body["court"]["active_players"].as_array().unwrap().len(), 2);
    assert_eq!(body["court"]["remaining_time_ms"], 900_000);
    assert_eq!(body["court"]["capacity"], 4);

    // already on a court
    let other = app.court(&token, "Court 2").await;
    let response = app
        .post(
            &token,
            &format!("/courts/{other}/queue"),
            json!({ "players": [{ "username": mia, "password": mia_pw }] }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/leave"),
            json!({ "players": [{ "username": mia, "password": mia_pw }] }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let active = body["active_players"].as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["username"], "leo");
}

#[tokio::test]
#[serial]
async fn test_group_size_limits() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;

    let response = app
        .post(&token, &format!("/courts/{court}/queue"), json!({ "players": [] }))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // rejected on size alone: none of these accounts exist
    let five: Vec<Value> = (0..5)
        .map(|i| json!({ "username": format!("nobody{i}"), "password": "x" }))
        .collect();
    for action in ["queue", "leave"] {
        let response = app
            .post(
                &token,
                &format!("/courts/{court}/{action}"),
                json!({ "players": five }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 400);
    }
}

#[tokio::test]
#[serial]
async fn test_player_tags_package_and_clear() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;

    let response = app
        .post(
            &token,
            "/players",
            json!({ "first_name": "Mia", "last_name": "Wong", "package_uses": 10 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();
    let (mia, mia_pw) = (
        body["username"].as_str().unwrap().to_string(),
        body["temp_password"].as_str().unwrap().to_string(),
    );

    let response = app
        .put(&token, &format!("/players/{id}/mark"), json!({ "is_marked": true }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let player: Value = response.json().await.unwrap();
    assert_eq!(player["is_marked"], true);
    assert_eq!(player["package_uses"], 10);

    let response = app
        .put(&token, &format!("/players/{id}/flag"), json!({ "is_flagged": true }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post(&token, &format!("/players/{id}/toggle-mark"), json!({}))
        .await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["is_marked"], false);

    let response = app
        .put(
            &token,
            &format!("/players/{id}/package"),
            json!({ "package_uses": 4, "use_drop_in_package": true }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let players: Vec<Value> = app.get(&token, "/players").await.json().await.unwrap();
    assert_eq!(players[0]["is_marked"], false);
    assert_eq!(players[0]["is_flagged"], true);
    assert_eq!(players[0]["package_uses"], 4);
    assert_eq!(players[0]["use_drop_in_package"], true);

    let ghost = uuid::Uuid::new_v4();
    let response = app
        .post(&token, &format!("/players/{ghost}/toggle-flag"), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/queue"),
            json!({ "players": [{ "username": mia, "password": mia_pw }] }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app.delete(&token, "/players").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["deleted"], 1);

    let players: Vec<Value> = app.get(&token, "/players").await.json().await.unwrap();
    assert!(players.is_empty());
    let snapshot: Value = app.get(&token, &format!("/courts/{court}")).await.json().await.unwrap();
    assert!(snapshot["active_players"].as_array().unwrap().is_empty());
    assert_eq!(snapshot["remaining_time_ms"], Value::Null);

    // the administrator survives
    let response = app
        .client
        .post(app.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_locks_block_check_in() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;
    let (_, mia, mia_pw) = app.player(&token, "Mia").await;
    let now = app.clock.now();

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/locks"),
            json!({ "starts_at": now + TimeDelta::hours(1), "ends_at": now, "reason": "backwards" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/locks"),
            json!({
                "starts_at": now,
                "ends_at": now + TimeDelta::hours(1),
                "reason": "Resurfacing"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let lock: Value = response.json().await.unwrap();
    let lock_id = lock["id"].as_str().unwrap().to_string();

    let snapshot: Value = app.get(&token, &format!("/courts/{court}")).await.json().await.unwrap();
    assert_eq!(snapshot["is_locked"], true);
    assert_eq!(snapshot["current_lock"]["reason"], "Resurfacing");

    let check_in = json!({ "players": [{ "username": mia, "password": mia_pw }] });
    let response = app
        .post(&token, &format!("/courts/{court}/queue"), check_in.clone())
        .await;
    assert_eq!(response.status().as_u16(), 423);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["lock"]["reason"], "Resurfacing");

    let response = app
        .delete(&token, &format!("/courts/{court}/locks/{lock_id}"))
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let response = app
        .post(&token, &format!("/courts/{court}/queue"), check_in)
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_sweep_rotates_court() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;

    let mut first = Vec::new();
    for name in ["Ana", "Ben", "Cal", "Dee"] {
        let (_, username, password) = app.player(&token, name).await;
        first.push(json!({ "username": username, "password": password }));
    }
    let (_, eve, eve_pw) = app.player(&token, "Eve").await;

    let response = app
        .post(&token, &format!("/courts/{court}/queue"), json!({ "players": first }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post(
            &token,
            &format!("/courts/{court}/queue"),
            json!({ "players": [{ "username": eve, "password": eve_pw }] }),
        )
        .await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["placement"], "waiting");
    assert_eq!(body["court"]["waiting_groups"].as_array().unwrap().len(), 1);

    app.clock.advance(TimeDelta::minutes(15));
    let report = app.state.scheduler.sweep().await.unwrap();
    assert_eq!(report.rotated.len(), 1);

    let snapshot: Value = app.get(&token, &format!("/courts/{court}")).await.json().await.unwrap();
    let active = snapshot["active_players"].as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["username"], "eve");
    assert_eq!(snapshot["remaining_time_ms"], 900_000);
}

#[tokio::test]
#[serial]
async fn test_delete_court() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let court = app.court(&token, "Court 1").await;

    let response = app.get(&token, "/courts").await;
    let courts: Vec<Value> = response.json().await.unwrap();
    assert_eq!(courts.len(), 1);

    let response = app.delete(&token, &format!("/courts/{court}")).await;
    assert_eq!(response.status().as_u16(), 204);
    let response = app.get(&token, &format!("/courts/{court}")).await;
    assert_eq!(response.status().as_u16(), 404);
}
