mod common;

use api_lib::{
    adapters::SupabaseClient, config::Config, router::build_router, web::state::AppState,
};
use common::{FakeSupabase, AUTH_CODE};
use futures::{SinkExt, StreamExt};
use reqwest::{header, redirect::Policy, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

type LiveView = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap()
}

/// Starts the API against `supabase_url`, or inert when it is `None`.
async fn spawn_api(supabase_url: Option<&str>) -> String {
    let mut env = HashMap::new();
    if let Some(url) = supabase_url {
        env.insert("SUPABASE_URL", url.to_string());
        env.insert("SUPABASE_ANON_KEY", "anon-key".to_string());
    }
    let config = Config::from_lookup(|key| env.get(key).cloned()).unwrap();

    let supabase = config
        .supabase
        .as_ref()
        .map(|s| SupabaseClient::new(s.url.clone(), s.anon_key.clone(), config.callback_url()));
    let state = Arc::new(AppState::new(Arc::new(config), supabase));
    common::serve(build_router(state)).await
}

/// The `name=value` pair from a `Set-Cookie` header of the response.
fn cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
        .map(str::to_string)
}

async fn sign_in(api: &str) -> String {
    let client = http();

    let login = client.get(format!("{}/auth/login", api)).send().await.unwrap();
    assert_eq!(login.status(), StatusCode::SEE_OTHER);
    let location = login.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("/auth/v1/authorize"));
    assert!(location.contains("provider=google"));
    let flow = cookie(&login, "sb_flow").expect("flow cookie");

    let callback = client
        .get(format!("{}/auth/callback?code={}", api, AUTH_CODE))
        .header(header::COOKIE, flow)
        .send()
        .await
        .unwrap();
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    cookie(&callback, "session").expect("session cookie")
}

#[tokio::test]
async fn inert_service_reports_unavailable() {
    let api = spawn_api(None).await;
    let client = http();

    let login = client.get(format!("{}/auth/login", api)).send().await.unwrap();
    assert_eq!(login.status(), StatusCode::SERVICE_UNAVAILABLE);

    let list = client.get(format!("{}/bookmarks", api)).send().await.unwrap();
    assert_eq!(list.status(), StatusCode::SERVICE_UNAVAILABLE);

    let session: Value = client
        .get(format!("{}/auth/session", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["signed_in"], false);
}

#[tokio::test]
async fn bookmarks_require_a_session() {
    let fake = FakeSupabase::new();
    let api = spawn_api(Some(&fake.spawn().await)).await;

    let list = http().get(format!("{}/bookmarks", api)).send().await.unwrap();
    assert_eq!(list.status(), StatusCode::UNAUTHORIZED);

    let forged = http()
        .get(format!("{}/bookmarks", api))
        .header(header::COOKIE, "session=not-a-session")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callback_without_a_pending_sign_in_is_rejected() {
    let fake = FakeSupabase::new();
    let api = spawn_api(Some(&fake.spawn().await)).await;

    let response = http()
        .get(format!("{}/auth/callback?code={}", api, AUTH_CODE))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_in_browser_manages_its_bookmarks() {
    let fake = FakeSupabase::new();
    fake.seed(fake.user_id, "Existing");
    let api = spawn_api(Some(&fake.spawn().await)).await;
    let session = sign_in(&api).await;
    let client = http();

    // Session resolution
    let me: Value = client
        .get(format!("{}/auth/session", api))
        .header(header::COOKIE, &session)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["signed_in"], true);
    assert_eq!(me["user_id"], json!(fake.user_id));

    // Empty fields are rejected
    let rejected = client
        .post(format!("{}/bookmarks", api))
        .header(header::COOKIE, &session)
        .json(&json!({ "title": "", "url": "https://example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    // Add
    let created = client
        .post(format!("{}/bookmarks", api))
        .header(header::COOKIE, &session)
        .json(&json!({ "title": "Rust", "url": "https://rust-lang.org" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let listed: Vec<Value> = created.json().await.unwrap();
    let titles: Vec<&str> = listed.iter().filter_map(|b| b["title"].as_str()).collect();
    assert_eq!(titles, vec!["Rust", "Existing"]);

    // Delete
    let id = listed[0]["id"].as_str().unwrap().to_string();
    let deleted = client
        .delete(format!("{}/bookmarks/{}", api, id))
        .header(header::COOKIE, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let listed: Vec<Value> = client
        .get(format!("{}/bookmarks", api))
        .header(header::COOKIE, &session)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["title"], "Existing");

    // Logout invalidates the cookie
    let logout = client
        .post(format!("{}/auth/logout", api))
        .header(header::COOKIE, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);
    assert!(*fake.signed_out.lock().unwrap());

    let after = client
        .get(format!("{}/bookmarks", api))
        .header(header::COOKIE, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

//=========================================================================================
// Live view
//=========================================================================================

async fn open_live_view(api: &str, session: &str) -> LiveView {
    let mut request = format!("{}/ws", api.replacen("http", "ws", 1))
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::COOKIE, session.parse().unwrap());
    let (view, _) = connect_async(request).await.expect("live view connects");
    view
}

async fn send(view: &mut LiveView, message: Value) {
    view.send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Reads server messages until `done` accepts everything received so far.
async fn collect_until<F: Fn(&[Value]) -> bool>(view: &mut LiveView, done: F) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        while !done(&seen) {
            let frame = view.next().await.expect("live view open").expect("frame");
            if let Message::Text(text) = frame {
                seen.push(serde_json::from_str::<Value>(text.as_str()).unwrap());
            }
        }
        seen
    })
    .await
    .expect("expected messages did not arrive")
}

fn is_snapshot_with(message: &Value, title: &str) -> bool {
    message["type"] == "snapshot"
        && message["bookmarks"]
            .as_array()
            .is_some_and(|b| b.iter().any(|row| row["title"] == title))
}

async fn eventually_counts(counter: &AtomicUsize, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("counter did not reach the expected value");
}

#[tokio::test]
async fn live_view_mounts_mutates_and_unmounts() {
    let fake = FakeSupabase::new();
    fake.seed(fake.user_id, "Existing");
    let api = spawn_api(Some(&fake.spawn().await)).await;
    let session = sign_in(&api).await;
    let mut view = open_live_view(&api, &session).await;

    // Mount: the first message is the resolved snapshot
    let first = collect_until(&mut view, |seen| !seen.is_empty()).await;
    assert_eq!(first[0]["type"], "snapshot");
    assert_eq!(first[0]["user"]["user_id"], json!(fake.user_id));
    assert!(is_snapshot_with(&first[0], "Existing"));
    eventually_counts(&fake.realtime_joins, 1).await;

    // A change made elsewhere is pushed without asking
    fake.insert_elsewhere(fake.user_id, "From elsewhere");
    collect_until(&mut view, |seen| {
        seen.iter().any(|m| is_snapshot_with(m, "From elsewhere"))
    })
    .await;

    // Add: the client is told to clear its inputs and sees the new row
    send(
        &mut view,
        json!({ "type": "add_bookmark", "title": "Rust", "url": "https://rust-lang.org" }),
    )
    .await;
    let seen = collect_until(&mut view, |seen| {
        seen.iter().any(|m| m["type"] == "bookmark_added")
            && seen.iter().any(|m| is_snapshot_with(m, "Rust"))
    })
    .await;
    assert!(seen.iter().all(|m| m["type"] != "alert"));

    // A rejected mutation is reported as an alert
    send(
        &mut view,
        json!({ "type": "add_bookmark", "title": "", "url": "https://example.com" }),
    )
    .await;
    let seen = collect_until(&mut view, |seen| seen.iter().any(|m| m["type"] == "alert")).await;
    let alert = seen.iter().find(|m| m["type"] == "alert").unwrap();
    assert_eq!(alert["message"], "The title must not be empty");

    // Unmount: closing the socket leaves the realtime channel
    view.close(None).await.unwrap();
    eventually_counts(&fake.realtime_leaves, 1).await;
}

#[tokio::test]
async fn live_view_refreshes_an_expired_access_token() {
    let fake = FakeSupabase::new();
    fake.set_expires_in(0);
    let api = spawn_api(Some(&fake.spawn().await)).await;
    let session = sign_in(&api).await;
    let mut view = open_live_view(&api, &session).await;
    collect_until(&mut view, |seen| !seen.is_empty()).await;

    fake.expire_access_token();
    send(
        &mut view,
        json!({ "type": "add_bookmark", "title": "Rust", "url": "https://rust-lang.org" }),
    )
    .await;

    let seen = collect_until(&mut view, |seen| {
        seen.iter().any(|m| m["type"] == "bookmark_added")
            && seen.iter().any(|m| is_snapshot_with(m, "Rust"))
    })
    .await;
    assert!(seen.iter().all(|m| m["type"] != "alert"));
}
