//! Integration tests for the NextDoorBuddy backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsFrame};

use crate::client::{ApiClient, ClientError};
use crate::config::Config;
use crate::db::{init_database, QuartierData, Repository};
use crate::errors::AppError;
use crate::models::{ArticleStatus, Role, UpdateArticleRequest, User};
use crate::search::ListingIndex;
use crate::{create_router, AppState};

const PASSWORD: &str = "Secret123!";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    state: AppState,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::for_data_dir(temp_dir.path());
        adjust(&mut config);

        // Initialize database
        let pool = init_database(&config.db_path)
            .await
            .expect("Failed to init DB");
        let repo = Repository::new(pool);

        // Initialize search index
        let search = ListingIndex::open(&config.index_path).expect("Failed to init search");

        let state = AppState::new(repo, search, config);
        let app = create_router(state.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            state,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn api_client(&self) -> Arc<ApiClient> {
        Arc::new(ApiClient::new(self.base_url.clone()))
    }

    async fn quartier(&self, nom: &str) -> i64 {
        self.state
            .repo
            .create_quartier(&QuartierData {
                nom_quartier: nom.to_string(),
                ville: Some("Paris".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    /// Register a user and return its access token and id.
    async fn register(&self, email: &str, quartier_id: Option<i64>) -> (String, i64) {
        let resp = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "nom": "Martin",
                "prenom": "Claire",
                "email": email,
                "password": PASSWORD,
                "adresse": "1 rue de la Paix",
                "quartier_id": quartier_id
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let body: Value = resp.json().await.unwrap();
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["user"]["id"].as_i64().unwrap(),
        )
    }

    async fn register_admin(&self, email: &str, quartier_id: Option<i64>) -> (String, i64) {
        let (token, id) = self.register(email, quartier_id).await;
        self.state.repo.set_user_role(id, Role::Admin).await.unwrap();
        (token, id)
    }

    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Value,
    ) -> reqwest::Response {
        self.client
            .request(method, self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_socket(fixture: &TestFixture, token: &str) -> Socket {
    let url = format!(
        "{}/api/messaging/ws?token={}",
        fixture.base_url.replacen("http://", "ws://", 1),
        token
    );
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket upgrade failed");
    socket
}

/// Next JSON event on the socket, or `None` after a quiet half second.
async fn next_event(socket: &mut Socket) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_millis(500), socket.next())
            .await
            .ok()??
            .ok()?;
        if let WsFrame::Text(text) = frame {
            return serde_json::from_str(text.as_str()).ok();
        }
    }
}

/// Poll the online list until it has `expected` users.
async fn online_ids(fixture: &TestFixture, token: &str, expected: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for _ in 0..50 {
        let body: Value = fixture
            .get("/api/messaging/users/online", token)
            .await
            .json()
            .await
            .unwrap();
        ids = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["id"].as_i64().unwrap())
            .collect();
        if ids.len() == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    ids
}

fn timestamp_in(days: i64) -> String {
    (Utc::now() + chrono::Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

// ==================== AUTH ====================

#[tokio::test]
async fn test_register_login_me() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Montmartre").await;
    let (token, user_id) = fixture.register("claire@example.com", Some(quartier_id)).await;

    let me: Value = fixture.get("/api/auth/me", &token).await.json().await.unwrap();
    assert_eq!(me["success"], true);
    assert_eq!(me["data"]["id"], user_id);
    assert_eq!(me["data"]["quartier_id"], quartier_id);
    assert_eq!(me["data"]["role"], "user");
    assert!(me["data"].get("password_hash").is_none());

    let login = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": "Claire@Example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let body: Value = login.json().await.unwrap();
    assert!(body["data"]["refreshToken"].is_string());
    assert_eq!(body["data"]["user"]["email"], "claire@example.com");

    let wrong = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": "claire@example.com", "password": "Wrong123!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn test_register_rejections() {
    let fixture = TestFixture::new().await;
    fixture.register("dup@example.com", None).await;

    let duplicate = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({
            "nom": "Autre",
            "prenom": "Personne",
            "email": "dup@example.com",
            "password": PASSWORD,
            "adresse": "2 rue Lepic"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    let weak = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({
            "nom": "Faible",
            "prenom": "Mot",
            "email": "weak@example.com",
            "password": "password",
            "adresse": "3 rue Lepic"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(weak.status(), 400);
    let body: Value = weak.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_bootstrap_admin_registration() {
    let fixture = TestFixture::with_config(|config| {
        config.bootstrap_admin_email = Some("root@example.com".to_string());
    })
    .await;

    let (token, _) = fixture.register("ROOT@example.com", None).await;
    let me: Value = fixture.get("/api/auth/me", &token).await.json().await.unwrap();
    assert_eq!(me["data"]["role"], "admin");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let fixture = TestFixture::new().await;

    let missing = fixture
        .client
        .get(fixture.url("/api/auth/me"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let null_token = fixture.get("/api/trocs", "null").await;
    assert_eq!(null_token.status(), 401);
    let body: Value = null_token.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let garbage = fixture.get("/api/trocs", "not.a.jwt").await;
    assert_eq!(garbage.status(), 401);
    let body: Value = garbage.json().await.unwrap();
    assert_eq!(body["error"]["code"], "TOKEN_INVALID");

    // Public routes stay open
    let public = fixture
        .client
        .get(fixture.url("/api/quartiers"))
        .send()
        .await
        .unwrap();
    assert_eq!(public.status(), 200);
}

#[tokio::test]
async fn test_refresh_and_logout() {
    let fixture = TestFixture::new().await;
    fixture.register("session@example.com", None).await;

    let login: Value = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": "session@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let refresh_token = login["data"]["refreshToken"].as_str().unwrap().to_string();

    let refreshed = fixture
        .client
        .post(fixture.url("/api/auth/refresh-token"))
        .json(&json!({ "refreshToken": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(refreshed.status(), 200);
    let body: Value = refreshed.json().await.unwrap();
    let access = body["data"]["accessToken"].as_str().unwrap();
    assert_eq!(fixture.get("/api/auth/me", access).await.status(), 200);

    let missing = fixture
        .client
        .post(fixture.url("/api/auth/refresh-token"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let logout = fixture
        .client
        .post(fixture.url("/api/auth/logout"))
        .json(&json!({ "refreshToken": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 200);

    let revoked = fixture
        .client
        .post(fixture.url("/api/auth/refresh-token"))
        .json(&json!({ "refreshToken": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), 403);
}

// ==================== USERS & MEMBERSHIPS ====================

#[tokio::test]
async fn test_user_access_rules() {
    let fixture = TestFixture::new().await;
    let (alice, alice_id) = fixture.register("alice@example.com", None).await;
    let (bob, bob_id) = fixture.register("bob@example.com", None).await;
    let (admin, _) = fixture.register_admin("admin@example.com", None).await;

    assert_eq!(fixture.get("/api/users", &alice).await.status(), 403);
    assert_eq!(fixture.get("/api/users", &admin).await.status(), 200);

    let other = fixture.get(&format!("/api/users/{}", bob_id), &alice).await;
    assert_eq!(other.status(), 403);

    let promote = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/users/{}", alice_id),
            &alice,
            json!({ "role": "admin" }),
        )
        .await;
    assert_eq!(promote.status(), 403);

    let rename = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/users/{}", alice_id),
            &alice,
            json!({ "prenom": "Alicia" }),
        )
        .await;
    assert_eq!(rename.status(), 200);
    let body: Value = rename.json().await.unwrap();
    assert_eq!(body["data"]["prenom"], "Alicia");

    let taken = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/users/{}", alice_id),
            &alice,
            json!({ "email": "bob@example.com" }),
        )
        .await;
    assert_eq!(taken.status(), 409);

    let unknown_quartier = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/users/{}", alice_id),
            &alice,
            json!({ "quartier_id": 999_999 }),
        )
        .await;
    assert_eq!(unknown_quartier.status(), 404);

    let removed = fixture
        .client
        .delete(fixture.url(&format!("/api/users/{}", bob_id)))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 200);
    assert_eq!(fixture.get("/api/auth/me", &bob).await.status(), 404);
}

#[tokio::test]
async fn test_single_principal_membership() {
    let fixture = TestFixture::new().await;
    let first = fixture.quartier("Belleville").await;
    let second = fixture.quartier("Ménilmontant").await;
    let (token, user_id) = fixture.register("member@example.com", Some(first)).await;

    let added = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/users/{}/quartiers", user_id),
            &token,
            json!({ "quartier_id": second, "est_principal": false }),
        )
        .await;
    assert_eq!(added.status(), 201);

    let list: Value = fixture
        .get(&format!("/api/users/{}/quartiers", user_id), &token)
        .await
        .json()
        .await
        .unwrap();
    let memberships = list["data"].as_array().unwrap();
    assert_eq!(memberships.len(), 2);
    assert_eq!(memberships[0]["quartier_id"], first);
    assert_eq!(memberships[0]["est_principal"], true);

    let switched = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/users/{}/quartiers/{}/principal", user_id, second),
            &token,
            json!({}),
        )
        .await;
    assert_eq!(switched.status(), 200);

    let principal: Value = fixture
        .get(&format!("/api/users/{}/quartier-principal", user_id), &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(principal["data"]["quartier_id"], second);
    let principal_relation = principal["data"]["id"].as_i64().unwrap();

    let me: Value = fixture.get("/api/auth/me", &token).await.json().await.unwrap();
    assert_eq!(me["data"]["quartier_id"], second);

    let list: Value = fixture
        .get(&format!("/api/users/{}/quartiers", user_id), &token)
        .await
        .json()
        .await
        .unwrap();
    let principals = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["est_principal"] == true)
        .count();
    assert_eq!(principals, 1);

    let remove_principal = fixture
        .client
        .delete(fixture.url(&format!(
            "/api/users/{}/quartiers/{}",
            user_id, principal_relation
        )))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(remove_principal.status(), 400);
}

// ==================== QUARTIERS ====================

#[tokio::test]
async fn test_quartier_locate_and_admin_crud() {
    let fixture = TestFixture::new().await;
    let (admin, _) = fixture.register_admin("admin@example.com", None).await;
    let (user, _) = fixture.register("user@example.com", None).await;

    let square = json!({
        "type": "Polygon",
        "coordinates": [[[2.0, 48.0], [3.0, 48.0], [3.0, 49.0], [2.0, 49.0], [2.0, 48.0]]]
    });

    let forbidden = fixture
        .send(
            reqwest::Method::POST,
            "/api/quartiers",
            &user,
            json!({ "nom_quartier": "Carré", "geom": square }),
        )
        .await;
    assert_eq!(forbidden.status(), 403);

    let invalid = fixture
        .send(
            reqwest::Method::POST,
            "/api/quartiers",
            &admin,
            json!({ "nom_quartier": "Ouvert", "geom": { "type": "Polygon", "coordinates": [[[0, 0], [1, 1]]] } }),
        )
        .await;
    assert_eq!(invalid.status(), 400);

    let created = fixture
        .send(
            reqwest::Method::POST,
            "/api/quartiers",
            &admin,
            json!({ "nom_quartier": "Carré", "ville": "Paris", "code_postal": "75018", "geom": square }),
        )
        .await;
    assert_eq!(created.status(), 201);
    let body: Value = created.json().await.unwrap();
    let quartier_id = body["data"]["id"].as_i64().unwrap();

    let inside: Value = fixture
        .client
        .get(fixture.url("/api/quartiers/locate?lon=2.5&lat=48.5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(inside["data"]["id"], quartier_id);

    let outside = fixture
        .client
        .get(fixture.url("/api/quartiers/locate?lon=5.0&lat=48.5"))
        .send()
        .await
        .unwrap();
    assert_eq!(outside.status(), 404);

    let search: Value = fixture
        .client
        .get(fixture.url("/api/quartiers/search?q=75018"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["data"].as_array().unwrap().len(), 1);

    let empty = fixture
        .client
        .get(fixture.url("/api/quartiers/search?q="))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    // Coordinates resolve the principal quartier at registration
    let resp = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({
            "nom": "Geo",
            "prenom": "Loc",
            "email": "geo@example.com",
            "password": PASSWORD,
            "adresse": "4 rue du Carré",
            "longitude": 2.25,
            "latitude": 48.75
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["user"]["quartier_id"], quartier_id);
}

// ==================== EVENTS ====================

#[tokio::test]
async fn test_event_participation() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Batignolles").await;
    let (organizer, _) = fixture.register("orga@example.com", Some(quartier_id)).await;
    let (neighbor, _) = fixture.register("voisin@example.com", Some(quartier_id)).await;

    let past = fixture
        .send(
            reqwest::Method::POST,
            "/api/evenements",
            &organizer,
            json!({ "nom": "Brocante passée", "lieu": "Square", "date_evenement": timestamp_in(-3) }),
        )
        .await;
    assert_eq!(past.status(), 201);
    let past_id = past.json::<Value>().await.unwrap()["data"]["id"].as_i64().unwrap();

    let rejected = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/evenements/{}/participate", past_id),
            &neighbor,
            json!({}),
        )
        .await;
    assert_eq!(rejected.status(), 400);

    let upcoming = fixture
        .send(
            reqwest::Method::POST,
            "/api/evenements",
            &organizer,
            json!({
                "nom": "Pique-nique du canal",
                "description": "Repas partagé au bord de l'eau",
                "lieu": "Canal Saint-Martin",
                "date_evenement": timestamp_in(5)
            }),
        )
        .await;
    let event = upcoming.json::<Value>().await.unwrap()["data"].clone();
    let event_id = event["id"].as_i64().unwrap();
    assert_eq!(event["quartier_id"], quartier_id);

    for _ in 0..2 {
        let joined = fixture
            .send(
                reqwest::Method::POST,
                &format!("/api/evenements/{}/participate", event_id),
                &neighbor,
                json!({}),
            )
            .await;
        assert_eq!(joined.status(), 200);
    }

    let participants: Value = fixture
        .get(&format!("/api/evenements/{}/participants", event_id), &neighbor)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(participants["data"].as_array().unwrap().len(), 1);

    let check: Value = fixture
        .get(&format!("/api/evenements/{}/check-participation", event_id), &neighbor)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(check["data"]["is_participant"], true);

    let upcoming_list: Value = fixture
        .client
        .get(fixture.url("/api/evenements/upcoming"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(upcoming_list["data"].as_array().unwrap().len(), 1);

    let search: Value = fixture
        .client
        .get(fixture.url("/api/evenements/search?q=canal"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["data"][0]["id"], event_id);

    let not_organizer = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/evenements/{}", event_id),
            &neighbor,
            json!({ "nom": "Détourné" }),
        )
        .await;
    assert_eq!(not_organizer.status(), 403);

    let event_path = format!("/api/evenements/{}", event_id);
    let unknown_quartier = fixture
        .send(
            reqwest::Method::PUT,
            &event_path,
            &organizer,
            json!({ "quartier_id": 999_999 }),
        )
        .await;
    assert_eq!(unknown_quartier.status(), 404);
    let body: Value = unknown_quartier.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let other_quartier = fixture.quartier("Ternes").await;
    let moved = fixture
        .send(
            reqwest::Method::PUT,
            &event_path,
            &organizer,
            json!({ "quartier_id": other_quartier }),
        )
        .await;
    assert_eq!(moved.status(), 200);
    assert_eq!(
        moved.json::<Value>().await.unwrap()["data"]["quartier_id"],
        other_quartier
    );

    let cancel = fixture
        .client
        .delete(fixture.url(&format!("/api/evenements/{}/participate", event_id)))
        .bearer_auth(&neighbor)
        .send()
        .await
        .unwrap();
    assert_eq!(cancel.status(), 200);

    let again = fixture
        .client
        .delete(fixture.url(&format!("/api/evenements/{}/participate", event_id)))
        .bearer_auth(&neighbor)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 400);
}

// ==================== TROCS & SERVICES ====================

#[tokio::test]
async fn test_troc_ownership_and_moderation() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Oberkampf").await;
    let (owner, _) = fixture.register("owner@example.com", Some(quartier_id)).await;
    let (other, _) = fixture.register("other@example.com", Some(quartier_id)).await;
    let (admin, _) = fixture.register_admin("admin@example.com", None).await;
    let (homeless, _) = fixture.register("nowhere@example.com", None).await;

    let no_quartier = fixture
        .send(
            reqwest::Method::POST,
            "/api/trocs",
            &homeless,
            json!({ "titre": "Vélo" }),
        )
        .await;
    assert_eq!(no_quartier.status(), 400);

    let created = fixture
        .send(
            reqwest::Method::POST,
            "/api/trocs",
            &owner,
            json!({
                "titre": "Vélo de ville",
                "description": "Vélo hollandais en bon état",
                "categorie": "sport",
                "images": ["/img/velo1.jpg", "/img/velo2.jpg"]
            }),
        )
        .await;
    assert_eq!(created.status(), 201);
    let troc = created.json::<Value>().await.unwrap()["data"].clone();
    let troc_id = troc["id"].as_i64().unwrap();
    assert_eq!(troc["statut"], "active");
    assert_eq!(troc["type_annonce"], "offre");

    let hijack = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/trocs/{}", troc_id),
            &other,
            json!({ "titre": "Volé" }),
        )
        .await;
    assert_eq!(hijack.status(), 403);

    let image = fixture
        .send(
            reqwest::Method::DELETE,
            &format!("/api/trocs/{}/image", troc_id),
            &owner,
            json!({ "image_url": "/img/velo1.jpg" }),
        )
        .await;
    assert_eq!(image.status(), 200);
    let body: Value = image.json().await.unwrap();
    assert_eq!(body["data"]["images"], json!(["/img/velo2.jpg"]));

    let found: Value = fixture
        .get("/api/trocs/search?q=hollandais", &other)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(found["data"].as_array().unwrap().len(), 1);

    let bad_status = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/trocs/admin/{}/status", troc_id),
            &admin,
            json!({ "statut": "archived" }),
        )
        .await;
    assert_eq!(bad_status.status(), 400);

    let deactivated = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/trocs/admin/{}/status", troc_id),
            &admin,
            json!({ "statut": "inactive" }),
        )
        .await;
    assert_eq!(deactivated.status(), 200);

    let hidden: Value = fixture
        .get("/api/trocs/search?q=hollandais", &other)
        .await
        .json()
        .await
        .unwrap();
    assert!(hidden["data"].as_array().unwrap().is_empty());

    let stats: Value = fixture
        .get("/api/trocs/admin/stats", &admin)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["total"], 1);
    assert_eq!(stats["data"]["active"], 0);
    assert_eq!(stats["data"]["inactive"], 1);
    assert_eq!(stats["data"]["by_category"]["sport"], 1);

    assert_eq!(fixture.get("/api/trocs/admin/stats", &owner).await.status(), 403);
}

#[tokio::test]
async fn test_service_rules() {
    let fixture = TestFixture::new().await;
    let here = fixture.quartier("Marais").await;
    let elsewhere = fixture.quartier("Bastille").await;
    let (owner, _) = fixture.register("owner@example.com", Some(here)).await;
    let (neighbor, _) = fixture.register("neighbor@example.com", Some(here)).await;
    let (stranger, _) = fixture.register("stranger@example.com", Some(elsewhere)).await;
    let (admin, _) = fixture.register_admin("admin@example.com", None).await;

    let inverted = fixture
        .send(
            reqwest::Method::POST,
            "/api/services",
            &owner,
            json!({
                "titre": "Garde de chat",
                "description": "Je garde votre chat",
                "type_service": "offre",
                "categorie": "animaux",
                "date_debut": "2030-06-10",
                "date_fin": "2030-06-01"
            }),
        )
        .await;
    assert_eq!(inverted.status(), 400);

    let created = fixture
        .send(
            reqwest::Method::POST,
            "/api/services",
            &owner,
            json!({
                "titre": "Garde de chat",
                "description": "Je garde votre chat pendant les vacances",
                "type_service": "offre",
                "categorie": "animaux",
                "prix": 10.0,
                "date_debut": "2030-06-01",
                "date_fin": "2030-06-10"
            }),
        )
        .await;
    assert_eq!(created.status(), 201);
    let service = created.json::<Value>().await.unwrap()["data"].clone();
    let service_id = service["id"].as_i64().unwrap();
    assert_eq!(service["recurrence"], "ponctuel");
    assert_eq!(service["urgence"], "normale");

    fixture
        .send(
            reqwest::Method::POST,
            "/api/services",
            &owner,
            json!({
                "titre": "Cours de piano",
                "description": "Leçons pour débutants",
                "type_service": "offre",
                "categorie": "musique",
                "prix": 30.0
            }),
        )
        .await;

    let cheap: Value = fixture
        .get("/api/services/search?prix_max=15", &neighbor)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(cheap["data"].as_array().unwrap().len(), 1);
    assert_eq!(cheap["data"][0]["id"], service_id);

    let text: Value = fixture
        .get("/api/services/search?q=piano&categorie=animaux", &neighbor)
        .await
        .json()
        .await
        .unwrap();
    assert!(text["data"].as_array().unwrap().is_empty());

    let other_quartier = fixture
        .get(&format!("/api/services/{}", service_id), &stranger)
        .await;
    assert_eq!(other_quartier.status(), 403);

    let hijack = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/services/{}", service_id),
            &neighbor,
            json!({ "titre": "Volé" }),
        )
        .await;
    assert_eq!(hijack.status(), 403);

    let completed = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/services/admin/{}/status", service_id),
            &admin,
            json!({ "statut": "complete" }),
        )
        .await;
    assert_eq!(completed.status(), 200);

    let stats: Value = fixture
        .get("/api/services/admin/stats", &admin)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["total"], 2);
    assert_eq!(stats["data"]["active"], 1);
    assert_eq!(stats["data"]["complete"], 1);
    assert_eq!(stats["data"]["by_type"]["offre"], 2);
}

// ==================== JOURNAL ====================

#[tokio::test]
async fn test_journal_workflow() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Pigalle").await;
    let other_quartier = fixture.quartier("Auteuil").await;
    let (author, _) = fixture.register("plume@example.com", Some(quartier_id)).await;
    let (admin, _) = fixture.register_admin("admin@example.com", Some(quartier_id)).await;
    let (far_admin, _) = fixture
        .register_admin("far@example.com", Some(other_quartier))
        .await;

    let created = fixture
        .send(
            reqwest::Method::POST,
            "/api/journal/user/create",
            &author,
            json!({ "title": "Fête de quartier", "content": "Retour sur la fête." }),
        )
        .await;
    assert_eq!(created.status(), 201);
    let article = created.json::<Value>().await.unwrap()["data"].clone();
    let article_id = article["id"].as_str().unwrap().to_string();
    assert_eq!(article["status"], "brouillon");
    assert_eq!(article["author_name"], "Claire Martin");
    assert_eq!(article["category"], "Actualités");

    let submit_path = format!("/api/journal/user/{}/submit", article_id);
    let submitted = fixture
        .send(reqwest::Method::PATCH, &submit_path, &author, json!({}))
        .await;
    assert_eq!(submitted.status(), 200);
    assert_eq!(
        submitted.json::<Value>().await.unwrap()["data"]["status"],
        "a_valider"
    );

    let resubmit = fixture
        .send(reqwest::Method::PATCH, &submit_path, &author, json!({}))
        .await;
    assert_eq!(resubmit.status(), 409);

    let frozen = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/journal/user/{}", article_id),
            &author,
            json!({ "content": "Modifié" }),
        )
        .await;
    assert_eq!(frozen.status(), 409);

    let foreign = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/journal/admin/{}/validate", article_id),
            &far_admin,
            json!({}),
        )
        .await;
    assert_eq!(foreign.status(), 403);

    let pending: Value = fixture
        .get("/api/journal/admin/pending", &admin)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);

    let validated = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/journal/admin/{}/validate", article_id),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(validated.status(), 200);

    let public = fixture
        .client
        .get(fixture.url(&format!("/api/journal/{}", article_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(public.status(), 200);

    let twice = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/journal/admin/{}/reject", article_id),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(twice.status(), 409);

    let edition = fixture
        .send(
            reqwest::Method::POST,
            "/api/journal/create-journal",
            &admin,
            json!({ "title": "Édition de juin", "article_ids": [article_id] }),
        )
        .await;
    assert_eq!(edition.status(), 201);
    let body: Value = edition.json().await.unwrap();
    assert_eq!(body["data"]["total_articles"], 1);
    let uuid = body["data"]["edition"]["uuid"].as_str().unwrap().to_string();

    let in_edition: Value = fixture
        .get(&format!("/api/journal/edition/{}/articles", uuid), &author)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(in_edition["data"][0]["id"], article_id.as_str());

    // An author edit sends the article back to draft
    let edited = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/journal/user/{}", article_id),
            &author,
            json!({ "content": "Version corrigée" }),
        )
        .await;
    assert_eq!(edited.status(), 200);
    assert_eq!(
        edited.json::<Value>().await.unwrap()["data"]["status"],
        "brouillon"
    );

    let hidden = fixture
        .client
        .get(fixture.url(&format!("/api/journal/{}", article_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(hidden.status(), 404);

    let stats: Value = fixture
        .get("/api/journal/user/stats", &author)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["total"], 1);
    assert_eq!(stats["data"]["brouillon"], 1);
}

#[tokio::test]
async fn test_journal_visibility_and_stale_status() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Montmartre").await;
    let (author, _) = fixture.register("auteur@example.com", Some(quartier_id)).await;
    let (reader, _) = fixture.register("lecteur@example.com", Some(quartier_id)).await;
    let (admin, _) = fixture.register_admin("admin@example.com", Some(quartier_id)).await;

    let mut ids = Vec::new();
    for title in ["Vide-grenier", "Jardin partagé"] {
        let created = fixture
            .send(
                reqwest::Method::POST,
                "/api/journal/user/create",
                &author,
                json!({ "title": title, "content": "Compte rendu." }),
            )
            .await;
        assert_eq!(created.status(), 201);
        ids.push(
            created.json::<Value>().await.unwrap()["data"]["id"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    let toggle_path = format!("/api/journal/user/{}/toggle-visibility", ids[0]);

    let toggled = fixture
        .send(reqwest::Method::PATCH, &toggle_path, &author, json!({}))
        .await;
    assert_eq!(toggled.status(), 200);
    assert_eq!(
        toggled.json::<Value>().await.unwrap()["data"]["status"],
        "a_valider"
    );

    let back = fixture
        .send(reqwest::Method::PATCH, &toggle_path, &author, json!({}))
        .await;
    assert_eq!(
        back.json::<Value>().await.unwrap()["data"]["status"],
        "brouillon"
    );

    let not_author = fixture
        .send(reqwest::Method::PATCH, &toggle_path, &reader, json!({}))
        .await;
    assert_eq!(not_author.status(), 403);

    // An edit based on a status that has since changed is refused
    let stale = fixture
        .state
        .repo
        .update_article(
            &ids[0],
            &UpdateArticleRequest {
                content: Some("Écrasé".to_string()),
                ..Default::default()
            },
            ArticleStatus::Valide,
            ArticleStatus::Brouillon,
        )
        .await;
    assert!(matches!(stale, Err(AppError::Conflict(_))));
    let unchanged = fixture.state.repo.get_article(&ids[0]).await.unwrap().unwrap();
    assert_eq!(unchanged.content, "Compte rendu.");
    assert_eq!(unchanged.status, ArticleStatus::Brouillon);

    // Nothing validated yet: no edition is created
    let empty_edition = fixture
        .send(
            reqwest::Method::POST,
            "/api/journal/create-journal",
            &admin,
            json!({ "title": "Édition vide", "article_ids": [ids[1], "inconnu"] }),
        )
        .await;
    assert_eq!(empty_edition.status(), 400);
    let editions: Value = fixture
        .get("/api/journal/editions", &author)
        .await
        .json()
        .await
        .unwrap();
    assert!(editions["data"].as_array().unwrap().is_empty());

    fixture
        .send(reqwest::Method::PATCH, &toggle_path, &author, json!({}))
        .await;
    let validated = fixture
        .send(
            reqwest::Method::PATCH,
            &format!("/api/journal/admin/{}/validate", ids[0]),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(validated.status(), 200);

    let locked = fixture
        .send(reqwest::Method::PATCH, &toggle_path, &author, json!({}))
        .await;
    assert_eq!(locked.status(), 400);
}

// ==================== MESSAGING ====================

#[tokio::test]
async fn test_messaging_membership_and_unread() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Butte-aux-Cailles").await;
    let elsewhere = fixture.quartier("Passy").await;
    let (creator, _) = fixture.register("creator@example.com", Some(quartier_id)).await;
    let (reader, _) = fixture.register("reader@example.com", Some(quartier_id)).await;
    let (outsider, _) = fixture.register("outsider@example.com", Some(elsewhere)).await;

    let room = fixture
        .send(
            reqwest::Method::POST,
            "/api/messaging/rooms",
            &creator,
            json!({ "name": "Entraide", "description": "Coups de main" }),
        )
        .await;
    assert_eq!(room.status(), 201);
    let room_id = room.json::<Value>().await.unwrap()["data"]["id"].as_i64().unwrap();
    let messages_path = format!("/api/messaging/rooms/{}/messages", room_id);

    assert_eq!(fixture.get(&messages_path, &reader).await.status(), 403);

    let available: Value = fixture
        .get("/api/messaging/rooms/available", &reader)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(available["data"][0]["id"], room_id);

    let outsider_join = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/messaging/rooms/{}/join", room_id),
            &outsider,
            json!({}),
        )
        .await;
    assert_eq!(outsider_join.status(), 403);

    let joined = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/messaging/rooms/{}/join", room_id),
            &reader,
            json!({}),
        )
        .await;
    assert_eq!(joined.status(), 200);

    let mut first_message = 0;
    for content in ["Bonjour à tous", "Qui a une perceuse ?"] {
        let sent = fixture
            .send(
                reqwest::Method::POST,
                &messages_path,
                &creator,
                json!({ "content": content }),
            )
            .await;
        assert_eq!(sent.status(), 201);
        if first_message == 0 {
            first_message = sent.json::<Value>().await.unwrap()["data"]["id"]
                .as_i64()
                .unwrap();
        }
    }

    let empty = fixture
        .send(
            reqwest::Method::POST,
            &messages_path,
            &creator,
            json!({ "content": "   " }),
        )
        .await;
    assert_eq!(empty.status(), 400);

    let unread_path = format!("/api/messaging/rooms/{}/unread-count", room_id);
    let unread: Value = fixture.get(&unread_path, &reader).await.json().await.unwrap();
    assert_eq!(unread["data"]["unread_count"], 2);

    let marked = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/messaging/rooms/{}/mark-read", room_id),
            &reader,
            json!({}),
        )
        .await;
    assert_eq!(marked.status(), 200);
    let unread: Value = fixture.get(&unread_path, &reader).await.json().await.unwrap();
    assert_eq!(unread["data"]["unread_count"], 0);

    let history: Value = fixture.get(&messages_path, &reader).await.json().await.unwrap();
    let history = history["data"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["content"], "Bonjour à tous");

    let bad_limit = fixture
        .get(&format!("{}?limit=0", messages_path), &reader)
        .await;
    assert_eq!(bad_limit.status(), 400);

    let huge_page = fixture
        .get(
            &format!("{}?page=9223372036854775807&limit=2", messages_path),
            &creator,
        )
        .await;
    assert_eq!(huge_page.status(), 400);
    let body: Value = huge_page.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let far_page: Value = fixture
        .get(&format!("{}?page=1000&limit=100", messages_path), &creator)
        .await
        .json()
        .await
        .unwrap();
    assert!(far_page["data"].as_array().unwrap().is_empty());

    let not_sender = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/messaging/messages/{}", first_message),
            &reader,
            json!({ "content": "Usurpé" }),
        )
        .await;
    assert_eq!(not_sender.status(), 403);

    let not_moderator = fixture
        .client
        .delete(fixture.url(&format!("/api/messaging/messages/{}", first_message)))
        .bearer_auth(&reader)
        .send()
        .await
        .unwrap();
    assert_eq!(not_moderator.status(), 403);

    let deleted = fixture
        .client
        .delete(fixture.url(&format!("/api/messaging/messages/{}", first_message)))
        .bearer_auth(&creator)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let history: Value = fixture.get(&messages_path, &reader).await.json().await.unwrap();
    assert_eq!(history["data"].as_array().unwrap().len(), 1);

    let members: Value = fixture
        .get(&format!("/api/messaging/rooms/{}/members", room_id), &creator)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(members["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_socket_pushes_to_room_members_only() {
    let fixture = TestFixture::new().await;
    let quartier_id = fixture.quartier("Belleville").await;
    let (creator, creator_id) = fixture.register("hote@example.com", Some(quartier_id)).await;
    let (member, member_id) = fixture.register("membre@example.com", Some(quartier_id)).await;
    let (bystander, bystander_id) = fixture
        .register("passant@example.com", Some(quartier_id))
        .await;

    let room = fixture
        .send(
            reqwest::Method::POST,
            "/api/messaging/rooms",
            &creator,
            json!({ "name": "Voisins" }),
        )
        .await;
    let room_id = room.json::<Value>().await.unwrap()["data"]["id"].as_i64().unwrap();
    let joined = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/messaging/rooms/{}/join", room_id),
            &member,
            json!({}),
        )
        .await;
    assert_eq!(joined.status(), 200);

    let socket_url = format!(
        "{}/api/messaging/ws",
        fixture.base_url.replacen("http://", "ws://", 1)
    );
    for url in [socket_url.clone(), format!("{}?token=invalide", socket_url)] {
        match tokio_tungstenite::connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            Err(e) => panic!("unexpected WebSocket error: {}", e),
            Ok(_) => panic!("upgrade accepted without a valid token"),
        }
    }

    let mut creator_socket = open_socket(&fixture, &creator).await;
    let mut member_socket = open_socket(&fixture, &member).await;
    let mut bystander_socket = open_socket(&fixture, &bystander).await;

    assert_eq!(
        online_ids(&fixture, &creator, 3).await,
        vec![creator_id, member_id, bystander_id]
    );

    let sent = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/messaging/rooms/{}/messages", room_id),
            &creator,
            json!({ "content": "Réunion ce soir" }),
        )
        .await;
    assert_eq!(sent.status(), 201);

    for socket in [&mut creator_socket, &mut member_socket] {
        let event = next_event(socket).await.expect("no event for a room member");
        assert_eq!(event["type"], "message_received");
        assert_eq!(event["message"]["chat_room_id"], room_id);
        assert_eq!(event["message"]["content"], "Réunion ce soir");
    }
    assert!(next_event(&mut bystander_socket).await.is_none());

    bystander_socket.close(None).await.unwrap();
    assert_eq!(
        online_ids(&fixture, &creator, 2).await,
        vec![creator_id, member_id]
    );
}

// ==================== CLIENT ====================

#[tokio::test]
async fn test_client_session_round_trip() {
    let fixture = TestFixture::new().await;
    fixture.register("client@example.com", None).await;

    let client = fixture.api_client();
    let user = client.login("client@example.com", PASSWORD).await.unwrap();
    assert!(client.is_logged_in().await);

    let me: User = client.get("/api/auth/me").await.unwrap();
    assert_eq!(me.id, user.id);
    assert_eq!(client.current_user().await.unwrap().email, "client@example.com");

    client.logout().await.unwrap();
    assert!(!client.is_logged_in().await);

    let err = client.get::<User>("/api/auth/me").await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn test_client_refreshes_expiring_token() {
    let fixture = TestFixture::with_config(|config| {
        config.access_token_ttl = Duration::from_secs(60);
    })
    .await;
    fixture.register("expiring@example.com", None).await;

    let client = fixture.api_client();
    client.login("expiring@example.com", PASSWORD).await.unwrap();
    let before = client.session().await.unwrap().access_token;

    assert!(client.refresh_if_expiring(Utc::now()).await.unwrap());
    let after = client.session().await.unwrap().access_token;
    assert_ne!(before, after);

    let far_past = Utc::now() - chrono::Duration::hours(1);
    assert!(!client.refresh_if_expiring(far_past).await.unwrap());
}

#[tokio::test]
async fn test_client_retries_once_after_401() {
    let fixture = TestFixture::with_config(|config| {
        config.access_token_ttl = Duration::from_secs(1);
    })
    .await;
    fixture.register("retry@example.com", None).await;

    let client = fixture.api_client();
    client.login("retry@example.com", PASSWORD).await.unwrap();
    let stale = client.session().await.unwrap().access_token;

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let me: User = client.get("/api/auth/me").await.unwrap();
    assert_eq!(me.email, "retry@example.com");
    assert_ne!(client.session().await.unwrap().access_token, stale);
}

#[tokio::test]
async fn test_client_failed_refresh_logs_out() {
    let fixture = TestFixture::with_config(|config| {
        config.access_token_ttl = Duration::from_secs(1);
    })
    .await;
    fixture.register("revoked@example.com", None).await;

    let client = fixture.api_client();
    client.login("revoked@example.com", PASSWORD).await.unwrap();
    let refresh_token = client.session().await.unwrap().refresh_token;

    // Revoke the session behind the client's back
    let logout = fixture
        .client
        .post(fixture.url("/api/auth/logout"))
        .json(&json!({ "refreshToken": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 200);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let err = client.get::<User>("/api/auth/me").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Api { status, .. } if status == reqwest::StatusCode::UNAUTHORIZED
    ));
    assert!(!client.is_logged_in().await);
}

#[tokio::test]
async fn test_client_refresh_loop_stops_without_session() {
    let fixture = TestFixture::new().await;
    let client = fixture.api_client();

    let handle = client.spawn_refresh_loop(Duration::from_millis(10));
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("refresh loop should end")
        .unwrap();
}
