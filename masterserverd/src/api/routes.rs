use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, State},
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use tokio::sync::watch;
use shared::protocol::{LIST_PATH, REGISTER_PATH, SERVERS_HASH_PATH, SERVERS_PATH};
use shared::types::ServerEntry;
use crate::api::announce::{self, AnnounceError, AnnounceForm};
use crate::api::listing;
use crate::config::Config;
use crate::probe::Prober;
use crate::registry_manager::RegistryHandle;

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub prober: Arc<dyn Prober>,
    pub hash_rx: watch::Receiver<String>,
    pub config: Arc<Config>,
}

/// Routes expect the peer address: serve with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(REGISTER_PATH, post(post_register))
        .route(LIST_PATH, get(get_list))
        .route(SERVERS_PATH, get(get_servers))
        .route(SERVERS_HASH_PATH, get(get_hash))
        .with_state(state)
}

async fn post_register(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<&'static str, AnnounceError> {
    // An absent or unreadable body carries no fields, like an empty form
    let pairs = match form {
        Ok(Form(pairs)) => pairs,
        Err(rejection) => {
            tracing::debug!("Treating register body from {} as empty: {}", peer, rejection);
            Vec::new()
        }
    };
    let registration = AnnounceForm::from_pairs(pairs).validate(peer.ip())?;
    announce::register(
        &state.registry,
        state.prober.clone(),
        state.config.probe.timeout(),
        registration,
    )
    .await?;
    Ok("OK")
}

async fn get_list(State(state): State<AppState>) -> Result<String, StatusCode> {
    listing::live_list(&state.registry, state.config.registry.expire_after_secs)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list servers: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_servers(State(state): State<AppState>) -> Result<Json<Vec<ServerEntry>>, StatusCode> {
    listing::live_servers(&state.registry, state.config.registry.expire_after_secs)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to list servers: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use masterserver_client::{MasterServerClient, RegistrationState};
    use shared::protocol::{Announcement, ListedServer};
    use crate::probe::{ProbeFuture, TcpProber};
    use crate::registry::{db::RegistryDb, hash};

    struct AlwaysReachable;

    impl Prober for AlwaysReachable {
        fn probe<'a>(&'a self, _address: &'a str, _port: u16, _timeout: Duration) -> ProbeFuture<'a> {
            Box::pin(std::future::ready(true))
        }
    }

    async fn serve(prober: Arc<dyn Prober>) -> String {
        let db = RegistryDb::open(":memory:").unwrap();
        let (hash_tx, hash_rx) = watch::channel(hash::compute_hash(&[]));
        let state = AppState {
            registry: RegistryHandle::spawn(db, hash_tx, 300),
            prober,
            hash_rx,
            config: Arc::new(Config::default()),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        format!("http://{}", addr)
    }

    async fn post_form(base: &str, fields: &[(&str, &str)]) -> (StatusCode, String) {
        let response = reqwest::Client::new()
            .post(format!("{}{}", base, REGISTER_PATH))
            .form(fields)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.text().await.unwrap())
    }

    async fn get_text(base: &str, path: &str) -> String {
        reqwest::get(format!("{}{}", base, path))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_list() {
        let base = serve(Arc::new(AlwaysReachable)).await;

        let (status, body) = post_form(
            &base,
            &[
                ("address", "203.0.113.5"),
                ("port", "27015"),
                ("version", "42"),
                ("name", "Test Server"),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let list = get_text(&base, LIST_PATH).await;
        assert_eq!(list, "203.0.113.5:27015:42:Test Server\n");
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let base = serve(Arc::new(AlwaysReachable)).await;

        let cases: [(&[(&str, &str)], &str); 3] = [
            (&[("name", "A"), ("version", "1")], "'port' not set"),
            (&[("port", "27015"), ("version", "1")], "'name' not set"),
            (&[("port", "27015"), ("name", "A")], "'version' not set"),
        ];

        for (fields, expected) in cases {
            let (status, body) = post_form(&base, fields).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, expected);
        }

        assert_eq!(get_text(&base, LIST_PATH).await, "");
    }

    #[tokio::test]
    async fn test_bodiless_register_reports_missing_port() {
        let base = serve(Arc::new(AlwaysReachable)).await;
        let url = format!("{}{}", base, REGISTER_PATH);

        let response = reqwest::Client::new().post(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(response.text().await.unwrap(), "'port' not set");

        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", "application/json")
            .body(r#"{"port":27015}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(response.text().await.unwrap(), "'port' not set");

        assert_eq!(get_text(&base, LIST_PATH).await, "");
    }

    #[tokio::test]
    async fn test_repeated_field_uses_last_value() {
        let base = serve(Arc::new(AlwaysReachable)).await;

        let (status, body) = post_form(
            &base,
            &[
                ("address", "203.0.113.5"),
                ("port", "1"),
                ("port", "27015"),
                ("version", "42"),
                ("name", "Test Server"),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert_eq!(get_text(&base, LIST_PATH).await, "203.0.113.5:27015:42:Test Server\n");
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let base = serve(Arc::new(AlwaysReachable)).await;

        let (status, body) = post_form(
            &base,
            &[("address", "bad host"), ("port", "27015"), ("version", "1"), ("name", "A")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid 'address'");
        assert_eq!(get_text(&base, LIST_PATH).await, "");
    }

    #[tokio::test]
    async fn test_client_round_trip_with_real_probe() {
        let base = serve(Arc::new(TcpProber)).await;
        let game = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let game_port = game.local_addr().unwrap().port();

        let client = MasterServerClient::new(base.as_str()).unwrap();
        let announcement = Announcement {
            port: game_port,
            name: "Local Game".to_string(),
            version: 7,
            address: None,
        };

        assert_eq!(client.announce(&announcement).await, RegistrationState::Success);
        // Second announce is a refresh, still one entry
        assert_eq!(client.announce(&announcement).await, RegistrationState::Success);

        let servers = client.list().await.unwrap();
        assert_eq!(
            servers,
            vec![ListedServer {
                address: "127.0.0.1".to_string(),
                port: game_port,
                version: 7,
                name: "Local Game".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_listed() {
        let base = serve(Arc::new(TcpProber)).await;
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);
        let port_field = closed_port.to_string();

        let (status, body) = post_form(
            &base,
            &[("port", port_field.as_str()), ("version", "7"), ("name", "Behind NAT")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, format!("CONNECT FAILED: 127.0.0.1:{}", closed_port));

        let client = MasterServerClient::new(base.as_str()).unwrap();
        let announcement = Announcement {
            port: closed_port,
            name: "Behind NAT".to_string(),
            version: 7,
            address: None,
        };
        assert_eq!(
            client.announce(&announcement).await,
            RegistrationState::FailedPortForwarding
        );
        assert!(client.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_listing_and_hash() {
        let base = serve(Arc::new(AlwaysReachable)).await;
        let empty_hash = get_text(&base, SERVERS_HASH_PATH).await;
        assert_eq!(empty_hash, hash::compute_hash(&[]));

        post_form(
            &base,
            &[("address", "203.0.113.5"), ("port", "27015"), ("version", "42"), ("name", "Test")],
        )
        .await;

        let body = get_text(&base, SERVERS_PATH).await;
        let servers: Vec<ServerEntry> = serde_json::from_str(&body).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].address, "203.0.113.5");
        assert_eq!(servers[0].port, 27015);

        assert_ne!(get_text(&base, SERVERS_HASH_PATH).await, empty_hash);
    }
}
