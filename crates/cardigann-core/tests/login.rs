//! End-to-end logins and session expiry against a mock tracker

use std::sync::Arc;

use cardigann_core::{
    CardigannError, ClientConfig, Definition, Indexer, IndexerSettings, LoginOutcome, LoginState,
    ReqwestClient, SearchQuery,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEFINITION: &str = r#"
id: sessiontracker
name: Session Tracker
links: [https://session.tracker.test/]
settings:
  - {name: username, type: text, label: Username}
  - {name: password, type: password, label: Password}
caps:
  categorymappings:
    - {id: 1, cat: TV}
login:
  path: takelogin.php
  method: post
  inputs:
    username: "{{ .Config.username }}"
    password: "{{ .Config.password }}"
  error:
    - selector: div.error
  test:
    path: index.php
    selector: a.logout
search:
  path: browse.php
  rows:
    selector: tr.torrent
  fields:
    title:
      selector: a.name
    download:
      selector: a.name
      attribute: href
"#;

const REJECTED: &str = r#"<html><body><div class="error">Wrong password</div></body></html>"#;

const MOVED: &str = "https://moved-domain.test/";

const LOGGED_IN: &str = r#"<html><body><a class="logout" href="logout.php">Logout</a>
<table>
  <tr class="torrent"><td><a class="name" href="download.php?id=1">Show S01E01</a></td></tr>
  <tr class="torrent"><td><a class="name" href="download.php?id=2">Show S01E02</a></td></tr>
</table></body></html>"#;

fn indexer(server: &MockServer, password: &str) -> Indexer {
    indexer_for(DEFINITION, server, password)
}

fn indexer_for(yaml: &str, server: &MockServer, password: &str) -> Indexer {
    let definition = Definition::from_yaml(yaml).expect("Definition should parse");
    let config = ClientConfig {
        requests_per_second: 100.0,
        max_retries: 0,
        ..ClientConfig::default()
    };
    let client = ReqwestClient::with_config(config).expect("Client creation should succeed");
    let settings = IndexerSettings::new()
        .with_site_link(server.uri())
        .with_text("username", "alice")
        .with_text("password", password);
    Indexer::with_client(definition, settings, Arc::new(client)).expect("Indexer should build")
}

/// Tracker accepting `alice`/`secret`, issuing `session=ok`
async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/takelogin.php"))
        .and(body_string_contains("password=secret"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/index.php")
                .insert_header("Set-Cookie", "session=ok; Path=/; HttpOnly"),
        )
        .expect(expected_logins)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/takelogin.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REJECTED))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_IN))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_session_logs_in_once_and_retries() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/browse.php"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login.php"))
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browse.php"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_IN))
        .expect(1)
        .mount(&server)
        .await;

    let indexer = indexer(&server, "secret");
    assert_eq!(indexer.login().await.expect("Login should succeed"), LoginOutcome::LoggedIn);
    let response = indexer
        .search(&SearchQuery::default())
        .await
        .expect("Search should succeed after logging in again");

    assert_eq!(response.records.len(), 2);
    assert_eq!(response.records[0].title, "Show S01E01");
    assert_eq!(indexer.login_state().await, LoginState::LoggedIn);
}

#[tokio::test]
async fn test_second_logged_out_response_is_fatal() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/browse.php"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login.php"))
        .expect(2)
        .mount(&server)
        .await;

    let indexer = indexer(&server, "secret");
    indexer.login().await.expect("Login should succeed");
    let err = indexer
        .search(&SearchQuery::default())
        .await
        .expect_err("Search should fail");

    assert!(matches!(err, CardigannError::Relogin(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_search_without_session_logs_in_first() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/browse.php"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_IN))
        .expect(1)
        .mount(&server)
        .await;

    let indexer = indexer(&server, "secret");
    assert_eq!(indexer.login_state().await, LoginState::NoSession);
    let response = indexer
        .search(&SearchQuery::default())
        .await
        .expect("Search should succeed");
    assert_eq!(response.records.len(), 2);
    assert_eq!(indexer.login_state().await, LoginState::LoggedIn);
}

#[tokio::test]
async fn test_rejected_login_reports_tracker_message() {
    let server = MockServer::start().await;
    mount_login(&server, 0).await;

    let indexer = indexer(&server, "wrong");
    let err = indexer.login().await.expect_err("Login should fail");

    match err {
        CardigannError::Login(message) => {
            assert!(message.contains("Wrong password"), "got {}", message)
        }
        other => panic!("expected login error, got {:?}", other),
    }
    assert_eq!(indexer.login_state().await, LoginState::Failed);
}

#[tokio::test]
async fn test_search_redirect_to_other_domain_reports_new_site_link() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/browse.php"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}browse.php", MOVED)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let indexer = indexer(&server, "secret");
    indexer.login().await.expect("Login should succeed");
    let err = indexer
        .search(&SearchQuery::default())
        .await
        .expect_err("Search should fail");

    match err {
        CardigannError::SiteMoved { origin, .. } => assert_eq!(origin, MOVED),
        other => panic!("expected a site move, got {:?}", other),
    }
    assert_eq!(indexer.login_state().await, LoginState::LoggedIn);
}

#[tokio::test]
async fn test_login_test_redirect_to_other_domain_updates_site_link() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/check.php"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}check.php", MOVED)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let yaml = DEFINITION
        .replace("path: index.php", "path: check.php")
        .replace("links:", "followredirect: true\nlinks:");
    let indexer = indexer_for(&yaml, &server, "secret");
    let err = indexer.login().await.expect_err("Login should fail");

    let message = err.to_string();
    let hint = format!("try changing the site link to {}", MOVED);
    assert!(message.contains(&hint), "got {}", message);
    assert!(message.contains("Updated site link"), "got {}", message);
    assert_eq!(indexer.site_link().await, MOVED);
    assert_eq!(indexer.login_state().await, LoginState::Failed);
}
