use std::collections::BTreeSet;
use std::net::SocketAddr;

use futures::future::join_all;
use rapport_client::{error_kind, Client};
use rapport_common::{ErrorKind, RequestId, RequestStatus, Username};
use rapport_server::config::Config;
use rapport_server::{app, AppState};

async fn spawn_server(users: &[&str]) -> Client {
    let mut config = Config::temporary();
    config.seed_users = users.iter().map(|user| user.to_string()).collect();
    let state = AppState::new(&config).unwrap();
    let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(app(state).into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    Client::new(format!("http://{addr}"))
}

fn kind<T: std::fmt::Debug>(result: anyhow::Result<T>) -> ErrorKind {
    let err = result.expect_err("expected the server to refuse");
    error_kind(&err).unwrap_or_else(|| panic!("no error body: {err:?}"))
}

#[tokio::test]
async fn decline_then_accept() -> anyhow::Result<()> {
    let client = spawn_server(&["alice", "bob"]).await;
    let alice = Username::from("alice");
    let bob = Username::from("bob");

    assert!(client.list_friends(&alice).await?.is_empty());

    let r1 = client.send_request(&alice, &bob).await?;
    let pending = client.list_pending_incoming(&bob).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, r1);
    assert_eq!(pending[0].status, RequestStatus::Pending);
    assert_eq!(client.list_pending_outgoing(&alice).await?[0].id, r1);

    let declined = client.decline_request(r1, &bob).await?;
    assert_eq!(declined.status, RequestStatus::Declined);
    assert!(client.list_friends(&alice).await?.is_empty());
    assert!(client.list_pending_incoming(&bob).await?.is_empty());

    let r2 = client.send_request(&alice, &bob).await?;
    assert_ne!(r1, r2);
    client.accept_request(r2, &bob).await?;

    assert!(client.list_pending_incoming(&bob).await?.is_empty());
    assert_eq!(client.list_friends(&alice).await?, BTreeSet::from([bob.clone()]));
    assert_eq!(client.list_friends(&bob).await?, BTreeSet::from([alice.clone()]));

    assert_eq!(kind(client.accept_request(r2, &bob).await), ErrorKind::RequestNotFound);
    assert_eq!(kind(client.send_request(&bob, &alice).await), ErrorKind::AlreadyFriends);
    Ok(())
}

#[tokio::test]
async fn error_kinds_over_http() -> anyhow::Result<()> {
    let client = spawn_server(&["alice", "bob", "carol"]).await;
    let (alice, bob, carol) = (Username::from("alice"), Username::from("bob"), Username::from("carol"));

    assert_eq!(kind(client.send_request(&alice, &alice).await), ErrorKind::SelfRequest);
    assert_eq!(kind(client.send_request(&alice, Username::from("ghost")).await), ErrorKind::UserNotFound);
    assert_eq!(kind(client.list_friends(Username::from("ghost")).await), ErrorKind::UserNotFound);
    assert_eq!(kind(client.list_pending_incoming(Username::from("ghost")).await), ErrorKind::UserNotFound);

    let id = client.send_request(&alice, &bob).await?;
    assert_eq!(kind(client.send_request(&bob, &alice).await), ErrorKind::RequestAlreadyPending);
    assert_eq!(kind(client.accept_request(id, &carol).await), ErrorKind::NotAuthorized);
    assert_eq!(kind(client.decline_request(id, &alice).await), ErrorKind::NotAuthorized);
    assert_eq!(kind(client.accept_request(RequestId::new(), &bob).await), ErrorKind::RequestNotFound);
    Ok(())
}

#[tokio::test]
async fn directory_and_search() -> anyhow::Result<()> {
    let client = spawn_server(&["alice"]).await;
    assert!(!client.user_exists(Username::from("Alicia")).await?);
    client.register_user(Username::from("Alicia")).await?;
    client.register_user(Username::from("Alicia")).await?;
    client.register_user(Username::from("bob")).await?;
    assert!(client.user_exists(Username::from("Alicia")).await?);

    let found = client.search_users("ali", None).await?;
    assert_eq!(found, vec![Username::from("Alicia"), Username::from("alice")]);
    let found = client.search_users("ALI", Some(&Username::from("alice"))).await?;
    assert_eq!(found, vec![Username::from("Alicia")]);
    Ok(())
}

#[tokio::test]
async fn route_segments_are_not_usernames() -> anyhow::Result<()> {
    let client = spawn_server(&["alice"]).await;
    assert_eq!(kind(client.register_user(Username::from("requests")).await), ErrorKind::InvalidUsername);
    // `/users/search` is matched by the search route, so registration is never reached
    assert!(client.register_user(Username::from("search")).await.is_err());
    assert!(!client.search_users("search", None).await?.contains(&Username::from("search")));
    // the static routes still answer as themselves
    assert!(client.search_users("ali", None).await?.contains(&Username::from("alice")));
    assert!(client.list_pending_incoming(Username::from("alice")).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_opposite_requests() -> anyhow::Result<()> {
    let client = spawn_server(&["alice", "bob"]).await;
    let (alice, bob) = (Username::from("alice"), Username::from("bob"));

    let results = join_all([client.send_request(&alice, &bob), client.send_request(&bob, &alice)]).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find(|r| r.is_err()).unwrap();
    assert_eq!(kind(loser), ErrorKind::RequestAlreadyPending);

    let pending: Vec<_> = [client.list_pending_incoming(&alice).await?, client.list_pending_incoming(&bob).await?]
        .concat();
    assert_eq!(pending.len(), 1);
    Ok(())
}
