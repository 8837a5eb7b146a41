//! End-to-end tests driving the provider over its Unix socket, the way the
//! mounting driver does: framed JSON mount calls against a running server.

use std::sync::Arc;

use stubvault_core::proto::{MountRequest, MountedFile, ObjectVersion};
use stubvault_core::rotation::ManualTrigger;
use stubvaultd::client::{ClientError, ProviderClient};
use stubvaultd::server::Server;

const KEY_PEM: &[u8] = b"-----BEGIN PUBLIC KEY-----\nThis is mock key\n-----END PUBLIC KEY-----";

fn temp_endpoint() -> String {
    format!(
        "unix://{}",
        std::env::temp_dir()
            .join(format!("stubvault-e2e-{}.sock", uuid::Uuid::new_v4()))
            .display()
    )
}

fn mount_request_for(objects_yaml: &str) -> MountRequest {
    let attributes = serde_json::json!({ "objects": objects_yaml });
    MountRequest {
        attributes: serde_json::to_string(&attributes).unwrap(),
        secrets: "{}".into(),
        permission: "640".into(),
        target_path: "/".into(),
    }
}

fn two_object_request() -> MountRequest {
    mount_request_for(
        "array:\n  - |\n    objectName: foo\n    objectType: secret\n  - |\n    objectName: fookey\n    objectType: key",
    )
}

async fn running_server() -> (Server, ManualTrigger, ProviderClient) {
    let trigger = ManualTrigger::new();
    let server = Server::with_trigger(&temp_endpoint(), Arc::new(trigger.clone())).unwrap();
    server.start().await.unwrap();
    let client = ProviderClient::new(server.socket_path());
    (server, trigger, client)
}

#[tokio::test]
async fn first_mount_returns_initial_versions_and_files() {
    let (server, _trigger, client) = running_server().await;

    let response = client.mount(&two_object_request()).await.unwrap();

    assert_eq!(
        response.object_version,
        vec![
            ObjectVersion {
                id: "secret/foo".into(),
                version: "v1".into(),
            },
            ObjectVersion {
                id: "key/fookey".into(),
                version: "v1".into(),
            },
        ]
    );
    assert_eq!(
        response.files,
        vec![
            MountedFile {
                path: "foo".into(),
                contents: b"secret".to_vec(),
            },
            MountedFile {
                path: "fookey".into(),
                contents: KEY_PEM.to_vec(),
            },
        ]
    );

    server.stop().await;
}

#[tokio::test]
async fn malformed_attributes_fail_with_no_response() {
    let (server, _trigger, client) = running_server().await;

    let mut request = two_object_request();
    request.attributes = "definitely not structured text".into();

    let err = client.mount(&request).await.unwrap_err();
    assert_eq!(err.code(), Some("malformed_attributes"));

    server.stop().await;
}

#[tokio::test]
async fn malformed_object_list_is_classified_separately() {
    let (server, _trigger, client) = running_server().await;

    let err = client
        .mount(&mount_request_for("{{ not yaml"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("malformed_object_list"));

    server.stop().await;
}

#[tokio::test]
async fn unknown_object_type_is_rejected() {
    let (server, _trigger, client) = running_server().await;

    let err = client
        .mount(&mount_request_for(
            "array:\n  - |\n    objectName: cert1\n    objectType: certificate",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("unknown_object_type"));

    server.stop().await;
}

#[tokio::test]
async fn repeat_mounts_without_rotation_are_byte_identical() {
    let (server, _trigger, client) = running_server().await;

    let first = client.mount(&two_object_request()).await.unwrap();
    let second = client.mount(&two_object_request()).await.unwrap();
    assert_eq!(first, second);

    server.stop().await;
}

#[tokio::test]
async fn rotation_advances_versions_and_swaps_content() {
    let (server, trigger, client) = running_server().await;

    let initial = client.mount(&two_object_request()).await.unwrap();
    assert_eq!(initial.object_version[0].version, "v1");

    trigger.set(true);
    let rotated = client.mount(&two_object_request()).await.unwrap();
    assert_eq!(
        rotated.object_version,
        vec![
            ObjectVersion {
                id: "secret/foo".into(),
                version: "v2".into(),
            },
            ObjectVersion {
                id: "key/fookey".into(),
                version: "v2".into(),
            },
        ]
    );
    assert_eq!(rotated.files[0].contents, b"rotated");
    assert_eq!(rotated.files[1].contents, b"rotated");

    // Epoch must not regress once the trigger clears.
    trigger.set(false);
    let after = client.mount(&two_object_request()).await.unwrap();
    assert_eq!(after, rotated);

    server.stop().await;
}

#[tokio::test]
async fn version_identifies_the_provider() {
    let (server, _trigger, client) = running_server().await;

    let version = client.version().await.unwrap();
    assert_eq!(version.version, "v1");
    assert_eq!(version.runtime_name, "stubvaultd");
    assert!(!version.runtime_version.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn unknown_method_gets_a_definite_error() {
    let (server, _trigger, client) = running_server().await;

    let resp = client
        .call("rotate", serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(resp.error.unwrap().code, "unknown_method");

    server.stop().await;
}

#[tokio::test]
async fn stopped_server_refuses_connections() {
    let (server, _trigger, client) = running_server().await;
    server.stop().await;

    let err = client.mount(&two_object_request()).await.unwrap_err();
    let ClientError::Io(io) = err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert!(matches!(
        io.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    ));
}

#[tokio::test]
async fn independent_servers_have_independent_rotation_state() {
    let (first_server, first_trigger, first_client) = running_server().await;
    let (second_server, _second_trigger, second_client) = running_server().await;

    first_trigger.set(true);
    let rotated = first_client.mount(&two_object_request()).await.unwrap();
    assert_eq!(rotated.object_version[0].version, "v2");

    let fresh = second_client.mount(&two_object_request()).await.unwrap();
    assert_eq!(fresh.object_version[0].version, "v1");

    first_server.stop().await;
    second_server.stop().await;
}
