use std::net::TcpListener;
use std::sync::mpsc;
use std::time::Duration;

use httpmock::Method::GET;
use serde_json::json;
use strum::IntoEnumIterator;

use super::mock_server::*;
use crate::{ClientConfig, LmStudioClient, LmStudioError, PortEndpoint};

#[test]
fn every_port_authenticates_on_its_own_path() {
    let server = MockServer::silent();
    let client = server.connect();

    for endpoint in PortEndpoint::iter() {
        let path = endpoint.as_ref();
        server
            .wait_for_frame(path, |f| f.get("authVersion").is_some())
            .unwrap();
        assert_eq!(
            server.frames(path).first(),
            Some(&json!({
                "authVersion": 1,
                "clientIdentifier": "test-client",
                "clientPasskey": "test-passkey"
            })),
            "{endpoint}"
        );
    }
    client.close().unwrap();
}

#[test]
fn discovery_skips_ports_that_are_not_lm_studio() {
    let not_found = httpmock::MockServer::start();
    not_found.mock(|when, then| {
        when.method(GET).path("/lmstudio-greeting");
        then.status(404);
    });

    let server = MockServer::silent();
    let config = ClientConfig::builder()
        .with_discovery_ports([not_found.port(), server.port()])
        .build()
        .unwrap();
    let client = LmStudioClient::connect(config).unwrap();

    assert_eq!(client.base_url(), server.base_url());
    assert!(server.wait_for_frame("system", |f| f["authVersion"] == 1).is_some());
}

#[test]
fn refused_connection_fails_the_whole_client() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = LmStudioClient::new(Some(&format!("ws://127.0.0.1:{port}")), None, None).unwrap_err();

    assert!(matches!(err, LmStudioError::Connection(_)), "{err}");
}

#[test]
fn invalid_base_url_fails_before_connecting() {
    let err = LmStudioClient::new(Some("ws://127.0.0.1:1234/"), None, None).unwrap_err();

    assert!(matches!(err, LmStudioError::InvalidBaseUrl { .. }), "{err}");
}

#[test]
fn list_downloaded_models_uses_system_port() {
    let server = MockServer::start(|path, frame| match path {
        "system" if is_rpc(frame, "listDownloadedModels") => vec![rpc_result(
            frame,
            json!([
                {"type": "llm", "path": "pub/repo/file.gguf", "sizeBytes": 4_000_000_000u64, "architecture": "llama"},
                {"type": "embedding", "path": "nomic-ai/nomic-embed", "sizeBytes": 80_000_000u64}
            ]),
        )],
        _ => vec![],
    });
    let client = server.connect();

    let models = client.system().list_downloaded_models().unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].model_type, "llm");
    assert_eq!(models[0].architecture.as_deref(), Some("llama"));
    assert_eq!(models[1].path, "nomic-ai/nomic-embed");
}

#[test]
fn stream_logs_delivers_events_until_unsubscribed() {
    let server = MockServer::start(|path, frame| match path {
        "diagnostics" if is_channel_create(frame, "streamLogs") => vec![channel_send(
            frame,
            json!({
                "type": "log",
                "log": {
                    "timestamp": 1700000000000.0,
                    "data": {
                        "type": "llm.prediction.input",
                        "modelPath": "pub/repo",
                        "modelIdentifier": "m",
                        "input": "Hi"
                    }
                }
            }),
        )],
        _ => vec![],
    });
    let client = server.connect();

    let (tx, rx) = mpsc::channel();
    let subscription = client
        .diagnostics()
        .unstable_stream_logs(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.data.model_identifier, "m");
    assert_eq!(event.data.input, "Hi");

    subscription.unsubscribe();
    subscription.unsubscribe();

    let stop = server
        .wait_for_frame("diagnostics", |f| is_channel_message(f, "stop"))
        .unwrap();
    let create = server
        .wait_for_frame("diagnostics", |f| is_channel_create(f, "streamLogs"))
        .unwrap();
    assert_eq!(stop["channelId"], create["channelId"]);
    assert_eq!(server.channel_messages("diagnostics").len(), 1);
}

#[test]
fn log_events_stop_after_unsubscribe_even_if_the_server_keeps_sending() {
    let log = json!({
        "type": "log",
        "log": {
            "timestamp": 1700000000000.0,
            "data": {
                "type": "llm.prediction.input",
                "modelPath": "pub/repo",
                "modelIdentifier": "m",
                "input": "Hi"
            }
        }
    });
    let server = MockServer::start(move |path, frame| match path {
        "diagnostics" if is_channel_create(frame, "streamLogs") => {
            vec![channel_send(frame, log.clone())]
        }
        "diagnostics" if is_channel_message(frame, "stop") => {
            vec![channel_send(frame, log.clone()), channel_send(frame, log.clone())]
        }
        _ => vec![],
    });
    let client = server.connect();

    let (tx, rx) = mpsc::channel();
    let subscription = client
        .diagnostics()
        .unstable_stream_logs(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    subscription.unsubscribe();
    server
        .wait_for_frame("diagnostics", |f| is_channel_message(f, "stop"))
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}
