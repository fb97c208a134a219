//! Locates a local server by probing its HTTP greeting endpoint.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::error::LmStudioError;

pub const DEFAULT_DISCOVERY_PORTS: &[u16] = &[1234];
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
enum GreetingError {
    #[error("Http Error {0}")]
    HttpError(StatusCode),
    #[error("Request failed: {0}")]
    RequestError(String),
    #[error("Not an LM Studio greeting")]
    NotLmStudio,
}

impl From<reqwest::Error> for GreetingError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => GreetingError::HttpError(status),
            None => GreetingError::RequestError(error.to_string()),
        }
    }
}

trait ResponseExt {
    fn require_ok(self) -> Result<reqwest::blocking::Response, GreetingError>;
}

impl ResponseExt for reqwest::blocking::Response {
    fn require_ok(self) -> Result<reqwest::blocking::Response, GreetingError> {
        if self.status() == StatusCode::OK {
            Ok(self)
        } else {
            Err(GreetingError::HttpError(self.status()))
        }
    }
}

#[derive(Deserialize)]
struct Greeting {
    #[serde(default)]
    lmstudio: bool,
}

fn request_greeting(
    client: &reqwest::blocking::Client,
    port: u16,
    timeout: Duration,
) -> Result<(), GreetingError> {
    let greeting = client
        .get(format!("http://127.0.0.1:{port}/lmstudio-greeting"))
        .timeout(timeout)
        .send()?
        .require_ok()?
        .json::<Greeting>()
        .map_err(|_| GreetingError::NotLmStudio)?;
    if greeting.lmstudio {
        Ok(())
    } else {
        Err(GreetingError::NotLmStudio)
    }
}

/// Returns `ws://127.0.0.1:<port>` for the first port whose greeting identifies
/// an LM Studio server. The whole search is bounded by `timeout`.
pub fn discover_base_url(ports: &[u16], timeout: Duration) -> Result<String, LmStudioError> {
    let deadline = Instant::now() + timeout;
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LmStudioError::Discovery(e.to_string()))?;

    let mut failures = Vec::new();
    for &port in ports {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            failures.push("timed out".to_string());
            break;
        };
        match request_greeting(&client, port, remaining) {
            Ok(()) => {
                log::debug!("Found LM Studio on port {port}");
                return Ok(format!("ws://127.0.0.1:{port}"));
            }
            Err(e) => {
                log::debug!("Port {port} is not LM Studio: {e}");
                failures.push(format!("port {port}: {e}"));
            }
        }
    }

    Err(LmStudioError::Discovery(if failures.is_empty() {
        "no ports to try".to_string()
    } else {
        failures.join("; ")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn first_greeting_server_wins() {
        let not_found = MockServer::start();
        not_found.mock(|when, then| {
            when.method(GET).path("/lmstudio-greeting");
            then.status(404);
        });
        let lmstudio = MockServer::start();
        let greeting = lmstudio.mock(|when, then| {
            when.method(GET).path("/lmstudio-greeting");
            then.status(200).json_body(json!({"lmstudio": true, "version": "0.3"}));
        });

        let url = discover_base_url(
            &[not_found.port(), lmstudio.port()],
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(url, format!("ws://127.0.0.1:{}", lmstudio.port()));
        greeting.assert();
    }

    #[test]
    fn other_servers_are_rejected() {
        let other = MockServer::start();
        other.mock(|when, then| {
            when.method(GET).path("/lmstudio-greeting");
            then.status(200).json_body(json!({"hello": "world"}));
        });
        let text = MockServer::start();
        text.mock(|when, then| {
            when.method(GET).path("/lmstudio-greeting");
            then.status(200).body("lmstudio");
        });

        let error = discover_base_url(&[other.port(), text.port()], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(error, LmStudioError::Discovery(_)));
    }

    #[test]
    fn unreachable_server_reports_hint() {
        let error = discover_base_url(&[closed_port()], Duration::from_secs(2)).unwrap_err();
        assert!(error.to_string().contains("Is LM Studio running?"));
    }
}
