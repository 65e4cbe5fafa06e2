//! Minimal REST client for the three endpoints the coordinator consumes:
//! fetching and saving workflows, and kicking off an execution.
//!
//! Built on the teacher's raw `hyper` + `hyper-rustls` stack rather than a
//! higher-level HTTP client, matching how `cloudillo-push` talks to the web
//! push endpoint.

use crate::prelude::*;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;

type HttpsClient = Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>;

/// A thin wrapper over a shared `hyper` client for JSON REST calls.
pub struct RestClient {
	client: HttpsClient,
}

impl Default for RestClient {
	fn default() -> Self {
		Self::new()
	}
}

impl RestClient {
	pub fn new() -> Self {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.unwrap_or_else(|_| HttpsConnectorBuilder::new().with_webpki_roots())
			.https_or_http()
			.enable_http1()
			.build();
		let client = Client::builder(TokioExecutor::new()).build(connector);
		Self { client }
	}

	/// `GET <base_url>/rest/workflows/<id>` → the `data` field of the response.
	pub async fn get_workflow(&self, base_url: &str, workflow_id: &str) -> CoordResult<Value> {
		let uri = format!("{base_url}/rest/workflows/{workflow_id}");
		let request = Request::builder()
			.method(Method::GET)
			.uri(&uri)
			.header("accept", "application/json")
			.body(Full::new(Bytes::new()))?;
		let body = self.send(request).await?;
		body.get("data").cloned().ok_or_else(|| {
			Error::Rest(None, format!("missing data field in response from {uri}"))
		})
	}

	/// `PATCH <base_url>/rest/workflows/<id>` with the autosave body.
	pub async fn save_workflow(
		&self,
		base_url: &str,
		workflow_id: &str,
		body: &Value,
	) -> CoordResult<()> {
		let uri = format!("{base_url}/rest/workflows/{workflow_id}");
		let payload = serde_json::to_vec(body)?;
		let request = Request::builder()
			.method(Method::PATCH)
			.uri(&uri)
			.header("content-type", "application/json")
			.body(Full::new(Bytes::from(payload)))?;
		self.send(request).await?;
		Ok(())
	}

	/// `POST <base_url>/rest/workflows/<id>/run` with the `push-ref` header.
	/// Returns the new execution id.
	pub async fn run_workflow(
		&self,
		base_url: &str,
		workflow_id: &str,
		push_ref: &str,
		body: &Value,
	) -> CoordResult<String> {
		let uri = format!("{base_url}/rest/workflows/{workflow_id}/run");
		let payload = serde_json::to_vec(body)?;
		let request = Request::builder()
			.method(Method::POST)
			.uri(&uri)
			.header("content-type", "application/json")
			.header("push-ref", push_ref)
			.body(Full::new(Bytes::from(payload)))?;
		let response = self.send(request).await?;
		response
			.get("data")
			.and_then(|d| d.get("executionId"))
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::Rest(None, "missing executionId in run response".into()))
	}

	async fn send(&self, request: Request<Full<Bytes>>) -> CoordResult<Value> {
		let response = self.client.request(request).await?;
		let status = response.status();
		let bytes = response.into_body().collect().await?.to_bytes();
		if !status.is_success() {
			let text = String::from_utf8_lossy(&bytes).into_owned();
			return Err(Error::Rest(Some(status.as_u16()), text));
		}
		if bytes.is_empty() {
			return Ok(Value::Null);
		}
		Ok(serde_json::from_slice(&bytes)?)
	}
}

// vim: ts=4
