//! HTTP client for a running node's admin API.

use anyhow::Context;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::net::IpAddr;

use meshtrust_core::{PeerId, TrustRecord};

use crate::api::{
    AddPeerRequest, AssignRequest, DecisionResponse, ErrorResponse, PeersResponse, RenameRequest,
    StatusResponse,
};

pub struct AdminClient {
    endpoint: String,
    http: reqwest::Client,
}

impl AdminClient {
    /// The admin API lives on loopback, so system proxies are bypassed.
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::builder().no_proxy().build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.endpoint, path)
    }

    pub async fn status(&self) -> anyhow::Result<StatusResponse> {
        self.send(self.http.get(self.url("/status"))).await
    }

    pub async fn list(&self, pending: bool) -> anyhow::Result<Vec<TrustRecord>> {
        let request = self.http.get(self.url("/peers")).query(&[("pending", pending)]);
        let response: PeersResponse = self.send(request).await?;
        Ok(response.peers)
    }

    pub async fn add(
        &self,
        peer_id: &PeerId,
        name: Option<String>,
        address: Option<IpAddr>,
    ) -> anyhow::Result<TrustRecord> {
        let body = AddPeerRequest {
            peer_id: peer_id.clone(),
            name,
            address,
        };
        self.send(self.http.post(self.url("/peers")).json(&body)).await
    }

    /// Apply an operator decision: `approve`, `reject`, `block` or `unblock`.
    pub async fn decide(&self, peer_id: &PeerId, decision: &str) -> anyhow::Result<DecisionResponse> {
        let path = format!("/peers/{}/{}", peer_id, decision);
        self.send(self.http.post(self.url(&path))).await
    }

    pub async fn remove(&self, peer_id: &PeerId) -> anyhow::Result<()> {
        let path = format!("/peers/{}", peer_id);
        let response = self.dispatch(self.http.delete(self.url(&path))).await?;
        check(response).await.map(|_| ())
    }

    pub async fn rename(&self, peer_id: &PeerId, name: &str) -> anyhow::Result<TrustRecord> {
        let path = format!("/peers/{}/name", peer_id);
        let body = RenameRequest { name: name.into() };
        self.send(self.http.put(self.url(&path)).json(&body)).await
    }

    pub async fn assign(&self, peer_id: &PeerId, address: Option<IpAddr>) -> anyhow::Result<TrustRecord> {
        let path = format!("/peers/{}/address", peer_id);
        self.send(self.http.put(self.url(&path)).json(&AssignRequest { address }))
            .await
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder) -> anyhow::Result<Response> {
        request.send().await.with_context(|| {
            format!(
                "could not reach node at {} (is it running? use --offline when it is not)",
                self.endpoint
            )
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> anyhow::Result<T> {
        let response = check(self.dispatch(request).await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into an error carrying the node's message.
async fn check(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    match status {
        StatusCode::NOT_FOUND => anyhow::bail!("{}", message),
        _ => anyhow::bail!("node returned HTTP {}: {}", status.as_u16(), message),
    }
}
