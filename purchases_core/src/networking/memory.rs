// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory HTTP client.
//!
//! Responses are registered per method and path; every performed request is
//! recorded. It is useful for testing and development purposes.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;

use super::{HttpClient, HttpMethod, HttpRequest, HttpResponse, NetworkError};

pub type ScriptedResponses = Arc<RwLock<HashMap<(HttpMethod, String), ScriptedResponse>>>;
pub type RecordedRequests = Arc<RwLock<Vec<HttpRequest>>>;

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Response(HttpResponse),
    Failure(NetworkError),
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryHttpClient {
    responses: ScriptedResponses,
    requests: RecordedRequests,
    latency: Arc<RwLock<Duration>>,
}

impl InMemoryHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every `method` request on `path` with `response` until
    /// scripted otherwise.
    pub fn respond(&self, method: HttpMethod, path: impl Into<String>, response: HttpResponse) {
        self.responses.write().unwrap().insert(
            (method, path.into()),
            ScriptedResponse::Response(response),
        );
    }

    pub fn fail(&self, method: HttpMethod, path: impl Into<String>, error: NetworkError) {
        self.responses
            .write()
            .unwrap()
            .insert((method, path.into()), ScriptedResponse::Failure(error));
    }

    /// Delay applied before answering each request.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = latency;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.read().unwrap().clone()
    }

    pub fn request_count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .read()
            .unwrap()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

#[async_trait]
impl HttpClient for InMemoryHttpClient {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let route = (request.method, request.path.clone());
        self.requests.write().unwrap().push(request);

        let latency = *self.latency.read().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.responses.read().unwrap().get(&route).cloned();
        match scripted {
            Some(ScriptedResponse::Response(response)) => Ok(response),
            Some(ScriptedResponse::Failure(error)) => Err(error),
            None => Err(NetworkError::Transport {
                description: format!("no response scripted for {} {}", route.0, route.1),
            }),
        }
    }
}
