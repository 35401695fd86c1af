//! Scripted transport for adapter tests
//!
//! Responses are registered per (method, path). When several responses are
//! registered for the same route they are returned in order, and the last
//! one keeps being returned once the queue is down to it. Every request is
//! recorded for later assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::error::Result;

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    responses: VecDeque<ApiResponse>,
}

/// A transport that replays scripted responses
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for `method path`
    pub fn on(&self, method: Method, path: &str, status: u16, body: impl Into<String>) -> &Self {
        let response = ApiResponse::new(status, body);
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// Register a JSON response for `method path`
    pub fn on_json(&self, method: Method, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.on(method, path, status, body.to_string())
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests received for `method path`
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    /// Number of requests with the given method
    pub fn count(&self, method: Method) -> usize {
        self.requests().iter().filter(|r| r.method == method).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.path == request.path);

        Ok(match route {
            Some(route) if route.responses.len() > 1 => route
                .responses
                .pop_front()
                .unwrap_or_else(|| ApiResponse::new(501, "exhausted")),
            Some(route) => route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| ApiResponse::new(501, "exhausted")),
            None => ApiResponse::new(
                501,
                format!("no scripted response for {} {}", request.method, request.path),
            ),
        })
    }
}
