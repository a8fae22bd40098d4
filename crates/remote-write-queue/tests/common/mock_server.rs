// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock remote-write receiver for testing the delivery pipeline.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One planned response: a status code and optional Retry-After value.
#[derive(Clone, Copy, Debug)]
pub struct PlannedResponse {
    pub status: u16,
    pub retry_after: Option<u64>,
}

impl PlannedResponse {
    pub fn ok() -> Self {
        PlannedResponse {
            status: 200,
            retry_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        PlannedResponse {
            status,
            retry_after: None,
        }
    }

    pub fn too_many_requests(retry_after: u64) -> Self {
        PlannedResponse {
            status: 429,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    pub received_requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    // Consumed front to back; once empty every request gets a 200.
    plan: Arc<Mutex<Vec<PlannedResponse>>>,
}

impl MockServer {
    /// Start a mock HTTP server on a random port that answers 200 to
    /// everything.
    pub async fn start() -> Self {
        Self::start_with_plan(Vec::new()).await
    }

    /// Start a mock server that answers with the planned responses in
    /// order, then 200s.
    pub async fn start_with_plan(plan: Vec<PlannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let plan = Arc::new(Mutex::new(plan));
        let requests_clone = received_requests.clone();
        let plan_clone = plan.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let requests = requests_clone.clone();
                let plan = plan_clone.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let requests = requests.clone();
                        let plan = plan.clone();
                        async move {
                            let path = req.uri().path().to_string();
                            let headers: Vec<(String, String)> = req
                                .headers()
                                .iter()
                                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                                .collect();

                            let body = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes().to_vec())
                                .unwrap_or_default();

                            requests.lock().unwrap().push(ReceivedRequest {
                                path,
                                headers,
                                body,
                            });

                            let planned = {
                                let mut plan = plan.lock().unwrap();
                                if plan.is_empty() {
                                    PlannedResponse::ok()
                                } else {
                                    plan.remove(0)
                                }
                            };
                            let mut response = Response::builder().status(planned.status);
                            if let Some(seconds) = planned.retry_after {
                                response = response.header("Retry-After", seconds.to_string());
                            }
                            Ok::<_, hyper::http::Error>(
                                response.body(Full::new(Bytes::new())).unwrap(),
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockServer {
            addr,
            received_requests,
            plan,
        }
    }

    /// Get the remote-write URL of the mock server
    pub fn url(&self) -> String {
        format!("http://{}/api/v1/write", self.addr)
    }

    /// Get all received requests
    pub fn get_requests(&self) -> Vec<ReceivedRequest> {
        self.received_requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.received_requests.lock().unwrap().len()
    }

    /// Responses not yet consumed from the plan.
    #[allow(dead_code)]
    pub fn remaining_plan(&self) -> usize {
        self.plan.lock().unwrap().len()
    }
}
