//! Admission middleware: every request is counted against its client's window
//! before routing.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use super::error::ApiError;
use crate::{
    admission::{AdmissionController, AdmissionDecision, client_address, fingerprint},
    auth::AuthError,
};

#[derive(Clone, Debug)]
pub struct AdmissionGate {
    controller: Arc<AdmissionController>,
    trust_forwarded: bool,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self {
            controller,
            trust_forwarded: false,
        }
    }

    /// Count requests against `X-Forwarded-For` / `X-Real-IP` when present.
    /// Only safe behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_forwarded(mut self, trust_forwarded: bool) -> Self {
        self.trust_forwarded = trust_forwarded;
        self
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

pub async fn admit(State(gate): State<AdmissionGate>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let address = client_address(request.headers(), peer, gate.trust_forwarded);
    let client = fingerprint(&address);

    match gate.controller.admit(&client) {
        AdmissionDecision::Allowed => next.run(request).await,
        AdmissionDecision::Denied { retry_after } => {
            warn!(
                client = %client,
                path = request.uri().path(),
                "Rate limit exceeded"
            );
            ApiError::from(AuthError::RateLimited { retry_after }).into_response()
        }
    }
}
