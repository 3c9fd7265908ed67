//! Authorized access to the remote service.

use crate::{
    cancel::CancelToken,
    error::Result,
    http::{self, HttpClient, HttpRequest, HttpResponse},
    session::Session,
};
use std::sync::Arc;
use tracing::debug;

/// Transport plus session credentials.
#[derive(Clone)]
pub struct Network {
    http: Arc<dyn HttpClient>,
    session: Arc<Session>,
}

impl Network {
    pub fn new(http: Arc<dyn HttpClient>, session: Arc<Session>) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Send a request as the active user.
    ///
    /// Fails with [`crate::Error::NoActiveUser`] before anything is sent when
    /// nobody is logged in. Non-2xx replies are returned, not raised.
    pub async fn send_authorized(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<HttpResponse> {
        let authorization = self.session.authorization()?;
        self.send(request.header("Authorization", authorization), cancel)
            .await
    }

    /// Send a request to a signed URL, without credentials.
    pub async fn send_unauthenticated(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<HttpResponse> {
        self.send(request, cancel).await
    }

    async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let result = http::send(self.http.as_ref(), request, cancel).await;
        match &result {
            Ok(response) => debug!(%method, %url, status = response.status, "Request completed"),
            Err(e) => debug!(%method, %url, error = %e, "Request failed"),
        }
        result
    }
}
