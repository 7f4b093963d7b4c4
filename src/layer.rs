//! Tower layer gating requests on token verification.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum_core::{
    extract::Request,
    response::{IntoResponse, Response},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::{AuthUser, token::extract_token, validation::JwtVerifier};

/// A layer that authenticates every request passing through it.
///
/// On success the verified claims are attached to the request extensions as
/// [`AuthUser`] and the request proceeds; on failure the wrapped service is
/// never called and the rejection is returned as a JSON response.
#[derive(Clone)]
pub struct JwtAuthenticationLayer {
    verifier: Arc<JwtVerifier>,
}

impl JwtAuthenticationLayer {
    /// Wraps routes with the given verifier.
    #[must_use]
    pub fn new(verifier: Arc<JwtVerifier>) -> Self {
        Self { verifier }
    }

    /// The shared verifier, for hosts that also verify out of band or need
    /// to close the cache on shutdown.
    #[must_use]
    pub fn verifier(&self) -> &Arc<JwtVerifier> {
        &self.verifier
    }
}

impl<S> Layer<S> for JwtAuthenticationLayer {
    type Service = JwtAuthenticationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthenticationService {
            inner,
            verifier: Arc::clone(&self.verifier),
        }
    }
}

/// The service produced by [`JwtAuthenticationLayer`].
#[derive(Clone)]
pub struct JwtAuthenticationService<S> {
    inner: S,
    verifier: Arc<JwtVerifier>,
}

impl<S> Service<Request> for JwtAuthenticationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let cookie_name = self.verifier.policy().cookie_name.as_deref();
        let token = match extract_token(req.headers(), cookie_name) {
            Ok(token) => token,
            Err(err) => {
                debug!(error = %err, "rejecting request without a usable token");
                return Box::pin(async move { Ok(err.into_response()) });
            }
        };

        // The clone is swapped in for `self.inner` so the instance that was
        // polled ready is the one that runs this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let verifier = Arc::clone(&self.verifier);

        Box::pin(async move {
            match verifier.verify(&token).await {
                Ok(claims) => {
                    req.extensions_mut().insert(AuthUser(claims));
                    inner.call(req).await
                }
                Err(err) => {
                    debug!(error = %err, "token verification failed");
                    Ok(err.into_response())
                }
            }
        })
    }
}
