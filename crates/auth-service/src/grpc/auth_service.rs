//! `auth.Auth` gRPC service.
//!
//! Thin adapter over [`TokenVerifier`]: the token in the request is verified
//! and, on success, echoed back with `user_id` set to the verified subject.
//! No retries; a verification result is definitive for that token at that
//! time.

use crate::auth::TokenVerifier;
use proto_gen::auth::auth_server::{Auth, AuthServer};
use proto_gen::auth::Token;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

/// Implementation of the `auth.Auth` service.
#[derive(Clone)]
pub struct AuthGrpcService {
    verifier: Arc<TokenVerifier>,
}

impl AuthGrpcService {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Wrap this service in the generated tonic server.
    pub fn into_server(self) -> AuthServer<Self> {
        AuthServer::new(self)
    }
}

#[tonic::async_trait]
impl Auth for AuthGrpcService {
    #[instrument(skip_all, name = "auth.grpc.verify")]
    async fn verify(&self, request: Request<Token>) -> Result<Response<Token>, Status> {
        let mut token = request.into_inner();

        match self.verifier.verify(&token.token).await {
            Ok(identity) => {
                tracing::debug!(target: "auth.grpc", "Verify succeeded");
                token.user_id = Some(identity.into_subject());
                Ok(Response::new(token))
            }
            Err(e) => {
                tracing::debug!(target: "auth.grpc", reason = e.reason(), "Verify rejected");
                Err(e.into())
            }
        }
    }
}
