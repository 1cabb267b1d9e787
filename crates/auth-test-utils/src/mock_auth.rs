//! Scriptable stand-in for a remote `auth.Auth` service.
//!
//! Used to test clients of the service (the interceptor) without real
//! tokens: the mock accepts or rejects every call, optionally after a delay,
//! and counts the calls it receives.

use proto_gen::auth::auth_server::{Auth, AuthServer};
use proto_gen::auth::Token;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// What the mock answers.
#[derive(Debug, Clone)]
pub enum MockVerdict {
    /// Accept every token as this subject.
    Accept(String),
    /// Reject every token with UNAUTHENTICATED.
    Reject,
}

struct MockAuthService {
    verdict: MockVerdict,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
    completed: Arc<AtomicU32>,
    last_token: Arc<std::sync::Mutex<Option<String>>>,
}

#[tonic::async_trait]
impl Auth for MockAuthService {
    async fn verify(&self, request: Request<Token>) -> Result<Response<Token>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut token = request.into_inner();
        *self.last_token.lock().unwrap() = Some(token.token.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match &self.verdict {
            MockVerdict::Accept(subject) => {
                token.user_id = Some(subject.clone());
                Ok(Response::new(token))
            }
            MockVerdict::Reject => Err(Status::unauthenticated("authentication failed")),
        }
    }
}

/// Running mock `auth.Auth` server.
///
/// The server task is aborted when dropped.
pub struct MockAuthServer {
    addr: SocketAddr,
    calls: Arc<AtomicU32>,
    completed: Arc<AtomicU32>,
    last_token: Arc<std::sync::Mutex<Option<String>>>,
    handle: JoinHandle<()>,
}

impl MockAuthServer {
    /// Start a mock that accepts every token as `subject`.
    pub async fn accepting(subject: &str) -> Self {
        Self::start(MockVerdict::Accept(subject.to_string()), None).await
    }

    /// Start a mock that rejects every token.
    pub async fn rejecting() -> Self {
        Self::start(MockVerdict::Reject, None).await
    }

    /// Start a mock that answers `verdict` after `delay`.
    pub async fn slow(verdict: MockVerdict, delay: Duration) -> Self {
        Self::start(verdict, Some(delay)).await
    }

    async fn start(verdict: MockVerdict, delay: Option<Duration>) -> Self {
        let calls = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));
        let last_token = Arc::new(std::sync::Mutex::new(None));
        let service = MockAuthService {
            verdict,
            delay,
            calls: Arc::clone(&calls),
            completed: Arc::clone(&completed),
            last_token: Arc::clone(&last_token),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let _ = Server::builder()
                .add_service(AuthServer::new(service))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
        });

        Self {
            addr,
            calls,
            completed,
            last_token,
            handle,
        }
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of `Verify` calls received.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `Verify` calls that ran to completion.
    ///
    /// A call whose client went away during the delay is dropped by the
    /// server and never completes.
    pub fn completed_count(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Token carried by the most recent call.
    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }
}

impl Drop for MockAuthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
