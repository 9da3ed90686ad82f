//! Client reconnection controller.
//!
//! One supervisor task owns the link to the hub: it runs the handshake
//! rounds, pumps inbound frames while connected, and reconnects after the
//! transport closes under it. `connect` replaces the supervisor (aborting
//! and awaiting the old one first), so at most one handshake is ever in
//! flight. Only `disconnect` stops the retrying: a refused token backs off
//! like an unreachable hub, and the next handshake picks up whatever token
//! [`ReconnectController::set_token`] installed in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_shared::types::{ConnectionState, UserId};
use parley_shared::{ClientFrame, HubError, HubEvent, HubRequest, HubResponse, ServerFrame};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::policy::ReconnectPolicy;
use crate::transport::{Connector, HandshakeRequest, Session};

type Reply = oneshot::Sender<Result<HubResponse, HubError>>;

struct Shared {
    config: ClientConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    token: RwLock<Option<String>>,
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    pending: DashMap<u64, Reply>,
    next_id: AtomicU64,
    events: broadcast::Sender<HubEvent>,
}

#[derive(Clone)]
pub struct ReconnectController {
    shared: Arc<Shared>,
    supervisor: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ReconnectController {
    pub fn new(config: ClientConfig, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                policy,
                connector,
                state,
                token: RwLock::new(None),
                outbound: Mutex::new(None),
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                events,
            }),
            supervisor: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Pushed hub events (`ReceiveMessage`, `ChatStarted`, `AccessDenied`).
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.shared.events.subscribe()
    }

    /// Token presented on the next handshake.
    pub fn set_token(&self, token: Option<String>) {
        *self.shared.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn token(&self) -> Option<String> {
        self.shared
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bring the link up. A no-op when already connected unless `force`.
    ///
    /// Resolves once the first handshake round finishes. If that round
    /// fails the error is returned but the controller keeps retrying in the
    /// background; watch [`Self::subscribe_state`].
    pub async fn connect(&self, force: bool) -> Result<(), ClientError> {
        if !force && self.state() == ConnectionState::Connected {
            return Ok(());
        }

        let ready = {
            let mut supervisor = self.supervisor.lock().await;
            if let Some(previous) = supervisor.take() {
                previous.abort();
                let _ = previous.await;
                debug!("superseded previous connect");
            }
            self.shared.drop_session();

            let (ready_tx, ready_rx) = oneshot::channel();
            *supervisor = Some(tokio::spawn(supervise(self.shared.clone(), ready_tx)));
            ready_rx
        };

        ready.await.unwrap_or(Err(ClientError::Superseded))
    }

    /// Tear the link down and stop reconnecting.
    pub async fn disconnect(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(task) = supervisor.take() {
            task.abort();
            let _ = task.await;
        }
        self.shared.drop_session();
        self.shared.set_state(ConnectionState::Disconnected);
        info!("disconnected from hub");
    }

    /// Send one request and wait for its response.
    pub async fn invoke(&self, request: HubRequest) -> Result<HubResponse, ClientError> {
        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.insert(id, reply_tx);

        if outbound.send(ClientFrame { id, request }).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(ClientError::NotConnected);
        }

        match tokio::time::timeout(self.shared.config.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result.map_err(ClientError::from),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.shared.pending.remove(&id);
                warn!(id, method, "hub request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// `Login` and keep the returned token for future handshakes.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserId, ClientError> {
        let response = self
            .invoke(HubRequest::Login {
                username: username.to_string(),
                password: password.to_string(),
                device_name: self.shared.config.device_name.clone(),
                device_info: self.shared.config.device_info.clone(),
            })
            .await?;
        self.adopt_token(response, "Login")
    }

    /// `Register` and keep the returned token for future handshakes.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserId, ClientError> {
        let response = self
            .invoke(HubRequest::Register {
                username: username.to_string(),
                password: password.to_string(),
                display_name: display_name.to_string(),
                device_name: self.shared.config.device_name.clone(),
                device_info: self.shared.config.device_info.clone(),
            })
            .await?;
        self.adopt_token(response, "Register")
    }

    /// `Logout` and forget the token.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.invoke(HubRequest::Logout).await;
        self.set_token(None);
        result.map(|_| ())
    }

    fn adopt_token(&self, response: HubResponse, method: &'static str) -> Result<UserId, ClientError> {
        match response {
            HubResponse::Token { token, user_id } => {
                self.set_token(Some(token));
                Ok(user_id)
            }
            _ => Err(ClientError::UnexpectedResponse(method)),
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state");
        }
    }

    fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            url: self.config.hub_url.clone(),
            token: self
                .token
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            device_name: self.config.device_name.clone(),
        }
    }

    fn install_session(&self, outbound: mpsc::Sender<ClientFrame>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    /// Forget the live session. Waiting `invoke` calls fail with
    /// `ConnectionLost` as their reply senders drop.
    fn drop_session(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.pending.clear();
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Response { id, result } => match self.pending.remove(&id) {
                Some((_, reply)) => {
                    let _ = reply.send(result);
                }
                None => debug!(id, "response for an abandoned request"),
            },
            ServerFrame::Event(event) => {
                if let HubEvent::AccessDenied { reason } = &event {
                    warn!(%reason, "hub denied access");
                }
                let _ = self.events.send(event);
            }
        }
    }

    /// One round of up to `handshake_attempts` tries with linear backoff.
    async fn handshake(&self) -> Result<Session, ClientError> {
        let attempts = self.policy.handshake_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.connector.open(&self.handshake_request()).await {
                Ok(session) => return Ok(session),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "hub handshake failed");
                    last = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.handshake_delay(attempt)).await;
                    }
                }
            }
        }

        Err(ClientError::HandshakeExhausted { attempts, last })
    }
}

async fn supervise(shared: Arc<Shared>, ready: oneshot::Sender<Result<(), ClientError>>) {
    let mut ready = Some(ready);
    let mut retry: u32 = 0;
    shared.set_state(ConnectionState::Connecting);

    loop {
        match shared.handshake().await {
            Ok(mut session) => {
                retry = 0;
                shared.install_session(session.outbound);
                shared.set_state(ConnectionState::Connected);
                info!(url = %shared.config.hub_url, "connected to hub");
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }

                while let Some(frame) = session.inbound.recv().await {
                    shared.dispatch(frame);
                }

                shared.drop_session();
                shared.set_state(ConnectionState::Reconnecting);
                let delay = shared.policy.closure_delay();
                warn!(delay_ms = delay.as_millis() as u64, "hub connection lost, reconnecting");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                retry = retry.saturating_add(1);
                let delay = shared.policy.retry_delay(retry);
                shared.set_state(ConnectionState::Reconnecting);
                if e.is_retryable() {
                    warn!(retry, delay_ms = delay.as_millis() as u64, error = %e, "hub unreachable, will retry");
                } else {
                    error!(retry, delay_ms = delay.as_millis() as u64, error = %e, "hub refused the handshake, will retry");
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(e));
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
