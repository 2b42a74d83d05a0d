//! Client facade
//!
//! [`SocialClient`] ties the store, the mutation coordinator, the transport
//! and the session together. Reads live in `queries`, optimistic writes in
//! `mutations` and the account flows in `registration`; this module holds
//! the shared plumbing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use query_cache::Mutation;
use resilience::{
    mutation_policy, query_policy, with_retry, with_timeout_result, RequestPolicy, RetryConfig,
    TimeoutError,
};

use crate::cache::{Coordinator, QueryData, Store};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::keys::QueryKey;
use crate::models::{FriendshipStatus, Profile, User, UserId};
use crate::notify::{Notification, Notifier};
use crate::renderer::{ModalLock, QuerySubscription};
use crate::session::{FileCredentialStore, SessionHandle};
use crate::transport::{ApiFailure, ApiResponse, HttpTransport, Operation, Transport};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_QUERY_RETRIES: u32 = 2;

fn is_transient(err: &TimeoutError<ApiFailure>) -> bool {
    match err {
        TimeoutError::Elapsed(_) => true,
        TimeoutError::Failed(failure) => failure.is_retryable(),
    }
}

/// Server answer to a committed mutation
#[derive(Debug, Clone)]
pub struct Confirmed<T> {
    pub value: T,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct SocialClient {
    pub(crate) store: Store,
    pub(crate) coordinator: Coordinator,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: SessionHandle,
    pub(crate) notifier: Notifier,
    modal_lock: ModalLock,
    query_policy: RequestPolicy,
    mutation_policy: RequestPolicy,
}

impl SocialClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionHandle) -> Self {
        Self::with_store(transport, session, Store::new())
    }

    pub fn with_store(transport: Arc<dyn Transport>, session: SessionHandle, store: Store) -> Self {
        Self {
            coordinator: Coordinator::new(store.clone()),
            store,
            transport,
            session,
            notifier: Notifier::default(),
            modal_lock: ModalLock::new(),
            query_policy: query_policy(DEFAULT_REQUEST_TIMEOUT, DEFAULT_QUERY_RETRIES),
            mutation_policy: mutation_policy(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Timeout and retry for reads and for writes
    pub fn with_policies(mut self, query: RequestPolicy, mutation: RequestPolicy) -> Self {
        self.query_policy = query;
        self.mutation_policy = mutation;
        self
    }

    /// Retry policy for reads
    pub fn with_query_retry(mut self, retry: RetryConfig) -> Self {
        self.query_policy.retry = Some(retry);
        self
    }

    /// Build the HTTP-backed client and restore any persisted session
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let credentials = FileCredentialStore::new(&config.session.credentials_path);
        let session = SessionHandle::new(Arc::new(credentials));
        session.init()?;

        let transport = HttpTransport::new(config.api.base_url.clone(), session.clone())?;
        let store = Store::with_stale_after(config.stale_after());

        Ok(Self::with_store(Arc::new(transport), session, store)
            .with_policies(config.query_policy(), config.mutation_policy()))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn modal_lock(&self) -> &ModalLock {
        &self.modal_lock
    }

    /// Mutations waiting on the server
    pub fn pending_mutations(&self) -> usize {
        self.coordinator.in_flight()
    }

    pub fn subscribe(&self, key: QueryKey) -> QuerySubscription {
        let rx = self.store.subscribe(key.clone());
        QuerySubscription::new(key, rx)
    }

    pub(crate) fn viewer_id(&self) -> ClientResult<UserId> {
        self.session.user_id().ok_or(ClientError::NoSession)
    }

    /// The viewer's user record: cached view first, then the session copy
    pub(crate) fn viewer(&self) -> ClientResult<User> {
        let id = self.viewer_id()?;
        if let Some(QueryData::CurrentUser(user)) = self.store.get(&QueryKey::CurrentUser) {
            if user.id == id {
                return Ok(user);
            }
        }
        Ok(self.session.user().unwrap_or_else(|| User {
            id,
            email: None,
            profile: Profile::default(),
            friendship_status: FriendshipStatus::Viewer,
            friends_count: 0,
            posts_count: 0,
        }))
    }

    /// Report a failure raised before any request was made
    pub(crate) fn reject(&self, err: ClientError) -> ClientError {
        debug!(kind = err.kind(), error = %err, "Rejected before request");
        self.notifier.error(err.user_message());
        err
    }

    /// Tell the user about a request that failed on the way to a mutation
    pub(crate) fn surface(&self, err: ClientError) -> ClientError {
        self.notifier.error(err.user_message());
        err
    }

    /// Send `operation` under its policy: reads retry transient failures,
    /// writes get a single attempt. Every attempt is time-limited.
    pub(crate) async fn send(&self, operation: Operation) -> ClientResult<ApiResponse> {
        let name = operation.name();
        let is_query = operation.is_query();
        let policy = if is_query {
            &self.query_policy
        } else {
            &self.mutation_policy
        };
        let limit = policy.timeout.duration;

        with_retry(&policy.retry_or_single(), is_transient, || {
            with_timeout_result(limit, self.transport.request(operation.clone()))
        })
        .await
        .map_err(|e| {
            let failure = match e.into_inner() {
                TimeoutError::Elapsed(after) => ApiFailure::Timeout(after),
                TimeoutError::Failed(failure) => failure,
            };
            warn!(operation = name, is_query, error = %failure, "Request failed");
            ClientError::from(failure)
        })
    }

    /// Run an optimistic mutation whose commit is `operation`, then notify
    pub(crate) async fn mutate<T, D>(
        &self,
        mutation: Mutation<QueryKey, QueryData, Confirmed<T>>,
        operation: Operation,
        decode: D,
        success: Option<&str>,
    ) -> ClientResult<T>
    where
        D: FnOnce(&ApiResponse) -> ClientResult<T> + Send,
    {
        let outcome = self
            .coordinator
            .run(mutation, move || async move {
                let response = self.send(operation).await?;
                let value = decode(&response)?;
                Ok::<_, ClientError>(Confirmed {
                    value,
                    message: response.message(),
                })
            })
            .await;

        match outcome.into_result() {
            Ok(confirmed) => {
                if let Some(message) = confirmed.message.or_else(|| success.map(str::to_string)) {
                    self.notifier.success(message);
                }
                Ok(confirmed.value)
            }
            Err(err) => {
                self.notifier.error(err.user_message());
                Err(err)
            }
        }
    }
}
