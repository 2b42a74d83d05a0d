#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use query_cache::{Page, Paginated};
use resilience::RetryConfig;
use social_client::models::{
    AuthorProfile, AuthorSnapshot, Comment, CommentId, FriendshipStatus, Post, PostId, Profile,
    ProfileView, User, UserId, UserSummary,
};
use social_client::{
    ApiFailure, ApiResponse, Operation, QueryData, Session, SessionHandle, SocialClient,
    Transport,
};

pub const VIEWER: UserId = UserId(1);

type Scripted = Result<ApiResponse, ApiFailure>;

/// Transport answering from per-operation queues. A gated operation waits
/// until its sender fires (or is dropped).
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<&'static str, VecDeque<Scripted>>>,
    gates: Mutex<HashMap<&'static str, VecDeque<oneshot::Receiver<()>>>>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ok(&self, operation: &'static str, body: Value) {
        self.push(operation, Ok(ApiResponse::new(200, body)));
    }

    pub fn fail(&self, operation: &'static str, status: u16, body: Value) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("failed")
            .to_string();
        self.push(
            operation,
            Err(ApiFailure::Status {
                status,
                message,
                body,
            }),
        );
    }

    pub fn network_down(&self, operation: &'static str) {
        self.push(operation, Err(ApiFailure::Network("connection refused".into())));
    }

    /// Hold the next call of `operation` until the returned sender fires
    pub fn gate(&self, operation: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .entry(operation)
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(Operation::name).collect()
    }

    pub fn last_call(&self) -> Option<Operation> {
        self.calls.lock().last().cloned()
    }

    fn push(&self, operation: &'static str, response: Scripted) {
        self.responses
            .lock()
            .entry(operation)
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, operation: Operation) -> Result<ApiResponse, ApiFailure> {
        let name = operation.name();
        self.calls.lock().push(operation);

        let gate = self.gates.lock().get_mut(name).and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        self.responses
            .lock()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ApiFailure::Network(format!("no scripted response for {}", name))))
    }
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

pub fn user(id: i64, name: &str, status: FriendshipStatus) -> User {
    User {
        id: UserId(id),
        email: None,
        profile: Profile {
            name: name.to_string(),
            ..Default::default()
        },
        friendship_status: status,
        friends_count: 0,
        posts_count: 0,
    }
}

pub fn viewer() -> User {
    user(VIEWER.0, "Viewer", FriendshipStatus::Viewer)
}

pub fn summary(id: i64, status: FriendshipStatus) -> UserSummary {
    UserSummary {
        id: UserId(id),
        name: format!("user-{}", id),
        picture: None,
        friendship_status: status,
    }
}

pub fn post(id: i64, owner: i64, likes: u32) -> Post {
    let at = ts("2024-05-01T10:00:00Z");
    Post {
        id: PostId(id),
        user_id: UserId(owner),
        user: Some(AuthorSnapshot {
            id: UserId(owner),
            profile: AuthorProfile {
                name: format!("user-{}", owner),
                picture: None,
            },
        }),
        content: format!("post {}", id),
        image: None,
        created_at: at,
        updated_at: at,
        likes_count: likes,
        comments_count: 0,
        comments: Vec::new(),
    }
}

pub fn comment(id: i64, post_id: i64, content: &str) -> Comment {
    let at = ts("2024-05-02T09:00:00Z");
    Comment {
        id: CommentId(id),
        post_id: PostId(post_id),
        user: AuthorSnapshot::from(&viewer()),
        content: content.to_string(),
        created_at: at,
        updated_at: at,
    }
}

pub fn profile_view(user: User, posts: Vec<Post>, friends: Vec<UserSummary>) -> ProfileView {
    ProfileView {
        user,
        posts,
        friends,
    }
}

pub fn feed(posts: Vec<Post>, next: Option<u32>) -> QueryData {
    QueryData::Feed(Paginated::first(Page::new(posts, next)))
}

pub fn json_of<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap()
}

pub fn message(text: &str) -> Value {
    json!({ "message": text })
}

/// Client with the viewer logged in and reads never retried
pub fn logged_in(transport: Arc<ScriptedTransport>) -> SocialClient {
    let session = SessionHandle::in_memory();
    session
        .begin(Session {
            token: "token-1".to_string(),
            user_id: VIEWER,
            user: Some(viewer()),
        })
        .unwrap();
    SocialClient::new(transport, session).with_query_retry(RetryConfig::disabled())
}

pub fn logged_out(transport: Arc<ScriptedTransport>) -> SocialClient {
    SocialClient::new(transport, SessionHandle::in_memory())
        .with_query_retry(RetryConfig::disabled())
}

/// Wait until `client` has `count` mutations waiting on the server
pub async fn until_pending(client: &SocialClient, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.pending_mutations() != count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("mutation never reached the server");
}
