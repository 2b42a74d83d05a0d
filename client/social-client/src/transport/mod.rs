//! Transport boundary to the community REST API
//!
//! Every remote call is an [`Operation`]. A [`Transport`] turns it into a
//! request and reports one of two things: a 2xx [`ApiResponse`] or an
//! [`ApiFailure`]. The HTTP implementation lives in [`http`]; tests swap in
//! scripted transports.

pub mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    CommentId, FriendResponse, LoginRequest, PostId, PostUpdate, ProfileUpdate, RegisterRequest,
    ResetPasswordRequest, UserId,
};

pub use http::HttpTransport;

/// Every call the client makes against the API
#[derive(Debug, Clone)]
pub enum Operation {
    Login(LoginRequest),
    Register(RegisterRequest),
    Logout,
    GetCurrentUser,
    GetPost(PostId),
    ListPosts { page: u32 },
    GetPostLikers(PostId),
    ToggleLike(PostId),
    ToggleSave(PostId),
    ListSavedPosts,
    AddComment { post_id: PostId, content: String },
    EditComment { post_id: PostId, comment_id: CommentId, content: String },
    DeleteComment(CommentId),
    UpdatePost { post_id: PostId, update: PostUpdate },
    DeletePost(PostId),
    GetProfile(UserId),
    UpdateProfile(ProfileUpdate),
    ListFriends { user_id: UserId, page: u32 },
    RemoveFriend(UserId),
    ListFriendRequests { page: u32 },
    RespondFriendRequest { sender: UserId, response: FriendResponse },
    SendFriendRequest(UserId),
    CancelFriendRequest(UserId),
    SearchProfiles(String),
    VerifyEmail { code: String },
    ResendVerificationCode,
    CompleteProfile(ProfileUpdate),
    SendResetPasswordCode { email: String },
    ValidateResetCode { email: String, code: String },
    ResetPassword(ResetPasswordRequest),
}

/// HTTP shape of an operation
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl Route {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn json<T: serde::Serialize>(self, payload: &T) -> Self {
        // Request payloads are plain structs; serialization cannot fail
        let body = serde_json::to_value(payload).unwrap_or(Value::Null);
        self.body(body)
    }
}

impl Operation {
    /// Stable name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Login(_) => "login",
            Operation::Register(_) => "register",
            Operation::Logout => "logout",
            Operation::GetCurrentUser => "get_current_user",
            Operation::GetPost(_) => "get_post",
            Operation::ListPosts { .. } => "list_posts",
            Operation::GetPostLikers(_) => "get_post_likers",
            Operation::ToggleLike(_) => "toggle_like",
            Operation::ToggleSave(_) => "toggle_save",
            Operation::ListSavedPosts => "list_saved_posts",
            Operation::AddComment { .. } => "add_comment",
            Operation::EditComment { .. } => "edit_comment",
            Operation::DeleteComment(_) => "delete_comment",
            Operation::UpdatePost { .. } => "update_post",
            Operation::DeletePost(_) => "delete_post",
            Operation::GetProfile(_) => "get_profile",
            Operation::UpdateProfile(_) => "update_profile",
            Operation::ListFriends { .. } => "list_friends",
            Operation::RemoveFriend(_) => "remove_friend",
            Operation::ListFriendRequests { .. } => "list_friend_requests",
            Operation::RespondFriendRequest { .. } => "respond_friend_request",
            Operation::SendFriendRequest(_) => "send_friend_request",
            Operation::CancelFriendRequest(_) => "cancel_friend_request",
            Operation::SearchProfiles(_) => "search_profiles",
            Operation::VerifyEmail { .. } => "verify_email",
            Operation::ResendVerificationCode => "resend_verification_code",
            Operation::CompleteProfile(_) => "complete_profile",
            Operation::SendResetPasswordCode { .. } => "send_reset_password_code",
            Operation::ValidateResetCode { .. } => "validate_reset_code",
            Operation::ResetPassword(_) => "reset_password",
        }
    }

    /// Reads may be retried; everything else changes server state
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Operation::GetCurrentUser
                | Operation::GetPost(_)
                | Operation::ListPosts { .. }
                | Operation::GetPostLikers(_)
                | Operation::ListSavedPosts
                | Operation::GetProfile(_)
                | Operation::ListFriends { .. }
                | Operation::ListFriendRequests { .. }
                | Operation::SearchProfiles(_)
        )
    }

    pub fn route(&self) -> Route {
        match self {
            Operation::Login(request) => Route::new(Method::POST, "/login").json(request),
            Operation::Register(request) => Route::new(Method::POST, "/register").json(request),
            Operation::Logout => Route::new(Method::POST, "/logout").body(json!({})),
            Operation::GetCurrentUser => Route::new(Method::GET, "/user"),
            Operation::GetPost(id) => Route::new(Method::GET, format!("/posts/{}", id)),
            Operation::ListPosts { page } => Route::new(Method::GET, "/posts").query("page", page),
            Operation::GetPostLikers(id) => {
                Route::new(Method::GET, format!("/posts/{}/likers", id))
            }
            Operation::ToggleLike(id) => {
                Route::new(Method::POST, format!("/posts/{}/toggle-like", id))
            }
            Operation::ToggleSave(id) => {
                Route::new(Method::POST, format!("/posts/{}/toggle-save", id))
            }
            Operation::ListSavedPosts => Route::new(Method::GET, "/saved-posts"),
            Operation::AddComment { post_id, content } => {
                Route::new(Method::POST, format!("/posts/{}/comments", post_id))
                    .body(json!({ "content": content }))
            }
            Operation::EditComment {
                post_id,
                comment_id,
                content,
            } => Route::new(
                Method::PUT,
                format!("/posts/{}/comments/{}", post_id, comment_id),
            )
            .body(json!({ "content": content })),
            Operation::DeleteComment(id) => {
                Route::new(Method::DELETE, format!("/comments/{}", id))
            }
            Operation::UpdatePost { post_id, update } => {
                Route::new(Method::PUT, format!("/posts/{}", post_id)).json(update)
            }
            Operation::DeletePost(id) => Route::new(Method::DELETE, format!("/posts/{}", id)),
            Operation::GetProfile(id) => Route::new(Method::GET, format!("/profile/{}", id)),
            Operation::UpdateProfile(update) => Route::new(Method::PUT, "/profile").json(update),
            Operation::ListFriends { user_id, page } => {
                Route::new(Method::GET, format!("/users/{}/friends", user_id)).query("page", page)
            }
            Operation::RemoveFriend(id) => Route::new(Method::DELETE, format!("/friends/{}", id)),
            Operation::ListFriendRequests { page } => {
                Route::new(Method::GET, "/friend-requests").query("page", page)
            }
            Operation::RespondFriendRequest { sender, response } => Route::new(
                Method::POST,
                format!("/friend-requests/{}/{}", sender, response.as_str()),
            ),
            Operation::SendFriendRequest(id) => {
                Route::new(Method::POST, format!("/friend-requests/{}", id))
            }
            Operation::CancelFriendRequest(id) => {
                Route::new(Method::DELETE, format!("/friend-requests/{}", id))
            }
            Operation::SearchProfiles(query) => {
                Route::new(Method::GET, "/search").query("query", query)
            }
            Operation::VerifyEmail { code } => {
                Route::new(Method::POST, "/verify-email").body(json!({ "code": code }))
            }
            Operation::ResendVerificationCode => {
                Route::new(Method::POST, "/send-verification-code").body(json!({}))
            }
            Operation::CompleteProfile(update) => {
                Route::new(Method::POST, "/complete-profile").json(update)
            }
            Operation::SendResetPasswordCode { email } => {
                Route::new(Method::POST, "/send-reset-password-code")
                    .body(json!({ "email": email }))
            }
            Operation::ValidateResetCode { email, code } => {
                Route::new(Method::POST, "/validate-reset-code")
                    .body(json!({ "email": email, "code": code }))
            }
            Operation::ResetPassword(request) => {
                Route::new(Method::POST, "/reset-password").json(request)
            }
        }
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Server-provided `message`, if any
    pub fn message(&self) -> Option<String> {
        message_of(&self.body)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }

    /// Decode `body[field]`, falling back to the whole body when the field is
    /// absent (some endpoints return the resource unwrapped).
    pub fn decode_field<T: DeserializeOwned>(&self, field: &str) -> Result<T, serde_json::Error> {
        match self.body.get(field) {
            Some(value) => T::deserialize(value),
            None => self.decode(),
        }
    }
}

pub(crate) fn message_of(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A request that did not produce a 2xx response
#[derive(Error, Debug, Clone)]
pub enum ApiFailure {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: Value,
    },
}

impl ApiFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient failures: connection problems, timeouts and 5xx
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiFailure::Network(_) | ApiFailure::Timeout(_) => true,
            ApiFailure::Status { status, .. } => *status >= 500,
        }
    }

    /// `registration_status` carried by 409 responses
    pub fn registration_status(&self) -> Option<String> {
        match self {
            ApiFailure::Status {
                status: 409, body, ..
            } => body
                .get("registration_status")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, operation: Operation) -> Result<ApiResponse, ApiFailure>;
}
