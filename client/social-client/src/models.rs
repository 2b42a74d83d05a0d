/// Domain records exchanged with the community API
///
/// Field names follow the API's JSON (snake_case, with a few camelCase
/// pagination fields).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(UserId);
id_type!(PostId);
id_type!(CommentId);

static NEXT_PROVISIONAL: AtomicI64 = AtomicI64::new(-1);

impl CommentId {
    /// Client-side id for a comment the server has not confirmed yet.
    /// Provisional ids are negative and never collide with server ids.
    pub fn provisional() -> Self {
        Self(NEXT_PROVISIONAL.fetch_sub(1, Ordering::Relaxed))
    }

    pub fn is_provisional(&self) -> bool {
        self.0 < 0
    }
}

/// Relationship of a user to the viewer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    #[default]
    None,
    Sent,
    Received,
    Friend,
    #[serde(rename = "self")]
    Viewer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default, rename = "created_at")]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    pub profile: Profile,
    #[serde(default)]
    pub friendship_status: FriendshipStatus,
    #[serde(default)]
    pub friends_count: u32,
    #[serde(default)]
    pub posts_count: u32,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.profile.name.clone(),
            picture: self.profile.picture.clone(),
            friendship_status: self.friendship_status,
        }
    }
}

/// Minimal author data embedded in posts and comments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub id: UserId,
    pub profile: AuthorProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

impl From<&User> for AuthorSnapshot {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            profile: AuthorProfile {
                name: user.profile.name.clone(),
                picture: user.profile.picture.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub user: AuthorSnapshot,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_edited(&self) -> bool {
        self.created_at != self.updated_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    #[serde(default)]
    pub user: Option<AuthorSnapshot>,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Compact user entry used by likers, friends and search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub friendship_status: FriendshipStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub sender: User,
    #[serde(default)]
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendResponse {
    Accept,
    Reject,
}

impl FriendResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendResponse::Accept => "accept",
            FriendResponse::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPivot {
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPost {
    #[serde(flatten)]
    pub post: Post,
    pub pivot: SavedPivot,
}

impl SavedPost {
    pub fn saved_at(&self) -> DateTime<Utc> {
        self.pivot.created_at
    }
}

/// A user's profile page: the user plus their posts and friends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub friends: Vec<UserSummary>,
}

// ==================== Page payloads ====================

#[derive(Debug, Clone, Deserialize)]
pub struct PostsPage {
    pub posts: Vec<Post>,
    #[serde(default, rename = "nextPage")]
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendsPage {
    pub friends: Vec<UserSummary>,
    #[serde(default, rename = "nextPage")]
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendRequestsPage {
    #[serde(rename = "friendRequests")]
    pub friend_requests: Vec<FriendRequest>,
    #[serde(default, rename = "nextPage")]
    pub next_page: Option<u32>,
}

// ==================== Requests ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Partial profile edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remove_picture: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl ProfileUpdate {
    /// Apply the edit to a profile record
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if self.remove_picture {
            profile.picture = None;
        } else if let Some(picture) = &self.picture {
            profile.picture = Some(picture.clone());
        }
        if let Some(gender) = &self.gender {
            profile.gender = Some(gender.clone());
        }
        if let Some(description) = &self.description {
            profile.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            profile.location = Some(location.clone());
        }
        if let Some(website) = &self.website {
            profile.website = Some(website.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostUpdate {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub password: String,
    pub password_confirmation: String,
}
