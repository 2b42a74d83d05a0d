/// Query keys for every cached view
use query_cache::CacheKey;
use std::fmt;

use crate::models::{PostId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The authenticated user
    CurrentUser,
    /// Global feed, paginated
    Posts,
    Post(PostId),
    PostLikers(PostId),
    Profile(UserId),
    SavedPosts,
    /// A user's friends, paginated
    Friends(UserId),
    /// Incoming friend requests, paginated
    FriendRequests,
    Search(String),
}

impl QueryKey {
    pub fn is_profile(&self) -> bool {
        matches!(self, QueryKey::Profile(_))
    }

    pub fn is_search(&self) -> bool {
        matches!(self, QueryKey::Search(_))
    }

    pub fn is_likers(&self) -> bool {
        matches!(self, QueryKey::PostLikers(_))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::CurrentUser => write!(f, "user"),
            QueryKey::Posts => write!(f, "posts"),
            QueryKey::Post(id) => write!(f, "post:{}", id),
            QueryKey::PostLikers(id) => write!(f, "postLikers:{}", id),
            QueryKey::Profile(id) => write!(f, "profile:{}", id),
            QueryKey::SavedPosts => write!(f, "savedPosts"),
            QueryKey::Friends(id) => write!(f, "friends:{}", id),
            QueryKey::FriendRequests => write!(f, "friendRequests"),
            QueryKey::Search(query) => write!(f, "search:{}", query),
        }
    }
}

impl CacheKey for QueryKey {
    fn entity(&self) -> &'static str {
        match self {
            QueryKey::CurrentUser => "user",
            QueryKey::Posts => "posts",
            QueryKey::Post(_) => "post",
            QueryKey::PostLikers(_) => "postLikers",
            QueryKey::Profile(_) => "profile",
            QueryKey::SavedPosts => "savedPosts",
            QueryKey::Friends(_) => "friends",
            QueryKey::FriendRequests => "friendRequests",
            QueryKey::Search(_) => "search",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(QueryKey::Post(PostId(42)).to_string(), "post:42");
        assert_eq!(QueryKey::PostLikers(PostId(7)).to_string(), "postLikers:7");
        assert_eq!(QueryKey::Friends(UserId(3)).to_string(), "friends:3");
        assert_eq!(QueryKey::CurrentUser.to_string(), "user");
    }

    #[test]
    fn test_entity_labels() {
        assert_eq!(QueryKey::Profile(UserId(1)).entity(), "profile");
        assert_eq!(QueryKey::Search("ali".to_string()).entity(), "search");
        assert!(QueryKey::Profile(UserId(1)).is_profile());
        assert!(!QueryKey::Posts.is_profile());
    }
}
