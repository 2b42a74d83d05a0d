/// Cached view types and the store aliases built on them
use query_cache::{EntityStore, MutationCoordinator, PageSlot, Paginated, Snapshot};

use crate::keys::QueryKey;
use crate::models::{FriendRequest, Post, PostId, ProfileView, SavedPost, User, UserSummary};

/// Page numbers, starting at 1
pub type PageCursor = u32;

pub type Store = EntityStore<QueryKey, QueryData>;
pub type Coordinator = MutationCoordinator<QueryKey, QueryData>;
pub type ViewSnapshot = Snapshot<QueryKey, QueryData>;

/// One cached view. The variant follows the key kind.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    CurrentUser(User),
    Feed(Paginated<Post, PageCursor>),
    Post(Post),
    Likers(Vec<UserSummary>),
    Profile(ProfileView),
    SavedPosts(Vec<SavedPost>),
    Friends(Paginated<UserSummary, PageCursor>),
    FriendRequests(Paginated<FriendRequest, PageCursor>),
    Search(Vec<UserSummary>),
}

impl QueryData {
    pub fn as_user(&self) -> Option<&User> {
        match self {
            QueryData::CurrentUser(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            QueryData::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn as_likers(&self) -> Option<&[UserSummary]> {
        match self {
            QueryData::Likers(likers) => Some(likers),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&ProfileView> {
        match self {
            QueryData::Profile(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn as_saved(&self) -> Option<&[SavedPost]> {
        match self {
            QueryData::SavedPosts(saved) => Some(saved),
            _ => None,
        }
    }

    pub fn as_search(&self) -> Option<&[UserSummary]> {
        match self {
            QueryData::Search(results) => Some(results),
            _ => None,
        }
    }

    /// First copy of `post_id` held by this view, if any
    pub fn find_post(&self, post_id: PostId) -> Option<&Post> {
        match self {
            QueryData::Post(post) if post.id == post_id => Some(post),
            QueryData::Feed(pages) => pages.find(|post| post.id == post_id),
            QueryData::Profile(profile) => profile.posts.iter().find(|post| post.id == post_id),
            QueryData::SavedPosts(saved) => saved
                .iter()
                .map(|entry| &entry.post)
                .find(|post| post.id == post_id),
            _ => None,
        }
    }
}

impl PageSlot<Post, PageCursor> for QueryData {
    fn page_slot(&self) -> Option<&Paginated<Post, PageCursor>> {
        match self {
            QueryData::Feed(pages) => Some(pages),
            _ => None,
        }
    }

    fn page_slot_mut(&mut self) -> Option<&mut Paginated<Post, PageCursor>> {
        match self {
            QueryData::Feed(pages) => Some(pages),
            _ => None,
        }
    }

    fn from_pages(pages: Paginated<Post, PageCursor>) -> Self {
        QueryData::Feed(pages)
    }
}

impl PageSlot<UserSummary, PageCursor> for QueryData {
    fn page_slot(&self) -> Option<&Paginated<UserSummary, PageCursor>> {
        match self {
            QueryData::Friends(pages) => Some(pages),
            _ => None,
        }
    }

    fn page_slot_mut(&mut self) -> Option<&mut Paginated<UserSummary, PageCursor>> {
        match self {
            QueryData::Friends(pages) => Some(pages),
            _ => None,
        }
    }

    fn from_pages(pages: Paginated<UserSummary, PageCursor>) -> Self {
        QueryData::Friends(pages)
    }
}

impl PageSlot<FriendRequest, PageCursor> for QueryData {
    fn page_slot(&self) -> Option<&Paginated<FriendRequest, PageCursor>> {
        match self {
            QueryData::FriendRequests(pages) => Some(pages),
            _ => None,
        }
    }

    fn page_slot_mut(&mut self) -> Option<&mut Paginated<FriendRequest, PageCursor>> {
        match self {
            QueryData::FriendRequests(pages) => Some(pages),
            _ => None,
        }
    }

    fn from_pages(pages: Paginated<FriendRequest, PageCursor>) -> Self {
        QueryData::FriendRequests(pages)
    }
}
