//! Read side: fetch views into the store
//!
//! Every fetch takes a ticket from the store first. A result arriving after
//! a newer fetch (or a mutation freeze) has superseded the ticket is
//! dropped by the store, so a late response can never overwrite optimistic
//! state.

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use query_cache::{Page, PageSlot, PaginationError};

use crate::cache::{PageCursor, QueryData};
use crate::client::SocialClient;
use crate::error::{ClientError, ClientResult};
use crate::keys::QueryKey;
use crate::models::{
    FriendRequest, FriendRequestsPage, FriendsPage, Post, PostId, PostsPage, ProfileView,
    SavedPost, User, UserId, UserSummary,
};
use crate::transport::{ApiResponse, Operation};

const FIRST_PAGE: PageCursor = 1;

/// What happened to a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    Appended { total: usize, has_next: bool },
    /// The view has no further page
    Exhausted,
    /// The page was requested with an outdated cursor and dropped
    Discarded,
    /// A newer fetch for the same key won
    Superseded,
}

impl SocialClient {
    async fn fetch_view<T, W>(
        &self,
        key: QueryKey,
        operation: Operation,
        field: &str,
        wrap: W,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned + Clone,
        W: FnOnce(T) -> QueryData,
    {
        let ticket = self.store.begin_fetch(key);
        let fetched = match self.send(operation).await {
            Ok(response) => response
                .decode_field::<T>(field)
                .map_err(ClientError::from),
            Err(err) => Err(err),
        };

        match fetched {
            Ok(value) => {
                if !self.store.complete_fetch(&ticket, wrap(value.clone())) {
                    debug!(key = %ticket.key(), "Fetched view arrived after being superseded");
                }
                Ok(value)
            }
            Err(err) => {
                self.store.fail_fetch(&ticket, err.user_message());
                Err(err)
            }
        }
    }

    pub async fn fetch_current_user(&self) -> ClientResult<User> {
        let user: User = self
            .fetch_view(
                QueryKey::CurrentUser,
                Operation::GetCurrentUser,
                "user",
                QueryData::CurrentUser,
            )
            .await?;
        self.session.set_user(user.clone())?;
        Ok(user)
    }

    pub async fn fetch_post(&self, post_id: PostId) -> ClientResult<Post> {
        self.fetch_view(
            QueryKey::Post(post_id),
            Operation::GetPost(post_id),
            "post",
            QueryData::Post,
        )
        .await
    }

    pub async fn fetch_profile(&self, user_id: UserId) -> ClientResult<ProfileView> {
        self.fetch_view(
            QueryKey::Profile(user_id),
            Operation::GetProfile(user_id),
            "profile",
            QueryData::Profile,
        )
        .await
    }

    pub async fn fetch_post_likers(&self, post_id: PostId) -> ClientResult<Vec<UserSummary>> {
        self.fetch_view(
            QueryKey::PostLikers(post_id),
            Operation::GetPostLikers(post_id),
            "likers",
            QueryData::Likers,
        )
        .await
    }

    pub async fn fetch_saved_posts(&self) -> ClientResult<Vec<SavedPost>> {
        self.fetch_view(
            QueryKey::SavedPosts,
            Operation::ListSavedPosts,
            "savedPosts",
            QueryData::SavedPosts,
        )
        .await
    }

    /// Search profiles by name. A blank query returns nothing without a
    /// request.
    pub async fn search_profiles(&self, query: &str) -> ClientResult<Vec<UserSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_view(
            QueryKey::Search(query.to_string()),
            Operation::SearchProfiles(query.to_string()),
            "users",
            QueryData::Search,
        )
        .await
    }

    /// Fetch one page of a paginated view. `requested == None` loads the
    /// first page and replaces whatever was cached.
    async fn fetch_page<T, D>(
        &self,
        key: QueryKey,
        requested: Option<PageCursor>,
        operation: Operation,
        decode: D,
    ) -> ClientResult<PageLoad>
    where
        QueryData: PageSlot<T, PageCursor>,
        T: Clone,
        D: FnOnce(&ApiResponse) -> ClientResult<Page<T, PageCursor>>,
    {
        let ticket = self.store.begin_fetch(key.clone());
        let page = match self.send(operation).await.and_then(|r| decode(&r)) {
            Ok(page) => page,
            Err(err) => {
                self.store.fail_fetch(&ticket, err.user_message());
                return Err(err);
            }
        };

        if !self.store.is_current(&ticket) {
            debug!(key = %key, ?requested, "Page arrived after being superseded");
            return Ok(PageLoad::Superseded);
        }

        let load = match requested {
            None => {
                self.store.reset_pages(key.clone(), page);
                PageLoad::Appended {
                    total: self.store.flatten::<T, PageCursor>(&key).len(),
                    has_next: self.store.has_next::<T, PageCursor>(&key),
                }
            }
            Some(cursor) => match self.store.append_page(&key, Some(&cursor), page) {
                Ok(total) => PageLoad::Appended {
                    total,
                    has_next: self.store.has_next::<T, PageCursor>(&key),
                },
                Err(PaginationError::Exhausted(_)) => PageLoad::Exhausted,
                Err(err) => {
                    info!(key = %key, error = %err, "Page discarded");
                    PageLoad::Discarded
                }
            },
        };
        self.store.release_fetch(&ticket);
        Ok(load)
    }

    pub async fn fetch_feed_page(&self, cursor: Option<PageCursor>) -> ClientResult<PageLoad> {
        self.fetch_page(
            QueryKey::Posts,
            cursor,
            Operation::ListPosts {
                page: cursor.unwrap_or(FIRST_PAGE),
            },
            |response| {
                let page: PostsPage = response.decode()?;
                Ok(Page::new(page.posts, page.next_page))
            },
        )
        .await
    }

    /// Reload the feed from its first page
    pub async fn refresh_feed(&self) -> ClientResult<PageLoad> {
        self.fetch_feed_page(None).await
    }

    pub async fn fetch_next_feed_page(&self) -> ClientResult<PageLoad> {
        let key = QueryKey::Posts;
        match self.store.next_cursor::<Post, PageCursor>(&key) {
            Some(cursor) => self.fetch_feed_page(Some(cursor)).await,
            None if self.store.contains(&key) => Ok(PageLoad::Exhausted),
            None => self.refresh_feed().await,
        }
    }

    pub async fn fetch_friends_page(
        &self,
        user_id: UserId,
        cursor: Option<PageCursor>,
    ) -> ClientResult<PageLoad> {
        self.fetch_page(
            QueryKey::Friends(user_id),
            cursor,
            Operation::ListFriends {
                user_id,
                page: cursor.unwrap_or(FIRST_PAGE),
            },
            |response| {
                let page: FriendsPage = response.decode()?;
                Ok(Page::new(page.friends, page.next_page))
            },
        )
        .await
    }

    pub async fn fetch_next_friends_page(&self, user_id: UserId) -> ClientResult<PageLoad> {
        let key = QueryKey::Friends(user_id);
        match self.store.next_cursor::<UserSummary, PageCursor>(&key) {
            Some(cursor) => self.fetch_friends_page(user_id, Some(cursor)).await,
            None if self.store.contains(&key) => Ok(PageLoad::Exhausted),
            None => self.fetch_friends_page(user_id, None).await,
        }
    }

    pub async fn fetch_friend_requests_page(
        &self,
        cursor: Option<PageCursor>,
    ) -> ClientResult<PageLoad> {
        self.fetch_page(
            QueryKey::FriendRequests,
            cursor,
            Operation::ListFriendRequests {
                page: cursor.unwrap_or(FIRST_PAGE),
            },
            |response| {
                let page: FriendRequestsPage = response.decode()?;
                Ok(Page::new(page.friend_requests, page.next_page))
            },
        )
        .await
    }

    pub async fn fetch_next_friend_requests_page(&self) -> ClientResult<PageLoad> {
        let key = QueryKey::FriendRequests;
        match self.store.next_cursor::<FriendRequest, PageCursor>(&key) {
            Some(cursor) => self.fetch_friend_requests_page(Some(cursor)).await,
            None if self.store.contains(&key) => Ok(PageLoad::Exhausted),
            None => self.fetch_friend_requests_page(None).await,
        }
    }

    /// Loaded feed posts, in page order
    pub fn feed(&self) -> Vec<Post> {
        self.store.flatten::<Post, PageCursor>(&QueryKey::Posts)
    }

    pub fn friends(&self, user_id: UserId) -> Vec<UserSummary> {
        self.store
            .flatten::<UserSummary, PageCursor>(&QueryKey::Friends(user_id))
    }

    pub fn friend_requests(&self) -> Vec<FriendRequest> {
        self.store
            .flatten::<FriendRequest, PageCursor>(&QueryKey::FriendRequests)
    }

    /// Cached view for `key`, fetched first when absent or stale
    pub async fn read(&self, key: &QueryKey) -> ClientResult<Option<QueryData>> {
        if self.store.needs_fetch(key) {
            self.refetch(key).await?;
        }
        Ok(self.store.get(key))
    }

    /// Fetch `key` from the server. Paginated views restart at page one.
    pub async fn refetch(&self, key: &QueryKey) -> ClientResult<()> {
        debug!(key = %key, "Refetching");
        match key {
            QueryKey::CurrentUser => self.fetch_current_user().await.map(drop),
            QueryKey::Posts => self.refresh_feed().await.map(drop),
            QueryKey::Post(id) => self.fetch_post(*id).await.map(drop),
            QueryKey::PostLikers(id) => self.fetch_post_likers(*id).await.map(drop),
            QueryKey::Profile(id) => self.fetch_profile(*id).await.map(drop),
            QueryKey::SavedPosts => self.fetch_saved_posts().await.map(drop),
            QueryKey::Friends(id) => self.fetch_friends_page(*id, None).await.map(drop),
            QueryKey::FriendRequests => self.fetch_friend_requests_page(None).await.map(drop),
            QueryKey::Search(query) => self.search_profiles(query).await.map(drop),
        }
    }
}
