//! Optimistic writes
//!
//! Each operation names the views it touches, predicts their new values
//! through the projector and hands the cycle to the coordinator. Nothing
//! here writes the store directly except for cleanup after a confirmed
//! delete.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use query_cache::Mutation;

use crate::cache::{QueryData, ViewSnapshot};
use crate::client::{Confirmed, SocialClient};
use crate::error::{ClientError, ClientResult};
use crate::keys::QueryKey;
use crate::models::{
    AuthorSnapshot, Comment, CommentId, FriendResponse, Post, PostId, PostUpdate, ProfileUpdate,
    User, UserId,
};
use crate::projector::{confirm_comment, project_all, Fact};
use crate::transport::Operation;

type Views = HashMap<QueryKey, QueryData>;

/// Snapshot with an empty view seeded under `key` when nothing is cached
fn seeded(snapshot: &ViewSnapshot, key: &QueryKey, empty: QueryData) -> ViewSnapshot {
    let mut snapshot = snapshot.clone();
    let slot = snapshot.entry(key.clone()).or_insert(None);
    if slot.is_none() {
        *slot = Some(empty);
    }
    snapshot
}

fn likes(snapshot: &ViewSnapshot, key: &QueryKey, user_id: UserId) -> bool {
    snapshot
        .get(key)
        .and_then(Option::as_ref)
        .and_then(QueryData::as_likers)
        .map_or(false, |likers| likers.iter().any(|u| u.id == user_id))
}

fn saves(snapshot: &ViewSnapshot, post_id: PostId) -> bool {
    snapshot
        .get(&QueryKey::SavedPosts)
        .and_then(Option::as_ref)
        .and_then(QueryData::as_saved)
        .map_or(false, |saved| saved.iter().any(|e| e.post.id == post_id))
}

fn require_content(content: &str, field: &str, message: &str) -> ClientResult<()> {
    if content.trim().is_empty() {
        return Err(ClientError::invalid_field(field, message));
    }
    Ok(())
}

impl SocialClient {
    /// Every cached view that can hold a copy of `post_id`
    fn post_views(&self, post_id: PostId) -> Vec<QueryKey> {
        let mut keys = vec![QueryKey::Posts, QueryKey::Post(post_id), QueryKey::SavedPosts];
        keys.extend(self.store.keys_where(QueryKey::is_profile));
        keys
    }

    fn cached_post(&self, post_id: PostId) -> Option<Post> {
        self.post_views(post_id)
            .iter()
            .find_map(|key| self.store.get(key)?.find_post(post_id).cloned())
    }

    /// Views carrying friendship state between the viewer and `other`
    fn friendship_views(&self, viewer: UserId, other: UserId) -> Vec<QueryKey> {
        let mut keys = vec![
            QueryKey::CurrentUser,
            QueryKey::FriendRequests,
            QueryKey::Friends(viewer),
            QueryKey::Friends(other),
            QueryKey::Profile(viewer),
            QueryKey::Profile(other),
        ];
        keys.extend(self.store.keys_where(|key| {
            key.is_profile() || key.is_search() || key.is_likers() || matches!(key, QueryKey::Friends(_))
        }));
        keys
    }

    /// Whether the viewer is in the cached likers of `post_id`
    pub fn is_liked(&self, post_id: PostId) -> bool {
        let Some(viewer) = self.session.user_id() else {
            return false;
        };
        self.store
            .get(&QueryKey::PostLikers(post_id))
            .as_ref()
            .and_then(QueryData::as_likers)
            .map_or(false, |likers| likers.iter().any(|u| u.id == viewer))
    }

    /// Whether `post_id` is in the cached saved list
    pub fn is_saved(&self, post_id: PostId) -> bool {
        self.store
            .get(&QueryKey::SavedPosts)
            .as_ref()
            .and_then(QueryData::as_saved)
            .map_or(false, |saved| saved.iter().any(|e| e.post.id == post_id))
    }

    /// Like or unlike a post. The target state comes from the likers view,
    /// which is loaded first when missing. Returns the state after the
    /// mutation settles.
    pub async fn toggle_like(&self, post_id: PostId) -> ClientResult<bool> {
        let viewer = self.viewer().map_err(|e| self.reject(e))?;
        let likers_key = QueryKey::PostLikers(post_id);
        if !self.store.contains(&likers_key) {
            self.fetch_post_likers(post_id)
                .await
                .map_err(|e| self.surface(e))?;
        }

        let mut affected = self.post_views(post_id);
        affected.push(likers_key.clone());
        let liker = viewer.summary();

        let mutation = Mutation::new("toggle_like", affected).speculate(move |snapshot| {
            let liked = !likes(snapshot, &likers_key, liker.id);
            let snapshot = seeded(snapshot, &likers_key, QueryData::Likers(Vec::new()));
            project_all(
                &snapshot,
                &[Fact::LikeToggled {
                    post_id,
                    liker,
                    liked,
                }],
            )
        });

        self.mutate(mutation, Operation::ToggleLike(post_id), |_| Ok(()), None)
            .await?;
        Ok(self.is_liked(post_id))
    }

    /// Save or unsave a post. The target state comes from the saved list.
    /// A post held by no cached view is fetched so the saved list can carry it.
    pub async fn toggle_save(&self, post_id: PostId) -> ClientResult<bool> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        if !self.store.contains(&QueryKey::SavedPosts) {
            self.fetch_saved_posts()
                .await
                .map_err(|e| self.surface(e))?;
        }
        let post = match self.cached_post(post_id) {
            Some(post) => post,
            None => self.fetch_post(post_id).await.map_err(|e| self.surface(e))?,
        };

        let mutation = Mutation::new("toggle_save", [QueryKey::SavedPosts]).speculate(
            move |snapshot| {
                let saved = !saves(snapshot, post_id);
                let snapshot = seeded(
                    snapshot,
                    &QueryKey::SavedPosts,
                    QueryData::SavedPosts(Vec::new()),
                );
                project_all(
                    &snapshot,
                    &[Fact::SaveToggled {
                        post_id,
                        post: Some(post),
                        saved,
                        saved_at: Utc::now(),
                    }],
                )
            },
        );

        self.mutate(mutation, Operation::ToggleSave(post_id), |_| Ok(()), None)
            .await?;
        Ok(self.is_saved(post_id))
    }

    /// Post a comment. A provisional copy appears in every view of the post
    /// at once and is swapped for the server's comment on success.
    pub async fn add_comment(&self, post_id: PostId, content: &str) -> ClientResult<Comment> {
        require_content(content, "content", "Comment cannot be empty")
            .map_err(|e| self.reject(e))?;
        let viewer = self.viewer().map_err(|e| self.reject(e))?;

        let now = Utc::now();
        let provisional = Comment {
            id: CommentId::provisional(),
            post_id,
            user: AuthorSnapshot::from(&viewer),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        let provisional_id = provisional.id;
        debug!(%post_id, %provisional_id, "Adding comment");

        let mutation = Mutation::new("add_comment", self.post_views(post_id))
            .speculate(move |snapshot| {
                project_all(
                    snapshot,
                    &[Fact::CommentAdded {
                        post_id,
                        comment: provisional,
                    }],
                )
            })
            .reconcile(move |confirmed: &Confirmed<Comment>, current| {
                confirm_comment(current, post_id, provisional_id, &confirmed.value)
            });

        self.mutate(
            mutation,
            Operation::AddComment {
                post_id,
                content: content.to_string(),
            },
            |response| Ok(response.decode_field::<Comment>("comment")?),
            Some("Comment added"),
        )
        .await
    }

    pub async fn edit_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
        content: &str,
    ) -> ClientResult<Comment> {
        require_content(content, "content", "Comment cannot be empty")
            .map_err(|e| self.reject(e))?;
        if comment_id.is_provisional() {
            return Err(self.reject(ClientError::invalid_field(
                "comment",
                "Comment is still being posted",
            )));
        }

        let edited = content.to_string();
        let mutation = Mutation::new("edit_comment", self.post_views(post_id))
            .speculate(move |snapshot| {
                project_all(
                    snapshot,
                    &[Fact::CommentEdited {
                        post_id,
                        comment_id,
                        content: edited,
                        updated_at: Utc::now(),
                    }],
                )
            })
            .reconcile(move |confirmed: &Confirmed<Comment>, current| {
                project_all(
                    current,
                    &[Fact::CommentEdited {
                        post_id,
                        comment_id,
                        content: confirmed.value.content.clone(),
                        updated_at: confirmed.value.updated_at,
                    }],
                )
            });

        self.mutate(
            mutation,
            Operation::EditComment {
                post_id,
                comment_id,
                content: content.to_string(),
            },
            |response| Ok(response.decode_field::<Comment>("comment")?),
            Some("Comment updated"),
        )
        .await
    }

    pub async fn delete_comment(&self, post_id: PostId, comment_id: CommentId) -> ClientResult<()> {
        if comment_id.is_provisional() {
            return Err(self.reject(ClientError::invalid_field(
                "comment",
                "Comment is still being posted",
            )));
        }

        let mutation = Mutation::new("delete_comment", self.post_views(post_id)).speculate(
            move |snapshot| {
                project_all(
                    snapshot,
                    &[Fact::CommentRemoved {
                        post_id,
                        comment_id,
                    }],
                )
            },
        );

        self.mutate(
            mutation,
            Operation::DeleteComment(comment_id),
            |_| Ok(()),
            Some("Comment deleted"),
        )
        .await
    }

    pub async fn update_post(&self, post_id: PostId, update: PostUpdate) -> ClientResult<Post> {
        if update.image.is_none() {
            require_content(&update.content, "content", "Post cannot be empty")
                .map_err(|e| self.reject(e))?;
        }

        let predicted = update.clone();
        let mutation = Mutation::new("update_post", self.post_views(post_id))
            .speculate(move |snapshot| {
                project_all(
                    snapshot,
                    &[Fact::PostContentUpdated {
                        post_id,
                        content: predicted.content,
                        image: predicted.image,
                        updated_at: Utc::now(),
                    }],
                )
            })
            .reconcile(move |confirmed: &Confirmed<Post>, current| {
                let post = &confirmed.value;
                project_all(
                    current,
                    &[Fact::PostContentUpdated {
                        post_id,
                        content: post.content.clone(),
                        image: post.image.clone(),
                        updated_at: post.updated_at,
                    }],
                )
            });

        self.mutate(
            mutation,
            Operation::UpdatePost { post_id, update },
            |response| Ok(response.decode_field::<Post>("post")?),
            Some("Post updated"),
        )
        .await
    }

    /// Delete one of the viewer's posts
    pub async fn delete_post(&self, post_id: PostId) -> ClientResult<()> {
        let viewer = self.viewer_id().map_err(|e| self.reject(e))?;
        if let Some(post) = self.cached_post(post_id) {
            if post.user_id != viewer {
                return Err(self.reject(ClientError::Unauthorized(
                    "You can only delete your own posts".to_string(),
                )));
            }
        }

        let mutation = Mutation::new("delete_post", self.post_views(post_id)).speculate(
            move |snapshot| project_all(snapshot, &[Fact::PostRemoved { post_id }]),
        );

        self.mutate(
            mutation,
            Operation::DeletePost(post_id),
            |_| Ok(()),
            Some("Post deleted"),
        )
        .await?;

        self.store.remove(&QueryKey::Post(post_id));
        self.store.remove(&QueryKey::PostLikers(post_id));
        Ok(())
    }

    pub async fn remove_friend(&self, friend: UserId) -> ClientResult<()> {
        let viewer = self.viewer_id().map_err(|e| self.reject(e))?;
        if friend == viewer {
            return Err(self.reject(ClientError::invalid_field(
                "friend",
                "You cannot unfriend yourself",
            )));
        }

        let mutation = Mutation::new("remove_friend", self.friendship_views(viewer, friend))
            .speculate(move |snapshot| {
                project_all(snapshot, &[Fact::FriendRemoved { viewer, friend }])
            });

        self.mutate(
            mutation,
            Operation::RemoveFriend(friend),
            |_| Ok(()),
            Some("Friend removed"),
        )
        .await
    }

    /// Accept or reject the pending request from `sender`
    pub async fn respond_friend_request(
        &self,
        sender: UserId,
        response: FriendResponse,
    ) -> ClientResult<()> {
        let viewer = self.viewer_id().map_err(|e| self.reject(e))?;
        let accepted = response == FriendResponse::Accept;

        let mutation = Mutation::new(
            "respond_friend_request",
            self.friendship_views(viewer, sender),
        )
        .speculate(move |snapshot| {
            project_all(
                snapshot,
                &[Fact::FriendRequestResolved {
                    viewer,
                    sender,
                    accepted,
                }],
            )
        });

        let success = if accepted {
            "Friend request accepted"
        } else {
            "Friend request rejected"
        };
        self.mutate(
            mutation,
            Operation::RespondFriendRequest { sender, response },
            |_| Ok(()),
            Some(success),
        )
        .await
    }

    /// Send a friend request. The new status is only known after the server
    /// answers, so the cycle has no speculation.
    pub async fn send_friend_request(&self, user_id: UserId) -> ClientResult<()> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        let mutation: Mutation<QueryKey, QueryData, Confirmed<()>> =
            Mutation::new("send_friend_request", [QueryKey::Profile(user_id)])
                .also_invalidate_where(QueryKey::is_search);

        self.mutate(
            mutation,
            Operation::SendFriendRequest(user_id),
            |_| Ok(()),
            Some("Friend request sent"),
        )
        .await
    }

    pub async fn cancel_friend_request(&self, user_id: UserId) -> ClientResult<()> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        let mutation: Mutation<QueryKey, QueryData, Confirmed<()>> =
            Mutation::new("cancel_friend_request", [QueryKey::Profile(user_id)])
                .also_invalidate_where(QueryKey::is_search);

        self.mutate(
            mutation,
            Operation::CancelFriendRequest(user_id),
            |_| Ok(()),
            Some("Friend request cancelled"),
        )
        .await
    }

    /// Edit the viewer's profile. Returns the server's user record when it
    /// sends one.
    pub async fn update_profile(&self, update: ProfileUpdate) -> ClientResult<User> {
        if let Some(name) = &update.name {
            require_content(name, "name", "Name is required").map_err(|e| self.reject(e))?;
        }
        let viewer = self.viewer_id().map_err(|e| self.reject(e))?;
        let profile_key = QueryKey::Profile(viewer);

        let predicted = update.clone();
        let mutation = Mutation::new(
            "update_profile",
            [QueryKey::CurrentUser, profile_key.clone()],
        )
        .speculate(move |snapshot| {
            project_all(
                snapshot,
                &[Fact::ProfileUpdated {
                    user_id: viewer,
                    update: predicted,
                }],
            )
        })
        .reconcile(move |confirmed: &Confirmed<Option<User>>, current| {
            let mut views = Views::new();
            let Some(user) = &confirmed.value else {
                return views;
            };
            if let Some(Some(QueryData::CurrentUser(_))) = current.get(&QueryKey::CurrentUser) {
                views.insert(QueryKey::CurrentUser, QueryData::CurrentUser(user.clone()));
            }
            if let Some(Some(QueryData::Profile(view))) = current.get(&profile_key) {
                let mut view = view.clone();
                view.user.profile = user.profile.clone();
                views.insert(profile_key, QueryData::Profile(view));
            }
            views
        });

        let confirmed = self
            .mutate(
                mutation,
                Operation::UpdateProfile(update),
                |response| match response.body.get("user") {
                    Some(user) if !user.is_null() => {
                        Ok(Some(serde_json::from_value::<User>(Value::clone(user))?))
                    }
                    _ => Ok(None),
                },
                Some("Profile updated"),
            )
            .await?;

        match confirmed {
            Some(user) => {
                self.session.set_user(user.clone())?;
                Ok(user)
            }
            None => self.viewer(),
        }
    }
}
