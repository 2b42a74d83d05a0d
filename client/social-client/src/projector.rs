//! Denormalized view projector
//!
//! The same post can sit in the feed, its own page, a profile page and the
//! saved list at once; friendship state is copied into profiles, friend
//! lists, likers and search results. A [`Fact`] describes one domain change
//! and [`project`] folds it into any cached view. Every function here is
//! total and pure: a view that does not contain the affected entity comes
//! back unchanged.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use query_cache::Paginated;

use crate::cache::{PageCursor, QueryData, ViewSnapshot};
use crate::keys::QueryKey;
use crate::models::{
    Comment, CommentId, FriendRequest, FriendshipStatus, Post, PostId, ProfileUpdate,
    ProfileView, SavedPivot, SavedPost, User, UserId, UserSummary,
};

/// One domain change to project into cached views
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    CommentAdded {
        post_id: PostId,
        comment: Comment,
    },
    CommentEdited {
        post_id: PostId,
        comment_id: CommentId,
        content: String,
        updated_at: DateTime<Utc>,
    },
    CommentRemoved {
        post_id: PostId,
        comment_id: CommentId,
    },
    /// `liked` is the state after the toggle
    LikeToggled {
        post_id: PostId,
        liker: UserSummary,
        liked: bool,
    },
    /// `post` is needed to add an entry to the saved list
    SaveToggled {
        post_id: PostId,
        post: Option<Post>,
        saved: bool,
        saved_at: DateTime<Utc>,
    },
    PostContentUpdated {
        post_id: PostId,
        content: String,
        image: Option<String>,
        updated_at: DateTime<Utc>,
    },
    PostRemoved {
        post_id: PostId,
    },
    FriendRemoved {
        viewer: UserId,
        friend: UserId,
    },
    FriendRequestResolved {
        viewer: UserId,
        sender: UserId,
        accepted: bool,
    },
    ProfileUpdated {
        user_id: UserId,
        update: ProfileUpdate,
    },
}

impl Fact {
    fn touches_posts(&self) -> bool {
        matches!(
            self,
            Fact::CommentAdded { .. }
                | Fact::CommentEdited { .. }
                | Fact::CommentRemoved { .. }
                | Fact::LikeToggled { .. }
                | Fact::PostContentUpdated { .. }
        )
    }
}

/// Fold `fact` into the view cached under `key`
pub fn project(key: &QueryKey, view: QueryData, fact: &Fact) -> QueryData {
    match view {
        QueryData::CurrentUser(user) => QueryData::CurrentUser(project_current_user(user, fact)),
        QueryData::Feed(pages) => QueryData::Feed(project_feed(pages, fact)),
        QueryData::Post(post) => QueryData::Post(project_post(post, fact)),
        QueryData::Likers(likers) => QueryData::Likers(project_likers(key, likers, fact)),
        QueryData::Profile(profile) => QueryData::Profile(project_profile(profile, fact)),
        QueryData::SavedPosts(saved) => QueryData::SavedPosts(project_saved(saved, fact)),
        QueryData::Friends(pages) => QueryData::Friends(project_friends(key, pages, fact)),
        QueryData::FriendRequests(pages) => {
            QueryData::FriendRequests(project_friend_requests(pages, fact))
        }
        QueryData::Search(results) => QueryData::Search(project_summaries(results, fact)),
    }
}

/// Project `facts` over every present view of `snapshot`, returning only
/// the views that changed.
pub fn project_all(snapshot: &ViewSnapshot, facts: &[Fact]) -> HashMap<QueryKey, QueryData> {
    snapshot
        .iter()
        .filter_map(|(key, view)| {
            let before = view.as_ref()?;
            let after = facts
                .iter()
                .fold(before.clone(), |view, fact| project(key, view, fact));
            (after != *before).then(|| (key.clone(), after))
        })
        .collect()
}

/// Swap a provisional comment for the server's copy in every present view
pub fn confirm_comment(
    snapshot: &ViewSnapshot,
    post_id: PostId,
    provisional: CommentId,
    confirmed: &Comment,
) -> HashMap<QueryKey, QueryData> {
    snapshot
        .iter()
        .filter_map(|(key, view)| {
            let before = view.as_ref()?;
            let after = map_posts(before.clone(), &|post: Post| {
                if post.id != post_id {
                    return post;
                }
                replace_comment(post, provisional, confirmed)
            });
            (after != *before).then(|| (key.clone(), after))
        })
        .collect()
}

fn replace_comment(mut post: Post, provisional: CommentId, confirmed: &Comment) -> Post {
    let already_confirmed = post.comments.iter().any(|c| c.id == confirmed.id);
    if already_confirmed {
        let before = post.comments.len();
        post.comments.retain(|c| c.id != provisional);
        if post.comments.len() < before {
            post.comments_count = post.comments_count.saturating_sub(1);
        }
    } else if let Some(slot) = post.comments.iter_mut().find(|c| c.id == provisional) {
        *slot = confirmed.clone();
    }
    post
}

fn map_posts(view: QueryData, f: &dyn Fn(Post) -> Post) -> QueryData {
    match view {
        QueryData::Feed(pages) => QueryData::Feed(pages.map_items(|post| f(post.clone()))),
        QueryData::Post(post) => QueryData::Post(f(post)),
        QueryData::Profile(mut profile) => {
            profile.posts = profile.posts.into_iter().map(f).collect();
            QueryData::Profile(profile)
        }
        QueryData::SavedPosts(saved) => QueryData::SavedPosts(
            saved
                .into_iter()
                .map(|entry| SavedPost {
                    post: f(entry.post),
                    pivot: entry.pivot,
                })
                .collect(),
        ),
        other => other,
    }
}

fn project_post(mut post: Post, fact: &Fact) -> Post {
    match fact {
        Fact::CommentAdded { post_id, comment } if *post_id == post.id => {
            if !post.comments.iter().any(|c| c.id == comment.id) {
                post.comments.push(comment.clone());
                post.comments_count += 1;
            }
        }
        Fact::CommentEdited {
            post_id,
            comment_id,
            content,
            updated_at,
        } if *post_id == post.id => {
            if let Some(comment) = post.comments.iter_mut().find(|c| c.id == *comment_id) {
                comment.content = content.clone();
                comment.updated_at = *updated_at;
            }
        }
        Fact::CommentRemoved {
            post_id,
            comment_id,
        } if *post_id == post.id => {
            let before = post.comments.len();
            post.comments.retain(|c| c.id != *comment_id);
            if post.comments.len() < before {
                post.comments_count = post.comments_count.saturating_sub(1);
            }
        }
        Fact::LikeToggled { post_id, liked, .. } if *post_id == post.id => {
            post.likes_count = if *liked {
                post.likes_count + 1
            } else {
                post.likes_count.saturating_sub(1)
            };
        }
        Fact::PostContentUpdated {
            post_id,
            content,
            image,
            updated_at,
        } if *post_id == post.id => {
            post.content = content.clone();
            if let Some(image) = image {
                post.image = Some(image.clone());
            }
            post.updated_at = *updated_at;
        }
        _ => {}
    }
    post
}

fn project_feed(pages: Paginated<Post, PageCursor>, fact: &Fact) -> Paginated<Post, PageCursor> {
    match fact {
        Fact::PostRemoved { post_id } => pages.retain_items(|post| post.id != *post_id),
        _ if fact.touches_posts() => pages.map_items(|post| project_post(post.clone(), fact)),
        _ => pages,
    }
}

fn project_saved(mut saved: Vec<SavedPost>, fact: &Fact) -> Vec<SavedPost> {
    match fact {
        Fact::SaveToggled {
            post_id,
            post,
            saved: true,
            saved_at,
        } => {
            let present = saved.iter().any(|entry| entry.post.id == *post_id);
            if let (false, Some(post)) = (present, post) {
                saved.insert(
                    0,
                    SavedPost {
                        post: post.clone(),
                        pivot: SavedPivot {
                            created_at: *saved_at,
                        },
                    },
                );
            }
            saved
        }
        Fact::SaveToggled {
            post_id,
            saved: false,
            ..
        }
        | Fact::PostRemoved { post_id } => {
            saved.retain(|entry| entry.post.id != *post_id);
            saved
        }
        _ if fact.touches_posts() => saved
            .into_iter()
            .map(|entry| SavedPost {
                post: project_post(entry.post, fact),
                pivot: entry.pivot,
            })
            .collect(),
        _ => saved,
    }
}

fn project_profile(mut profile: ProfileView, fact: &Fact) -> ProfileView {
    let owner = profile.user.id;
    match fact {
        Fact::PostRemoved { post_id } => {
            let before = profile.posts.len();
            profile.posts.retain(|post| post.id != *post_id);
            if profile.posts.len() < before {
                profile.user.posts_count = profile.user.posts_count.saturating_sub(1);
            }
        }
        Fact::FriendRemoved { viewer, friend } => {
            if owner == *friend {
                if profile.user.friendship_status == FriendshipStatus::Friend {
                    profile.user.friends_count = profile.user.friends_count.saturating_sub(1);
                }
                profile.user.friendship_status = FriendshipStatus::None;
                profile.friends.retain(|f| f.id != *viewer);
            } else if owner == *viewer {
                profile.user.friends_count = profile.user.friends_count.saturating_sub(1);
                profile.friends.retain(|f| f.id != *friend);
            } else {
                profile.friends = restatus(profile.friends, *friend, FriendshipStatus::None);
            }
        }
        Fact::FriendRequestResolved {
            viewer,
            sender,
            accepted,
        } => {
            let status = resolved_status(*accepted);
            if owner == *sender {
                profile.user.friendship_status = status;
                if *accepted {
                    profile.user.friends_count += 1;
                }
            } else if owner == *viewer && *accepted {
                profile.user.friends_count += 1;
            }
            profile.friends = restatus(profile.friends, *sender, status);
        }
        Fact::ProfileUpdated { user_id, update } if *user_id == owner => {
            update.apply_to(&mut profile.user.profile);
        }
        _ if fact.touches_posts() => {
            profile.posts = profile
                .posts
                .into_iter()
                .map(|post| project_post(post, fact))
                .collect();
        }
        _ => {}
    }
    profile
}

fn project_current_user(mut user: User, fact: &Fact) -> User {
    match fact {
        Fact::ProfileUpdated { user_id, update } if *user_id == user.id => {
            update.apply_to(&mut user.profile);
        }
        Fact::FriendRemoved { viewer, .. } if *viewer == user.id => {
            user.friends_count = user.friends_count.saturating_sub(1);
        }
        Fact::FriendRequestResolved {
            viewer,
            accepted: true,
            ..
        } if *viewer == user.id => {
            user.friends_count += 1;
        }
        _ => {}
    }
    user
}

fn project_likers(key: &QueryKey, likers: Vec<UserSummary>, fact: &Fact) -> Vec<UserSummary> {
    match (key, fact) {
        (
            QueryKey::PostLikers(key_post),
            Fact::LikeToggled {
                post_id,
                liker,
                liked,
            },
        ) if key_post == post_id => {
            let mut likers = likers;
            let present = likers.iter().any(|u| u.id == liker.id);
            if *liked && !present {
                likers.push(liker.clone());
            } else if !*liked {
                likers.retain(|u| u.id != liker.id);
            }
            likers
        }
        _ => project_summaries(likers, fact),
    }
}

fn project_friends(
    key: &QueryKey,
    pages: Paginated<UserSummary, PageCursor>,
    fact: &Fact,
) -> Paginated<UserSummary, PageCursor> {
    let owner = match key {
        QueryKey::Friends(owner) => Some(*owner),
        _ => None,
    };
    match fact {
        Fact::FriendRemoved { viewer, friend } if owner == Some(*viewer) => {
            pages.retain_items(|u| u.id != *friend)
        }
        Fact::FriendRemoved { viewer, friend } if owner == Some(*friend) => {
            pages.retain_items(|u| u.id != *viewer)
        }
        Fact::FriendRemoved { friend, .. } => {
            pages.map_items(|u| restatus_one(u, *friend, FriendshipStatus::None))
        }
        Fact::FriendRequestResolved {
            sender, accepted, ..
        } => pages.map_items(|u| restatus_one(u, *sender, resolved_status(*accepted))),
        _ => pages,
    }
}

fn project_friend_requests(
    pages: Paginated<FriendRequest, PageCursor>,
    fact: &Fact,
) -> Paginated<FriendRequest, PageCursor> {
    match fact {
        Fact::FriendRequestResolved { sender, .. } => {
            pages.retain_items(|request| request.sender.id != *sender)
        }
        _ => pages,
    }
}

fn project_summaries(users: Vec<UserSummary>, fact: &Fact) -> Vec<UserSummary> {
    match fact {
        Fact::FriendRemoved { friend, .. } => restatus(users, *friend, FriendshipStatus::None),
        Fact::FriendRequestResolved {
            sender, accepted, ..
        } => restatus(users, *sender, resolved_status(*accepted)),
        _ => users,
    }
}

fn resolved_status(accepted: bool) -> FriendshipStatus {
    if accepted {
        FriendshipStatus::Friend
    } else {
        FriendshipStatus::None
    }
}

fn restatus_one(user: &UserSummary, target: UserId, status: FriendshipStatus) -> UserSummary {
    let mut user = user.clone();
    if user.id == target {
        user.friendship_status = status;
    }
    user
}

fn restatus(users: Vec<UserSummary>, target: UserId, status: FriendshipStatus) -> Vec<UserSummary> {
    users
        .into_iter()
        .map(|mut user| {
            if user.id == target {
                user.friendship_status = status;
            }
            user
        })
        .collect()
}
