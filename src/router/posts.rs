//! Post routes.
//!
//! Reads are public. Creation needs a token; updates and deletes also need
//! the caller to own the post.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::pipeline::{Authorized, NoBody, Pipeline};
use crate::post::{Post, PostChanges, PostView};
use crate::repository::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PostQuery, Repository};
use crate::router::{trimmed, trimmed_option};

const TITLE_MAX_LENGTH: usize = 200;

fn title_fits(title: &str) -> std::result::Result<(), ValidationError> {
    if title.chars().count() > TITLE_MAX_LENGTH {
        return Err(ValidationError::new("length"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBody {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(
        length(min = 3, message = "Title is required and must be at least 3 characters long"),
        custom(function = "title_fits", message = "Title cannot exceed 200 characters")
    )]
    pub title: String,
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(length(min = 10, message = "Content is required and must be at least 10 characters long"))]
    pub content: String,
    #[serde(default, deserialize_with = "trimmed_option")]
    pub category: Option<String>,
    #[serde(default)]
    pub published: bool,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBody {
    #[serde(default, deserialize_with = "trimmed_option")]
    #[validate(
        length(min = 3, message = "Title is required and must be at least 3 characters long"),
        custom(function = "title_fits", message = "Title cannot exceed 200 characters")
    )]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "trimmed_option")]
    #[validate(length(min = 10, message = "Content is required and must be at least 10 characters long"))]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "trimmed_option")]
    pub category: Option<String>,
    #[serde(default)]
    pub published: Option<bool>,
}

impl From<UpdateBody> for PostChanges {
    fn from(body: UpdateBody) -> Self {
        PostChanges {
            title: body.title,
            content: body.content,
            category: body.category.map(|category| Some(category).filter(|c| !c.is_empty())),
            published: body.published,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListParams {
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub published: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PostList {
    pub posts: Vec<PostView>,
    pub total_pages: u64,
    pub current_page: u32,
    pub total: u64,
}

/// Attach authors to `posts` with a single lookup.
async fn present(repo: &dyn Repository, posts: Vec<Post>) -> Result<Vec<PostView>> {
    let mut ids: Vec<String> = posts.iter().map(|post| post.owner_id.clone()).collect();
    ids.sort_unstable();
    ids.dedup();

    let authors = repo.find_users(&ids).await?;
    Ok(posts.into_iter().map(|post| PostView::new(post, &authors)).collect())
}

async fn present_one(repo: &dyn Repository, post: Post) -> Result<PostView> {
    let authors = repo.find_users(std::slice::from_ref(&post.owner_id)).await?;
    Ok(PostView::new(post, &authors))
}

/// Handler to list posts, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: std::result::Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<PostList>> {
    let Query(params) = params.map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
    params.validate()?;

    let viewer = Pipeline::new(&state, &headers).viewer();
    let query = PostQuery {
        category: params.category,
        author: params.author,
        published: params.published,
        viewer: viewer.map(|identity| identity.user_id),
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
    };

    let page = state.repo.list_posts(&query).await?;

    Ok(Json(PostList {
        total_pages: page.total.div_ceil(u64::from(query.limit)),
        current_page: query.page,
        total: page.total,
        posts: present(state.repo.as_ref(), page.items).await?,
    }))
}

/// Handler to read one post. Drafts only exist for their owner.
pub async fn get(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<PostView>> {
    let pipeline = Pipeline::new(&state, &headers);
    let viewer = pipeline.viewer();
    let post = pipeline.load_post(&id).await?;

    if post.visible_to(viewer.as_ref().map(|identity| identity.user_id.as_str())) {
        Ok(Json(present_one(state.repo.as_ref(), post).await?))
    } else {
        Err(ServerError::NotFound("Post"))
    }
}

/// Handler to create a post owned by the caller.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PostView>)> {
    let repo = Arc::clone(&state.repo);

    Pipeline::new(&state, &headers)
        .create(&body, |identity, input: CreateBody| async move {
            let post = Post::new(
                identity.user_id,
                input.title,
                input.content,
                input.category.filter(|category| !category.is_empty()),
                input.published,
            );
            repo.save_post(&post).await?;

            tracing::info!(post_id = %post.id, user_id = %post.owner_id, "post created");
            Ok((StatusCode::CREATED, Json(present_one(repo.as_ref(), post).await?)))
        })
        .await
}

/// Handler to update a post.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<PostView>> {
    let repo = Arc::clone(&state.repo);

    Pipeline::new(&state, &headers)
        .mutate(&body, &id, |authorized: Authorized<UpdateBody>| async move {
            let Authorized {
                identity,
                input,
                mut post,
            } = authorized;
            post.apply(input.into());
            repo.save_post(&post).await?;

            tracing::info!(post_id = %post.id, user_id = %identity.user_id, "post updated");
            Ok(Json(present_one(repo.as_ref(), post).await?))
        })
        .await
}

/// Handler to delete a post.
pub async fn delete(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<Value>> {
    let repo = Arc::clone(&state.repo);

    Pipeline::new(&state, &headers)
        .mutate(&[], &id, |authorized: Authorized<NoBody>| async move {
            if !repo.delete_post(&authorized.post.id).await? {
                return Err(ServerError::NotFound("Post"));
            }

            tracing::info!(post_id = %authorized.post.id, user_id = %authorized.identity.user_id, "post deleted");
            Ok(Json(json!({ "message": "Post deleted successfully" })))
        })
        .await
}
