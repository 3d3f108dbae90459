use std::str::FromStr;

use axum::{
    Json, async_trait,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
};
use lf_common::{
    GeoPoint, PostFilter, PostType, UploadedImage,
    api::{MatchResponse, PostRequest, PostResponse},
};
use serde::Deserialize;

use super::pagination::{DEFAULT_LIMIT, validate_pagination};
use crate::SharedState;
use crate::error::ApiError;

const POST_PART: &str = "post";
const FILE_PART: &str = "file";

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    fn into_filter(self, default_radius: f64) -> Result<PostFilter, ApiError> {
        let post_type = self
            .post_type
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                PostType::from_str(raw)
                    .map_err(|_| ApiError::BadRequest(format!("unknown post type: {raw}")))
            })
            .transpose()?;

        let near = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                let point = GeoPoint::new(lat, lng);
                if !point.is_valid() {
                    return Err(ApiError::BadRequest("lat/lng out of range".into()));
                }
                let radius = self.radius.unwrap_or(default_radius);
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(ApiError::BadRequest("radius must be positive".into()));
                }
                Some((point, radius))
            }
            (None, None) => None,
            _ => return Err(ApiError::BadRequest("lat and lng must be given together".into())),
        };

        Ok(PostFilter {
            text: self.q,
            near,
            post_type,
        })
    }
}

pub async fn list_posts(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let (limit, offset) = validate_pagination(
        query.limit.unwrap_or(DEFAULT_LIMIT),
        query.offset.unwrap_or(0),
    )?;
    let filter = query.into_filter(state.service.ranking_config().radius_meters)?;

    let posts = state.service.list_posts(&filter).await?;

    Ok(Json(
        posts
            .iter()
            .skip(offset)
            .take(limit)
            .map(PostResponse::from)
            .collect(),
    ))
}

/// Body of `POST /api/posts`: plain JSON, or multipart with a `post` JSON
/// part and an optional `file` part.
#[derive(Debug)]
pub struct CreatePostPayload {
    pub request: PostRequest,
    pub image: Option<UploadedImage>,
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("multipart/form-data"))
}

async fn read_multipart(mut multipart: Multipart) -> Result<CreatePostPayload, ApiError> {
    let mut request = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(POST_PART) => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
                let parsed: PostRequest = serde_json::from_str(&text)
                    .map_err(|err| ApiError::BadRequest(format!("invalid post part: {err}")))?;
                request = Some(parsed);
            }
            Some(FILE_PART) => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
                if !bytes.is_empty() {
                    image = Some(UploadedImage {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let request =
        request.ok_or_else(|| ApiError::BadRequest(format!("missing `{POST_PART}` part")))?;
    Ok(CreatePostPayload { request, image })
}

#[async_trait]
impl<S> FromRequest<S> for CreatePostPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_multipart(&req) {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
            return read_multipart(multipart).await;
        }

        let Json(request) = Json::<PostRequest>::from_request(req, state)
            .await
            .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
        Ok(CreatePostPayload {
            request,
            image: None,
        })
    }
}

pub async fn create_post(
    State(state): State<SharedState>,
    payload: CreatePostPayload,
) -> Result<(StatusCode, Json<PostResponse>), ApiError> {
    let post = state
        .service
        .submit_post(payload.request, payload.image)
        .await?;

    Ok((StatusCode::CREATED, Json(PostResponse::from(&post))))
}

pub async fn get_post(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = state.service.get_post(id).await?;
    Ok(Json(PostResponse::from(&post)))
}

pub async fn post_matches(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MatchResponse>>, ApiError> {
    let candidates = state.service.find_matches_for_post(id).await?;
    Ok(Json(candidates.iter().map(MatchResponse::from).collect()))
}
