use axum::{
    Json,
    extract::{Multipart, State},
};
use lf_common::{GeoPoint, api::PostResponse};

use crate::SharedState;
use crate::error::ApiError;

#[derive(Debug, Default)]
struct ImageSearchForm {
    image: Option<Vec<u8>>,
    lat: Option<f64>,
    lng: Option<f64>,
    category: Option<String>,
}

fn parse_coordinate(name: &str, raw: &str) -> Result<Option<f64>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("{name} must be a number")))
}

impl ImageSearchForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?
        {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
                    form.image = Some(bytes.to_vec());
                }
                Some(key @ ("lat" | "lng" | "category")) => {
                    let text = field
                        .text()
                        .await
                        .map_err(|err| ApiError::from_rejection(err.status(), err.body_text()))?;
                    match key {
                        "lat" => form.lat = parse_coordinate("lat", &text)?,
                        "lng" => form.lng = parse_coordinate("lng", &text)?,
                        _ => form.category = Some(text),
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn location(&self) -> Result<Option<GeoPoint>, ApiError> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng))),
            (None, None) => Ok(None),
            _ => Err(ApiError::BadRequest("lat and lng must be given together".into())),
        }
    }
}

/// `POST /api/search/image`. Ranked posts, best first.
pub async fn search_by_image(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let form = ImageSearchForm::read(multipart).await?;
    let location = form.location()?;
    let image = form
        .image
        .ok_or_else(|| ApiError::BadRequest("missing `file` part".into()))?;

    let posts = state
        .service
        .search_by_image(&image, location, form.category)
        .await?;

    Ok(Json(posts.iter().map(PostResponse::from).collect()))
}
