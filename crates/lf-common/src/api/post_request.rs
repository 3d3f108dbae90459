use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::post::{Location, NewPost, PostType, ValidationError};

const GUEST_OWNER: &str = "guest";

/// Post creation payload as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `LOST` or `FOUND`, any case. Anything else is treated as `LOST`.
    #[serde(default, rename = "type")]
    pub post_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub created_by_name: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PostRequest {
    pub fn into_new_post(self) -> Result<NewPost, ValidationError> {
        let owner = non_blank(self.user_id)
            .filter(|owner| !owner.eq_ignore_ascii_case(GUEST_OWNER))
            .ok_or(ValidationError::Unauthenticated)?;

        let title = non_blank(self.title).ok_or(ValidationError::MissingField("title"))?;

        if let Some(location) = &self.location {
            if !location.point().is_valid() {
                return Err(ValidationError::InvalidLocation {
                    lat: location.lat.to_string(),
                    lng: location.lng.to_string(),
                });
            }
        }
        let location = self.location.map(|loc| Location {
            name: non_blank(loc.name),
            ..loc
        });

        Ok(NewPost {
            title,
            description: non_blank(self.description).unwrap_or_default(),
            post_type: PostType::parse_or_default(self.post_type.as_deref()),
            category: non_blank(self.category).unwrap_or_default(),
            contact_info: non_blank(self.contact_info),
            location,
            image_url: non_blank(self.image_url),
            owner,
            created_by_name: non_blank(self.created_by_name),
            created_at: Utc::now(),
        })
    }
}
