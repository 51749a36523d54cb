use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TITLE_MAX_CHARS: usize = 255;
pub const AUTHOR_NAME_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 5000;

/// Voter identity used when a request carries no usable address at all.
pub const FALLBACK_VOTER_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    MissingRequiredField,
    TitleTooLong { chars: usize },
    AuthorNameTooLong { chars: usize },
    DescriptionTooLong { chars: usize },
    InvalidFeatureId { raw: String },
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRequiredField => "missing_required_field",
            Self::TitleTooLong { .. } => "title_too_long",
            Self::AuthorNameTooLong { .. } => "author_name_too_long",
            Self::DescriptionTooLong { .. } => "description_too_long",
            Self::InvalidFeatureId { .. } => "invalid_feature_id",
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequiredField => write!(f, "Title and author name are required"),
            Self::TitleTooLong { chars } => write!(
                f,
                "Title too long: {chars} characters (max {TITLE_MAX_CHARS})"
            ),
            Self::AuthorNameTooLong { chars } => write!(
                f,
                "Author name too long: {chars} characters (max {AUTHOR_NAME_MAX_CHARS})"
            ),
            Self::DescriptionTooLong { chars } => write!(
                f,
                "Description too long: {chars} characters (max {DESCRIPTION_MAX_CHARS})"
            ),
            Self::InvalidFeatureId { .. } => write!(f, "Invalid feature ID"),
        }
    }
}

impl std::error::Error for DomainError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub author_name: String,
    /// Denormalized counter, only ever bumped by the vote transaction.
    pub votes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A feature together with the live number of vote rows referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWithCount {
    #[serde(flatten)]
    pub feature: Feature,
    pub vote_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: i64,
    pub feature_id: i64,
    pub voter_ip: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque voter identity derived from the requester's network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self(FALLBACK_VOTER_IP.to_string());
        }
        if trimmed.len() == raw.len() {
            return Self(raw);
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw body of `POST /api/features`. Fields are optional here so that a
/// missing field produces the same message as an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateFeatureRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
}

/// A feature submission that passed validation; strings are already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeature {
    pub title: String,
    pub description: Option<String>,
    pub author_name: String,
}

impl NewFeature {
    pub fn validate(req: CreateFeatureRequest) -> Result<Self, DomainError> {
        let title = non_empty_trimmed(req.title);
        let author_name = non_empty_trimmed(req.author_name);
        let (Some(title), Some(author_name)) = (title, author_name) else {
            return Err(DomainError::MissingRequiredField);
        };

        let chars = title.chars().count();
        if chars > TITLE_MAX_CHARS {
            return Err(DomainError::TitleTooLong { chars });
        }
        let chars = author_name.chars().count();
        if chars > AUTHOR_NAME_MAX_CHARS {
            return Err(DomainError::AuthorNameTooLong { chars });
        }

        let description = non_empty_trimmed(req.description);
        if let Some(description) = description.as_deref() {
            let chars = description.chars().count();
            if chars > DESCRIPTION_MAX_CHARS {
                return Err(DomainError::DescriptionTooLong { chars });
            }
        }

        Ok(Self {
            title,
            description,
            author_name,
        })
    }
}

fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_feature_id(raw: &str) -> Result<i64, DomainError> {
    raw.parse::<i64>()
        .map_err(|_| DomainError::InvalidFeatureId {
            raw: raw.to_string(),
        })
}
