//! Typed form DTOs and their validation.
//!
//! Handlers never see raw form input: multipart and urlencoded bodies are
//! bound into the structs below and cleaned here first. Cleaning collects
//! every field error instead of stopping at the first, so clients can show
//! all of them next to the offending inputs.

use std::borrow::Cow;
use std::collections::BTreeMap;

use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::ApiError;
use crate::models::{Id, NewGroup};
use crate::repo::{Repo, RepoError};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";
pub const SLUG_TOO_LONG: &str = "Ensure this value has at most 50 characters.";
pub const FILE_AND_CLEAR: &str = "Please either submit a file or check the clear checkbox, not both.";
pub const DUPLICATE_SLUG: &str = "Group with this Slug already exists.";
pub const INVALID_SLUG: &str =
    "Enter a valid “slug” consisting of letters, numbers, underscores or hyphens.";

pub const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const RASTER_MIME: &[&str] = &[
    "image/png", "image/jpeg", "image/gif", "image/webp",
    "image/bmp", "image/tiff", "image/vnd.microsoft.icon",
];

/// Field name → messages. Errors not tied to one field go under `__all__`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FormErrors(pub BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub const NON_FIELD: &'static str = "__all__";

    pub fn single(field: &str, msg: impl Into<String>) -> Self {
        let mut e = Self::default();
        e.add(field, msg);
        e
    }

    pub fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(msg.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: FormErrors) {
        for (field, msgs) in other.0 {
            self.0.entry(field).or_default().extend(msgs);
        }
    }
}

impl From<ValidationErrors> for FormErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FormErrors::default();
        for (field, errs) in errors.field_errors() {
            for e in errs {
                let msg = e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string());
                out.add(field, msg);
            }
        }
        out
    }
}

fn error_with(code: &'static str, msg: &'static str) -> ValidationError {
    let mut e = ValidationError::new(code);
    e.message = Some(Cow::Borrowed(msg));
    e
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { Err(error_with("required", REQUIRED)) } else { Ok(()) }
}

fn valid_slug(value: &str) -> Result<(), ValidationError> {
    let ok = !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok { Ok(()) } else { Err(error_with("slug", INVALID_SLUG)) }
}

#[derive(Debug, Clone, Validate, Deserialize, ToSchema)]
pub struct PostForm {
    #[validate(custom = "not_blank")]
    pub text: String,
    /// Group id
    pub group: Option<Id>,
}

#[derive(Debug, Clone, Validate, Deserialize, Serialize, ToSchema)]
pub struct CommentForm {
    #[serde(default)]
    #[validate(
        custom = "not_blank",
        length(max = 1000, message = "Ensure this value has at most 1000 characters.")
    )]
    pub text: String,
}

#[derive(Debug, Clone, Validate, Deserialize, Serialize, ToSchema)]
pub struct GroupForm {
    #[validate(
        custom = "not_blank",
        length(max = 200, message = "Ensure this value has at most 200 characters.")
    )]
    pub title: String,
    #[validate(
        custom = "valid_slug",
        length(max = 50, message = "Ensure this value has at most 50 characters.")
    )]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl GroupForm {
    /// Trims input and turns a blank slug into no slug, then validates.
    pub fn clean(self) -> Result<NewGroup, FormErrors> {
        let form = GroupForm {
            title: self.title.trim().to_string(),
            slug: self.slug.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            description: self.description.trim().to_string(),
        };
        form.validate()?;
        Ok(NewGroup { title: form.title, slug: form.slug, description: form.description })
    }
}

impl CommentForm {
    pub fn clean(self) -> Result<String, FormErrors> {
        let form = CommentForm { text: self.text.trim().to_string() };
        form.validate()?;
        Ok(form.text)
    }
}

/// A file part as received.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Raw create/edit post body, before validation.
#[derive(Debug, Clone, Default)]
pub struct PostSubmission {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<Upload>,
    pub clear_image: bool,
}

/// An upload that sniffed as a supported raster format.
#[derive(Debug, Clone)]
pub struct CleanImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub extension: &'static str,
}

#[derive(Debug, Clone)]
pub struct CleanPost {
    pub text: String,
    pub group_id: Option<Id>,
    pub image: Option<CleanImage>,
    pub clear_image: bool,
}

/// Reads the multipart fields `text`, `group`, `image` and `image-clear`.
/// Unknown fields are drained and ignored.
pub async fn read_post_submission(mut payload: Multipart) -> Result<PostSubmission, ApiError> {
    let mut sub = PostSubmission::default();
    let mut total = 0usize;
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::warn!("multipart error: {e}");
        ApiError::BadRequest
    })? {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        let filename = field.content_disposition().get_filename().map(str::to_string);
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::warn!("stream read error: {e}");
            ApiError::BadRequest
        })? {
            total += chunk.len();
            if total > IMAGE_SIZE_LIMIT { return Err(ApiError::PayloadTooLarge); }
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "text" => sub.text = String::from_utf8_lossy(&bytes).into_owned(),
            "group" => sub.group = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "image" => {
                // browsers send an empty, nameless part when no file was picked
                let picked = filename.as_deref().map_or(false, |f| !f.is_empty());
                if picked || !bytes.is_empty() {
                    sub.image = Some(Upload { filename, bytes });
                }
            }
            "image-clear" => sub.clear_image = matches!(String::from_utf8_lossy(&bytes).trim(), "on" | "1" | "true"),
            _ => {}
        }
    }
    Ok(sub)
}

/// Detects a supported raster image from its content, ignoring the file name.
pub fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    let kind = infer::get(bytes)?;
    if kind.matcher_type() != infer::MatcherType::Image || !RASTER_MIME.contains(&kind.mime_type()) {
        return None;
    }
    Some((kind.mime_type(), kind.extension()))
}

/// Validates a post submission, including that the chosen group exists.
pub async fn clean_post(repo: &dyn Repo, sub: PostSubmission) -> Result<CleanPost, ApiError> {
    let mut errors = FormErrors::default();

    let group = match sub.group.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<Id>() {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("group", INVALID_CHOICE);
                None
            }
        },
    };
    let form = PostForm { text: sub.text.trim().to_string(), group };
    if let Err(e) = form.validate() {
        errors.merge(e.into());
    }

    if let Some(id) = form.group {
        match repo.get_group(id).await {
            Ok(_) => {}
            Err(RepoError::NotFound) => errors.add("group", INVALID_CHOICE),
            Err(e) => return Err(e.into()),
        }
    }

    let image = match sub.image {
        None => None,
        Some(_) if sub.clear_image => {
            errors.add("image", FILE_AND_CLEAR);
            None
        }
        Some(upload) if upload.bytes.is_empty() => {
            errors.add("image", EMPTY_FILE);
            None
        }
        Some(upload) => match sniff_image(&upload.bytes) {
            Some((mime, extension)) => Some(CleanImage { bytes: upload.bytes, mime, extension }),
            None => {
                errors.add("image", INVALID_IMAGE);
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(CleanPost { text: form.text, group_id: form.group, image, clear_image: sub.clear_image })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A,
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89,
    ];

    #[test]
    fn sniffs_raster_formats_only() {
        assert_eq!(sniff_image(PNG_1X1), Some(("image/png", "png")));
        assert_eq!(sniff_image(b"abc"), None);
        assert_eq!(sniff_image(b"%PDF-1.4\n"), None);
    }

    #[test]
    fn comment_length_and_blank() {
        assert_eq!(
            CommentForm { text: "   ".into() }.clean().unwrap_err().get("text"),
            Some(&[REQUIRED.to_string()][..])
        );
        assert!(CommentForm { text: "x".repeat(1000) }.clean().is_ok());
        let err = CommentForm { text: "x".repeat(1001) }.clean().unwrap_err();
        assert!(err.get("text").is_some());
    }

    #[test]
    fn group_slug_rules() {
        let ok = GroupForm { title: " Cats ".into(), slug: Some("cats_1-a".into()), description: String::new() };
        let g = ok.clean().unwrap();
        assert_eq!(g.title, "Cats");
        assert_eq!(g.slug.as_deref(), Some("cats_1-a"));

        let blank = GroupForm { title: "Dogs".into(), slug: Some("  ".into()), description: String::new() };
        assert_eq!(blank.clean().unwrap().slug, None);

        let bad = GroupForm { title: String::new(), slug: Some("no spaces".into()), description: String::new() };
        let err = bad.clean().unwrap_err();
        assert_eq!(err.get("slug"), Some(&[INVALID_SLUG.to_string()][..]));
        assert_eq!(err.get("title"), Some(&[REQUIRED.to_string()][..]));

        let long = GroupForm { title: "Long".into(), slug: Some("a".repeat(51)), description: String::new() };
        assert_eq!(long.clean().unwrap_err().get("slug"), Some(&[SLUG_TOO_LONG.to_string()][..]));
        let limit = GroupForm { title: "Edge".into(), slug: Some("a".repeat(50)), description: String::new() };
        assert!(limit.clean().is_ok());
    }
}
