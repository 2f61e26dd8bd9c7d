use std::str::FromStr;

use crate::error::ReportError;
use crate::format::escape_html;
use crate::models::UserIdentity;

const PICTURE_SIZE: u32 = 35;

pub trait IdentityFormatter {
    /// Markup fragment for the user's avatar.
    fn user_picture(&self, user: &UserIdentity) -> String;

    /// Display name as plain text.
    fn full_name(&self, user: &UserIdentity) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameFormat {
    #[default]
    FirstLast,
    LastFirst,
}

impl FromStr for NameFormat {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "firstlast" | "first_last" => Ok(NameFormat::FirstLast),
            "lastfirst" | "last_first" => Ok(NameFormat::LastFirst),
            other => Err(ReportError::InvalidNameFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HtmlIdentityFormatter {
    site_url: String,
    name_format: NameFormat,
}

impl HtmlIdentityFormatter {
    pub fn new(site_url: &str, name_format: NameFormat) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            name_format,
        }
    }
}

impl IdentityFormatter for HtmlIdentityFormatter {
    fn user_picture(&self, user: &UserIdentity) -> String {
        let alt = match user.image_alt.as_deref().map(str::trim) {
            Some(alt) if !alt.is_empty() => alt.to_string(),
            _ => format!("Picture of {}", self.full_name(user)),
        };
        format!(
            r#"<img src="{}/user/{}/picture" alt="{}" title="{}" class="userpicture" width="{size}" height="{size}" />"#,
            escape_html(&self.site_url),
            user.id,
            escape_html(&alt),
            escape_html(&alt),
            size = PICTURE_SIZE,
        )
    }

    fn full_name(&self, user: &UserIdentity) -> String {
        let first = user.firstname.trim();
        let last = user.lastname.trim();
        let parts = match self.name_format {
            NameFormat::FirstLast => [first, last],
            NameFormat::LastFirst => [last, first],
        };
        parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
