use std::fmt;

use crate::design::image::RoomImage;
use crate::error::DecorError;

/// Styles offered by the style picker. Free-text directives are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StylePreset {
    ModernMinimalist,
    BohemianChic,
    IndustrialLoft,
    MidCenturyModern,
    Scandinavian,
    Cyberpunk,
    LuxuryArtDeco,
}

impl StylePreset {
    pub const ALL: [StylePreset; 7] = [
        StylePreset::ModernMinimalist,
        StylePreset::BohemianChic,
        StylePreset::IndustrialLoft,
        StylePreset::MidCenturyModern,
        StylePreset::Scandinavian,
        StylePreset::Cyberpunk,
        StylePreset::LuxuryArtDeco,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::ModernMinimalist => "Modern Minimalist",
            Self::BohemianChic => "Bohemian Chic",
            Self::IndustrialLoft => "Industrial Loft",
            Self::MidCenturyModern => "Mid-Century Modern",
            Self::Scandinavian => "Scandinavian",
            Self::Cyberpunk => "Cyberpunk",
            Self::LuxuryArtDeco => "Luxury Art Deco",
        }
    }

    /// Matches labels ignoring case, spaces, hyphens and underscores, so
    /// `mid-century-modern` and `MidCenturyModern` both resolve.
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = squash(raw);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|preset| squash(preset.label()) == wanted)
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// One user submission: a room photo plus how it should be restyled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignRequest {
    source_image: RoomImage,
    style_directive: String,
    notes: Option<String>,
}

impl DesignRequest {
    /// Validates and freezes a request. Preset names are normalized to their
    /// canonical label; any other non-blank text is kept verbatim (trimmed).
    pub fn new(
        source_image: RoomImage,
        style_directive: &str,
        notes: Option<&str>,
    ) -> Result<Self, DecorError> {
        let trimmed = style_directive.trim();
        if trimmed.is_empty() {
            return Err(DecorError::InvalidRequest(
                "style directive is blank".to_string(),
            ));
        }
        let style_directive = StylePreset::parse(trimmed)
            .map(|preset| preset.label().to_string())
            .unwrap_or_else(|| trimmed.to_string());
        let notes = notes
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(Self {
            source_image,
            style_directive,
            notes,
        })
    }

    /// Decodes `bytes` as the source photo; undecodable input is an intake error.
    pub fn from_encoded(
        bytes: Vec<u8>,
        style_directive: &str,
        notes: Option<&str>,
    ) -> Result<Self, DecorError> {
        let source_image = RoomImage::decode(bytes)
            .map_err(|err| DecorError::InvalidRequest(format!("{err:#}")))?;
        Self::new(source_image, style_directive, notes)
    }

    pub fn source_image(&self) -> &RoomImage {
        &self.source_image
    }

    pub fn style_directive(&self) -> &str {
        &self.style_directive
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn instruction(&self) -> String {
        compose_design_instruction(&self.style_directive, self.notes.as_deref())
    }
}

pub fn compose_design_instruction(style_directive: &str, notes: Option<&str>) -> String {
    let mut instruction = format!(
        "Redesign the room in this photo, keeping its layout and camera angle. \
         A photorealistic interior design photo of a {} room.",
        style_directive.trim()
    );
    if let Some(notes) = notes
        .map(|value| value.trim().trim_end_matches('.').trim())
        .filter(|value| !value.is_empty())
    {
        instruction.push(' ');
        instruction.push_str(notes);
        instruction.push('.');
    }
    instruction.push_str(" High quality, 8k resolution, architectural photography.");
    instruction
}

/// Output of the synthesis stage. Borrows the request it answers, so it
/// cannot outlive that request's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRoomImage<'a> {
    image: RoomImage,
    request: &'a DesignRequest,
    model: String,
}

impl<'a> GeneratedRoomImage<'a> {
    pub fn new(image: RoomImage, request: &'a DesignRequest, model: impl Into<String>) -> Self {
        Self {
            image,
            request,
            model: model.into(),
        }
    }

    pub fn image(&self) -> &RoomImage {
        &self.image
    }

    pub fn request(&self) -> &'a DesignRequest {
        self.request
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{compose_design_instruction, DesignRequest, StylePreset};
    use crate::design::image::RoomImage;
    use crate::error::DecorError;

    fn room() -> RoomImage {
        RoomImage::from_rgb(RgbImage::from_pixel(8, 6, Rgb([200, 190, 170]))).unwrap()
    }

    #[test]
    fn preset_parse_is_forgiving_about_case_and_separators() {
        assert_eq!(
            StylePreset::parse("mid-century modern"),
            Some(StylePreset::MidCenturyModern)
        );
        assert_eq!(
            StylePreset::parse("MidCenturyModern"),
            Some(StylePreset::MidCenturyModern)
        );
        assert_eq!(
            StylePreset::parse(" luxury_art_deco "),
            Some(StylePreset::LuxuryArtDeco)
        );
        assert_eq!(StylePreset::parse("Japandi"), None);
        assert_eq!(StylePreset::parse("  "), None);
        assert_eq!(StylePreset::ALL.len(), 7);
        assert_eq!(StylePreset::BohemianChic.to_string(), "Bohemian Chic");
    }

    #[test]
    fn request_normalizes_presets_and_keeps_free_text() -> Result<(), DecorError> {
        let preset = DesignRequest::new(room(), "bohemian chic", Some("  "))?;
        assert_eq!(preset.style_directive(), "Bohemian Chic");
        assert_eq!(preset.notes(), None);

        let free = DesignRequest::new(room(), "  Japandi with warm oak  ", Some("add a rug"))?;
        assert_eq!(free.style_directive(), "Japandi with warm oak");
        assert_eq!(free.notes(), Some("add a rug"));
        assert_eq!(free.source_image().width(), 8);
        Ok(())
    }

    #[test]
    fn blank_directive_is_an_intake_error() {
        let err = DesignRequest::new(room(), " \t ", None).unwrap_err();
        assert_eq!(
            err,
            DecorError::InvalidRequest("style directive is blank".to_string())
        );
    }

    #[test]
    fn undecodable_bytes_are_an_intake_error() {
        let err = DesignRequest::from_encoded(b"GIF89a-nope".to_vec(), "Cyberpunk", None)
            .unwrap_err();
        assert!(matches!(err, DecorError::InvalidRequest(_)));

        let err = DesignRequest::from_encoded(Vec::new(), "Cyberpunk", None).unwrap_err();
        assert!(matches!(err, DecorError::InvalidRequest(_)));
    }

    #[test]
    fn instruction_embeds_style_and_notes() {
        let instruction = compose_design_instruction(
            "Industrial Loft",
            Some("Make the sofa dark blue, add a large rug."),
        );
        assert!(instruction.contains("interior design photo of a Industrial Loft room."));
        assert!(instruction.contains(" Make the sofa dark blue, add a large rug. High quality"));
        assert!(!instruction.contains(".."));
        assert!(instruction.ends_with("architectural photography."));

        let bare = compose_design_instruction("Scandinavian", None);
        assert!(bare.contains("Scandinavian room. High quality"));
    }
}
