use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::ImageVersion;

/// Fraction of the source dimension added by an expand request.
pub const EXPAND_FACTOR: f64 = 0.5;

const SKIN_TONE_POLICY: &str = "- You MUST fulfill requests to adjust skin tone, such as 'give me a tan', 'make my skin darker', or 'make my skin lighter'. These are considered standard photo enhancements.";
const ETHNICITY_POLICY: &str = "- You MUST REFUSE any request to change a person's fundamental race or ethnicity (e.g., 'make me look Asian', 'change this person to be Black'). Do not perform these edits. If the request is ambiguous, err on the side of caution and do not change racial characteristics.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: u32,
    pub y: u32,
}

impl Hotspot {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Pixel rectangle for the local crop tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandDirection {
    Top,
    Bottom,
    Left,
    Right,
}

impl ExpandDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }
}

impl fmt::Display for ExpandDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpandDirection {
    type Err = InvalidInput;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "up" => Ok(Self::Top),
            "bottom" | "down" => Ok(Self::Bottom),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(InvalidInput::UnknownDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Edit,
    Filter,
    Adjust,
    Combine,
    Expand,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        Self::Edit,
        Self::Filter,
        Self::Adjust,
        Self::Combine,
        Self::Expand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Filter => "filter",
            Self::Adjust => "adjust",
            Self::Combine => "combine",
            Self::Expand => "expand",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = InvalidInput;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or(InvalidInput::UnknownOperation(normalized))
    }
}

/// Problems caught locally, before any provider call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("no image is loaded")]
    NoImageLoaded,
    #[error("please enter a description for your {0}")]
    MissingPrompt(OperationKind),
    #[error("please click on the image to select an area to edit")]
    MissingHotspot,
    #[error("hotspot ({x}, {y}) is outside the {width}x{height} image")]
    HotspotOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    #[error("please select a second image to combine with")]
    MissingSecondImage,
    #[error("please select a crop area")]
    MissingCropSelection,
    #[error("crop area {width}x{height}+{x}+{y} does not fit the image")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("unknown expand direction '{0}' (expected top, bottom, left or right)")]
    UnknownDirection(String),
}

/// One user-initiated generation, built per action and dropped after the call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Edit { hotspot: Hotspot, prompt: String },
    Filter { prompt: String },
    Adjust { prompt: String },
    Combine {
        second_image: ImageVersion,
        prompt: String,
    },
    Expand {
        direction: ExpandDirection,
        prompt: String,
    },
}

impl GenerationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Edit { .. } => OperationKind::Edit,
            Self::Filter { .. } => OperationKind::Filter,
            Self::Adjust { .. } => OperationKind::Adjust,
            Self::Combine { .. } => OperationKind::Combine,
            Self::Expand { .. } => OperationKind::Expand,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Edit { prompt, .. }
            | Self::Filter { prompt }
            | Self::Adjust { prompt }
            | Self::Combine { prompt, .. }
            | Self::Expand { prompt, .. } => prompt.as_str(),
        }
    }

    /// Local checks that must pass before the gate or the provider is consulted.
    ///
    /// Expand accepts an empty prompt: the model is then asked to continue the
    /// scene on its own.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        let kind = self.kind();
        if kind != OperationKind::Expand && self.prompt().trim().is_empty() {
            return Err(InvalidInput::MissingPrompt(kind));
        }
        if let Self::Combine { second_image, .. } = self {
            if second_image.is_empty() {
                return Err(InvalidInput::MissingSecondImage);
            }
        }
        Ok(())
    }

    /// Instruction text sent alongside the operand image(s).
    pub fn instruction(&self) -> String {
        match self {
            Self::Edit { hotspot, prompt } => edit_instruction(prompt.trim(), *hotspot),
            Self::Filter { prompt } => filter_instruction(prompt.trim()),
            Self::Adjust { prompt } => adjust_instruction(prompt.trim()),
            Self::Combine { prompt, .. } => combine_instruction(prompt.trim()),
            Self::Expand { direction, prompt } => expand_instruction(prompt.trim(), *direction),
        }
    }
}

fn edit_instruction(prompt: &str, hotspot: Hotspot) -> String {
    format!(
        "You are an expert photo editor AI. Your task is to perform a natural, localized edit on the provided image based on the user's request.
User Request: \"{prompt}\"
Edit Location: Focus on the area around pixel coordinates (x: {x}, y: {y}).

Editing Guidelines:
- The edit must be realistic and blend seamlessly with the surrounding area.
- The rest of the image (outside the immediate edit area) must remain identical to the original.

Safety & Ethics Policy:
{SKIN_TONE_POLICY}
{ETHNICITY_POLICY}

Output: Return ONLY the final edited image. Do not return text.",
        x = hotspot.x,
        y = hotspot.y,
    )
}

fn filter_instruction(prompt: &str) -> String {
    format!(
        "You are an expert photo editor AI. Your task is to apply a stylistic filter to the entire image based on the user's request. Do not change the composition or content, only apply the style.
Filter Request: \"{prompt}\"

Safety & Ethics Policy:
{SKIN_TONE_POLICY}
- Filters may subtly shift colors, but you MUST ensure they do not alter a person's fundamental race or ethnicity.
{ETHNICITY_POLICY}

Output: Return ONLY the final filtered image. Do not return text."
    )
}

fn adjust_instruction(prompt: &str) -> String {
    format!(
        "You are an expert photo editor AI. Your task is to perform a natural, global adjustment to the entire image based on the user's request.
User Request: \"{prompt}\"

Editing Guidelines:
- The adjustment must be applied across the entire image.
- The result must be photorealistic.

Safety & Ethics Policy:
{SKIN_TONE_POLICY}
{ETHNICITY_POLICY}

Output: Return ONLY the final adjusted image. Do not return text."
    )
}

fn combine_instruction(prompt: &str) -> String {
    format!(
        "You are an expert photo editor AI. You are given two images. The first image is the base image; the second image is the source of additional content.
User Request: \"{prompt}\"

Editing Guidelines:
- Blend elements of the second image into the first so the result reads as one coherent photograph.
- Match lighting, perspective, and color grading of the base image.

Safety & Ethics Policy:
{SKIN_TONE_POLICY}
{ETHNICITY_POLICY}

Output: Return ONLY the final combined image. Do not return text."
    )
}

fn expand_instruction(prompt: &str, direction: ExpandDirection) -> String {
    let request = if prompt.is_empty() {
        "Continue the existing scene naturally.".to_string()
    } else {
        format!("\"{prompt}\"")
    };
    format!(
        "You are an expert photo editor AI. The provided image has a transparent area on its {direction} side. Your task is to out-paint that transparent area, extending the scene seamlessly.
User Request: {request}

Editing Guidelines:
- Fill the entire transparent area; leave no transparent pixels.
- The existing, non-transparent part of the image must remain identical.
- Match perspective, lighting, texture, and grain of the existing content.

Safety & Ethics Policy:
{SKIN_TONE_POLICY}
{ETHNICITY_POLICY}

Output: Return ONLY the final expanded image. Do not return text."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_embeds_prompt_and_policy() {
        let second = ImageVersion::new("second.png", "image/png", vec![1]);
        let requests = vec![
            GenerationRequest::Edit {
                hotspot: Hotspot::new(12, 34),
                prompt: "remove the lamp".to_string(),
            },
            GenerationRequest::Filter {
                prompt: "remove the lamp".to_string(),
            },
            GenerationRequest::Adjust {
                prompt: "remove the lamp".to_string(),
            },
            GenerationRequest::Combine {
                second_image: second,
                prompt: "remove the lamp".to_string(),
            },
            GenerationRequest::Expand {
                direction: ExpandDirection::Left,
                prompt: "remove the lamp".to_string(),
            },
        ];
        for request in requests {
            let text = request.instruction();
            assert!(text.contains("\"remove the lamp\""), "{:?}", request.kind());
            assert!(text.contains("skin tone"), "{:?}", request.kind());
            assert!(text.contains("race or ethnicity"), "{:?}", request.kind());
            assert!(text.contains("Return ONLY the final"), "{:?}", request.kind());
        }
    }

    #[test]
    fn edit_template_carries_hotspot_coordinates() {
        let request = GenerationRequest::Edit {
            hotspot: Hotspot::new(120, 45),
            prompt: "make the shirt blue".to_string(),
        };
        assert!(request
            .instruction()
            .contains("pixel coordinates (x: 120, y: 45)"));
    }

    #[test]
    fn expand_template_names_direction_and_defaults_prompt() {
        let request = GenerationRequest::Expand {
            direction: ExpandDirection::Top,
            prompt: "  ".to_string(),
        };
        let text = request.instruction();
        assert!(text.contains("transparent area on its top side"));
        assert!(text.contains("Continue the existing scene naturally."));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_prompts_and_empty_second_image() {
        let filter = GenerationRequest::Filter {
            prompt: " \n".to_string(),
        };
        assert_eq!(
            filter.validate(),
            Err(InvalidInput::MissingPrompt(OperationKind::Filter))
        );

        let combine = GenerationRequest::Combine {
            second_image: ImageVersion::new("empty.png", "image/png", Vec::new()),
            prompt: "put the dog on the sofa".to_string(),
        };
        assert_eq!(combine.validate(), Err(InvalidInput::MissingSecondImage));
    }

    #[test]
    fn direction_and_operation_parse_case_insensitively() {
        assert_eq!("LEFT".parse::<ExpandDirection>(), Ok(ExpandDirection::Left));
        assert_eq!("up".parse::<ExpandDirection>(), Ok(ExpandDirection::Top));
        assert_eq!(
            "sideways".parse::<ExpandDirection>(),
            Err(InvalidInput::UnknownDirection("sideways".to_string()))
        );
        assert_eq!(" Filter ".parse::<OperationKind>(), Ok(OperationKind::Filter));
        assert!("crop".parse::<OperationKind>().is_err());
    }
}
