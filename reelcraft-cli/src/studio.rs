//! Simulated media capabilities.
//!
//! These stand in for the real generation backends so the CLI can run a
//! whole pipeline locally. Each one validates like a real capability and
//! returns plausible data and resource paths.

use async_trait::async_trait;
use reelcraft_core::{
    Capability, CapabilityMetadata, CapabilityRegistry, CapabilityResult, FailureReason,
    ParameterSchema, ParameterSpec, Params, ReplanTrigger,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

type Produce = fn(&Params) -> Result<CapabilityResult, FailureReason>;

/// A capability whose work is a pure function of its arguments.
pub struct SimulatedCapability {
    name: &'static str,
    description: &'static str,
    parameters: ParameterSchema,
    metadata: CapabilityMetadata,
    produce: Produce,
}

impl std::fmt::Debug for SimulatedCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCapability")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Capability for SimulatedCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> ParameterSchema {
        self.parameters.clone()
    }

    fn metadata(&self) -> CapabilityMetadata {
        self.metadata.clone()
    }

    async fn invoke(&self, params: Params) -> Result<CapabilityResult, FailureReason> {
        (self.produce)(&params)
    }
}

/// Registry holding every simulated capability.
pub fn registry(default_timeout: Duration) -> CapabilityRegistry {
    capabilities()
        .into_iter()
        .fold(
            CapabilityRegistry::new().with_default_timeout(default_timeout),
            |registry, capability| registry.with(Arc::new(capability)),
        )
}

pub fn capabilities() -> Vec<SimulatedCapability> {
    vec![
        SimulatedCapability {
            name: "analyze_content",
            description: "Analyze the request to understand content requirements and suggest a processing strategy",
            parameters: ParameterSchema::new()
                .required("user_text", ParameterSpec::string("User's original request text"))
                .optional("context", ParameterSpec::object("Additional context information")),
            metadata: CapabilityMetadata::new().with_slot("content_analysis"),
            produce: analyze_content,
        },
        SimulatedCapability {
            name: "generate_script",
            description: "Generate a video script from the requirements and content analysis",
            parameters: ParameterSchema::new()
                .required(
                    "content_type",
                    ParameterSpec::string("Type of content").with_enum([
                        "educational",
                        "commercial",
                        "entertainment",
                        "news",
                    ]),
                )
                .required(
                    "target_audience",
                    ParameterSpec::string("Target audience for the video").with_default("general"),
                )
                .optional(
                    "style",
                    ParameterSpec::string("Video style and tone").with_default("professional"),
                )
                .optional(
                    "duration",
                    ParameterSpec::number("Target duration in seconds").with_default(60),
                )
                .optional("key_points", ParameterSpec::array("Key points to cover")),
            metadata: CapabilityMetadata::new().with_slot("script"),
            produce: generate_script,
        },
        SimulatedCapability {
            name: "generate_images",
            description: "Generate images for the video scenes",
            parameters: ParameterSchema::new()
                .required("prompts", ParameterSpec::array("Image generation prompts"))
                .optional(
                    "style",
                    ParameterSpec::string("Image style (realistic, cartoon, artistic)")
                        .with_default("realistic"),
                )
                .optional(
                    "resolution",
                    ParameterSpec::string("Image resolution")
                        .with_enum(["1024x1024", "1920x1080", "512x512"])
                        .with_default("1024x1024"),
                ),
            metadata: CapabilityMetadata::new().with_slot("images"),
            produce: generate_images,
        },
        SimulatedCapability {
            name: "generate_voice",
            description: "Generate voice narration with text-to-speech",
            parameters: ParameterSchema::new()
                .required("text", ParameterSpec::string("Text to convert to speech"))
                .optional(
                    "voice_type",
                    ParameterSpec::string("Type of voice")
                        .with_enum(["male", "female", "neutral"])
                        .with_default("neutral"),
                )
                .optional(
                    "language",
                    ParameterSpec::string("Narration language").with_default("en-US"),
                )
                .optional(
                    "speed",
                    ParameterSpec::number("Speech speed (0.5 to 2.0)").with_default(1.0),
                ),
            metadata: CapabilityMetadata::new().with_slot("audio"),
            produce: generate_voice,
        },
        SimulatedCapability {
            name: "check_quality",
            description: "Score the generated content; low scores call for rework",
            parameters: ParameterSchema::new()
                .required(
                    "content_type",
                    ParameterSpec::string("Kind of content to check")
                        .with_enum(["script", "images", "audio", "video"]),
                )
                .optional("content_data", ParameterSpec::object("Content to analyze"))
                .optional(
                    "quality_criteria",
                    ParameterSpec::array("Specific criteria to check"),
                ),
            metadata: CapabilityMetadata::new()
                .with_slot("quality_check")
                .with_replan_trigger(ReplanTrigger::below_default("quality_score")),
            produce: check_quality,
        },
        SimulatedCapability {
            name: "render_video",
            description: "Render the final video from script, images and audio",
            parameters: ParameterSchema::new()
                .required("script", ParameterSpec::object("Script with timing information"))
                .optional("images", ParameterSpec::array("Image assets"))
                .optional("audio", ParameterSpec::object("Audio narration"))
                .optional(
                    "output_format",
                    ParameterSpec::string("Output video format")
                        .with_enum(["mp4", "avi", "mov"])
                        .with_default("mp4"),
                ),
            metadata: CapabilityMetadata::new()
                .with_slot("final_video")
                .with_final_artifact("final_video"),
            produce: render_video,
        },
    ]
}

fn text<'a>(params: &'a Params, key: &str) -> Result<&'a str, FailureReason> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FailureReason::InvalidInput {
            message: format!("'{}' must be a string", key),
        })
}

fn analyze_content(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let request = text(params, "user_text")?;
    Ok(CapabilityResult::success("Content analyzed")
        .with_data("content_type", "educational")
        .with_data("complexity", "medium")
        .with_data("target_audience", "general")
        .with_data("estimated_duration", 90)
        .with_data("key_topics", json!(["main_concept", "examples", "conclusion"]))
        .with_data("recommended_style", "professional")
        .with_data("request_length", request.chars().count()))
}

fn generate_script(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let content_type = text(params, "content_type")?;
    let audience = text(params, "target_audience")?;
    let duration = params.get("duration").cloned().unwrap_or(json!(60));
    Ok(CapabilityResult::success("Script generated")
        .with_data(
            "title",
            format!("Generated {} content for {}", content_type, audience),
        )
        .with_data(
            "structure",
            json!(["introduction", "main_content", "conclusion"]),
        )
        .with_data("estimated_duration", duration)
        .with_data(
            "shots",
            json!([{"id": 1, "scene": "Opening scene", "description": "Introduction to the topic", "duration": 10}]),
        )
        .with_resource("script", "/uploads/scripts/script.json"))
}

fn generate_images(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let prompts = params
        .get("prompts")
        .and_then(Value::as_array)
        .ok_or_else(|| FailureReason::InvalidInput {
            message: "'prompts' must be an array".to_string(),
        })?;
    if prompts.is_empty() {
        return Err(FailureReason::InvalidInput {
            message: "at least one prompt is required".to_string(),
        });
    }
    let style = text(params, "style")?;

    let mut result = CapabilityResult::success(format!("Generated {} images", prompts.len()));
    let mut images = Vec::with_capacity(prompts.len());
    for (index, prompt) in prompts.iter().enumerate() {
        let url = format!("/uploads/images/generated_{}.jpg", index + 1);
        images.push(json!({"id": format!("img_{}", index + 1), "prompt": prompt, "url": url, "style": style}));
        result = result.with_resource(format!("image_{}", index + 1), url);
    }
    Ok(result
        .with_data("count", images.len())
        .with_data("images", Value::Array(images)))
}

fn generate_voice(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let narration = text(params, "text")?;
    let voice_type = text(params, "voice_type")?;
    let length = narration.chars().count();
    let audio_file = format!("/uploads/audio/voice_{}.mp3", length % 1000);
    Ok(CapabilityResult::success("Narration generated")
        .with_data("audio_file", audio_file.clone())
        .with_data("duration", length / 10)
        .with_data("voice_type", voice_type)
        .with_data("text_length", length)
        .with_resource("audio", audio_file))
}

fn check_quality(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let content_type = text(params, "content_type")?;
    let score = 0.87;
    Ok(CapabilityResult::success(format!("Checked {} quality", content_type))
        .with_data("quality_score", score)
        .with_data(
            "quality_scores",
            json!({"accuracy": 0.92, "clarity": 0.85, "engagement": 0.84, "technical": 0.89}),
        )
        .with_data("issues", json!([]))
        .with_data(
            "recommendations",
            json!(["Consider adding more visual elements", "Improve audio synchronization"]),
        )
        .with_data("passed", score >= 0.7))
}

fn render_video(params: &Params) -> Result<CapabilityResult, FailureReason> {
    let format = text(params, "output_format")?;
    let video_file = format!("/uploads/videos/final_video.{}", format);
    Ok(CapabilityResult::success("Video rendered")
        .with_data("video_file", video_file.clone())
        .with_data("duration", 95)
        .with_data("resolution", "1920x1080")
        .with_data("format", format)
        .with_resource("final_video", video_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcraft_core::CancellationToken;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[test]
    fn catalog_lists_every_capability() {
        let registry = registry(Duration::from_secs(30));
        assert_eq!(
            registry.names(),
            vec![
                "analyze_content",
                "check_quality",
                "generate_images",
                "generate_script",
                "generate_voice",
                "render_video",
            ]
        );
    }

    #[tokio::test]
    async fn script_enum_is_enforced() {
        let registry = registry(Duration::from_secs(30));
        let err = registry
            .dispatch(
                "generate_script",
                params(json!({"content_type": "opera", "target_audience": "kids"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENTS");
    }

    #[tokio::test]
    async fn render_fills_default_format() {
        let registry = registry(Duration::from_secs(30));
        let dispatch = registry
            .dispatch(
                "render_video",
                params(json!({"script": {"title": "Tides"}})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(dispatch.result.success);
        assert_eq!(
            dispatch.result.resources["final_video"],
            "/uploads/videos/final_video.mp4"
        );
    }

    #[tokio::test]
    async fn images_register_one_resource_per_prompt() {
        let registry = registry(Duration::from_secs(30));
        let dispatch = registry
            .dispatch(
                "generate_images",
                params(json!({"prompts": ["ocean", "waves"]})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(dispatch.result.resources.len(), 2);
        assert_eq!(dispatch.result.data["count"], 2);
    }

    #[test]
    fn quality_check_declares_replan_trigger() {
        let quality = capabilities()
            .into_iter()
            .find(|capability| capability.name() == "check_quality")
            .unwrap();
        let trigger = quality.metadata().replan_trigger.unwrap();
        assert_eq!(trigger.field, "quality_score");
        assert_eq!(trigger.threshold, 0.7);
    }
}
