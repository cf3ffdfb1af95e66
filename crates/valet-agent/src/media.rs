// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media enrichment: images become text descriptions via the vision
//! endpoint, audio becomes transcripts. Any failure degrades to the
//! original message content -- enrichment is never fatal.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};
use valet_config::model::MediaSettings;
use valet_core::types::{IncomingMessage, MediaKind};
use valet_core::LanguageModel;

/// Vision prompt used for image description.
const VISION_PROMPT: &str = "Describe this image in detail. Include any text visible.";

/// Enriches message content using vision and transcription models.
pub struct MediaEnricher {
    model: Arc<dyn LanguageModel>,
    settings: MediaSettings,
    transcription_model: String,
}

impl MediaEnricher {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        settings: MediaSettings,
        transcription_model: String,
    ) -> Self {
        Self {
            model,
            settings,
            transcription_model,
        }
    }

    /// Produces the enriched content for a message.
    ///
    /// `downloaded` carries the media bytes and MIME type when the channel
    /// could fetch them; `None` skips enrichment.
    pub async fn enrich(
        &self,
        msg: &IncomingMessage,
        downloaded: Option<(Vec<u8>, String)>,
    ) -> String {
        let Some(media) = &msg.media else {
            return msg.content.clone();
        };
        let Some((data, mime)) = downloaded else {
            return msg.content.clone();
        };

        match media.kind {
            MediaKind::Image => self.enrich_image(msg, data, mime).await,
            MediaKind::Audio => self.enrich_audio(msg, data, media.filename.clone()).await,
            _ => msg.content.clone(),
        }
    }

    async fn enrich_image(&self, msg: &IncomingMessage, data: Vec<u8>, mime: String) -> String {
        if !self.settings.vision_enabled {
            return msg.content.clone();
        }
        if data.len() as u64 > self.settings.max_image_size {
            warn!(
                size = data.len(),
                max = self.settings.max_image_size,
                "image too large to process"
            );
            return msg.content.clone();
        }

        let encoded = BASE64.encode(&data);
        let mime = if mime.is_empty() {
            "image/jpeg".to_string()
        } else {
            mime
        };

        match self
            .model
            .describe_image(&encoded, &mime, VISION_PROMPT, &self.settings.vision_detail)
            .await
        {
            Ok(desc) => {
                info!(desc_len = desc.len(), "image described via vision endpoint");
                if msg.content.is_empty() {
                    format!("[Image: {desc}]")
                } else {
                    format!("[Image: {desc}]\n\n{}", msg.content)
                }
            }
            Err(e) => {
                warn!(error = %e, "vision description failed");
                msg.content.clone()
            }
        }
    }

    async fn enrich_audio(
        &self,
        msg: &IncomingMessage,
        data: Vec<u8>,
        filename: Option<String>,
    ) -> String {
        if !self.settings.transcription_enabled {
            return msg.content.clone();
        }
        if data.len() as u64 > self.settings.max_audio_size {
            warn!(
                size = data.len(),
                max = self.settings.max_audio_size,
                "audio too large to process"
            );
            return msg.content.clone();
        }

        let filename = filename.unwrap_or_else(|| "audio.ogg".to_string());
        match self
            .model
            .transcribe_audio(&data, &filename, &self.transcription_model)
            .await
        {
            Ok(transcript) => {
                info!(transcript_len = transcript.len(), "audio transcribed");
                msg.content
                    .replace("[audio]", &transcript)
                    .replace("[voice note]", &transcript)
            }
            Err(e) => {
                warn!(error = %e, "audio transcription failed");
                msg.content.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use valet_core::traits::model::{CompletionOutcome, CompletionRequest};
    use valet_core::types::{MediaRef, TokenUsage};
    use valet_core::ValetError;

    struct FixedModel {
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for FixedModel {
        fn default_model(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionOutcome, ValetError> {
            Ok(CompletionOutcome {
                content: "ok".into(),
                tool_calls: Vec::new(),
                usage: TokenUsage::default(),
                model_used: "fixed".into(),
            })
        }

        async fn describe_image(
            &self,
            _image_b64: &str,
            _mime: &str,
            _prompt: &str,
            _detail: &str,
        ) -> Result<String, ValetError> {
            if self.fail {
                Err(ValetError::LlmFatal("vision down".into()))
            } else {
                Ok("a cat on a keyboard".into())
            }
        }

        async fn transcribe_audio(
            &self,
            _data: &[u8],
            _filename: &str,
            _model: &str,
        ) -> Result<String, ValetError> {
            if self.fail {
                Err(ValetError::LlmFatal("asr down".into()))
            } else {
                Ok("buy milk tomorrow".into())
            }
        }
    }

    fn message(kind: MediaKind, content: &str) -> IncomingMessage {
        IncomingMessage {
            channel: "test".into(),
            chat_id: "1".into(),
            sender: "+1".into(),
            id: "m1".into(),
            content: content.into(),
            media: Some(MediaRef {
                kind,
                filename: None,
                size: 3,
            }),
            is_group: false,
            timestamp: Utc::now(),
        }
    }

    fn enricher(fail: bool) -> MediaEnricher {
        MediaEnricher::new(
            Arc::new(FixedModel { fail }),
            MediaSettings::default(),
            "whisper-1".into(),
        )
    }

    #[tokio::test]
    async fn image_becomes_description_prefix() {
        let enricher = enricher(false);
        let msg = message(MediaKind::Image, "what is this?");
        let enriched = enricher.enrich(&msg, Some((vec![1, 2, 3], "image/png".into()))).await;
        assert_eq!(enriched, "[Image: a cat on a keyboard]\n\nwhat is this?");
    }

    #[tokio::test]
    async fn image_without_caption_is_description_only() {
        let enricher = enricher(false);
        let msg = message(MediaKind::Image, "");
        let enriched = enricher.enrich(&msg, Some((vec![1], "image/png".into()))).await;
        assert_eq!(enriched, "[Image: a cat on a keyboard]");
    }

    #[tokio::test]
    async fn audio_placeholder_is_substituted() {
        let enricher = enricher(false);
        let msg = message(MediaKind::Audio, "[voice note] from earlier");
        let enriched = enricher.enrich(&msg, Some((vec![1], "audio/ogg".into()))).await;
        assert_eq!(enriched, "buy milk tomorrow from earlier");
    }

    #[tokio::test]
    async fn failures_fall_back_to_original_content() {
        let enricher = enricher(true);
        let img = message(MediaKind::Image, "caption stays");
        assert_eq!(
            enricher.enrich(&img, Some((vec![1], "image/png".into()))).await,
            "caption stays"
        );
        let audio = message(MediaKind::Audio, "[audio]");
        assert_eq!(
            enricher.enrich(&audio, Some((vec![1], "audio/ogg".into()))).await,
            "[audio]"
        );
    }

    #[tokio::test]
    async fn oversized_media_is_skipped() {
        let model = Arc::new(FixedModel { fail: false });
        let mut settings = MediaSettings::default();
        settings.max_image_size = 2;
        let enricher = MediaEnricher::new(model, settings, "whisper-1".into());
        let msg = message(MediaKind::Image, "too big");
        let enriched = enricher
            .enrich(&msg, Some((vec![1, 2, 3, 4], "image/png".into())))
            .await;
        assert_eq!(enriched, "too big");
    }

    #[tokio::test]
    async fn no_media_passes_through() {
        let enricher = enricher(false);
        let mut msg = message(MediaKind::Image, "plain");
        msg.media = None;
        assert_eq!(enricher.enrich(&msg, None).await, "plain");
    }
}
