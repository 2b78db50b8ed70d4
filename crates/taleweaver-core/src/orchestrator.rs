//! ============================================================================
//! Story Pipeline - Multi-stage orchestration over the AI agents
//! ============================================================================
//! Sequential pipeline:
//!
//! ```text
//! Personalize -> Generate -> Validate -> Analyze -> Synthesize -> Done
//!                                |
//!                             Rejected
//! ```
//!
//! Every provider call runs behind its own circuit breaker and deadline and
//! is bracketed by metrics. The safety gate is the only stage that can reject
//! approved-looking content; analysis failures degrade to a deterministic
//! age-bracket profile instead of aborting.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::embeddings::estimate_tokens;
use crate::error::CoreError;
use crate::matcher::{StoryMatcher, StoryRecord};
use crate::memory::{Interaction, Personalization, PersonalizationMemory};
use crate::observability::Observability;
use crate::providers::{
    age_bracket_analysis, AnalysisRequest, ContentValidation, ContentValidator,
    DevelopmentAnalysis, DevelopmentAnalyst, PersonalizedStory, SpeechSynthesizer,
    StoryGenerator, StoryRequest,
};
use crate::resilience::{
    sanitize_prompt_input, with_timeout, BreakerStatus, CircuitBreaker, AI_TIMEOUT,
    MAX_PROMPT_LENGTH, PIPELINE_TIMEOUT,
};

/// Consecutive failures before a provider's breaker opens.
const BREAKER_THRESHOLD: u32 = 5;

/// Cooldown before an open breaker lets a probe call through.
const BREAKER_RESET: Duration = Duration::from_secs(60);

/// Length cap for sanitized short fields (name, theme).
const MAX_SHORT_FIELD: usize = 100;

/// A request to generate one personalized story.
#[derive(Debug, Clone)]
pub struct StoryPipelineRequest {
    pub child_id: String,
    pub child_name: String,
    pub child_age: u32,
    /// Parent's value message, untrusted free text.
    pub parent_message: String,
    pub cultural_theme: String,
    /// Index the approved story for later similarity search.
    pub index_story: bool,
}

/// Summary of how the pipeline personalized and scored the run.
#[derive(Debug, Clone, Serialize)]
pub struct StoryInsights {
    pub personalization_applied: bool,
    pub overall_score: f32,
    pub safety_score: f32,
    pub traits: Vec<String>,
    pub audio_bytes: usize,
}

/// Everything a successful pipeline run produces.
#[derive(Debug, Clone, Serialize)]
pub struct StoryBundle {
    pub story_id: String,
    pub story: PersonalizedStory,
    pub validation: ContentValidation,
    pub analysis: DevelopmentAnalysis,
    /// Narration audio (mp3 bytes). Not serialized with the bundle.
    #[serde(skip_serializing)]
    pub audio: Vec<u8>,
    pub personalization: Personalization,
    pub insights: StoryInsights,
}

/// The orchestrator. Owns one circuit breaker per provider, shared across
/// every concurrent run.
pub struct StoryPipeline {
    memory: Arc<PersonalizationMemory>,
    matcher: Arc<StoryMatcher>,
    observability: Arc<Observability>,
    generator: Arc<dyn StoryGenerator>,
    validator: Arc<dyn ContentValidator>,
    analyst: Arc<dyn DevelopmentAnalyst>,
    speech: Arc<dyn SpeechSynthesizer>,
    storyteller_breaker: CircuitBreaker,
    guardian_breaker: CircuitBreaker,
    psychologist_breaker: CircuitBreaker,
    voice_breaker: CircuitBreaker,
}

impl StoryPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory: Arc<PersonalizationMemory>,
        matcher: Arc<StoryMatcher>,
        observability: Arc<Observability>,
        generator: Arc<dyn StoryGenerator>,
        validator: Arc<dyn ContentValidator>,
        analyst: Arc<dyn DevelopmentAnalyst>,
        speech: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let breaker = |name: &str| CircuitBreaker::new(name, BREAKER_THRESHOLD, BREAKER_RESET);
        Self {
            memory,
            matcher,
            observability,
            generator,
            validator,
            analyst,
            speech,
            storyteller_breaker: breaker("storyteller"),
            guardian_breaker: breaker("guardian"),
            psychologist_breaker: breaker("psychologist"),
            voice_breaker: breaker("voice"),
        }
    }

    /// Run the full pipeline for one story request.
    pub async fn run(&self, request: &StoryPipelineRequest) -> Result<StoryBundle, CoreError> {
        with_timeout(
            self.run_stages(request),
            PIPELINE_TIMEOUT,
            "story pipeline timeout",
        )
        .await
    }

    /// Breaker states for health reporting.
    pub fn breaker_statuses(&self) -> Vec<(&'static str, BreakerStatus)> {
        vec![
            ("storyteller", self.storyteller_breaker.status()),
            ("guardian", self.guardian_breaker.status()),
            ("psychologist", self.psychologist_breaker.status()),
            ("voice", self.voice_breaker.status()),
        ]
    }

    async fn run_stages(&self, request: &StoryPipelineRequest) -> Result<StoryBundle, CoreError> {
        info!(
            child = %request.child_name,
            theme = %request.cultural_theme,
            "story pipeline started"
        );

        // Personalize. Recall never blocks generation; unknown children get
        // empty defaults.
        let personalization = self.memory.get_personalization(&request.child_id);

        // Generate. Untrusted free text is sanitized before it reaches the
        // prompt; a generation failure aborts the run.
        let story_request = StoryRequest {
            child_name: sanitize_prompt_input(&request.child_name, MAX_SHORT_FIELD),
            child_age: request.child_age,
            parent_message: sanitize_prompt_input(&request.parent_message, MAX_PROMPT_LENGTH),
            cultural_theme: sanitize_prompt_input(&request.cultural_theme, MAX_SHORT_FIELD),
            personalization: personalization.clone(),
        };
        let story = self
            .observability
            .track_operation(
                "generate_story",
                Some("storyteller"),
                self.storyteller_breaker.execute(with_timeout(
                    self.generator.generate(&story_request),
                    AI_TIMEOUT,
                    "story generation timeout",
                )),
                |story: &PersonalizedStory| Some(estimate_tokens(&story.content)),
            )
            .await?;

        // Validate. The gate can force-reject regardless of the provider's
        // own verdict; rejection terminates the run before any write-back.
        let mut validation = self
            .observability
            .track_operation(
                "validate_story",
                Some("guardian"),
                self.guardian_breaker.execute(with_timeout(
                    self.validator.validate(
                        &story.content,
                        request.child_age,
                        &personalization.personality_traits,
                    ),
                    AI_TIMEOUT,
                    "content validation timeout",
                )),
                |_| Some(estimate_tokens(&story.content)),
            )
            .await?;
        validation.enforce_score_floor();
        if !validation.approved {
            warn!(concerns = ?validation.concerns, "story rejected by safety gate");
            return Err(CoreError::SafetyRejection {
                concerns: validation.concerns,
            });
        }

        // Analyze. Failure degrades to the age-bracket profile.
        let analysis_request = AnalysisRequest {
            child_name: request.child_name.clone(),
            child_age: request.child_age,
            interactions: personalization.recent_interactions.clone(),
            behavior_patterns: personalization.personality_traits.clone(),
        };
        let analysis = match self
            .observability
            .track_operation(
                "analyze_development",
                Some("psychologist"),
                self.psychologist_breaker.execute(with_timeout(
                    self.analyst.analyze(&analysis_request),
                    AI_TIMEOUT,
                    "development analysis timeout",
                )),
                |_| None,
            )
            .await
        {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(error = %err, "analysis failed; using age-bracket fallback");
                age_bracket_analysis(request.child_age)
            }
        };

        // Synthesize. Approved content without audio is a technical failure.
        let audio = self
            .observability
            .track_operation(
                "synthesize_speech",
                Some("voice"),
                self.voice_breaker.execute(with_timeout(
                    self.speech.synthesize(&story.content),
                    AI_TIMEOUT,
                    "speech synthesis timeout",
                )),
                |_| Some(estimate_tokens(&story.content)),
            )
            .await?;

        // Done. Feed the interaction back into memory and optionally index
        // the story; both are best-effort by construction.
        let story_id = Uuid::new_v4().to_string();
        self.memory
            .add_interaction(
                &request.child_id,
                Interaction::new(
                    story.title.clone(),
                    "new story generated",
                    vec![request.cultural_theme.clone()],
                ),
            )
            .await;

        if request.index_story {
            let record = StoryRecord {
                id: story_id.clone(),
                title: story.title.clone(),
                content: story.content.clone(),
                child_age: request.child_age,
                theme: request.cultural_theme.clone(),
                values: story.cultural_elements.clone(),
            };
            if let Err(err) = self.matcher.index_story(&record).await {
                warn!(error = %err, "failed to index generated story");
            }
        }

        let insights = StoryInsights {
            personalization_applied: !personalization.recent_interactions.is_empty(),
            overall_score: validation.overall_score,
            safety_score: validation.safety_score,
            traits: personalization.personality_traits.clone(),
            audio_bytes: audio.len(),
        };

        info!(%story_id, title = %story.title, "story pipeline completed");
        Ok(StoryBundle {
            story_id,
            story,
            validation,
            analysis,
            audio,
            personalization,
            insights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::embeddings::Embedder;
    use crate::memory::MemoryConfig;
    use crate::observability::OperationStatus;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            let mut v = [0.0f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += b as f32 / 255.0;
            }
            Ok(v.to_vec())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    struct MockGenerator {
        fail: bool,
    }

    #[async_trait]
    impl StoryGenerator for MockGenerator {
        async fn generate(&self, request: &StoryRequest) -> Result<PersonalizedStory, CoreError> {
            if self.fail {
                return Err(CoreError::provider("storyteller", "backend down"));
            }
            Ok(PersonalizedStory {
                title: format!("{} and the Guest", request.child_name),
                content: "Once upon a time, a guest knocked on the door.".to_string(),
                moral_lesson: "Guests bring joy".to_string(),
                personalized_elements: vec!["uses her name".to_string()],
                cultural_elements: vec!["hospitality".to_string()],
                age_appropriate: true,
                emotional_tone: Some("warm".to_string()),
                interactive_cues: vec![],
            })
        }
    }

    struct MockValidator {
        validation: ContentValidation,
    }

    impl MockValidator {
        fn approving() -> Self {
            Self {
                validation: ContentValidation {
                    approved: true,
                    overall_score: 8.5,
                    age_appropriate_score: 9.0,
                    cultural_alignment_score: 8.0,
                    safety_score: 9.0,
                    educational_value: 7.5,
                    concerns: vec![],
                    improvements: vec![],
                    strengths: vec!["gentle tone".to_string()],
                },
            }
        }

        fn rejecting() -> Self {
            let mut mock = Self::approving();
            mock.validation.approved = false;
            mock.validation.concerns = vec!["too scary".to_string()];
            mock
        }
    }

    #[async_trait]
    impl ContentValidator for MockValidator {
        async fn validate(
            &self,
            _content: &str,
            _child_age: u32,
            _personality_traits: &[String],
        ) -> Result<ContentValidation, CoreError> {
            Ok(self.validation.clone())
        }
    }

    struct MockAnalyst {
        fail: bool,
    }

    #[async_trait]
    impl DevelopmentAnalyst for MockAnalyst {
        async fn analyze(
            &self,
            _request: &AnalysisRequest,
        ) -> Result<DevelopmentAnalysis, CoreError> {
            if self.fail {
                return Err(CoreError::provider("psychologist", "backend down"));
            }
            Ok(DevelopmentAnalysis {
                developmental_assessment: "thriving".to_string(),
                learning_style: "from the analyst".to_string(),
                emotional_needs: vec![],
                parent_recommendations: vec![],
                next_story_themes: vec![],
                cultural_readiness: String::new(),
                engagement_tips: vec![],
                developmental_goals: vec![],
            })
        }
    }

    struct MockSpeech {
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSpeech {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, CoreError> {
            if self.fail {
                return Err(CoreError::provider("voice", "backend down"));
            }
            Ok(vec![1, 2, 3])
        }
    }

    struct Harness {
        pipeline: StoryPipeline,
        memory: Arc<PersonalizationMemory>,
        matcher: Arc<StoryMatcher>,
        observability: Arc<Observability>,
    }

    fn harness(
        generator: MockGenerator,
        validator: MockValidator,
        analyst: MockAnalyst,
        speech: MockSpeech,
    ) -> Harness {
        let embedder = Arc::new(StubEmbedder);
        let memory = Arc::new(PersonalizationMemory::new(
            embedder.clone(),
            MemoryConfig::default(),
        ));
        let matcher = Arc::new(StoryMatcher::new(embedder, 100));
        let observability = Arc::new(Observability::default());
        let pipeline = StoryPipeline::new(
            memory.clone(),
            matcher.clone(),
            observability.clone(),
            Arc::new(generator),
            Arc::new(validator),
            Arc::new(analyst),
            Arc::new(speech),
        );
        Harness {
            pipeline,
            memory,
            matcher,
            observability,
        }
    }

    fn request() -> StoryPipelineRequest {
        StoryPipelineRequest {
            child_id: "child-1".to_string(),
            child_name: "Ayse".to_string(),
            child_age: 6,
            parent_message: "sharing matters".to_string(),
            cultural_theme: "hospitality".to_string(),
            index_story: true,
        }
    }

    #[tokio::test]
    async fn test_happy_path_produces_bundle_and_writes_back() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        let bundle = h.pipeline.run(&request()).await.unwrap();
        assert_eq!(bundle.story.title, "Ayse and the Guest");
        assert_eq!(bundle.audio, vec![1, 2, 3]);
        assert_eq!(bundle.analysis.learning_style, "from the analyst");
        assert_eq!(bundle.insights.audio_bytes, 3);
        assert!(!bundle.insights.personalization_applied);

        // Feedback loop wrote the interaction and indexed the story.
        let personalization = h.memory.get_personalization("child-1");
        assert_eq!(personalization.recent_interactions.len(), 1);
        assert_eq!(
            personalization.recent_interactions[0].story,
            "Ayse and the Guest"
        );
        assert_eq!(personalization.preferences, vec!["hospitality"]);
        assert_eq!(h.matcher.stats().total_documents, 1);
    }

    #[tokio::test]
    async fn test_rejection_terminates_without_write_back() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::rejecting(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        let err = h.pipeline.run(&request()).await.unwrap_err();
        match err {
            CoreError::SafetyRejection { concerns } => {
                assert_eq!(concerns, vec!["too scary"]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        assert!(h
            .memory
            .get_personalization("child-1")
            .recent_interactions
            .is_empty());
        assert_eq!(h.matcher.stats().total_documents, 0);
    }

    #[tokio::test]
    async fn test_low_safety_score_forces_rejection() {
        let mut validator = MockValidator::approving();
        validator.validation.safety_score = 2.0;

        let h = harness(
            MockGenerator { fail: false },
            validator,
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        let err = h.pipeline.run(&request()).await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_generation_failure_aborts() {
        let h = harness(
            MockGenerator { fail: true },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        let err = h.pipeline.run(&request()).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
        assert!(h
            .memory
            .get_personalization("child-1")
            .recent_interactions
            .is_empty());
    }

    #[tokio::test]
    async fn test_analyst_failure_falls_back_to_age_bracket() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: true },
            MockSpeech { fail: false },
        );

        let bundle = h.pipeline.run(&request()).await.unwrap();
        assert_eq!(
            bundle.analysis.learning_style,
            age_bracket_analysis(6).learning_style
        );
    }

    #[tokio::test]
    async fn test_speech_failure_aborts_without_write_back() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: true },
        );

        let err = h.pipeline.run(&request()).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
        assert!(h
            .memory
            .get_personalization("child-1")
            .recent_interactions
            .is_empty());
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_stage() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        h.pipeline.run(&request()).await.unwrap();

        let recent = h.observability.recent_metrics(10);
        let operations: Vec<&str> = recent.iter().map(|m| m.operation.as_str()).collect();
        assert_eq!(
            operations,
            vec![
                "synthesize_speech",
                "analyze_development",
                "validate_story",
                "generate_story"
            ]
        );
        assert!(recent
            .iter()
            .all(|m| m.status == OperationStatus::Success));
    }

    #[tokio::test]
    async fn test_second_run_carries_personalization() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        h.pipeline.run(&request()).await.unwrap();
        let bundle = h.pipeline.run(&request()).await.unwrap();

        assert!(bundle.insights.personalization_applied);
        assert_eq!(bundle.personalization.recent_interactions.len(), 1);
    }

    #[test]
    fn test_breaker_statuses_named_per_provider() {
        let h = harness(
            MockGenerator { fail: false },
            MockValidator::approving(),
            MockAnalyst { fail: false },
            MockSpeech { fail: false },
        );

        let names: Vec<&str> = h
            .pipeline
            .breaker_statuses()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["storyteller", "guardian", "psychologist", "voice"]);
    }
}
