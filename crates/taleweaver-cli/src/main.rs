// ============================================================================
// taleweaver — CLI control tool for the personalized story engine
// ============================================================================
// Usage:
//   taleweaver tell --child-id c1 --child-name Ayse --age 6 \
//       --message "sharing matters" --theme hospitality --audio-out story.mp3
//   taleweaver health [--probe]
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taleweaver_core::config::CoreConfig;
use taleweaver_core::embeddings::{Embedder, EmbeddingService};
use taleweaver_core::error::CoreError;
use taleweaver_core::matcher::StoryMatcher;
use taleweaver_core::memory::PersonalizationMemory;
use taleweaver_core::observability::Observability;
use taleweaver_core::orchestrator::{StoryPipeline, StoryPipelineRequest};
use taleweaver_core::providers::{
    GeminiAnalyst, GeminiClient, GeminiGuardian, GeminiStoryteller, OpenAiSpeech,
};

/// Personalized story engine control tool
#[derive(Parser)]
#[command(name = "taleweaver", version, about = "Drive the story pipeline and inspect engine health")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a personalized story end to end
    Tell {
        /// Stable child identifier used for personalization memory
        #[arg(long)]
        child_id: String,

        /// Child's name, woven into the story
        #[arg(long)]
        child_name: String,

        /// Child's age in years
        #[arg(long)]
        age: u32,

        /// Parent's value message for the story to express
        #[arg(long)]
        message: String,

        /// Cultural theme of the story
        #[arg(long, default_value = "hospitality")]
        theme: String,

        /// Write the narrated story audio (mp3) to this file
        #[arg(long)]
        audio_out: Option<String>,

        /// Skip indexing the story for similarity search
        #[arg(long)]
        no_index: bool,

        /// Print pipeline metrics after the run
        #[arg(long)]
        show_health: bool,
    },

    /// Check engine configuration and provider health
    Health {
        /// Probe the embeddings backend with a live call
        #[arg(long)]
        probe: bool,
    },
}

struct Engine {
    embeddings: Arc<EmbeddingService>,
    memory: Arc<PersonalizationMemory>,
    matcher: Arc<StoryMatcher>,
    observability: Arc<Observability>,
    pipeline: StoryPipeline,
}

fn build_engine(config: &CoreConfig) -> Engine {
    let embeddings = Arc::new(EmbeddingService::new_custom(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.embedding_model.clone(),
    ));
    let memory = Arc::new(PersonalizationMemory::new(
        embeddings.clone(),
        config.memory.clone(),
    ));
    let matcher = Arc::new(StoryMatcher::new(embeddings.clone(), config.story_capacity));
    let observability = Arc::new(Observability::new(config.metrics_capacity));

    let gemini = || {
        GeminiClient::new_custom(
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            config.gemini_model.clone(),
        )
    };
    let pipeline = StoryPipeline::new(
        memory.clone(),
        matcher.clone(),
        observability.clone(),
        Arc::new(GeminiStoryteller::with_client(gemini())),
        Arc::new(GeminiGuardian::with_client(gemini())),
        Arc::new(GeminiAnalyst::with_client(gemini())),
        Arc::new(OpenAiSpeech::new_custom(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.tts_model.clone(),
            config.tts_voice.clone(),
        )),
    );

    Engine {
        embeddings,
        memory,
        matcher,
        observability,
        pipeline,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taleweaver=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = CoreConfig::from_env().context("incomplete engine configuration")?;
    let engine = build_engine(&config);

    match cli.command {
        Commands::Tell {
            child_id,
            child_name,
            age,
            message,
            theme,
            audio_out,
            no_index,
            show_health,
        } => {
            let request = StoryPipelineRequest {
                child_id,
                child_name,
                child_age: age,
                parent_message: message,
                cultural_theme: theme,
                index_story: !no_index,
            };
            cmd_tell(&engine, &request, audio_out.as_deref()).await?;
            if show_health {
                print_health(&engine);
            }
            Ok(())
        }
        Commands::Health { probe } => cmd_health(&engine, &config, probe).await,
    }
}

async fn cmd_tell(
    engine: &Engine,
    request: &StoryPipelineRequest,
    audio_out: Option<&str>,
) -> Result<()> {
    match engine.pipeline.run(request).await {
        Ok(bundle) => {
            println!("=== {} ===", bundle.story.title);
            println!();
            println!("{}", bundle.story.content);
            println!();
            println!("Moral lesson:  {}", bundle.story.moral_lesson);
            println!(
                "Validation:    overall {:.1}  safety {:.1}  age {:.1}  cultural {:.1}",
                bundle.validation.overall_score,
                bundle.validation.safety_score,
                bundle.validation.age_appropriate_score,
                bundle.validation.cultural_alignment_score,
            );
            println!("Learning style: {}", bundle.analysis.learning_style);
            if !bundle.analysis.next_story_themes.is_empty() {
                println!(
                    "Next themes:    {}",
                    bundle.analysis.next_story_themes.join(", ")
                );
            }
            println!("Insights:       {}", serde_json::to_string(&bundle.insights)?);

            if let Some(path) = audio_out {
                tokio::fs::write(path, &bundle.audio)
                    .await
                    .with_context(|| format!("failed to write audio to {path}"))?;
                println!("Audio written to {path} ({} bytes)", bundle.audio.len());
            }
            Ok(())
        }
        Err(CoreError::SafetyRejection { concerns }) => {
            println!("Story rejected by the safety gate:");
            for concern in &concerns {
                println!("  - {concern}");
            }
            Ok(())
        }
        Err(err) => Err(err).context("story pipeline failed"),
    }
}

async fn cmd_health(engine: &Engine, config: &CoreConfig, probe: bool) -> Result<()> {
    println!("=== Taleweaver Engine Health ===");
    println!("Generation model: {} ({})", config.gemini_model, config.gemini_base_url);
    println!("Embedding model:  {} ({})", config.embedding_model, config.openai_base_url);
    println!("TTS:              {} voice={}", config.tts_model, config.tts_voice);
    println!();

    if probe {
        let started = Instant::now();
        match engine.embeddings.embed("merhaba dünya").await {
            Ok(embedding) => println!(
                "Embeddings probe: ok ({} dims, {} ms)",
                embedding.len(),
                started.elapsed().as_millis()
            ),
            Err(err) => println!("Embeddings probe: FAILED ({err})"),
        }
        println!();
    }

    print_health(engine);
    Ok(())
}

fn print_health(engine: &Engine) {
    println!("Circuit breakers:");
    for (name, status) in engine.pipeline.breaker_statuses() {
        println!("  {:<12} {:?} ({} failures)", name, status.state, status.failures);
    }
    let embeddings = engine.embeddings.breaker_status();
    println!(
        "  {:<12} {:?} ({} failures)",
        "embeddings", embeddings.state, embeddings.failures
    );
    println!();

    let interactions = engine.memory.vector_stats();
    let stories = engine.matcher.stats();
    println!(
        "Interaction index: {}/{} documents ({}%)",
        interactions.total_documents, interactions.max_capacity, interactions.utilization_percent
    );
    println!("Tracked children:  {}", engine.memory.profile_count());
    println!(
        "Story index:       {}/{} documents ({}%)",
        stories.total_documents, stories.max_capacity, stories.utilization_percent
    );
    println!();

    match serde_json::to_string_pretty(&engine.observability.system_health()) {
        Ok(health) => println!("System health (last 5 minutes):\n{health}"),
        Err(err) => println!("System health unavailable: {err}"),
    }
}
