use std::num::NonZeroU32;
use std::path::Path;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::sentiment::{parse_reply, Sentiment, SentimentClassifier};

const SYSTEM_PROMPT: &str = "\
You are the voice assistant of a parking barrier. The assistant just asked the driver a yes/no question. \
Classify the driver's reply: positive if it agrees or confirms, negative if it refuses or denies, neutral otherwise.";

const MAX_TOKENS: usize = 64;

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

pub struct ModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
}

fn build_sampler() -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::temp(0.2),
        LlamaSampler::dist(1234),
    ])
}

// ---------------------------------------------------------------------------
// LlmSentiment: loaded model handle
// ---------------------------------------------------------------------------

/// Sentiment classifier backed by a local llama.cpp model.
pub struct LlmSentiment {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
}

impl LlmSentiment {
    pub fn load(model_path: &Path, config: ModelConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading sentiment model from: {}", model_path.display());
        info!(
            "  config: n_gpu_layers={}, n_ctx={}",
            config.n_gpu_layers, config.n_ctx
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        let n_ctx = NonZeroU32::new(config.n_ctx).context("n_ctx must be > 0")?;
        let ctx = model
            .new_context(backend, LlamaContextParams::default().with_n_ctx(Some(n_ctx)))
            .context("failed to create inference context")?;

        info!("Sentiment model loaded");

        Ok(Self {
            backend,
            model,
            ctx,
            n_ctx: config.n_ctx,
        })
    }

    /// Tokenize the chat, feed the prompt, sample a short reply.
    fn generate(&mut self, reply: &str) -> Result<String> {
        self.ctx.clear_kv_cache();

        let messages = vec![
            LlamaChatMessage::new("system".into(), SYSTEM_PROMPT.into())
                .context("failed to create system message")?,
            LlamaChatMessage::new(
                "user".into(),
                format!(
                    "Driver reply: \"{reply}\"\n\
                     Reply with JSON only: {{\"label\": \"positive|negative|neutral\", \"confidence\": <0..1>}}"
                ),
            )
            .context("failed to create user message")?,
        ];

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &messages, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;
        anyhow::ensure!(!tokens.is_empty(), "empty prompt");

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx
            .decode(&mut batch)
            .context("initial decode failed")?;

        let mut sampler = build_sampler();
        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..MAX_TOKENS {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);
            if output.contains('}') {
                break;
            }

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        debug!("Sentiment raw output: {output}");
        Ok(output)
    }
}

impl SentimentClassifier for LlmSentiment {
    fn classify(&mut self, text: &str) -> Result<Sentiment> {
        let raw = self.generate(text)?;
        parse_reply(&raw)
    }
}
