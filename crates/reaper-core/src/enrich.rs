//! AI enrichment of extracted page data, with a per-model cost estimate.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::classify::EnrichmentErrorClassifier;
use crate::error::AppError;
use crate::models::EnrichmentResult;
use crate::retry::RetryLoop;
use crate::traits::InferenceBackend;
use crate::util::bounded;

pub const DEFAULT_MODEL: &str = "gemini-pro";

pub const TEMPERATURE: f32 = 0.1;
pub const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Hard ceiling on a single inference call.
pub const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub output: f64,
}

pub const MODEL_RATES: &[(&str, ModelRates)] = &[
    ("gemini-pro", ModelRates { input: 0.000125, output: 0.000375 }),
    ("gemini-1.5-pro", ModelRates { input: 0.00125, output: 0.00375 }),
    ("gemini-1.5-flash", ModelRates { input: 0.000125, output: 0.000375 }),
];

/// Rates for `model`, or the default model's rates when it is unlisted.
pub fn rates_for(model: &str) -> ModelRates {
    MODEL_RATES
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| MODEL_RATES.iter().find(|(name, _)| *name == DEFAULT_MODEL))
        .map(|(_, rates)| *rates)
        .unwrap_or(ModelRates { input: 0.0, output: 0.0 })
}

/// Models with a known price, in table order.
pub fn known_models() -> Vec<&'static str> {
    MODEL_RATES.iter().map(|(name, _)| *name).collect()
}

/// Rough count: one token per four characters.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / 4
}

pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let rates = rates_for(model);
    (input_tokens as f64 / 1000.0) * rates.input + (output_tokens as f64 / 1000.0) * rates.output
}

/// Instruction, then the data as indented JSON, then the reply-format request.
pub fn build_prompt<T: Serialize + ?Sized>(instruction: &str, data: &T) -> Result<String, AppError> {
    let data_json = serde_json::to_string_pretty(data)?;
    Ok(format!(
        "\n{instruction}\n\nRaw extracted data:\n{data_json}\n\n\
         Please analyze and enrich this data according to the instructions above. \n\
         Return your response as valid JSON.\n"
    ))
}

/// Parse the model reply as JSON, or wrap the raw text when it is not.
pub fn parse_reply(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        serde_json::json!({
            "analysis": text,
            "raw_response": true,
        })
    })
}

/// Sends extracted data plus a job's instruction to a model.
#[derive(Clone)]
pub struct EnrichmentClient<I: InferenceBackend> {
    backend: I,
    backoff: BackoffPolicy,
    classifier: EnrichmentErrorClassifier,
    max_retries: u32,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<I: InferenceBackend> EnrichmentClient<I> {
    pub fn new(backend: I) -> Self {
        Self {
            backend,
            backoff: BackoffPolicy::ENRICHMENT,
            classifier: EnrichmentErrorClassifier,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: ENRICHMENT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// One inference call. Failures are captured in the result's `error`.
    pub async fn execute<T: Serialize + Sync + ?Sized>(
        &self,
        data: &T,
        prompt: &str,
        model: &str,
    ) -> EnrichmentResult {
        let clock = Instant::now();

        let outcome = tokio::select! {
            r = self.attempt(data, prompt, model) => r,
            () = self.cancel.cancelled() => Err(AppError::Cancelled),
        };

        match outcome {
            Ok((data, input_tokens, output_tokens)) => {
                let cost = estimate_cost(model, input_tokens, output_tokens);
                tracing::info!(model, cost, input_tokens, output_tokens, "Enrichment completed");
                EnrichmentResult {
                    data: Some(data),
                    model_used: model.to_string(),
                    input_tokens,
                    output_tokens,
                    cost,
                    duration: clock.elapsed(),
                    error: None,
                    attempts: Vec::new(),
                }
            }
            Err(err) => {
                tracing::error!(model, error = %err, "Enrichment failed");
                EnrichmentResult::failed(model, err.to_string(), clock.elapsed())
            }
        }
    }

    /// Retries only rate-limit and quota failures, with the enrichment
    /// backoff between attempts.
    pub async fn execute_with_retries<T: Serialize + Sync + ?Sized>(
        &self,
        data: &T,
        prompt: &str,
        model: &str,
    ) -> EnrichmentResult {
        RetryLoop::new(
            "enrichment",
            self.backoff,
            &self.classifier,
            self.max_retries,
            &self.cancel,
        )
        .run(|_| self.execute(data, prompt, model))
        .await
    }

    async fn attempt<T: Serialize + Sync + ?Sized>(
        &self,
        data: &T,
        prompt: &str,
        model: &str,
    ) -> Result<(serde_json::Value, u64, u64), AppError> {
        let full_prompt = build_prompt(prompt, data)?;
        let input_tokens = estimate_tokens(&full_prompt);
        tracing::info!(
            model,
            prompt_chars = full_prompt.len(),
            input_tokens,
            "Sending data for enrichment"
        );

        let reply = bounded(
            self.timeout,
            self.backend
                .generate(model, &full_prompt, TEMPERATURE, MAX_OUTPUT_TOKENS),
        )
        .await?;

        if reply.trim().is_empty() {
            return Err(AppError::EmptyResponse);
        }

        let output_tokens = estimate_tokens(&reply);
        Ok((parse_reply(&reply), input_tokens, output_tokens))
    }
}
