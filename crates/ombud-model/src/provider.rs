// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::{StepOutcome, StepRequest};

/// A language-model backend able to advance an agent conversation by one
/// step.
///
/// Implementations own their retry policy: `step` returning an error means
/// the transport budget is exhausted and the caller should terminate the run
/// with that error, not retry again.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier, e.g. "openai".
    fn name(&self) -> &str;

    /// Model identifier requests are issued against.
    fn model_name(&self) -> &str;

    /// Execute one model step.
    async fn step(&self, request: StepRequest) -> anyhow::Result<StepOutcome>;
}
