// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Umbruch Pipeline: job orchestration over the synchronous document crate.
// Runs stages under time budgets on a bounded worker pool, reports progress,
// consults the optional content enhancer, and hands low-quality results to
// an external conversion engine.

pub mod cancel;
pub mod context;
pub mod enhancer;
pub mod fallback;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod recovery;

pub use cancel::CancellationFlag;
pub use enhancer::{BoundaryAdvisor, ContentEnhancer, NoopEnhancer, OpenAiCompatibleEnhancer};
pub use fallback::{ConversionEngine, ExternalCommandEngine, FallbackArbitrator, FallbackTrigger};
pub use orchestrator::{
    Capabilities, ConversionOutcome, ConversionRequest, JobFailure, Pipeline, PipelineBuilder,
};
pub use pool::WorkerPool;
pub use progress::ProgressReporter;
