use std::sync::Arc;

use crate::core::config::Settings;
use crate::pipeline::ExamPipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    pipeline: ExamPipeline,
}

impl AppState {
    pub(crate) fn new(settings: Settings, pipeline: ExamPipeline) -> Self {
        Self { inner: Arc::new(InnerState { settings, pipeline }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn pipeline(&self) -> &ExamPipeline {
        &self.inner.pipeline
    }
}
