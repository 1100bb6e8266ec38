// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    cache::CacheStore,
    clients::{forms::FormProvider, mailer::MailTransport},
    config::Config,
    repository::ExamRepository,
    services::{
        FormContentLoader, GradingEngine, ReportGenerator, ResultPipeline, ResultPoller,
        ResultPublisher, SessionNavigator, SessionTimer, poller::PollerConfig,
        publisher::PublisherConfig,
    },
    utils::sink::ErrorSink,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repo: Arc<dyn ExamRepository>,
    pub provider: Arc<dyn FormProvider>,
    pub content: FormContentLoader,
    pub navigator: SessionNavigator,
    pub pipeline: Arc<ResultPipeline>,
}

impl AppState {
    /// Wires the services on top of the given collaborators.
    pub fn new(
        config: Config,
        repo: Arc<dyn ExamRepository>,
        cache: Arc<dyn CacheStore>,
        provider: Arc<dyn FormProvider>,
        mailer: Arc<dyn MailTransport>,
        sink: ErrorSink,
    ) -> Self {
        let content =
            FormContentLoader::new(cache.clone(), provider.clone(), config.bootstrap_wait());
        let navigator =
            SessionNavigator::new(repo.clone(), content.clone(), SessionTimer::new(cache));

        let reports =
            ReportGenerator::new(repo.clone(), mailer.clone(), config.results_dir.clone());
        let publisher = ResultPublisher::new(
            repo.clone(),
            reports.clone(),
            mailer,
            sink.clone(),
            PublisherConfig::from(&config),
        );
        let pipeline = Arc::new(ResultPipeline::new(
            repo.clone(),
            GradingEngine::new(repo.clone(), provider.clone()),
            reports,
            publisher,
            sink,
            config.results_claim_timeout(),
        ));

        Self {
            config,
            repo,
            provider,
            content,
            navigator,
            pipeline,
        }
    }

    pub fn poller(&self) -> ResultPoller {
        ResultPoller::new(
            self.repo.clone(),
            self.pipeline.clone(),
            self.provider.clone(),
            self.content.clone(),
            PollerConfig::from(&self.config),
        )
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn ExamRepository> {
    fn from_ref(state: &AppState) -> Self {
        state.repo.clone()
    }
}

impl FromRef<AppState> for SessionNavigator {
    fn from_ref(state: &AppState) -> Self {
        state.navigator.clone()
    }
}

impl FromRef<AppState> for FormContentLoader {
    fn from_ref(state: &AppState) -> Self {
        state.content.clone()
    }
}

impl FromRef<AppState> for Arc<ResultPipeline> {
    fn from_ref(state: &AppState) -> Self {
        state.pipeline.clone()
    }
}
