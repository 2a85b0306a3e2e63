use crate::corpus::{resolve_source, CorpusStore};
use crate::error::KwResult;
use crate::results::ResultSet;
use crate::worker::{ChannelLifecycle, WorkerChannel};
use keyweave_protocol::config::{EvaluationParameters, KeyboardConfiguration, NgramSource};
use keyweave_protocol::fingerprint::ConfigFingerprint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The configuration currently in effect on the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub evaluation: Option<EvaluationParameters>,
    pub ngram_source: Option<NgramSource>,
    pub keyboard: Option<KeyboardConfiguration>,
}

impl Settings {
    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint::from_parts(
            self.evaluation.as_ref(),
            self.ngram_source.as_ref(),
            self.keyboard.as_ref(),
        )
    }

    fn provider_inputs(&self) -> Option<(&NgramSource, &EvaluationParameters)> {
        Some((self.ngram_source.as_ref()?, self.evaluation.as_ref()?))
    }

    fn evaluator_inputs(&self) -> Option<(&KeyboardConfiguration, &EvaluationParameters)> {
        Some((self.keyboard.as_ref()?, self.evaluation.as_ref()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    EvaluationParameters(EvaluationParameters),
    NgramSource(NgramSource),
    Keyboard(KeyboardConfiguration),
}

impl ConfigChange {
    fn rebuilds_provider(&self) -> bool {
        !matches!(self, ConfigChange::Keyboard(_))
    }

    fn label(&self) -> &'static str {
        match self {
            ConfigChange::EvaluationParameters(_) => "evaluation parameters",
            ConfigChange::NgramSource(_) => "ngram source",
            ConfigChange::Keyboard(_) => "keyboard",
        }
    }
}

/// Pushes configuration changes through the worker in dependency order:
/// ngram provider, then evaluator, then re-evaluation of every stored layout.
///
/// Settings are only committed once the worker accepted them.
pub struct ConfigurationBroadcaster {
    corpus: Arc<dyn CorpusStore>,
    committed: Settings,
    permutable_keys: Vec<String>,
}

impl ConfigurationBroadcaster {
    pub fn new(corpus: Arc<dyn CorpusStore>) -> Self {
        Self::with_settings(corpus, Settings::default())
    }

    /// Starts from settings that have not been pushed to any channel yet; see [`Self::replay`].
    pub fn with_settings(corpus: Arc<dyn CorpusStore>, settings: Settings) -> Self {
        Self {
            corpus,
            committed: settings,
            permutable_keys: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.committed
    }

    pub fn permutable_keys(&self) -> &[String] {
        &self.permutable_keys
    }

    pub async fn set_evaluation_parameters(
        &mut self,
        channel: &WorkerChannel,
        results: &mut ResultSet,
        params: EvaluationParameters,
    ) -> KwResult<()> {
        self.apply(channel, results, ConfigChange::EvaluationParameters(params))
            .await
    }

    pub async fn set_ngram_source(
        &mut self,
        channel: &WorkerChannel,
        results: &mut ResultSet,
        source: NgramSource,
    ) -> KwResult<()> {
        self.apply(channel, results, ConfigChange::NgramSource(source))
            .await
    }

    pub async fn set_keyboard(
        &mut self,
        channel: &WorkerChannel,
        results: &mut ResultSet,
        keyboard: KeyboardConfiguration,
    ) -> KwResult<()> {
        self.apply(channel, results, ConfigChange::Keyboard(keyboard))
            .await
    }

    pub async fn apply(
        &mut self,
        channel: &WorkerChannel,
        results: &mut ResultSet,
        change: ConfigChange,
    ) -> KwResult<()> {
        info!("🔧 Applying new {}", change.label());
        let rebuild_provider = change.rebuilds_provider();

        let mut candidate = self.committed.clone();
        match change {
            ConfigChange::EvaluationParameters(p) => candidate.evaluation = Some(p),
            ConfigChange::NgramSource(s) => candidate.ngram_source = Some(s),
            ConfigChange::Keyboard(k) => candidate.keyboard = Some(k),
        }

        // 1. Ngram provider.
        let mut provider_rebuilt = false;
        if rebuild_provider {
            if let Some((source, params)) = candidate.provider_inputs() {
                let input = resolve_source(self.corpus.as_ref(), source).await?;
                channel.init_ngram_provider(input, params).await?;
                provider_rebuilt = true;
            } else {
                debug!("Step 1 skipped: ngram source or parameters not set yet");
            }
        }

        // 2. Evaluator. Needs a provider on the worker built from accepted settings.
        if candidate.provider_inputs().is_some()
            && channel.lifecycle() >= ChannelLifecycle::NgramProviderReady
            && !channel.is_closed()
        {
            if let Some((keyboard, params)) = candidate.evaluator_inputs() {
                match channel.init_evaluator(keyboard, params).await {
                    Ok(keys) => self.permutable_keys = keys,
                    Err(err) => {
                        if provider_rebuilt {
                            self.restore_provider(channel).await;
                        }
                        return Err(err);
                    }
                }
            } else {
                debug!("Step 2 skipped: keyboard not set yet");
            }
        }

        self.committed = candidate;

        // 3. Results follow the evaluator now in effect.
        if channel.lifecycle() == ChannelLifecycle::EvaluatorReady {
            results.reevaluate_all(channel).await?;
            results.stamp(self.committed.fingerprint());
        }
        Ok(())
    }

    /// Brings a fresh channel up to the committed settings: engine, provider, evaluator.
    pub async fn replay(&mut self, channel: &WorkerChannel) -> KwResult<()> {
        channel.init().await?;

        if let Some((source, params)) = self.committed.provider_inputs() {
            let input = resolve_source(self.corpus.as_ref(), source).await?;
            channel.init_ngram_provider(input, params).await?;

            if let Some((keyboard, params)) = self.committed.evaluator_inputs() {
                self.permutable_keys = channel.init_evaluator(keyboard, params).await?;
            }
        }
        info!("♻️  Channel replayed to committed settings");
        Ok(())
    }

    // Step 2 failed after step 1 replaced the provider; put the committed one back,
    // or clear it when nothing was committed yet.
    async fn restore_provider(&mut self, channel: &WorkerChannel) {
        let restored = match self.committed.provider_inputs() {
            Some((source, params)) => match resolve_source(self.corpus.as_ref(), source).await {
                Ok(input) => channel.init_ngram_provider(input, params).await,
                Err(err) => Err(err),
            },
            None => {
                self.permutable_keys.clear();
                channel.reset_provider().await
            }
        };
        if let Err(err) = restored {
            warn!("⚠️ Could not restore previous ngram provider: {}", err);
        }
    }
}
