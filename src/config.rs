use crate::error::{KeyWeaveError, KwResult};
use crate::worker::ChannelOptions;
use clap::Args;
use keyweave_protocol::config::{
    EvaluationParameters, KeyboardConfiguration, NgramSource, OptimizationMode,
    OptimizationParameters,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CORPUS: &str = "deu_mixed_wiki_web_0.6_eng_news_typical_wiki_web_0.4";

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Directory holding one sub-directory of ngram tables per corpus.
    #[arg(long, default_value = "ngrams")]
    pub corpus_root: PathBuf,
    #[arg(long, default_value = DEFAULT_CORPUS)]
    pub default_corpus: String,

    // Symbols optimizers and random layouts leave in place
    #[arg(long, default_value = ",.")]
    pub fixed_chars: String,
    #[arg(long, default_value_t = OptimizationMode::Genevo)]
    pub optimization_mode: OptimizationMode,

    // === WORKER ===
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,
    #[arg(long, default_value_t = 1024)]
    pub event_capacity: usize,
    #[arg(long, default_value = "keyweave-worker")]
    pub worker_name: String,

    // === PARAMETER FILES (opaque to us, handed to the engine) ===
    #[arg(long)]
    pub eval_params_file: Option<PathBuf>,
    #[arg(long)]
    pub keyboard_file: Option<PathBuf>,
    #[arg(long)]
    pub genevo_params_file: Option<PathBuf>,
    #[arg(long)]
    pub sa_params_file: Option<PathBuf>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            corpus_root: PathBuf::from("ngrams"),
            default_corpus: DEFAULT_CORPUS.to_string(),
            fixed_chars: ",.".to_string(),
            optimization_mode: OptimizationMode::Genevo,
            queue_capacity: 64,
            event_capacity: 1024,
            worker_name: "keyweave-worker".to_string(),
            eval_params_file: None,
            keyboard_file: None,
            genevo_params_file: None,
            sa_params_file: None,
        }
    }
}

impl WorkbenchConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> KwResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            KeyWeaveError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn default_source(&self) -> NgramSource {
        NgramSource::prepared(self.default_corpus.clone())
    }

    fn params_file(&self, mode: OptimizationMode) -> Option<&PathBuf> {
        match mode {
            OptimizationMode::Genevo => self.genevo_params_file.as_ref(),
            OptimizationMode::SimulatedAnnealing => self.sa_params_file.as_ref(),
        }
    }
}

impl From<&WorkbenchConfig> for ChannelOptions {
    fn from(cfg: &WorkbenchConfig) -> Self {
        Self {
            name: cfg.worker_name.clone(),
            queue_capacity: cfg.queue_capacity,
            event_capacity: cfg.event_capacity,
        }
    }
}

/// The parameter blobs a workbench starts with.
#[derive(Debug, Clone, Default)]
pub struct ConfigBundle {
    pub evaluation: Option<EvaluationParameters>,
    pub keyboard: Option<KeyboardConfiguration>,
    pub optimization: HashMap<OptimizationMode, OptimizationParameters>,
}

impl ConfigBundle {
    /// Reads every parameter file the config names. Missing entries stay `None`.
    pub fn load(cfg: &WorkbenchConfig) -> KwResult<Self> {
        let mut bundle = Self {
            evaluation: read_blob(cfg.eval_params_file.as_ref())?.map(EvaluationParameters::from),
            keyboard: read_blob(cfg.keyboard_file.as_ref())?.map(KeyboardConfiguration::from),
            optimization: HashMap::new(),
        };

        for mode in [OptimizationMode::Genevo, OptimizationMode::SimulatedAnnealing] {
            if let Some(text) = read_blob(cfg.params_file(mode))? {
                bundle
                    .optimization
                    .insert(mode, OptimizationParameters::from(text));
            }
        }

        info!(
            "📂 Loaded parameter files (eval: {}, keyboard: {}, optimizers: {})",
            bundle.evaluation.is_some(),
            bundle.keyboard.is_some(),
            bundle.optimization.len()
        );
        Ok(bundle)
    }

    pub fn from_parts(
        evaluation: EvaluationParameters,
        keyboard: KeyboardConfiguration,
        optimization: impl IntoIterator<Item = (OptimizationMode, OptimizationParameters)>,
    ) -> Self {
        Self {
            evaluation: Some(evaluation),
            keyboard: Some(keyboard),
            optimization: optimization.into_iter().collect(),
        }
    }
}

fn read_blob(path: Option<&PathBuf>) -> KwResult<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| KeyWeaveError::Config(format!("Failed to read {:?}: {}", path, e)))
}
