#![allow(dead_code)] // Each test binary uses a different subset of these helpers

use keyweave::corpus::MemoryCorpusStore;
use keyweave::engine::{AnnealObserver, Engine, EngineError, EngineLoader, EngineResult};
use keyweave::protocol::config::{
    EvaluationParameters, KeyboardConfiguration, NgramSource, OptimizationParameters,
};
use keyweave::protocol::evaluation::{
    EvaluationDetails, EvaluationResult, OptimizerParameters, ProgressInfo,
};
use keyweave::protocol::layout::LayoutString;
use keyweave::protocol::message::{NgramInput, NgramTables};
use keyweave::session::ProgressCallback;
use keyweave::worker::{ChannelOptions, WorkerChannel};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- FIXTURES ---

/// 8-key keyboard. Sorted by frequency this is also the cheapest layout.
pub const SMALL_KEYS: &str = "etaoin,.";
pub const SMALL_FREQS: &[(char, u32)] = &[
    ('e', 12),
    ('t', 9),
    ('a', 8),
    ('o', 7),
    ('i', 6),
    ('n', 5),
    (',', 2),
    ('.', 1),
];
pub const SMALL_CORPUS: &str = "eng_small";
/// Letters fully reversed; 15 adjacent swaps away from the optimum.
pub const SMALL_WORST: &str = "nioate,.";

pub const EXAMPLE_KEYS: &str = "zluaqwbdgyjßcrieomntshvxüäöpf,.k";

pub fn eval_params(weight: f64) -> EvaluationParameters {
    EvaluationParameters::new(format!("weight: {}", weight))
}

pub fn keyboard(keys: &str) -> KeyboardConfiguration {
    KeyboardConfiguration::new(format!("keys: {}", keys))
}

pub fn genevo_params(generation_limit: u64, step_delay_ms: u64) -> OptimizationParameters {
    OptimizationParameters::new(format!(
        "generation_limit: {}\nstep_delay_ms: {}",
        generation_limit, step_delay_ms
    ))
}

pub fn sa_params(iterations: u64, delay_ms: u64) -> OptimizationParameters {
    OptimizationParameters::new(format!(
        "iterations: {}\ndelay_ms: {}",
        iterations, delay_ms
    ))
}

pub fn unigram_tables(freqs: &[(char, u32)]) -> NgramTables {
    let unigrams = freqs
        .iter()
        .map(|(c, n)| format!("{} {}", c, n))
        .collect::<Vec<_>>()
        .join("\n");
    NgramTables {
        unigrams,
        bigrams: "et 3\nth 2".to_string(),
        trigrams: "the 1".to_string(),
    }
}

pub fn small_input() -> NgramInput {
    NgramInput::Frequencies(unigram_tables(SMALL_FREQS))
}

pub fn corpus_store() -> Arc<MemoryCorpusStore> {
    Arc::new(MemoryCorpusStore::new().with(SMALL_CORPUS, unigram_tables(SMALL_FREQS)))
}

pub fn small_source() -> NgramSource {
    NgramSource::prepared(SMALL_CORPUS)
}

/// Cost the mock engine assigns: sum of freq(symbol) * (position + 1) * weight.
pub fn expected_cost(layout: &str, freqs: &[(char, u32)], weight: f64) -> f64 {
    let table: HashMap<char, f64> = freqs.iter().map(|(c, n)| (*c, *n as f64)).collect();
    cost(&layout.chars().collect::<Vec<_>>(), &table, weight)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn options(name: &str) -> ChannelOptions {
    ChannelOptions {
        name: name.to_string(),
        queue_capacity: 16,
        event_capacity: 64,
    }
}

/// Channel with engine, provider and evaluator for [`SMALL_KEYS`] in place.
pub async fn ready_channel(loader: Arc<MockLoader>) -> WorkerChannel {
    init_tracing();
    let channel = WorkerChannel::create(loader, options("test-worker")).unwrap();
    channel.init().await.unwrap();
    channel
        .init_ngram_provider(small_input(), &eval_params(1.0))
        .await
        .unwrap();
    channel
        .init_evaluator(&keyboard(SMALL_KEYS), &eval_params(1.0))
        .await
        .unwrap();
    channel
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// --- CALLBACK RECORDER ---

#[derive(Default)]
pub struct Recorder {
    pub steps: Mutex<Vec<u64>>,
    pub progress: Mutex<Vec<ProgressInfo>>,
    pub bests: Mutex<Vec<(LayoutString, f64)>>,
}

impl Recorder {
    pub fn step_count(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    pub fn progress_count(&self) -> usize {
        self.progress.lock().unwrap().len()
    }

    pub fn best_count(&self) -> usize {
        self.bests.lock().unwrap().len()
    }
}

impl ProgressCallback for Recorder {
    fn on_step(&self, step: u64, _total_steps: Option<u64>) {
        self.steps.lock().unwrap().push(step);
    }

    fn on_progress(&self, info: &ProgressInfo) {
        self.progress.lock().unwrap().push(info.clone());
    }

    fn on_new_best(&self, layout: &LayoutString, total_cost: f64) {
        self.bests.lock().unwrap().push((layout.clone(), total_cost));
    }
}

// --- MOCK ENGINE ---
// Blobs are "key: value" lines. Any blob containing "invalid" is rejected.
// "reject_evaluator: true" in evaluation parameters only fails the evaluator build.
// Keyboards may add "forbid_first: c" and "evaluate_delay_ms: n".

#[derive(Default)]
pub struct EngineStats {
    pub loads: AtomicUsize,
    pub providers: AtomicUsize,
    pub evaluators: AtomicUsize,
    pub evaluations: AtomicUsize,
    pub optimizer_steps: AtomicUsize,
    pub anneal_steps: AtomicUsize,
}

impl EngineStats {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
    pub fn providers(&self) -> usize {
        self.providers.load(Ordering::SeqCst)
    }
    pub fn evaluators(&self) -> usize {
        self.evaluators.load(Ordering::SeqCst)
    }
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
    pub fn optimizer_steps(&self) -> usize {
        self.optimizer_steps.load(Ordering::SeqCst)
    }
    pub fn anneal_steps(&self) -> usize {
        self.anneal_steps.load(Ordering::SeqCst)
    }
}

pub struct MockLoader {
    pub stats: Arc<EngineStats>,
    fail_load: bool,
    load_delay: Duration,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(EngineStats::default()),
            fail_load: false,
            load_delay: Duration::ZERO,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(EngineStats::default()),
            fail_load: true,
            load_delay: Duration::ZERO,
        })
    }

    /// Every engine load takes `delay`, like a slow module import.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(EngineStats::default()),
            fail_load: false,
            load_delay: delay,
        })
    }
}

impl EngineLoader for MockLoader {
    type Engine = MockEngine;

    fn load(&self) -> EngineResult<MockEngine> {
        if self.fail_load {
            return Err(EngineError::new("module not found"));
        }
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(MockEngine {
            stats: self.stats.clone(),
        })
    }
}

pub struct MockEngine {
    stats: Arc<EngineStats>,
}

pub struct MockProvider {
    freqs: HashMap<char, f64>,
}

pub struct MockEvaluator {
    keys: Vec<String>,
    freqs: HashMap<char, f64>,
    weight: f64,
    forbid_first: Option<char>,
    evaluate_delay: Duration,
}

pub struct MockOptimizer {
    current: Vec<char>,
    fixed: Vec<char>,
    limit: u64,
    step_delay: Duration,
    exhaust_early: bool,
}

fn field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn number(text: &str, key: &str, default: u64) -> u64 {
    field(text, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn reject_invalid(text: &str, what: &str) -> EngineResult<()> {
    if text.contains("invalid") {
        return Err(EngineError::new(format!("invalid {}", what)));
    }
    Ok(())
}

fn cost(symbols: &[char], freqs: &HashMap<char, f64>, weight: f64) -> f64 {
    symbols
        .iter()
        .enumerate()
        .map(|(i, c)| freqs.get(c).copied().unwrap_or(0.0) * (i + 1) as f64 * weight)
        .sum()
}

// One bubble-sort pass step: swap the first adjacent movable pair that lowers the cost.
fn improve(current: &mut [char], fixed: &[char], freqs: &HashMap<char, f64>) -> bool {
    for i in 0..current.len().saturating_sub(1) {
        let (a, b) = (current[i], current[i + 1]);
        if fixed.contains(&a) || fixed.contains(&b) {
            continue;
        }
        let fa = freqs.get(&a).copied().unwrap_or(0.0);
        let fb = freqs.get(&b).copied().unwrap_or(0.0);
        if fb > fa {
            current.swap(i, i + 1);
            return true;
        }
    }
    false
}

impl MockEngine {
    fn details(&self, evaluator: &MockEvaluator, symbols: &[char]) -> EvaluationDetails {
        let total = cost(symbols, &evaluator.freqs, evaluator.weight);
        EvaluationDetails {
            total_cost: total,
            details: json!({ "symbols": symbols.len() }),
            printed: Some(format!("cost {:.2}", total)),
            plot: None,
        }
    }
}

impl Engine for MockEngine {
    type Provider = MockProvider;
    type Evaluator = MockEvaluator;
    type Optimizer = MockOptimizer;

    fn ngram_provider_with_frequencies(
        &mut self,
        params: &EvaluationParameters,
        tables: &NgramTables,
    ) -> EngineResult<MockProvider> {
        reject_invalid(params.as_str(), "evaluation parameters")?;
        let mut freqs = HashMap::new();
        for line in tables.unigrams.lines() {
            let mut parts = line.split_whitespace();
            let (Some(sym), Some(count)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Some(c) = sym.chars().next() else {
                continue;
            };
            let count: f64 = count
                .parse()
                .map_err(|_| EngineError::new(format!("bad unigram line '{}'", line)))?;
            freqs.insert(c, count);
        }
        self.stats.providers.fetch_add(1, Ordering::SeqCst);
        Ok(MockProvider { freqs })
    }

    fn ngram_provider_with_text(
        &mut self,
        params: &EvaluationParameters,
        corpus_text: &str,
    ) -> EngineResult<MockProvider> {
        reject_invalid(params.as_str(), "evaluation parameters")?;
        let mut freqs = HashMap::new();
        for c in corpus_text.chars().filter(|c| !c.is_whitespace()) {
            *freqs.entry(c).or_insert(0.0) += 1.0;
        }
        self.stats.providers.fetch_add(1, Ordering::SeqCst);
        Ok(MockProvider { freqs })
    }

    fn layout_evaluator(
        &mut self,
        keyboard: &KeyboardConfiguration,
        params: &EvaluationParameters,
        provider: &MockProvider,
    ) -> EngineResult<MockEvaluator> {
        reject_invalid(keyboard.as_str(), "keyboard")?;
        reject_invalid(params.as_str(), "evaluation parameters")?;
        if field(params.as_str(), "reject_evaluator") == Some("true") {
            return Err(EngineError::new("evaluator rejected parameters"));
        }
        let keys: Vec<String> = field(keyboard.as_str(), "keys")
            .unwrap_or("")
            .chars()
            .map(String::from)
            .collect();
        if keys.is_empty() {
            return Err(EngineError::new("keyboard has no keys"));
        }
        let weight = field(params.as_str(), "weight")
            .and_then(|w| w.parse().ok())
            .unwrap_or(1.0);

        self.stats.evaluators.fetch_add(1, Ordering::SeqCst);
        Ok(MockEvaluator {
            keys,
            freqs: provider.freqs.clone(),
            weight,
            forbid_first: field(keyboard.as_str(), "forbid_first").and_then(|v| v.chars().next()),
            evaluate_delay: Duration::from_millis(number(keyboard.as_str(), "evaluate_delay_ms", 0)),
        })
    }

    fn evaluate(
        &mut self,
        evaluator: &MockEvaluator,
        layout: &LayoutString,
    ) -> EngineResult<EvaluationDetails> {
        self.stats.evaluations.fetch_add(1, Ordering::SeqCst);
        if !evaluator.evaluate_delay.is_zero() {
            std::thread::sleep(evaluator.evaluate_delay);
        }
        let symbols: Vec<char> = layout.symbols().collect();
        if evaluator.forbid_first.is_some() && symbols.first() == evaluator.forbid_first.as_ref() {
            return Err(EngineError::new("layout starts with a forbidden symbol"));
        }
        Ok(self.details(evaluator, &symbols))
    }

    fn permutable_keys(&mut self, evaluator: &MockEvaluator) -> Vec<String> {
        evaluator.keys.clone()
    }

    fn layout_optimizer(
        &mut self,
        _evaluator: &MockEvaluator,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
    ) -> EngineResult<MockOptimizer> {
        reject_invalid(params.as_str(), "optimization parameters")?;
        let text = params.as_str();
        Ok(MockOptimizer {
            current: layout.symbols().collect(),
            fixed: fixed.chars().collect(),
            limit: number(text, "generation_limit", 10),
            step_delay: Duration::from_millis(number(text, "step_delay_ms", 0)),
            exhaust_early: field(text, "exhaust_early") == Some("true"),
        })
    }

    fn optimizer_parameters(&self, optimizer: &MockOptimizer) -> OptimizerParameters {
        let mut params = OptimizerParameters::with_limit(optimizer.limit);
        params
            .extra
            .insert("exhaust_early".to_string(), json!(optimizer.exhaust_early));
        params
    }

    fn optimizer_step(
        &mut self,
        evaluator: &MockEvaluator,
        optimizer: &mut MockOptimizer,
    ) -> EngineResult<Option<EvaluationResult>> {
        self.stats.optimizer_steps.fetch_add(1, Ordering::SeqCst);
        if !optimizer.step_delay.is_zero() {
            std::thread::sleep(optimizer.step_delay);
        }

        let improved = improve(&mut optimizer.current, &optimizer.fixed, &evaluator.freqs);
        if !improved && optimizer.exhaust_early {
            return Ok(None);
        }
        let layout = LayoutString::new(optimizer.current.iter().collect::<String>());
        let details = self.details(evaluator, &optimizer.current);
        Ok(Some(EvaluationResult::from_details(layout, details)))
    }

    fn anneal(
        &mut self,
        evaluator: &MockEvaluator,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
        observer: &mut dyn AnnealObserver,
    ) -> EngineResult<LayoutString> {
        let text = params.as_str();
        reject_invalid(text, "optimization parameters")?;
        if field(text, "panic") == Some("true") {
            panic!("simulated engine panic");
        }

        let iterations = number(text, "iterations", 10);
        let delay = Duration::from_millis(number(text, "delay_ms", 0));
        let fixed: Vec<char> = fixed.chars().collect();
        let mut current: Vec<char> = layout.symbols().collect();

        for step in 1..=iterations {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let improved = improve(&mut current, &fixed, &evaluator.freqs);
            self.stats.anneal_steps.fetch_add(1, Ordering::SeqCst);
            observer.on_progress(ProgressInfo {
                step,
                temperature: 1.0 / step as f64,
            });
            if improved {
                let best: String = current.iter().collect();
                observer.on_new_best(&best, cost(&current, &evaluator.freqs, evaluator.weight));
            }
        }
        Ok(LayoutString::new(current.iter().collect::<String>()))
    }

    fn plot(
        &mut self,
        _evaluator: &MockEvaluator,
        layout: &LayoutString,
        layer: usize,
    ) -> EngineResult<String> {
        if layer > 1 {
            return Err(EngineError::new(format!("no layer {}", layer)));
        }
        Ok(format!("[layer {}] {}", layer, layout))
    }
}
