//! Evolutionary search over bounded parameter vectors.
//!
//! Steady-state evolution (minimizing):
//!
//! 1. Uniform random population within the bounds, explicit seeds first
//! 2. Tournament selection of parents
//! 3. Blend (BLX-α) crossover and per-gene Gaussian mutation, then bounding
//! 4. The offspring replace the worst individuals; the best `num_elites`
//!    are never replaced
//! 5. Stop once `max_evaluations` fitness evaluations have been spent

use crate::evaluator::Evaluator;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use spiketune_core::{Candidate, Result, TuneError};
use std::fmt;
use tracing::{debug, info};

/// Searches for the candidate with the lowest fitness.
pub trait Optimizer {
    fn optimize(&mut self, evaluator: &dyn Evaluator) -> Result<OptimizationResult>;
}

/// Evolutionary optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub min_constraints: Vec<f64>,
    pub max_constraints: Vec<f64>,
    pub population_size: usize,
    pub max_evaluations: usize,
    /// Parents per generation; the population size when unset
    pub num_selected: Option<usize>,
    /// Offspring per generation; `num_selected` when unset
    pub num_offspring: Option<usize>,
    pub num_elites: usize,
    pub tourn_size: usize,
    /// Per-gene mutation probability
    pub mutation_rate: f64,
    pub gaussian_stdev: f64,
    pub blx_alpha: f64,
    /// Candidates placed in the initial population as is
    pub seeds: Vec<Candidate>,
    /// RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_constraints: Vec::new(),
            max_constraints: Vec::new(),
            population_size: 10,
            max_evaluations: 100,
            num_selected: None,
            num_offspring: None,
            num_elites: 1,
            tourn_size: 2,
            mutation_rate: 0.2,
            gaussian_stdev: 1.0,
            blx_alpha: 0.1,
            seeds: Vec::new(),
            seed: None,
        }
    }
}

impl OptimizerConfig {
    pub fn new(min_constraints: Vec<f64>, max_constraints: Vec<f64>) -> Self {
        Self {
            min_constraints,
            max_constraints,
            ..Default::default()
        }
    }

    pub fn num_selected(&self) -> usize {
        self.num_selected.unwrap_or(self.population_size)
    }

    pub fn num_offspring(&self) -> usize {
        self.num_offspring.unwrap_or_else(|| self.num_selected())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TuneError::InvalidInput(msg));

        if self.min_constraints.len() != self.max_constraints.len() {
            return invalid(format!(
                "{} lower bounds but {} upper bounds",
                self.min_constraints.len(),
                self.max_constraints.len()
            ));
        }
        if self.min_constraints.is_empty() {
            return invalid("no parameter bounds given".into());
        }
        if let Some(i) = (0..self.min_constraints.len())
            .find(|&i| !(self.min_constraints[i] <= self.max_constraints[i]))
        {
            return invalid(format!(
                "bound {}: min {} exceeds max {}",
                i, self.min_constraints[i], self.max_constraints[i]
            ));
        }
        if self.population_size < 2 {
            return invalid("population_size must be at least 2".into());
        }
        if self.tourn_size < 1 {
            return invalid("tourn_size must be at least 1".into());
        }
        if self.num_selected() < 1 || self.num_offspring() < 1 {
            return invalid("num_selected and num_offspring must be at least 1".into());
        }
        if self.num_elites >= self.population_size {
            return invalid("num_elites must be smaller than population_size".into());
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid(format!("mutation_rate {} outside [0, 1]", self.mutation_rate));
        }
        if !(self.gaussian_stdev >= 0.0) || !(self.blx_alpha >= 0.0) {
            return invalid("gaussian_stdev and blx_alpha must be non-negative".into());
        }
        if let Some(seed) = self
            .seeds
            .iter()
            .find(|s| s.len() != self.min_constraints.len())
        {
            return invalid(format!(
                "seed {:?} does not have {} genes",
                seed,
                self.min_constraints.len()
            ));
        }
        Ok(())
    }
}

/// Population fitness summary after one generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub evaluations: usize,
    pub best: f64,
    pub worst: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

impl GenerationStats {
    fn from_population(generation: usize, evaluations: usize, population: &[Individual]) -> Self {
        let mut fitness: Vec<f64> = population.iter().map(|i| i.fitness).collect();
        fitness.sort_by(|a, b| a.total_cmp(b));

        let n = fitness.len();
        let mean = fitness.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (fitness[n / 2 - 1] + fitness[n / 2]) / 2.0
        } else {
            fitness[n / 2]
        };
        let variance = fitness.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n as f64;

        Self {
            generation,
            evaluations,
            best: fitness[0],
            worst: fitness[n - 1],
            mean,
            median,
            std: variance.sqrt(),
        }
    }
}

impl fmt::Display for GenerationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen {:>4} | evals {:>6} | best {:.6} | worst {:.6} | mean {:.6} | median {:.6} | std {:.6}",
            self.generation,
            self.evaluations,
            self.best,
            self.worst,
            self.mean,
            self.median,
            self.std
        )
    }
}

/// Outcome of an optimization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_candidate: Candidate,
    pub best_fitness: f64,
    pub evaluations: usize,
    pub generations: Vec<GenerationStats>,
}

#[derive(Debug, Clone)]
struct Individual {
    candidate: Candidate,
    fitness: f64,
}

type Observer = Box<dyn FnMut(&GenerationStats)>;

/// Steady-state evolutionary optimizer
pub struct EvolutionaryOptimizer {
    config: OptimizerConfig,
    rng: StdRng,
    observer: Option<Observer>,
}

impl EvolutionaryOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            rng,
            observer: None,
        })
    }

    /// Call `observer` with the population statistics after every generation.
    pub fn with_observer(mut self, observer: impl FnMut(&GenerationStats) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn bound(&self, candidate: &mut Candidate) {
        for (i, gene) in candidate.iter_mut().enumerate() {
            *gene = gene.clamp(self.config.min_constraints[i], self.config.max_constraints[i]);
        }
    }

    fn initial_candidates(&mut self) -> Vec<Candidate> {
        let size = self.config.population_size;
        let mut candidates: Vec<Candidate> = self.config.seeds.iter().take(size).cloned().collect();
        for candidate in candidates.iter_mut() {
            self.bound(candidate);
        }

        while candidates.len() < size {
            let candidate = self
                .config
                .min_constraints
                .iter()
                .zip(&self.config.max_constraints)
                .map(|(&lo, &hi)| self.rng.gen_range(lo..=hi))
                .collect();
            candidates.push(candidate);
        }
        candidates
    }

    fn tournament(&mut self, population: &[Individual]) -> Candidate {
        let size = self.config.tourn_size.min(population.len());
        let mut winner: Option<&Individual> = None;
        for i in sample(&mut self.rng, population.len(), size).iter() {
            let contender = &population[i];
            if winner.map_or(true, |w| contender.fitness < w.fitness) {
                winner = Some(contender);
            }
        }
        winner.map_or_else(|| population[0].candidate.clone(), |w| w.candidate.clone())
    }

    fn blend(&mut self, mom: &Candidate, dad: &Candidate) -> (Candidate, Candidate) {
        let alpha = self.config.blx_alpha;
        let mut bro = Vec::with_capacity(mom.len());
        let mut sis = Vec::with_capacity(mom.len());
        for (&m, &d) in mom.iter().zip(dad) {
            let (lo, hi) = (m.min(d), m.max(d));
            let delta = alpha * (hi - lo);
            bro.push(lo - delta + self.rng.gen::<f64>() * (hi - lo + 2.0 * delta));
            sis.push(lo - delta + self.rng.gen::<f64>() * (hi - lo + 2.0 * delta));
        }
        (bro, sis)
    }

    fn mutate(&mut self, candidate: &mut Candidate, noise: &Normal<f64>) {
        for gene in candidate.iter_mut() {
            if self.rng.gen::<f64>() < self.config.mutation_rate {
                *gene += noise.sample(&mut self.rng);
            }
        }
    }

    fn offspring(&mut self, parents: &[Candidate]) -> Result<Vec<Candidate>> {
        let noise = Normal::new(0.0, self.config.gaussian_stdev)
            .map_err(|e| TuneError::InvalidInput(format!("gaussian mutation: {}", e)))?;
        let wanted = self.config.num_offspring();

        let mut children = Vec::with_capacity(wanted + 1);
        let mut i = 0;
        while children.len() < wanted {
            let mom = &parents[i % parents.len()];
            let dad = &parents[(i + 1) % parents.len()];
            let (bro, sis) = self.blend(mom, dad);
            children.push(bro);
            children.push(sis);
            i += 2;
        }
        children.truncate(wanted);

        for child in children.iter_mut() {
            self.mutate(child, &noise);
            self.bound(child);
        }
        Ok(children)
    }

    fn evaluate(evaluator: &dyn Evaluator, candidates: Vec<Candidate>) -> Result<Vec<Individual>> {
        let fitness = evaluator.evaluate(&candidates)?;
        if fitness.len() != candidates.len() {
            return Err(TuneError::ControllerError(format!(
                "evaluator returned {} fitness values for {} candidates",
                fitness.len(),
                candidates.len()
            )));
        }
        Ok(candidates
            .into_iter()
            .zip(fitness)
            .map(|(candidate, fitness)| Individual { candidate, fitness })
            .collect())
    }

    fn record(&mut self, stats: GenerationStats, history: &mut Vec<GenerationStats>) {
        info!("{}", stats);
        if let Some(observer) = self.observer.as_mut() {
            observer(&stats);
        }
        history.push(stats);
    }
}

impl Optimizer for EvolutionaryOptimizer {
    fn optimize(&mut self, evaluator: &dyn Evaluator) -> Result<OptimizationResult> {
        let initial = self.initial_candidates();
        let mut population = Self::evaluate(evaluator, initial)?;
        let mut evaluations = population.len();
        let mut generation = 0;
        let mut history = Vec::new();

        let stats = GenerationStats::from_population(generation, evaluations, &population);
        self.record(stats, &mut history);

        while evaluations < self.config.max_evaluations {
            let parents: Vec<Candidate> = (0..self.config.num_selected())
                .map(|_| self.tournament(&population))
                .collect();
            let children = self.offspring(&parents)?;
            let offspring = Self::evaluate(evaluator, children)?;
            evaluations += offspring.len();

            // Best first; the tail is replaced, sparing the elites
            population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
            let replace = offspring
                .len()
                .min(population.len() - self.config.num_elites);
            let keep = population.len() - replace;
            population.truncate(keep);
            population.extend(offspring.into_iter().take(replace));

            generation += 1;
            let stats = GenerationStats::from_population(generation, evaluations, &population);
            debug!(generation, replaced = replace, "generation complete");
            self.record(stats, &mut history);
        }

        let best = population
            .iter()
            .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .ok_or_else(|| TuneError::InvalidInput("empty population".into()))?;

        Ok(OptimizationResult {
            best_candidate: best.candidate.clone(),
            best_fitness: best.fitness,
            evaluations,
            generations: history,
        })
    }
}
