// Candidate generation: exhaustive grid, seeded random sampling, and sharding

use super::params::{ParamField, ParamKind, ParamValue, ParameterSchema, ParameterSet, SchemaError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Decimals kept for randomly drawn continuous floats
const RANDOM_FLOAT_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Grid,
    Random,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Grid => write!(f, "grid"),
            SearchMode::Random => write!(f, "random"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" | "exhaustive" => Ok(SearchMode::Grid),
            "random" => Ok(SearchMode::Random),
            other => Err(format!("Unknown search mode '{}' (expected grid or random)", other)),
        }
    }
}

/// Sampling range for one parameter in random mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRange {
    Choices {
        choices: Vec<ParamValue>,
    },
    Span {
        min: f64,
        max: f64,
        #[serde(default)]
        step: Option<f64>,
    },
}

/// Grid values and random ranges, keyed by parameter name.
///
/// Fields absent from both tables stay at the schema default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    #[serde(default)]
    pub grid: BTreeMap<String, Vec<ParamValue>>,
    #[serde(default)]
    pub random: BTreeMap<String, ParamRange>,
}

impl ParameterSpace {
    /// Per-field value lists in schema order
    fn axes(&self, schema: &ParameterSchema) -> Result<Vec<(String, Vec<ParamValue>)>, SchemaError> {
        for name in self.grid.keys() {
            if schema.field(name).is_none() {
                return Err(SchemaError::UnknownField(name.clone()));
            }
        }

        schema
            .fields()
            .iter()
            .map(|field| {
                let values = match self.grid.get(&field.name) {
                    Some(list) if list.is_empty() => {
                        return Err(SchemaError::InvalidRange {
                            field: field.name.clone(),
                            reason: "empty value list".to_string(),
                        })
                    }
                    Some(list) => list
                        .iter()
                        .map(|v| field.coerce(*v))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => vec![field.default],
                };
                Ok((field.name.clone(), values))
            })
            .collect()
    }

    /// Number of grid combinations
    pub fn grid_size(&self, schema: &ParameterSchema) -> Result<usize, SchemaError> {
        Ok(self
            .axes(schema)?
            .iter()
            .map(|(_, values)| values.len())
            .fold(1usize, |acc, n| acc.saturating_mul(n)))
    }

    /// Cartesian product in schema order; the last field varies fastest
    pub fn grid_candidates(&self, schema: &ParameterSchema) -> Result<Vec<ParameterSet>, SchemaError> {
        let axes = self.axes(schema)?;
        let mut combos: Vec<Vec<(String, ParamValue)>> = vec![Vec::new()];
        for (name, values) in &axes {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.push((name.clone(), *value));
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos.into_iter().map(|combo| schema.build(combo)).collect()
    }

    /// `iterations` draws from a generator seeded with `seed`.
    ///
    /// Each field uses its random range when present, otherwise a uniform pick
    /// from its grid list, otherwise its default.
    pub fn random_candidates(
        &self,
        schema: &ParameterSchema,
        iterations: usize,
        seed: u64,
    ) -> Result<Vec<ParameterSet>, SchemaError> {
        for name in self.random.keys() {
            if schema.field(name).is_none() {
                return Err(SchemaError::UnknownField(name.clone()));
            }
        }
        let axes = self.axes(schema)?;
        let mut rng = StdRng::seed_from_u64(seed);

        (0..iterations)
            .map(|_| {
                let mut values = Vec::with_capacity(axes.len());
                for (field, (name, grid_values)) in schema.fields().iter().zip(&axes) {
                    let value = match self.random.get(name) {
                        Some(range) => sample(field, range, &mut rng)?,
                        None => *grid_values.choose(&mut rng).unwrap_or(&field.default),
                    };
                    values.push((name.clone(), value));
                }
                schema.build(values)
            })
            .collect()
    }

    /// Candidates for `mode`, restricted to `shard`
    pub fn candidates(
        &self,
        schema: &ParameterSchema,
        mode: SearchMode,
        iterations: usize,
        seed: u64,
        shard: Shard,
    ) -> Result<Vec<ParameterSet>, SchemaError> {
        let all = match mode {
            SearchMode::Grid => self.grid_candidates(schema)?,
            SearchMode::Random => self.random_candidates(schema, iterations, seed)?,
        };
        Ok(shard.apply(all))
    }
}

fn invalid(field: &ParamField, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidRange {
        field: field.name.clone(),
        reason: reason.into(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn sample(field: &ParamField, range: &ParamRange, rng: &mut StdRng) -> Result<ParamValue, SchemaError> {
    match range {
        ParamRange::Choices { choices } => {
            let picked = choices
                .choose(rng)
                .ok_or_else(|| invalid(field, "empty choices"))?;
            field.coerce(*picked)
        }
        ParamRange::Span { min, max, step } => {
            let (min, max) = (*min, *max);
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(invalid(field, format!("min {} must not exceed max {}", min, max)));
            }
            match (field.kind, step) {
                (ParamKind::Bool, _) => Err(invalid(field, "boolean fields take choices, not min/max")),
                (_, Some(step)) => {
                    if !step.is_finite() || *step <= 0.0 {
                        return Err(invalid(field, format!("step {} must be positive", step)));
                    }
                    let steps = ((max - min) / step + 1e-9).floor() as u64;
                    let k = rng.gen_range(0..=steps);
                    let value = round_to(min + k as f64 * step, 10);
                    match field.kind {
                        ParamKind::Int => Ok(ParamValue::Int(value.round() as i64)),
                        _ => Ok(ParamValue::Float(value)),
                    }
                }
                (ParamKind::Int, None) => {
                    let (lo, hi) = (min.ceil() as i64, max.floor() as i64);
                    if lo > hi {
                        return Err(invalid(field, "no integer inside range"));
                    }
                    Ok(ParamValue::Int(rng.gen_range(lo..=hi)))
                }
                (ParamKind::Float, None) => {
                    let value = rng.gen_range(min..=max);
                    Ok(ParamValue::Float(round_to(value, RANDOM_FLOAT_DECIMALS)))
                }
            }
        }
    }
}

/// Deterministic partition of the candidate list: worker `index` of `count`
/// takes every candidate whose position `i` satisfies `i % count == index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub count: usize,
}

impl Shard {
    pub fn new(index: usize, count: usize) -> Result<Self, String> {
        if count == 0 {
            return Err("shard count must be at least 1".to_string());
        }
        if index >= count {
            return Err(format!("shard index {} must be below count {}", index, count));
        }
        Ok(Self { index, count })
    }

    /// The single shard covering everything
    pub fn all() -> Self {
        Self { index: 0, count: 1 }
    }

    pub fn includes(&self, position: usize) -> bool {
        position % self.count == self.index
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .enumerate()
            .filter(|(i, _)| self.includes(*i))
            .map(|(_, item)| item)
            .collect()
    }

    /// Run-name suffix, empty for an unsharded run
    pub fn suffix(&self) -> String {
        if self.count > 1 {
            format!("_s{}of{}", self.index, self.count)
        } else {
            String::new()
        }
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

impl FromStr for Shard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, count) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid shard '{}' (expected INDEX/COUNT, e.g. 0/4)", s))?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| format!("Invalid shard index in '{}'", s))?;
        let count = count
            .trim()
            .parse()
            .map_err(|_| format!("Invalid shard count in '{}'", s))?;
        Shard::new(index, count)
    }
}
