// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration.
//!
//! Defaults suit a single request on a multi-core host. Environment
//! variables (`APERTURE_WM_*`) or a JSON document override them; either way
//! the result is validated before use.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::dispatch::DEFAULT_CHUNK_UNITS;
use crate::error::{Result, WatermarkError};
use crate::optimize::{Budget, OptimizerKind};
use crate::profile::{bounds_for, ConstraintProfile};
use crate::strategy::REDUNDANCY_CHOICES;

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "APERTURE_WM_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_evaluations: usize,
    pub deadline_ms: Option<u64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { max_evaluations: 48, deadline_ms: Some(30_000) }
    }
}

impl From<BudgetConfig> for Budget {
    fn from(c: BudgetConfig) -> Self {
        Budget { max_evaluations: c.max_evaluations, deadline: c.deadline_ms.map(Duration::from_millis) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; `0` uses every available core.
    pub worker_count: usize,
    /// Target units per dispatch chunk.
    pub chunk_units: usize,
    /// Above this observed bit-error rate an extraction is not authenticated.
    pub max_bit_error_rate: f64,
    pub optimizer: OptimizerKind,
    pub optimizer_seed: u64,
    pub budget: BudgetConfig,
    /// Wall-clock limit for each embed or verify dispatch.
    pub dispatch_timeout_ms: Option<u64>,
    /// Lowest repetition factor the optimizer may choose.
    pub min_redundancy: u8,
    /// Replaces the built-in profile of a format.
    pub profile_overrides: BTreeMap<Format, ConstraintProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            chunk_units: DEFAULT_CHUNK_UNITS,
            max_bit_error_rate: 0.2,
            optimizer: OptimizerKind::default(),
            optimizer_seed: 0x5EED,
            budget: BudgetConfig::default(),
            dispatch_timeout_ms: None,
            min_redundancy: 1,
            profile_overrides: BTreeMap::new(),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| WatermarkError::Config(format!("{ENV_PREFIX}{name}: cannot parse '{raw}'")))
}

/// `none`, `off` and `0` disable an optional millisecond limit.
fn parse_optional_ms(name: &str, raw: &str) -> Result<Option<u64>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "off" | "0" => Ok(None),
        _ => parse(name, raw).map(Some),
    }
}

impl EngineConfig {
    /// Defaults overridden by `APERTURE_WM_*` variables, validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    /// `lookup` receives names without the prefix.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut c = Self::default();
        if let Some(v) = lookup("WORKERS") {
            c.worker_count = parse("WORKERS", &v)?;
        }
        if let Some(v) = lookup("CHUNK_UNITS") {
            c.chunk_units = parse("CHUNK_UNITS", &v)?;
        }
        if let Some(v) = lookup("MAX_BIT_ERROR_RATE") {
            c.max_bit_error_rate = parse("MAX_BIT_ERROR_RATE", &v)?;
        }
        if let Some(v) = lookup("OPTIMIZER") {
            c.optimizer = v.parse()?;
        }
        if let Some(v) = lookup("SEED") {
            c.optimizer_seed = parse("SEED", &v)?;
        }
        if let Some(v) = lookup("MAX_EVALUATIONS") {
            c.budget.max_evaluations = parse("MAX_EVALUATIONS", &v)?;
        }
        if let Some(v) = lookup("DEADLINE_MS") {
            c.budget.deadline_ms = parse_optional_ms("DEADLINE_MS", &v)?;
        }
        if let Some(v) = lookup("DISPATCH_TIMEOUT_MS") {
            c.dispatch_timeout_ms = parse_optional_ms("DISPATCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MIN_REDUNDANCY") {
            c.min_redundancy = parse("MIN_REDUNDANCY", &v)?;
        }
        c.validate()?;
        Ok(c)
    }

    /// Parse and validate a JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let c: Self = serde_json::from_str(json).map_err(|e| WatermarkError::Config(e.to_string()))?;
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(WatermarkError::Config(msg));
        if self.worker_count > 1024 {
            return fail(format!("worker_count {} is not a sane thread count", self.worker_count));
        }
        if self.chunk_units == 0 {
            return fail("chunk_units must be positive".into());
        }
        if !(self.max_bit_error_rate > 0.0 && self.max_bit_error_rate < 0.5) {
            return fail(format!("max_bit_error_rate {} must be in (0, 0.5)", self.max_bit_error_rate));
        }
        if self.budget.max_evaluations == 0 {
            return fail("budget.max_evaluations must be positive".into());
        }
        let top = REDUNDANCY_CHOICES[REDUNDANCY_CHOICES.len() - 1];
        if self.min_redundancy == 0 || self.min_redundancy > top {
            return fail(format!("min_redundancy {} must be in 1..={top}", self.min_redundancy));
        }
        for (format, profile) in &self.profile_overrides {
            if profile.format != *format {
                return fail(format!("profile override for {format} describes {}", profile.format));
            }
            profile.validate().map_err(|e| WatermarkError::Config(format!("{format} profile: {e}")))?;
        }
        Ok(())
    }

    /// The active profile for `format`.
    pub fn profile(&self, format: Format) -> ConstraintProfile {
        self.profile_overrides.get(&format).cloned().unwrap_or_else(|| bounds_for(format))
    }

    pub fn budget(&self) -> Budget {
        self.budget.into()
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        assert_eq!(EngineConfig::from_lookup(|_| None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let c = EngineConfig::from_lookup(lookup(&[
            ("WORKERS", "4"),
            ("OPTIMIZER", "grid"),
            ("SEED", "99"),
            ("DEADLINE_MS", "off"),
            ("DISPATCH_TIMEOUT_MS", "1500"),
            ("MIN_REDUNDANCY", "3"),
        ]))
        .unwrap();
        assert_eq!(c.worker_count, 4);
        assert_eq!(c.optimizer, OptimizerKind::Grid);
        assert_eq!(c.optimizer_seed, 99);
        assert_eq!(c.budget.deadline_ms, None);
        assert_eq!(c.dispatch_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(c.min_redundancy, 3);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let err = EngineConfig::from_lookup(lookup(&[("CHUNK_UNITS", "lots")])).unwrap_err();
        assert!(matches!(err, WatermarkError::Config(ref m) if m.contains("CHUNK_UNITS")), "{err}");
        assert!(EngineConfig::from_lookup(lookup(&[("MAX_BIT_ERROR_RATE", "0.7")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("OPTIMIZER", "swarm")])).is_err());
    }

    #[test]
    fn json_with_profile_override() {
        let mut fastq = bounds_for(Format::Fastq);
        fastq.max_unit_delta = 1;
        let mut c = EngineConfig::default();
        c.profile_overrides.insert(Format::Fastq, fastq.clone());
        let json = serde_json::to_string(&c).unwrap();
        let back = EngineConfig::from_json(&json).unwrap();
        assert_eq!(back.profile(Format::Fastq), fastq);
        assert_eq!(back.profile(Format::Vcf), bounds_for(Format::Vcf));
    }

    #[test]
    fn partial_json_takes_defaults() {
        let c = EngineConfig::from_json(r#"{"optimizer":"random","budget":{"max_evaluations":10}}"#).unwrap();
        assert_eq!(c.optimizer, OptimizerKind::Random);
        assert_eq!(c.budget.max_evaluations, 10);
        assert_eq!(c.budget.deadline_ms, BudgetConfig::default().deadline_ms);
        assert_eq!(c.chunk_units, DEFAULT_CHUNK_UNITS);
    }

    #[test]
    fn mismatched_override_rejected() {
        let mut c = EngineConfig::default();
        c.profile_overrides.insert(Format::Fastq, bounds_for(Format::Vcf));
        assert!(c.validate().is_err());
    }
}
