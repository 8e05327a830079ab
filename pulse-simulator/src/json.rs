use pulse_to_hits::CalibrationTable;
use rand::{
    Rng,
    distr::weighted::{self, WeightedIndex},
};
use rand_distr::{Distribution as _, Exp, ExpError, Normal, NormalError};
use serde::Deserialize;
use thiserror::Error;
use tpc_common::{EventNumber, RunNumber, WireNumber};

#[derive(Debug, Error)]
pub(crate) enum TemplateError {
    #[error("Invalid normal distribution: {0}")]
    Normal(#[from] NormalError),
    #[error("Invalid exponential distribution: {0}")]
    Exponential(#[from] ExpError),
    #[error("Empty uniform range {min}..{max}")]
    EmptyRange { min: f64, max: f64 },
    #[error("Invalid deposit weights: {0}")]
    Weights(#[from] weighted::Error),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", untagged)]
pub(crate) enum Distribution {
    Constant(f64),
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, sd: f64 },
    Exponential { lifetime: f64 },
}

impl Distribution {
    pub(crate) fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, TemplateError> {
        Ok(match *self {
            Self::Constant(value) => value,
            Self::Uniform { min, max } => {
                if min >= max {
                    return Err(TemplateError::EmptyRange { min, max });
                }
                rng.random_range(min..max)
            }
            Self::Normal { mean, sd } => Normal::new(mean, sd)?.sample(rng),
            Self::Exponential { lifetime } => Exp::new(1.0 / lifetime)?.sample(rng),
        })
    }
}

/// A range of wires on one plane, each of which is read out every event.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WireRange {
    pub(crate) plane: u8,
    pub(crate) first: WireNumber,
    pub(crate) count: WireNumber,
}

impl WireRange {
    pub(crate) fn contains(&self, plane: u8, wire: WireNumber) -> bool {
        plane == self.plane && (self.first..self.first + self.count).contains(&wire)
    }
}

/// A kind of charge deposit, chosen in proportion to its weight.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Deposit {
    pub(crate) weight: f64,
    pub(crate) plane: u8,
    pub(crate) wire: Distribution,
    /// Arrival time of the charge centre (ns).
    pub(crate) time: Distribution,
    /// Time spread of the charge cloud (ns).
    pub(crate) sd: Distribution,
    pub(crate) charge: Distribution,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Template {
    pub(crate) run: RunNumber,
    #[serde(default)]
    pub(crate) first_event: EventNumber,
    pub(crate) events: usize,
    #[serde(default)]
    pub(crate) t0: f64,
    /// Samples per pulse.
    pub(crate) samples: usize,
    /// Time between samples (ns).
    pub(crate) digit_step: f64,
    pub(crate) wires: Vec<WireRange>,
    #[serde(default)]
    pub(crate) pmts: u32,
    pub(crate) deposits: Vec<Deposit>,
    pub(crate) num_deposits: Distribution,
    /// Standard deviation of the noise added to every sample.
    #[serde(default)]
    pub(crate) noise: f64,
    /// Written into every event, and used to scale the simulated response.
    #[serde(default)]
    pub(crate) calibration: CalibrationTable,
}

impl Template {
    pub(crate) fn deposit_index(&self) -> Result<WeightedIndex<f64>, TemplateError> {
        Ok(WeightedIndex::new(self.deposits.iter().map(|d| d.weight))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    const TEMPLATE: &str = r#"{
        "run": 3,
        "events": 2,
        "samples": 400,
        "digit-step": 500.0,
        "wires": [{ "plane": 0, "first": 10, "count": 4 }],
        "deposits": [{
            "weight": 1,
            "plane": 0,
            "wire": { "min": 10, "max": 14 },
            "time": { "mean": 100000, "sd": 5000 },
            "sd": 1500,
            "charge": { "lifetime": 20000 }
        }],
        "num-deposits": 3,
        "noise": 1.0
    }"#;

    #[test]
    fn template_parses() {
        let template: Template = serde_json::from_str(TEMPLATE).unwrap();
        assert_eq!(template.run, 3);
        assert_eq!(template.first_event, 0);
        assert_eq!(template.pmts, 0);
        assert_eq!(template.calibration, CalibrationTable::default());
        assert!(matches!(template.num_deposits, Distribution::Constant(n) if n == 3.0));
        let deposit = &template.deposits[0];
        assert!(matches!(deposit.wire, Distribution::Uniform { .. }));
        assert!(matches!(deposit.time, Distribution::Normal { .. }));
        assert!(matches!(deposit.charge, Distribution::Exponential { .. }));
        assert!(template.wires[0].contains(0, 13));
        assert!(!template.wires[0].contains(0, 14));
        assert!(!template.wires[0].contains(1, 10));
    }

    #[test]
    fn bundled_template_parses() {
        let template: Template =
            serde_json::from_str(include_str!("../templates/three-planes.json")).unwrap();
        assert_eq!(template.wires.len(), 3);
        assert_eq!(template.deposits.len(), 3);
        assert_eq!(template.calibration.collection_efficiency.v, 0.9);
        assert!(template.deposit_index().is_ok());
    }

    #[test]
    fn distributions_sample_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let uniform = Distribution::Uniform { min: 2.0, max: 3.0 };
        let exponential = Distribution::Exponential { lifetime: 10.0 };
        for _ in 0..100 {
            let value = uniform.sample(&mut rng).unwrap();
            assert!((2.0..3.0).contains(&value));
            assert!(exponential.sample(&mut rng).unwrap() >= 0.0);
        }
        assert_eq!(Distribution::Constant(4.5).sample(&mut rng).unwrap(), 4.5);
    }

    #[test]
    fn bad_distributions_are_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            Distribution::Uniform { min: 3.0, max: 3.0 }.sample(&mut rng),
            Err(TemplateError::EmptyRange { .. })
        ));
        assert!(matches!(
            Distribution::Normal { mean: 0.0, sd: -1.0 }.sample(&mut rng),
            Err(TemplateError::Normal(_))
        ));
    }
}
