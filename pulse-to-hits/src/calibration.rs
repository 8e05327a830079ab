//! The per-channel calibration interface consumed by the hit pipeline.
//!
//! Constants are looked up by event context, channel and (where a constant
//! is a polynomial coefficient) an order parameter. Every lookup rejects
//! channels that cannot be classified into a known electronics category.
use crate::Real;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tpc_common::{ChannelId, EventContext, EventNumber, PMT_CHANNEL, RunNumber, WIRE_CHANNEL};
use tracing::error;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("Unknown channel type: {0}")]
    UnknownChannelType(ChannelId),
    #[error("Missing calibration constant \"{name}\" for channel {channel}")]
    MissingConstant {
        channel: ChannelId,
        name: &'static str,
    },
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// The electronics/sensor category of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelCategory {
    /// Collection wire plane.
    XWire,
    /// First induction wire plane.
    VWire,
    /// Second induction wire plane.
    UWire,
    Pmt,
}

impl ChannelCategory {
    pub fn classify(channel: ChannelId) -> CalibrationResult<Self> {
        match (channel.kind, channel.sequence) {
            (WIRE_CHANNEL, 0) => Ok(Self::XWire),
            (WIRE_CHANNEL, 1) => Ok(Self::VWire),
            (WIRE_CHANNEL, 2) => Ok(Self::UWire),
            (PMT_CHANNEL, _) => Ok(Self::Pmt),
            _ => {
                error!("Unknown channel: {channel}");
                Err(CalibrationError::UnknownChannelType(channel))
            }
        }
    }

    /// Position of the category in the electronics constant tables.
    pub fn index(&self) -> usize {
        match self {
            Self::XWire => 0,
            Self::VWire => 1,
            Self::UWire => 2,
            Self::Pmt => 3,
        }
    }

    pub fn signal_shape(&self) -> SignalShape {
        match self {
            Self::VWire | Self::UWire => SignalShape::Bipolar,
            Self::XWire | Self::Pmt => SignalShape::Unipolar,
        }
    }
}

/// Whether a point charge produces a one-signed or a two-lobed pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalShape {
    Unipolar,
    Bipolar,
}

/// Source of per-channel calibration constants.
///
/// The `order` parameter follows the polynomial convention of the
/// calibration database: order 0 is the offset term and order 1 the slope.
/// Orders beyond those that exist return zero.
pub trait ChannelCalibration {
    /// Order 0 is the pedestal, order 1 the gain.
    fn gain_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real>;

    /// Order 0 is the time offset, order 1 the digitization step (ns).
    fn time_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real>;

    /// Order 0 is the digitizer offset, order 1 the digitizer slope.
    fn digitizer_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real>;

    /// Electron lifetime in the drift volume (ns).
    fn electron_lifetime(&self, context: &EventContext) -> Real;

    /// Electron drift velocity (mm/ns).
    fn electron_drift_velocity(&self, context: &EventContext) -> Real;

    /// Fraction of the drifting charge seen by the channel.
    fn collection_efficiency(
        &self,
        context: &EventContext,
        channel: ChannelId,
    ) -> CalibrationResult<Real>;

    fn signal_shape(
        &self,
        _context: &EventContext,
        channel: ChannelId,
    ) -> CalibrationResult<SignalShape> {
        Ok(ChannelCategory::classify(channel)?.signal_shape())
    }
}

/// Electronics constants for one channel category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectronicsConstants {
    #[serde(default)]
    pub pedestal: Real,
    pub gain: Real,
    pub digit_step: Real,
    pub slope: Real,
    #[serde(default)]
    pub time_offset: Real,
}

impl Default for ElectronicsConstants {
    fn default() -> Self {
        Self {
            pedestal: 0.0,
            gain: 1.0,
            digit_step: 500.0,
            slope: 1.0,
            time_offset: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionEfficiency {
    pub x: Real,
    pub v: Real,
    pub u: Real,
}

impl Default for CollectionEfficiency {
    fn default() -> Self {
        Self {
            x: 1.0,
            v: 1.0,
            u: 1.0,
        }
    }
}

fn default_electron_lifetime() -> Real {
    // Effectively infinite: 3.14e8 s.
    3.14e17
}

fn default_drift_velocity() -> Real {
    // 1.6 mm/us
    1.6e-3
}

/// A snapshot of calibration constants valid for one acquisition.
///
/// Electronics constants are stored per channel category, in the order
/// given by [ChannelCategory::index].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationTable {
    pub electronics: Vec<ElectronicsConstants>,
    #[serde(default = "default_electron_lifetime")]
    pub electron_lifetime: Real,
    #[serde(default = "default_drift_velocity")]
    pub drift_velocity: Real,
    #[serde(default)]
    pub collection_efficiency: CollectionEfficiency,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self {
            electronics: vec![ElectronicsConstants::default(); 4],
            electron_lifetime: default_electron_lifetime(),
            drift_velocity: default_drift_velocity(),
            collection_efficiency: CollectionEfficiency::default(),
        }
    }
}

impl CalibrationTable {
    fn electronics_for(&self, channel: ChannelId) -> CalibrationResult<&ElectronicsConstants> {
        let category = ChannelCategory::classify(channel)?;
        self.electronics
            .get(category.index())
            .ok_or(CalibrationError::MissingConstant {
                channel,
                name: "electronics",
            })
    }
}

impl ChannelCalibration for CalibrationTable {
    fn gain_constant(
        &self,
        _context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        let constants = self.electronics_for(channel)?;
        Ok(match order {
            0 => constants.pedestal,
            1 => constants.gain,
            _ => 0.0,
        })
    }

    fn time_constant(
        &self,
        _context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        let constants = self.electronics_for(channel)?;
        Ok(match order {
            0 => constants.time_offset,
            1 => constants.digit_step,
            _ => 0.0,
        })
    }

    fn digitizer_constant(
        &self,
        _context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        let constants = self.electronics_for(channel)?;
        Ok(match order {
            1 => constants.slope,
            _ => 0.0,
        })
    }

    fn electron_lifetime(&self, _context: &EventContext) -> Real {
        self.electron_lifetime
    }

    fn electron_drift_velocity(&self, _context: &EventContext) -> Real {
        self.drift_velocity
    }

    fn collection_efficiency(
        &self,
        _context: &EventContext,
        channel: ChannelId,
    ) -> CalibrationResult<Real> {
        Ok(match ChannelCategory::classify(channel)? {
            ChannelCategory::XWire => self.collection_efficiency.x,
            ChannelCategory::VWire => self.collection_efficiency.v,
            ChannelCategory::UWire => self.collection_efficiency.u,
            ChannelCategory::Pmt => 1.0,
        })
    }
}

/// Calibration snapshots keyed by acquisition, with a fallback used for
/// acquisitions that carry no snapshot of their own.
#[derive(Clone, Debug, Default)]
pub struct CalibrationStore {
    fallback: CalibrationTable,
    snapshots: HashMap<(RunNumber, EventNumber), CalibrationTable>,
}

impl CalibrationStore {
    pub fn new(fallback: CalibrationTable) -> Self {
        Self {
            fallback,
            snapshots: Default::default(),
        }
    }

    pub fn insert(&mut self, context: &EventContext, table: CalibrationTable) {
        self.snapshots.insert((context.run, context.event), table);
    }

    pub fn snapshot(&self, context: &EventContext) -> &CalibrationTable {
        self.snapshots
            .get(&(context.run, context.event))
            .unwrap_or(&self.fallback)
    }
}

impl ChannelCalibration for CalibrationStore {
    fn gain_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        self.snapshot(context).gain_constant(context, channel, order)
    }

    fn time_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        self.snapshot(context).time_constant(context, channel, order)
    }

    fn digitizer_constant(
        &self,
        context: &EventContext,
        channel: ChannelId,
        order: usize,
    ) -> CalibrationResult<Real> {
        self.snapshot(context)
            .digitizer_constant(context, channel, order)
    }

    fn electron_lifetime(&self, context: &EventContext) -> Real {
        self.snapshot(context).electron_lifetime(context)
    }

    fn electron_drift_velocity(&self, context: &EventContext) -> Real {
        self.snapshot(context).electron_drift_velocity(context)
    }

    fn collection_efficiency(
        &self,
        context: &EventContext,
        channel: ChannelId,
    ) -> CalibrationResult<Real> {
        self.snapshot(context).collection_efficiency(context, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_channels() {
        assert_eq!(
            ChannelCategory::classify(ChannelId::wire(0, 5)),
            Ok(ChannelCategory::XWire)
        );
        assert_eq!(
            ChannelCategory::classify(ChannelId::wire(2, 5)),
            Ok(ChannelCategory::UWire)
        );
        assert_eq!(
            ChannelCategory::classify(ChannelId::pmt(3)),
            Ok(ChannelCategory::Pmt)
        );
    }

    #[test]
    fn unknown_channels_are_rejected() {
        let bad_plane = ChannelId::wire(3, 1);
        let bad_kind = ChannelId {
            kind: 7,
            sequence: 0,
            number: 0,
        };
        let table = CalibrationTable::default();
        let context = EventContext::default();
        assert_eq!(
            table.gain_constant(&context, bad_plane, 1),
            Err(CalibrationError::UnknownChannelType(bad_plane))
        );
        assert_eq!(
            table.signal_shape(&context, bad_kind),
            Err(CalibrationError::UnknownChannelType(bad_kind))
        );
    }

    #[test]
    fn induction_planes_are_bipolar() {
        let table = CalibrationTable::default();
        let context = EventContext::default();
        assert_eq!(
            table.signal_shape(&context, ChannelId::wire(0, 1)),
            Ok(SignalShape::Unipolar)
        );
        assert_eq!(
            table.signal_shape(&context, ChannelId::wire(1, 1)),
            Ok(SignalShape::Bipolar)
        );
        assert_eq!(
            table.signal_shape(&context, ChannelId::wire(2, 1)),
            Ok(SignalShape::Bipolar)
        );
        assert_eq!(
            table.signal_shape(&context, ChannelId::pmt(1)),
            Ok(SignalShape::Unipolar)
        );
    }

    #[test]
    fn store_falls_back_for_unknown_events() {
        let mut special = CalibrationTable::default();
        special.collection_efficiency.x = 0.5;
        let mut store = CalibrationStore::new(CalibrationTable::default());
        let context = EventContext {
            run: 4,
            event: 9,
            t0: 0.0,
        };
        store.insert(&context, special);

        let channel = ChannelId::wire(0, 1);
        assert_eq!(store.collection_efficiency(&context, channel), Ok(0.5));
        let other = EventContext { event: 10, ..context };
        assert_eq!(store.collection_efficiency(&other, channel), Ok(1.0));
    }

    #[test]
    fn parse_table_from_json() {
        let json = r#"{
            "electronics": [
                {"gain": 2.0, "digitStep": 500.0, "slope": 1.5},
                {"gain": 1.0, "digitStep": 500.0, "slope": 1.0, "timeOffset": -477.0},
                {"gain": 1.0, "digitStep": 500.0, "slope": 1.0},
                {"gain": 1.0, "digitStep": 2.0, "slope": 1.0}
            ],
            "driftVelocity": 0.0016
        }"#;
        let table: CalibrationTable = serde_json::from_str(json).expect("valid json");
        let context = EventContext::default();
        assert_eq!(table.gain_constant(&context, ChannelId::wire(0, 0), 1), Ok(2.0));
        assert_eq!(
            table.time_constant(&context, ChannelId::wire(1, 0), 0),
            Ok(-477.0)
        );
        assert_eq!(table.electron_lifetime(&context), default_electron_lifetime());
        assert_eq!(table.collection_efficiency.u, 1.0);
    }
}
