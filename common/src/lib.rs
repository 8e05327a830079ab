pub mod metrics;
pub mod tracer;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type RunNumber = u32;
pub type EventNumber = u32;
pub type WireNumber = u32;

/// Channel categories encoded in [ChannelId::kind].
pub const WIRE_CHANNEL: u8 = 0;
pub const PMT_CHANNEL: u8 = 1;

/// Identifies one digitized channel.
///
/// Wire channels carry their wire plane in `sequence` (0 = X, 1 = V, 2 = U).
/// Any other `kind` is carried through unchanged so that the calibration
/// lookup can reject it.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub kind: u8,
    pub sequence: u8,
    pub number: u32,
}

impl ChannelId {
    pub fn wire(plane: u8, number: WireNumber) -> Self {
        Self {
            kind: WIRE_CHANNEL,
            sequence: plane,
            number,
        }
    }

    pub fn pmt(number: u32) -> Self {
        Self {
            kind: PMT_CHANNEL,
            sequence: 0,
            number,
        }
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}:{1}:{2:04}", self.kind, self.sequence, self.number)
    }
}

/// Geometry identity attached to a hit.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryId(pub u64);

impl From<ChannelId> for GeometryId {
    fn from(channel: ChannelId) -> Self {
        GeometryId(
            ((channel.kind as u64) << 40)
                | ((channel.sequence as u64) << 32)
                | channel.number as u64,
        )
    }
}

/// Index of the raw digit a pulse (and its hits) originated from.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigitRef(pub usize);

/// The acquisition context that calibration constants are keyed on.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub run: RunNumber,
    pub event: EventNumber,
    /// Event start time (ns); drift times are measured from here.
    #[serde(default)]
    pub t0: f64,
}

impl Display for EventContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {0} event {1}", self.run, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_ids_are_distinct_per_plane() {
        let x = GeometryId::from(ChannelId::wire(0, 12));
        let v = GeometryId::from(ChannelId::wire(1, 12));
        let p = GeometryId::from(ChannelId::pmt(12));
        assert_ne!(x, v);
        assert_ne!(x, p);
        assert_ne!(v, p);
    }

    #[test]
    fn context_display_names_acquisition() {
        let context = EventContext {
            run: 1,
            event: 2,
            t0: 100.0,
        };
        assert_eq!(context.to_string(), "run 1 event 2");
    }
}
