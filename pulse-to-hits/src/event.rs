//! Event files read by the pipeline and the hit files it writes.
use crate::{
    Real,
    calibration::CalibrationTable,
    pulse::{CalibratedPulse, DeconvolvedPulse, Hit, HitSelection},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tpc_common::EventContext;

#[derive(Debug, Error)]
pub enum EventFileError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The calibrated pulses of one acquisition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub context: EventContext,
    /// Constants valid for this acquisition, if it carries its own.
    #[serde(default)]
    pub calibration: Option<CalibrationTable>,
    #[serde(default)]
    pub drift: Vec<CalibratedPulse>,
    /// Photon sensor pulses, carried but not searched for hits.
    #[serde(default)]
    pub pmt: Vec<CalibratedPulse>,
}

/// The hits reconstructed from one [Event].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHits {
    pub context: EventContext,
    pub hits: BTreeMap<String, Vec<Hit>>,
    /// Total corrected wire charge.
    pub charge: Real,
    #[serde(
        rename = "drift-deconv",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub deconvolved: Vec<DeconvolvedPulse>,
}

impl EventHits {
    pub fn new(context: EventContext) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    /// Stores `selection` under its name, replacing any earlier selection of that name.
    pub fn insert(&mut self, selection: HitSelection) {
        self.hits.insert(selection.name, selection.hits);
    }

    pub fn selection(&self, name: &str) -> Option<&[Hit]> {
        self.hits.get(name).map(Vec::as_slice)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.values().map(Vec::len).sum()
    }
}

fn open(path: &Path) -> Result<File, EventFileError> {
    File::open(path).map_err(|source| EventFileError::Io {
        path: path.to_owned(),
        source,
    })
}

fn create(path: &Path) -> Result<File, EventFileError> {
    File::create(path).map_err(|source| EventFileError::Io {
        path: path.to_owned(),
        source,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, EventFileError> {
    serde_json::from_reader(BufReader::new(open(path)?)).map_err(|source| {
        EventFileError::Json {
            path: path.to_owned(),
            source,
        }
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EventFileError> {
    let mut writer = BufWriter::new(create(path)?);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| EventFileError::Json {
        path: path.to_owned(),
        source,
    })?;
    writer.flush().map_err(|source| EventFileError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Reads a JSON array of events.
pub fn load_events(path: &Path) -> Result<Vec<Event>, EventFileError> {
    read_json(path)
}

pub fn save_events(path: &Path, events: &[Event]) -> Result<(), EventFileError> {
    write_json(path, events)
}

pub fn load_calibration(path: &Path) -> Result<CalibrationTable, EventFileError> {
    read_json(path)
}

/// Writes a JSON array with one entry per processed event.
pub fn save_hits(path: &Path, hits: &[EventHits]) -> Result<(), EventFileError> {
    write_json(path, hits)
}
