use crate::{Real, pulse::DeconvolvedPulse};
use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Error, Write},
    path::{Path, PathBuf},
};
use tpc_common::{ChannelId, EventContext};

pub trait SavablePoint {
    fn write_to_file<W: Write>(&self, file: &mut W) -> Result<(), Error>;
}

impl<E: Display> SavablePoint for (Real, E) {
    fn write_to_file<W: Write>(&self, file: &mut W) -> Result<(), Error> {
        writeln!(file, "{0},{1}", self.0, self.1)
    }
}

pub trait SaveToFileFilter<I>
where
    I: Iterator,
    I::Item: SavablePoint,
{
    fn save_to_file(self, path: &Path) -> Result<(), Error>;
}

impl<I> SaveToFileFilter<I> for I
where
    I: Iterator,
    I::Item: SavablePoint,
{
    fn save_to_file(self, path: &Path) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        for item in self {
            item.write_to_file(&mut file)?;
        }
        file.flush()
    }
}

pub fn get_save_file_name(
    dir: &Path,
    context: &EventContext,
    channel: ChannelId,
    stage: &str,
) -> PathBuf {
    dir.join(format!(
        "run{0}_event{1}_ch{2}-{3}-{4:04}_{stage}.csv",
        context.run, context.event, channel.kind, channel.sequence, channel.number
    ))
}

/// `(time, sample)` pairs of a deconvolved pulse.
pub fn timed_samples(pulse: &DeconvolvedPulse) -> impl Iterator<Item = (Real, Real)> + '_ {
    pulse
        .samples
        .iter()
        .enumerate()
        .map(|(i, sample)| (pulse.sample_time(i as Real), *sample))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::CalibratedPulse;
    use tpc_common::DigitRef;

    #[test]
    fn file_names_identify_event_and_channel() {
        let context = EventContext {
            run: 12,
            event: 7,
            t0: 0.0,
        };
        let name = get_save_file_name(Path::new("out"), &context, ChannelId::wire(2, 31), "deconv");
        assert_eq!(name, Path::new("out/run12_event7_ch0-2-0031_deconv.csv"));
    }

    #[test]
    fn points_are_written_one_per_line() {
        let pulse = CalibratedPulse::new(
            ChannelId::wire(0, 1),
            DigitRef(0),
            1000.0,
            500.0,
            vec![0.0; 3],
        );
        let pulse = DeconvolvedPulse::with_samples(&pulse, vec![1.5, -2.0, 0.25]);
        let mut buffer = Vec::new();
        for point in timed_samples(&pulse) {
            point.write_to_file(&mut buffer).unwrap();
        }
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "1000,1.5\n1500,-2\n2000,0.25\n"
        );
    }
}
