//! Loading of recorded traces.
//!
//! Files hold two delimited columns, time in seconds and voltage in volts.
//! Both are converted to ms and mV on load. Further columns are ignored.

use nom::{
    branch::alt,
    character::complete::{one_of, space0, space1},
    combinator::{map, recognize},
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use spiketune_core::{Result, Trace};
use std::path::Path;
use tracing::{debug, warn};

/// Seconds/volts to milliseconds/millivolts
const SI_TO_MILLI: f64 = 1000.0;

fn separator(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(space0, one_of(",;\t"), space0)),
        space1,
    ))(input)
}

fn row(input: &str, scale: f64) -> IResult<&str, (f64, f64)> {
    map(
        tuple((preceded(space0, double), preceded(separator, double))),
        |(t, v)| (t * scale, v * scale),
    )(input)
}

/// Parse two delimited columns, multiplying both by `scale`.
///
/// Unparseable rows are skipped with a warning.
pub fn parse_trace(text: &str, scale: f64) -> Result<Trace> {
    let mut t = Vec::new();
    let mut v = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match row(line, scale) {
            Ok((_, (time, voltage))) => {
                t.push(time);
                v.push(voltage);
            }
            Err(_) => warn!("row {} invalid: {:?}", i, line),
        }
    }

    debug!(samples = t.len(), "parsed trace");
    Trace::from_vecs(t, v)
}

/// Parse trace text in seconds and volts as ms/mV.
pub fn parse_csv_data(text: &str) -> Result<Trace> {
    parse_trace(text, SI_TO_MILLI)
}

/// Load a two-column trace file (seconds, volts) as ms/mV.
pub fn load_csv_data(path: impl AsRef<Path>) -> Result<Trace> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_csv_data(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_separators() {
        for text in [
            "0.0,-0.065\n0.001,-0.064\n",
            "0.0; -0.065\n0.001; -0.064\n",
            "0.0\t-0.065\n0.001\t-0.064\n",
            "0.0   -0.065\n0.001 -0.064\n",
        ] {
            let trace = parse_csv_data(text).unwrap();
            assert_eq!(trace.len(), 2);
            assert_relative_eq!(trace.t()[1], 1.0, epsilon = 1e-12);
            assert_relative_eq!(trace.v()[0], -65.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let text = "time,voltage\n0.0,-0.065\n\ngarbage\n0.001,-0.064,extra\n0.002\n";
        let trace = parse_csv_data(text).unwrap();
        assert_eq!(trace.len(), 2);
        assert_relative_eq!(trace.v()[1], -64.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unordered_times_rejected() {
        assert!(parse_csv_data("0.002,0.0\n0.001,0.0\n").is_err());
    }

    #[test]
    fn test_unscaled_columns() {
        let trace = parse_trace("0.0 -65.0\n0.1 -64.5\n", 1.0).unwrap();
        assert_eq!(trace.v()[1], -64.5);
    }

    #[test]
    fn test_missing_file() {
        assert!(load_csv_data("/nonexistent/trace.csv").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join("spiketune_io_test_trace.csv");
        std::fs::write(&path, "0.0,0.01\n0.0005,0.02\n0.001,0.03\n").unwrap();
        let trace = load_csv_data(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(trace.len(), 3);
        assert_relative_eq!(trace.t()[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(trace.v()[2], 30.0, epsilon = 1e-12);
    }
}
