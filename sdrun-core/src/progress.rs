//! Line protocol spoken on standard output.
//!
//! Every event is one flushed line, either `PROGRESS:<percent>` or the
//! terminal `GENERATED`. Callers treat stdout as an event stream, so nothing
//! else may be written through a [`Progress`].

use std::io::{self, Write};

use crate::StepProgress;

pub const LOADING: u8 = 10;
pub const WEIGHTS_RESOLVED: u8 = 20;
pub const PIPELINE_READY: u8 = 30;
pub const SAMPLING: u8 = 35;
pub const SAMPLED: u8 = 95;
pub const SAVED: u8 = 100;

pub const GENERATED_MARKER: &str = "GENERATED";

impl StepProgress {
    /// Percentage of the run reached after this step.
    ///
    /// Computed as `trunc(step / total * 100)` in floating point, so it
    /// inherits that formula's truncation (step 29 of 100 reports 28).
    pub fn percent(&self) -> u8 {
        if self.total_steps == 0 {
            return 0;
        }
        let percent = (self.step as f64 / self.total_steps as f64) * 100.0;
        percent.clamp(0.0, 100.0) as u8
    }
}

pub struct Progress<W> {
    out: W,
}

impl<W: Write> Progress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn report(&mut self, percent: u8) -> io::Result<()> {
        writeln!(self.out, "PROGRESS:{percent}")?;
        self.out.flush()
    }

    pub fn step(&mut self, step: StepProgress) -> io::Result<()> {
        self.report(step.percent())
    }

    pub fn generated(&mut self) -> io::Result<()> {
        writeln!(self.out, "{GENERATED_MARKER}")?;
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step: usize, total_steps: usize) -> StepProgress {
        StepProgress { step, total_steps }
    }

    #[test]
    fn single_step_reports_zero() {
        assert_eq!(step(0, 1).percent(), 0);
    }

    #[test]
    fn halfway_reports_fifty() {
        assert_eq!(step(2, 4).percent(), 50);
    }

    #[test]
    fn keeps_float_truncation() {
        // 29 / 100 * 100 is 28.999999999999996 in binary floating point
        assert_eq!(step(29, 100).percent(), 28);
        assert_eq!(step(19, 20).percent(), 95);
        assert_eq!(step(2, 3).percent(), 66);
    }

    #[test]
    fn percent_is_bounded() {
        assert_eq!(step(0, 0).percent(), 0);
        assert_eq!(step(7, 5).percent(), 100);
    }

    #[test]
    fn writes_protocol_lines() {
        let mut progress = Progress::new(Vec::new());
        progress.report(LOADING).unwrap();
        progress.step(step(1, 4)).unwrap();
        progress.generated().unwrap();
        let out = String::from_utf8(progress.into_inner()).unwrap();
        assert_eq!(out, "PROGRESS:10\nPROGRESS:25\nGENERATED\n");
    }

    struct CountingWriter {
        buf: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountingWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn flushes_every_line() {
        let mut progress = Progress::new(CountingWriter {
            buf: Vec::new(),
            flushes: 0,
        });
        progress.report(SAMPLING).unwrap();
        progress.report(SAMPLED).unwrap();
        progress.generated().unwrap();
        assert_eq!(progress.get_ref().flushes, 3);
        assert_eq!(progress.get_ref().buf.len(), "PROGRESS:35\nPROGRESS:95\nGENERATED\n".len());
    }
}
