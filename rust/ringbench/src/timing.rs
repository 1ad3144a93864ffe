use std::fmt;
use std::time::{Duration, Instant};

/// The three marks of one run, all owned by the driver.
#[derive(Debug, Clone, Copy)]
pub struct TimingMarks {
    pub start: Instant,
    pub comm_start: Option<Instant>,
    pub comm_end: Option<Instant>,
}

impl TimingMarks {
    /// Take the `start` mark now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            comm_start: None,
            comm_end: None,
        }
    }

    pub fn mark_comm_start(&mut self, at: Instant) {
        self.comm_start = Some(at);
    }

    pub fn mark_comm_end(&mut self) {
        self.comm_end = Some(Instant::now());
    }

    /// `None` until both communication marks are taken.
    pub fn report(&self) -> Option<Report> {
        let comm_start = self.comm_start?;
        let comm_end = self.comm_end?;
        Some(Report {
            init_time: comm_start.duration_since(self.start),
            comm_time: comm_end.duration_since(comm_start),
        })
    }
}

/// One result line: `init_time,comm_time` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub init_time: Duration,
    pub comm_time: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.9},{:.9}",
            self.init_time.as_secs_f64(),
            self.comm_time.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_has_nine_decimals() {
        let r = Report {
            init_time: Duration::from_nanos(1_500_000_001),
            comm_time: Duration::from_millis(20),
        };
        assert_eq!(r.to_string(), "1.500000001,0.020000000");
    }

    #[test]
    fn report_needs_both_marks() {
        let mut marks = TimingMarks::start();
        assert!(marks.report().is_none());
        marks.mark_comm_start(Instant::now());
        assert!(marks.report().is_none());
        marks.mark_comm_end();
        let r = marks.report().unwrap();
        assert!(r.init_time < Duration::from_secs(5));
    }
}
