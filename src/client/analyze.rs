use crate::control::{DataPoint, SortKey, LOW_SENTINEL};

/// Aggregate statistics for one slice of the sorted distribution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bracket {
    pub count: i64,
    pub sum: i64,
    pub min: i64,
    pub mean: i64,
    pub max: i64,
}

impl Bracket {
    fn new() -> Self {
        Bracket {
            count: 0,
            sum: 0,
            min: i64::MAX,
            mean: 0,
            max: 0,
        }
    }

    fn record(&mut self, value: i64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.mean = self.sum / self.count;
        self.max = self.max.max(value);
    }
}

/// The three-way split of the sorted points: bottom 10%, middle 80% and the
/// top 10% tail.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Analysis {
    pub low: Bracket,
    pub mid: Bracket,
    pub high: Bracket,
}

impl Analysis {
    pub(crate) fn total_count(&self) -> i64 {
        self.low.count + self.mid.count + self.high.count
    }
}

/// Sort the points by the configured key and bracket them.
///
/// A point whose RMS fields never saw a completed round trip would sort to
/// the head as a spuriously fast measurement; its high field is raised to the
/// sentinel first so it lands in the tail instead.
pub(crate) fn analyze_points(points: &mut [DataPoint], sort: SortKey) -> Analysis {
    for point in points.iter_mut() {
        if !point.round_trip_observed() {
            point.rms_high = LOW_SENTINEL;
        }
    }
    match sort {
        SortKey::Rmsh => points.sort_by_key(|point| point.rms_high),
        SortKey::Ttfbh => points.sort_by_key(|point| point.ttfb_high),
    }

    let total = points.len() as f64;
    let low_cut = (total / 100.0 * 10.0).ceil() as usize;
    let high_cut = (total / 100.0 * 90.0).floor() as usize;

    let mut analysis = Analysis {
        low: Bracket::new(),
        mid: Bracket::new(),
        high: Bracket::new(),
    };
    for (index, point) in points.iter().enumerate() {
        let value = match sort {
            SortKey::Rmsh => point.rms_high,
            SortKey::Ttfbh => point.ttfb_high,
        };
        if index <= low_cut {
            analysis.low.record(value);
        } else if index >= high_cut {
            analysis.high.record(value);
        } else {
            analysis.mid.record(value);
        }
    }
    analysis
}

/// Keep only points where either endpoint matches the host filter.
pub(crate) fn filter_by_host(points: Vec<DataPoint>, host: &str) -> Vec<DataPoint> {
    points
        .into_iter()
        .filter(|point| point.local.contains(host) || point.remote.contains(host))
        .collect()
}
