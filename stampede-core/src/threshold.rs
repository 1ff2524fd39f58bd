use crate::{ConfigError, MetricKey, MetricKind};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a metric aggregate is reduced to the single number a threshold compares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in `[0, 100]`.
    Percentile(f64),
    Count,
    Rate,
    Value,
}

impl Aggregation {
    pub fn supported_by(&self, kind: MetricKind) -> bool {
        use Aggregation::*;
        match kind {
            MetricKind::Counter => matches!(self, Count | Rate),
            MetricKind::Gauge => matches!(self, Value | Min | Max),
            MetricKind::Rate => matches!(self, Rate),
            MetricKind::Trend => matches!(self, Avg | Min | Max | Med | Percentile(_)),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            _ => {
                let digits = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| s.strip_prefix('p'))
                    .ok_or(())?;
                let p: f64 = digits.trim().parse().map_err(|_| ())?;
                if !(0. ..=100.).contains(&p) {
                    return Err(());
                }
                Aggregation::Percentile(p)
            }
        };
        Ok(agg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }
}

// Longest symbols first so `<=` is not read as `<`.
const OPERATORS: [(&str, Comparison); 8] = [
    ("===", Comparison::Eq),
    ("!==", Comparison::Ne),
    ("<=", Comparison::Le),
    (">=", Comparison::Ge),
    ("==", Comparison::Eq),
    ("!=", Comparison::Ne),
    ("<", Comparison::Lt),
    (">", Comparison::Gt),
];

/// A parsed threshold expression such as `p(95)<500` or `rate>=0.99`.
///
/// Duration literals on the right-hand side (`500ms`, `1s`) are converted to milliseconds,
/// the unit trend metrics are recorded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
    source: String,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.bound)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for ThresholdExpr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        let invalid = |reason| ConfigError::InvalidThreshold {
            expression: source.to_string(),
            reason,
        };

        let start = source
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let rest = &source[start..];
        let (symbol, comparison) = OPERATORS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
            .ok_or_else(|| invalid("unknown comparison operator"))?;

        let lhs = source[..start].trim();
        let rhs = rest[symbol.len()..].trim();

        let aggregation = lhs
            .parse::<Aggregation>()
            .map_err(|_| invalid("unknown aggregation method"))?;
        let bound = parse_bound(rhs).ok_or_else(|| invalid("right-hand side is not a number"))?;

        Ok(Self {
            aggregation,
            comparison: *comparison,
            bound,
            source: source.to_string(),
        })
    }
}

fn parse_bound(rhs: &str) -> Option<f64> {
    match rhs.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        Ok(_) => None,
        Err(_) => humantime::parse_duration(rhs)
            .ok()
            .map(|d| d.as_secs_f64() * 1_000.),
    }
}

/// A threshold expression bound to the metric (or sub-metric) it judges.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: MetricKey,
    pub expr: ThresholdExpr,
    /// Stop the run as soon as this threshold fails.
    pub abort_on_fail: bool,
    /// Abort evaluation does not start before this much of the run has elapsed.
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn new(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            metric: metric.parse()?,
            expr: expression.parse()?,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }

    /// Checks the aggregation against the kind of the metric it targets.
    pub fn check_kind(&self, kind: MetricKind) -> Result<(), ConfigError> {
        if self.expr.aggregation.supported_by(kind) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedAggregation {
                metric: self.metric.to_string(),
                kind,
                aggregation: self.expr.aggregation,
            })
        }
    }
}
