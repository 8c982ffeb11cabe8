//! Small numeric helpers shared by the operations. All functions return `None`
//! instead of NaN when the statistic is undefined.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub sum: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub fn summarize(values: &[f64]) -> Summary {
    let sum: f64 = values.iter().sum();
    Summary {
        count: values.len(),
        sum,
        mean: mean(values),
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Linear interpolation between closest ranks; `p` in `0..=100`, `sorted`
/// ascending.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

pub fn median(sorted: &[f64]) -> Option<f64> {
    percentile(sorted, 50.0)
}

/// Pearson correlation; `None` for fewer than two pairs or zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width buckets over `[min, max]`; the last bucket is closed on the
/// right. A constant series yields a single bucket.
pub fn histogram(values: &[f64], buckets: usize) -> Vec<Bucket> {
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };
    if buckets == 0 {
        return Vec::new();
    }
    if max - min <= f64::EPSILON {
        return vec![Bucket {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }
    let width = (max - min) / buckets as f64;
    let mut out: Vec<Bucket> = (0..buckets)
        .map(|i| Bucket {
            lower: min + width * i as f64,
            upper: if i + 1 == buckets {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for v in values {
        let idx = (((v - min) / width).floor() as usize).min(buckets - 1);
        out[idx].count += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{histogram, median, pearson, percentile, sorted, std_dev, summarize};

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert_eq!(percentile(&values, 25.0), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn summary_of_empty_is_defined() {
        let s = summarize(&[]);
        assert_eq!(s.count, 0);
        assert!(s.mean.is_none() && s.min.is_none() && s.max.is_none());
        let s = summarize(&[2.0, -1.0, 5.0]);
        assert_eq!((s.min, s.max), (Some(-1.0), Some(5.0)));
        assert_eq!(s.mean, Some(2.0));
    }

    #[test]
    fn pearson_handles_degenerate_series() {
        assert!(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).expect("r") > 0.999);
        assert!(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).expect("r") < -0.999);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }

    #[test]
    fn histogram_covers_every_value() {
        let values = sorted(&[0.0, 1.0, 2.0, 3.0, 4.0, 10.0]);
        let buckets = histogram(&values, 5);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 6);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[4].count, 1);
        assert_eq!(histogram(&[3.0, 3.0], 4).len(), 1);
        assert!(std_dev(&[1.0]).is_none());
    }
}
