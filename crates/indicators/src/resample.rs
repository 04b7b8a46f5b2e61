/// Down-samples base closes by `factor`, keeping every `factor`-th close counted
/// back from the latest one so the newest bar is always included.
pub fn resample_closes(closes: &[f64], factor: usize) -> Vec<f64> {
    let factor = factor.max(1);
    if factor == 1 {
        return closes.to_vec();
    }
    let mut out: Vec<f64> = closes.iter().rev().step_by(factor).copied().collect();
    out.reverse();
    out
}

/// Sums volume into buckets of `factor` bars aligned to the latest bar.
pub fn resample_volumes(volumes: &[f64], factor: usize) -> Vec<f64> {
    let factor = factor.max(1);
    let mut out: Vec<f64> = volumes.rchunks(factor).map(|c| c.iter().sum()).collect();
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_latest_close() {
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(resample_closes(&closes, 4), vec![2.0, 6.0, 10.0]);
        assert_eq!(resample_closes(&closes, 0), closes);
    }

    #[test]
    fn volumes_are_summed_per_bucket() {
        let volumes = [1.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(resample_volumes(&volumes, 2), vec![1.0, 2.0, 2.0]);
    }
}
