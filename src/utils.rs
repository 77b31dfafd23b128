use std::collections::HashSet;

/// Groups integers into maximal runs of consecutive values, in ascending order. Duplicates are
/// collapsed before grouping, and no run is ever empty.
pub fn continuous_runs(numbers: impl IntoIterator<Item = i32>) -> Vec<Vec<i32>> {
    let mut sorted: Vec<i32> = numbers.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs = Vec::new();
    let mut current: Vec<i32> = Vec::new();
    for n in sorted {
        match current.last() {
            Some(&last) if n != last + 1 => {
                runs.push(std::mem::take(&mut current));
                current.push(n);
            }
            _ => current.push(n),
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs
}

/// Up to `n` distinct non-zero values, largest first.
pub fn n_largest(values: &[i32], n: usize) -> Vec<i32> {
    let mut distinct = distinct_non_zero(values);
    distinct.sort_unstable_by(|a, b| b.cmp(a));
    distinct.truncate(n);
    distinct
}

/// Up to `n` distinct non-zero values, smallest first.
pub fn n_smallest(values: &[i32], n: usize) -> Vec<i32> {
    let mut distinct = distinct_non_zero(values);
    distinct.sort_unstable();
    distinct.truncate(n);
    distinct
}

// Ties collapse into a single entry, and zero never counts as a score.
fn distinct_non_zero(values: &[i32]) -> Vec<i32> {
    values
        .iter()
        .copied()
        .filter(|&v| v != 0)
        .collect::<HashSet<i32>>()
        .into_iter()
        .collect()
}
