//! Round-robin partition of a vector across chips

use std::ops::Range;

/// Batch sizes per chip. Global batch `k` lands on chip `k % C` as its
/// local batch `k / C`, so element ranges follow global batch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSplit {
    pub batches: Vec<Vec<u32>>,
}

impl TaskSplit {
    /// Partition `vec_size` elements over `num_chips` chips in batches of at
    /// most `max_batch`. A zero-size vector yields an empty split.
    pub fn new(vec_size: u32, num_chips: usize, max_batch: u32) -> Self {
        let mut batches = vec![Vec::new(); num_chips];
        if num_chips == 0 || max_batch == 0 {
            return Self { batches };
        }
        let mut remaining = vec_size;
        let mut chip = 0;
        while remaining > 0 {
            let size = remaining.min(max_batch);
            batches[chip].push(size);
            remaining -= size;
            chip = (chip + 1) % num_chips;
        }
        Self { batches }
    }

    #[inline]
    pub fn num_chips(&self) -> usize {
        self.batches.len()
    }

    /// Most batches any chip holds
    pub fn num_rounds(&self) -> usize {
        self.batches.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.batches.iter().flatten().map(|&b| b as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }

    /// Batch size of `chip` in `round`, if the chip takes part
    pub fn batch(&self, chip: usize, round: usize) -> Option<u32> {
        self.batches.get(chip)?.get(round).copied()
    }

    /// Chips that hold a batch in `round`
    pub fn active_chips(&self, round: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_chips()).filter(move |&chip| self.batch(chip, round).is_some())
    }

    /// Element range of a batch within the full vector
    pub fn element_range(&self, chip: usize, round: usize) -> Option<Range<usize>> {
        let size = self.batch(chip, round)? as usize;
        let global = round * self.num_chips() + chip;
        let start: usize = (0..global)
            .map(|k| self.batches[k % self.num_chips()][k / self.num_chips()] as usize)
            .sum();
        Some(start..start + size)
    }

    /// Every batch in global order as `(chip, round, size)`
    pub fn global_order(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        let chips = self.num_chips();
        (0..self.num_rounds() * chips).filter_map(move |k| {
            let (chip, round) = (k % chips, k / chips);
            self.batch(chip, round).map(|size| (chip, round, size))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let split = TaskSplit::new(5000, 2, 2048);
        assert_eq!(split.batches, vec![vec![2048, 904], vec![2048]]);
        assert_eq!(split.num_rounds(), 2);
        assert_eq!(split.total(), 5000);
    }

    #[test]
    fn test_small_vector_uses_one_chip() {
        let split = TaskSplit::new(3, 8, 2048);
        assert_eq!(split.batches[0], vec![3]);
        assert!(split.batches[1..].iter().all(Vec::is_empty));
        assert_eq!(split.active_chips(0).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_empty_vector() {
        let split = TaskSplit::new(0, 8, 2048);
        assert!(split.is_empty());
        assert_eq!(split.num_rounds(), 0);
        assert_eq!(split.global_order().count(), 0);
    }

    #[test]
    fn test_element_ranges_follow_global_order() {
        let split = TaskSplit::new(10, 3, 2);
        // global batches: c0 0..2, c1 2..4, c2 4..6, c0 6..8, c1 8..10
        assert_eq!(split.element_range(0, 0), Some(0..2));
        assert_eq!(split.element_range(1, 0), Some(2..4));
        assert_eq!(split.element_range(0, 1), Some(6..8));
        assert_eq!(split.element_range(1, 1), Some(8..10));
        assert_eq!(split.element_range(2, 1), None);
        let order: Vec<_> = split.global_order().map(|(c, r, _)| (c, r)).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1)]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_split_covers_vector(vec_size in 1u32..50_000, chips in 1usize..=16, max_batch in 1u32..=2048) {
                let split = TaskSplit::new(vec_size, chips, max_batch);
                prop_assert_eq!(split.total(), vec_size as u64);
                prop_assert!(split.batches.iter().flatten().all(|&b| b >= 1 && b <= max_batch));

                let counts: Vec<usize> = split.batches.iter().map(Vec::len).collect();
                let max = counts.iter().max().copied().unwrap_or(0);
                let min = counts.iter().min().copied().unwrap_or(0);
                prop_assert!(max - min <= 1);
            }

            #[test]
            fn test_element_ranges_tile(vec_size in 1u32..2_000, chips in 1usize..=8, max_batch in 8u32..=64) {
                let split = TaskSplit::new(vec_size, chips, max_batch);
                let mut next = 0;
                for (chip, round, size) in split.global_order() {
                    let range = split.element_range(chip, round).unwrap();
                    prop_assert_eq!(range.start, next);
                    prop_assert_eq!(range.len(), size as usize);
                    next = range.end;
                }
                prop_assert_eq!(next, vec_size as usize);
            }
        }
    }
}
