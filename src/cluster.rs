// geoip-aggregator - IPv4 geolocation aggregation service
// Copyright (C) 2021  rumblefrog
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::population::PopulationEntry;

#[derive(Debug, Clone, Copy)]
struct Centroid {
    mean: f64,
}

/// Ordered centroid table keyed by ascending group id. The source
/// implementation iterates a hash map here, which makes assignment
/// nondeterministic between runs; an ordered container fixes that.
struct Centroids {
    means: Vec<Option<Centroid>>,
}

impl Centroids {
    fn initial(entries: &[PopulationEntry], groups: usize) -> Self {
        let largest = entries[0].count as f64;
        let unit = largest / groups as f64;

        let means = (0..groups)
            .map(|i| Some(Centroid { mean: (unit + 1.0) * i as f64 }))
            .collect();

        Self { means }
    }

    /// Group id whose centroid mean is nearest `count`. Ties favor the
    /// smallest group id, found by iterating ascending ids.
    fn nearest(&self, count: u64) -> usize {
        let mut best_id = 0;
        let mut best_dist = f64::MAX;

        for (id, centroid) in self.means.iter().enumerate() {
            let Some(centroid) = centroid else { continue };
            let dist = (centroid.mean - count as f64).abs();
            if dist < best_dist {
                best_dist = dist;
                best_id = id;
            }
        }

        best_id
    }

    /// Recomputes each group's mean from its current members. Groups
    /// with no members become unassignable (`None`) in later rounds.
    fn update(&mut self, entries: &[PopulationEntry]) {
        for (id, slot) in self.means.iter_mut().enumerate() {
            if slot.is_none() {
                continue;
            }

            let mut sum = 0.0;
            let mut count = 0u64;

            for entry in entries {
                if entry.group == id {
                    sum += entry.count as f64;
                    count += 1;
                }
            }

            *slot = if count > 0 {
                Some(Centroid { mean: sum / count as f64 })
            } else {
                None
            };
        }
    }
}

/// Assigns `entries[i].group` to a value in `[0, groups)` by
/// one-dimensional k-means on `count`. `entries` must be non-empty and
/// already sorted descending by `count` (the initial centroid spacing
/// depends on `entries[0]` holding the largest count). Runs one
/// initial assignment plus up to `max_iterations` refinement rounds,
/// stopping early once no entry changes group.
pub fn cluster(entries: &mut [PopulationEntry], groups: usize, max_iterations: usize) {
    if entries.is_empty() || groups == 0 {
        return;
    }

    let mut centroids = Centroids::initial(entries, groups);

    for entry in entries.iter_mut() {
        entry.group = centroids.nearest(entry.count);
    }
    centroids.update(entries);

    for _ in 0..max_iterations {
        let mut changed = 0usize;

        for entry in entries.iter_mut() {
            let new_group = centroids.nearest(entry.count);
            if new_group != entry.group {
                entry.group = new_group;
                changed += 1;
            }
        }

        centroids.update(entries);

        if changed == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(count: u64) -> PopulationEntry {
        PopulationEntry {
            name: count.to_string(),
            lat: 0.0,
            lon: 0.0,
            count,
            group: 0,
        }
    }

    #[test]
    fn assigns_every_entry_a_valid_group() {
        let mut entries: Vec<_> = [100, 90, 10, 9, 1].into_iter().map(entry).collect();
        cluster(&mut entries, 2, 20);

        for e in &entries {
            assert!(e.group < 2);
        }

        let high_group = entries[0].group;
        assert_eq!(entries[1].group, high_group);

        let low_group = entries[4].group;
        assert_ne!(low_group, high_group);
    }

    #[test]
    fn stable_across_reruns() {
        let base: Vec<_> = [100, 90, 10, 9, 1].into_iter().map(entry).collect();

        let mut a = base.clone();
        let mut b = base.clone();

        cluster(&mut a, 2, 20);
        cluster(&mut b, 2, 20);

        let groups_a: Vec<usize> = a.iter().map(|e| e.group).collect();
        let groups_b: Vec<usize> = b.iter().map(|e| e.group).collect();
        assert_eq!(groups_a, groups_b);
    }

    #[test]
    fn terminates_within_iteration_cap() {
        let mut entries: Vec<_> = (1..=50).rev().map(|c| entry(c as u64)).collect();
        cluster(&mut entries, 5, 3);

        for e in &entries {
            assert!(e.group < 5);
        }
    }
}
