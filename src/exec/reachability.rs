//! 有界可达性搜索：按步数预算做广度优先展开，访问集以 `Marking::state_key` 去重。
use std::collections::{HashMap, VecDeque};

use crate::net::TransitionId;

use super::firing::Execution;
use super::marking::Marking;

/// Statistics of one bounded search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub explored: usize,
    pub rejected: usize,
    /// The step budget ran out before the frontier was exhausted.
    pub truncated: bool,
}

impl Execution<'_> {
    /// Whether `target` is reachable from the current marking in at most `max_steps` firings.
    pub fn can_reach(&self, target: &Marking, max_steps: usize) -> bool {
        self.find_path(target, max_steps).is_some()
    }

    /// Shortest firing sequence from the current marking to `target`, if one exists within budget.
    pub fn find_path(&self, target: &Marking, max_steps: usize) -> Option<Vec<TransitionId>> {
        self.search(target, max_steps).0
    }

    pub fn search(
        &self,
        target: &Marking,
        max_steps: usize,
    ) -> (Option<Vec<TransitionId>>, SearchStats) {
        let model = self.model();
        let target_key = target.state_key(model);
        let start = self.marking().clone();
        let start_key = start.state_key(model);
        let mut stats = SearchStats::default();

        if start_key == target_key {
            return (Some(Vec::new()), stats);
        }

        // key -> (predecessor key, transition)
        let mut parents: HashMap<String, Option<(String, TransitionId)>> = HashMap::new();
        parents.insert(start_key.clone(), None);
        let mut queue = VecDeque::new();
        queue.push_back((start, start_key, 0usize));

        while let Some((marking, key, depth)) = queue.pop_front() {
            stats.explored += 1;
            if depth >= max_steps {
                stats.truncated = true;
                continue;
            }
            for transition in model.transitions().indices() {
                if !self.is_enabled_in(&marking, transition) {
                    continue;
                }
                let next = match self.successor(&marking, transition) {
                    Ok(next) => next,
                    Err(err) => {
                        log::debug!("search skips {:?}: {}", transition, err);
                        stats.rejected += 1;
                        continue;
                    }
                };
                let next_key = next.state_key(model);
                if parents.contains_key(&next_key) {
                    continue;
                }
                parents.insert(next_key.clone(), Some((key.clone(), transition)));
                if next_key == target_key {
                    log::debug!(
                        "target reached after exploring {} markings",
                        stats.explored
                    );
                    return (Some(rebuild_path(&parents, next_key)), stats);
                }
                queue.push_back((next, next_key, depth + 1));
            }
        }

        log::debug!(
            "target not reached within {} steps ({} markings explored)",
            max_steps,
            stats.explored
        );
        (None, stats)
    }
}

fn rebuild_path(
    parents: &HashMap<String, Option<(String, TransitionId)>>,
    mut key: String,
) -> Vec<TransitionId> {
    let mut path = Vec::new();
    while let Some(Some((parent, transition))) = parents.get(&key) {
        path.push(*transition);
        key = parent.clone();
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Model, ModelBuilder, Place, Transition};

    fn cycle() -> Model {
        ModelBuilder::new("cycle")
            .place(Place::token("P1", 5))
            .place(Place::token("P2", 0))
            .transition(Transition::new("forward"))
            .transition(Transition::new("back"))
            .flow("P1", "forward")
            .flow("forward", "P2")
            .flow("P2", "back")
            .flow("back", "P1")
            .invariant("conservation", "P1 + P2 == 5")
            .build()
            .unwrap()
    }

    #[test]
    fn finds_shortest_path_within_budget() {
        let model = cycle();
        let exec = Execution::new(&model);
        let p1 = model.place_id("P1").unwrap();
        let p2 = model.place_id("P2").unwrap();
        let forward = model.transition_id("forward").unwrap();

        let target = exec.marking().clone().with_tokens(p1, 2).with_tokens(p2, 3);
        assert_eq!(exec.find_path(&target, 5), Some(vec![forward; 3]));
        assert!(exec.can_reach(&target, 3));
        assert!(!exec.can_reach(&target, 2));
        assert!(exec.can_reach(exec.marking(), 0));
    }

    #[test]
    fn unreachable_markings_exhaust_the_frontier() {
        let model = cycle();
        let exec = Execution::new(&model);
        let p1 = model.place_id("P1").unwrap();
        let target = exec.marking().clone().with_tokens(p1, 6);
        let (path, stats) = exec.search(&target, 50);
        assert_eq!(path, None);
        assert_eq!(stats.explored, 6);
        assert!(!stats.truncated);
    }

    #[test]
    fn search_does_not_disturb_the_execution() {
        let model = cycle();
        let exec = Execution::new(&model);
        let p2 = model.place_id("P2").unwrap();
        let target = exec.marking().clone().with_tokens(p2, 5);
        let _ = exec.find_path(&target, 10);
        assert_eq!(exec.sequence(), 0);
        assert_eq!(exec.marking(), &Marking::initial(&model));
    }

    #[test]
    fn large_counts_are_explored_without_key_collisions() {
        let model = ModelBuilder::new("counter")
            .place(Place::token("src", 400))
            .place(Place::token("dst", 0))
            .transition(Transition::new("move"))
            .flow("src", "move")
            .flow("move", "dst")
            .build()
            .unwrap();
        let exec = Execution::new(&model);
        let src = model.place_id("src").unwrap();
        let dst = model.place_id("dst").unwrap();
        let target = exec.marking().clone().with_tokens(src, 0).with_tokens(dst, 400);
        let path = exec.find_path(&target, 400).unwrap();
        assert_eq!(path.len(), 400);
    }
}
