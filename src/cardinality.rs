//! Process-wide tag cardinality safety valve.
//!
//! Every distinct `name:value` pair observed on any line in any namespace is
//! remembered for the life of the process. The set never shrinks, and
//! reaching the ceiling is fatal for the whole process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::FatalError;

#[derive(Clone)]
pub struct TagCardinalityValve {
    seen: Arc<Mutex<HashSet<String>>>,
    ceiling: usize,
}

impl TagCardinalityValve {
    pub fn new(ceiling: usize) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashSet::new())),
            ceiling,
        }
    }

    /// Record one line's full tag set. Returns the fatal variant once the
    /// ceiling is reached; the caller forwards it to the top-level handler
    /// rather than exiting here.
    pub fn observe(&self, tags: &[String]) -> Result<(), FatalError> {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for tag in tags {
            if !seen.contains(tag) {
                seen.insert(tag.clone());
            }
        }

        if seen.len() >= self.ceiling {
            let mut snapshot: Vec<String> = seen.iter().cloned().collect();
            snapshot.sort();
            return Err(FatalError::TagCardinality {
                count: seen.len(),
                ceiling: self.ceiling,
                tags: snapshot,
            });
        }
        Ok(())
    }

    /// Current number of distinct tags observed.
    pub fn size(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[&str]) -> Vec<String> {
        pairs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_below_ceiling_processing_continues() {
        let valve = TagCardinalityValve::new(5);
        assert!(valve.observe(&tags(&["status:200", "method:GET"])).is_ok());
        assert!(valve.observe(&tags(&["status:200", "method:GET"])).is_ok());
        assert_eq!(valve.size(), 2);
    }

    #[test]
    fn test_ceiling_trips_the_valve() {
        let valve = TagCardinalityValve::new(3);
        assert!(valve.observe(&tags(&["status:200", "method:GET"])).is_ok());
        let err = valve
            .observe(&tags(&["status:503"]))
            .expect_err("ceiling reached");
        match err {
            FatalError::TagCardinality { count, ceiling, tags } => {
                assert_eq!(count, 3);
                assert_eq!(ceiling, 3);
                assert_eq!(tags.len(), 3);
            }
            other => panic!("unexpected fatal: {:?}", other),
        }
    }

    #[test]
    fn test_set_is_shared_across_clones() {
        let valve = TagCardinalityValve::new(10);
        let other = valve.clone();
        valve.observe(&tags(&["a:1"])).unwrap();
        other.observe(&tags(&["b:2"])).unwrap();
        assert_eq!(valve.size(), 2);
        assert_eq!(other.size(), 2);
    }

    #[test]
    fn test_set_is_monotonic() {
        let valve = TagCardinalityValve::new(100);
        for i in 0..50 {
            valve.observe(&[format!("uri:/page/{}", i)]).unwrap();
        }
        assert_eq!(valve.size(), 50);
        valve.observe(&[String::from("uri:/page/0")]).unwrap();
        assert_eq!(valve.size(), 50);
    }
}
