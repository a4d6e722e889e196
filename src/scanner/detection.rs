//! Detection state and the announcement memo.
//!
//! The scanner moves between [`ScanPhase::Idle`], [`ScanPhase::Scanning`] and
//! [`ScanPhase::Detected`]. [`Detection`] interprets recognition results and
//! decides whether a name should be spoken, suppressing repeats of the name
//! that was announced last.

use serde::Serialize;

use crate::protocol::IdentifiedPerson;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Not scanning; the user has not started or has stopped.
    Idle,
    /// The scan loop is armed and frames are being captured.
    Scanning,
    /// A face was identified and scanning auto-paused until the user continues.
    Detected,
}

impl ScanPhase {
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Identified { name: String, announce: bool },
    NoMatch,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    detected: Option<String>,
    last_announced: Option<String>,
}

impl Detection {
    pub fn detected(&self) -> Option<&str> {
        self.detected.as_deref()
    }

    pub fn last_announced(&self) -> Option<&str> {
        self.last_announced.as_deref()
    }

    /// Apply one result. Only the first (most confident) person is read.
    pub fn observe(&mut self, people: &[IdentifiedPerson]) -> DetectionOutcome {
        let Some(person) = people.first() else {
            self.clear();
            return DetectionOutcome::NoMatch;
        };

        let name = person.person_name.clone();
        let announce = self.last_announced.as_deref() != Some(name.as_str());
        if announce {
            self.last_announced = Some(name.clone());
        }
        self.detected = Some(name.clone());
        DetectionOutcome::Identified { name, announce }
    }

    /// Forget both the displayed name and the announcement memo.
    pub fn clear(&mut self) {
        self.detected = None;
        self.last_announced = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> IdentifiedPerson {
        IdentifiedPerson {
            person_name: name.into(),
            confidence: None,
        }
    }

    #[test]
    fn repeat_name_is_not_announced_twice() {
        let mut detection = Detection::default();
        assert_eq!(
            detection.observe(&[person("Alice")]),
            DetectionOutcome::Identified { name: "Alice".into(), announce: true }
        );
        assert_eq!(
            detection.observe(&[person("Alice")]),
            DetectionOutcome::Identified { name: "Alice".into(), announce: false }
        );
        assert_eq!(
            detection.observe(&[person("Bob"), person("Alice")]),
            DetectionOutcome::Identified { name: "Bob".into(), announce: true }
        );
        assert_eq!(detection.last_announced(), Some("Bob"));
    }

    #[test]
    fn empty_result_clears_memo() {
        let mut detection = Detection::default();
        detection.observe(&[person("Alice")]);
        assert_eq!(detection.observe(&[]), DetectionOutcome::NoMatch);
        assert_eq!(detection.detected(), None);
        assert_eq!(detection.last_announced(), None);
        assert_eq!(
            detection.observe(&[person("Alice")]),
            DetectionOutcome::Identified { name: "Alice".into(), announce: true }
        );
    }
}
