use crate::*;
use std::collections::HashSet;

/// A choice on the ballot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub id: u32,
    pub label: String,
}

/// The fixed list of candidates for an election, in ballot order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct CandidateList {
    candidates: Vec<Candidate>,
}

impl CandidateList {
    /// Build a list, checking ids and labels are unique and labels non-empty.
    pub fn new(candidates: Vec<Candidate>) -> Result<Self, Error> {
        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for candidate in &candidates {
            if candidate.label.trim().is_empty() {
                return Err(Error::invalid(format!(
                    "candidate {} has an empty label",
                    candidate.id
                )));
            }
            if !ids.insert(candidate.id) {
                return Err(Error::invalid(format!(
                    "duplicate candidate id {}",
                    candidate.id
                )));
            }
            if !labels.insert(candidate.label.as_str()) {
                return Err(Error::invalid(format!(
                    "duplicate candidate label '{}'",
                    candidate.label
                )));
            }
        }
        Ok(CandidateList { candidates })
    }

    /// Number the labels from 1 in the order given
    pub fn from_labels<I, L>(labels: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let candidates = labels
            .into_iter()
            .zip(1u32..)
            .map(|(label, id)| Candidate {
                id,
                label: label.into(),
            })
            .collect();
        Self::new(candidates)
    }

    pub fn get(&self, id: u32) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_labels_numbers_from_one() {
        let list = CandidateList::from_labels(["Ada", "Grace", "Edsger"]).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1).unwrap().label, "Ada");
        assert_eq!(list.get(3).unwrap().label, "Edsger");
        assert!(list.get(0).is_none());
        assert!(list.get(4).is_none());
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        assert!(CandidateList::from_labels(["Ada", "Ada"]).is_err());
        assert!(CandidateList::from_labels(["Ada", "  "]).is_err());
        let dup_ids = vec![
            Candidate {
                id: 7,
                label: "Ada".to_owned(),
            },
            Candidate {
                id: 7,
                label: "Grace".to_owned(),
            },
        ];
        assert!(matches!(
            CandidateList::new(dup_ids),
            Err(Error::InvalidParameter(_))
        ));
    }
}
