use std::collections::HashMap;

/// A bidirectional dictionary for mapping between strings and dense integer IDs
///
/// IDs are assigned in insertion order, so iterating a dictionary always
/// yields entries in the order they were first seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    /// Map from string to ID
    str_to_id: HashMap<String, u32>,
    /// Map from ID to string
    id_to_str: Vec<String>,
}

impl Dictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        Self {
            str_to_id: HashMap::new(),
            id_to_str: Vec::new(),
        }
    }

    /// Get the number of entries in the dictionary
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    /// Returns `true` if the dictionary contains no entries
    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Get or create an ID for a string
    /// Returns the ID for the string, creating a new entry if it doesn't exist
    pub fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            let id = self.id_to_str.len() as u32;
            self.str_to_id.insert(s.to_string(), id);
            self.id_to_str.push(s.to_string());
            id
        }
    }

    /// Look up the ID of a string without inserting it
    pub fn get(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.id_to_str.get(id as usize).map(String::as_str)
    }

    pub fn contains(&self, s: &str) -> bool {
        self.str_to_id.contains_key(s)
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.str_to_id.clear();
        self.id_to_str.clear();
    }

    /// Iterate over all (string, id) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Dictionary {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for s in iter {
            dict.get_or_insert(s.as_ref());
        }
        dict
    }
}
